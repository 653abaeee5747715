// trading-common/src/lib.rs
// Exchange-agnostic market data shared between the connectivity layer and its consumers

pub mod data;

pub use data::types::{Candle, DataError, DataResult, Fill, L2Book, Level, Side, UserFills};
