// trading-core/src/lib.rs
// Hyperliquid connectivity: streaming supervisor, signed REST, rate limits,
// asset directory and the timer registry they share.

pub mod config;
pub mod exchange;
pub mod runtime;

// Re-export trading-common for convenience
pub use trading_common::data;
