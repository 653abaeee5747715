// trading-core/src/exchange/mod.rs

pub mod connector;
pub mod directory;
pub mod errors;
pub mod rate_limit;
pub mod rest;
pub mod signing;
pub mod types;
pub mod utils;
pub mod wallet;
pub mod ws;

pub use connector::{AccountState, HyperliquidConnector, OrderKind, OrderRequest, Position};
pub use directory::{AssetDirectory, AssetMapping, DirectoryConfig, UniverseSource};
pub use errors::{ExchangeError, SigningError, ValidationError};
pub use rate_limit::{BucketConfig, RateClass, RateLimiter, RateLimiterConfig};
pub use rest::{ExchangeRestClient, RestConfig};
pub use signing::{action_hash, sign_l1_action, ActionSigner, Network, NonceGenerator};
pub use wallet::{HyperliquidWallet, Signature};
pub use ws::{ConnectionState, ConnectionSupervisor, StreamEvent, Subscription, SupervisorConfig};
