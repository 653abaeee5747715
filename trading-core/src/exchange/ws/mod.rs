// exchange/ws/mod.rs
// Streaming connection: frames, state machine and the supervising task.

pub mod messages;
pub mod state;
pub mod supervisor;

pub use messages::{ChannelKind, Inbound, StreamEvent, Subscription};
pub use state::{backoff_delay, BackoffPolicy, ConnectionState, MessageBuffer, SupervisorCore};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
