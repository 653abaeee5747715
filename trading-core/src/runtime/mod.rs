// runtime/mod.rs

pub mod timers;

pub use timers::{TimerKind, TimerMetadata, TimerRegistry, TimerRegistryConfig};
