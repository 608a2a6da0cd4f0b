//! Application Services
//!
//! - [`StreamRegistry`]: multiplexes subscribers onto one connection per key
//! - `Connection`: per-key state machine driving transport and reconnects

mod connection;
mod registry;

pub use connection::{ConnectionInfo, ConnectionPhase};
pub use registry::{
    DEFAULT_COUNT, DEFAULT_INTERVAL, RegistryConfig, RegistryStats, StreamCapabilities,
    StreamRegistry, SubscribeOptions, Subscription,
};
