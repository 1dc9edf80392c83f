//! Domain layer for dfl-bridge.
//!
//! Pure types with no dependencies on I/O, networking, or async runtimes.
//! The command vocabulary itself lives in `dfl-core` because the wire
//! protocols share it; what remains here is the bridge's own configuration.

pub mod config;

pub use config::{relay_endpoint_url, BridgeConfig};
