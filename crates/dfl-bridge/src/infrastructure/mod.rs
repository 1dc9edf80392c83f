//! Infrastructure layer for dfl-bridge.
//!
//! Everything that touches a socket, a timer, or the filesystem lives here.
//!
//! # Responsibilities
//!
//! - [`obs_conn`] – the single connection to OBS: handshake, request
//!   correlation, event intake, reconnect.
//! - [`relay_link`] – the outbound host connection to the relay service.
//! - [`ws_server`] – the local endpoint for direct WebSocket clients.
//! - [`config_file`] – reading the optional TOML configuration file.
//! - [`shutdown`] – the process-wide stop signal every loop listens to.
//!
//! # What does NOT belong here?
//!
//! - Command translation and routing (that is the application layer)
//! - Wire formats (those live in `dfl-core`)
//! - Flag parsing (that is done in `main.rs`)

pub mod config_file;
pub mod obs_conn;
pub mod relay_link;
pub mod shutdown;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use obs_conn::{LinkState, ObsClient, ObsClientOptions};
pub use relay_link::{RelayLink, RelayLinkOptions, RelayState};
pub use shutdown::Shutdown;
pub use ws_server::{run_server, ClientSettings};
