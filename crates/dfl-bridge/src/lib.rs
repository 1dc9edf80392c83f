//! dfl-bridge library crate.
//!
//! This crate connects a local OBS instance (through its WebSocket control
//! API) to remote controllers, either through a relay service that pairs the
//! two sides by join code, or through a local WebSocket endpoint that clients
//! on the same network can reach directly.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! relay peer (JSON envelopes)      local client (JSON {type, payload})
//!         ↕                                 ↕
//! [dfl-bridge]
//!   ├── domain/           BridgeConfig
//!   ├── application/
//!   │     ├── translator/ Command → ControlRequest (pure)
//!   │     ├── executor/   ControlRequest → OBS requests, scene cache
//!   │     ├── router/     event fan-out, per-sink command workers
//!   │     └── snapshot/   one-shot OBS state for new relay peers
//!   └── infrastructure/
//!         ├── obs_conn/   OBS handshake, request correlation, reconnect
//!         ├── relay_link/ relay registration, heartbeat, reconnect
//!         ├── ws_server/  local WebSocket accept loop
//!         ├── config_file/ optional TOML configuration
//!         └── shutdown/   process-wide stop signal
//!         ↕
//! OBS  (obs-websocket v5, default ws://127.0.0.1:4455)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `dfl-core`; it reaches OBS only
//!   through the [`application::ControlPlane`] trait, so it can be tested
//!   with a mock.
//! - `infrastructure` depends on every other layer plus `tokio` and
//!   `tokio-tungstenite`.

/// Domain layer: static runtime configuration.
pub mod domain;

/// Application layer: command translation, execution and event routing.
pub mod application;

/// Infrastructure layer: OBS connection, relay link and local WebSocket server.
pub mod infrastructure;
