//! # dfl-core
//!
//! Shared library for the DockForLife bridge containing the three JSON wire
//! protocols the bridge speaks and the domain types that flow between them.
//!
//! It has zero dependencies on sockets, async runtimes, or OS APIs, so every
//! type here can be unit-tested without a network.
//!
//! # Architecture overview (for beginners)
//!
//! DockForLife lets a phone or tablet operate an OBS instance it cannot reach
//! directly.  A small bridge process runs next to OBS, talks to OBS over its
//! local WebSocket control API, and relays commands from remote controllers.
//!
//! This crate (`dfl-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How JSON travels on each link:
//!   - `obs`: the control-plane frames (`{op, d}`) exchanged with OBS.
//!   - `relay`: the `{type, ...}` envelopes exchanged with the relay service.
//!   - `client`: the `{type, payload}` envelopes exchanged with local clients.
//!
//! - **`domain`** – Pure business logic: the abstract [`Command`] a controller
//!   submits, the [`CommandResult`] it gets back, the [`JoinCode`] that pairs a
//!   remote controller with this bridge, and the advisory [`SceneCache`].

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `dfl_core::Command` instead of `dfl_core::domain::command::Command`.
pub use domain::command::{Command, CommandKind, CommandResult, ValidationError};
pub use domain::join_code::{JoinCode, JoinCodeError};
pub use domain::scene_cache::{Reconciliation, SceneCache};
pub use protocol::obs::{ObsEvent, ObsProtocolError};
pub use protocol::request_id::RequestIdCounter;
