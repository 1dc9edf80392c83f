//! Application layer for dfl-bridge.
//!
//! Turns abstract [`dfl_core::Command`]s into OBS requests and routes the
//! answers and events back to whoever should see them.  Everything here
//! reaches OBS through the [`ControlPlane`] trait, never through a socket.

pub mod executor;
pub mod router;
pub mod snapshot;
pub mod translator;

pub use executor::{CommandError, CommandExecutor, ControlPlane, ObsRequest, RequestError};
pub use router::{EventPublisher, EventRouter, SinkId};
pub use snapshot::{collect_output_status, collect_snapshot};
pub use translator::{translate, ControlRequest};
