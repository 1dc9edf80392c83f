//! Wire protocols spoken by the bridge.
//!
//! ```text
//! local client ──client──┐
//!                        ├── bridge ──obs──► OBS
//! relay peer  ───relay───┘
//! ```

pub mod client;
pub mod obs;
pub mod relay;
pub mod request_id;

pub use client::{ClientEnvelope, ClientProtocolError, ErrorPayload};
pub use obs::{ObsEvent, ObsMessage, ObsProtocolError, OpCode};
pub use relay::{
    ObsSnapshot, OutputStatus, RelayEnvelope, RelayMethod, RelayParams, RelayProtocolError,
    RelayRole,
};
pub use request_id::RequestIdCounter;
