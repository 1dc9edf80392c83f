//! Envelopes exchanged with the remote relay service.
//!
//! The relay pairs this bridge (the *host*) with a remote controller that
//! registered under the same join code, then forwards messages verbatim in
//! both directions.  Every envelope is a JSON object with a `"type"` field:
//!
//! ```json
//! {"type":"register","role":"host","code":"K7MXQ2PA"}
//! {"type":"command","method":"Scene","params":{"target":"Intro"}}
//! {"type":"obs_event","eventType":"RecordStateChanged","eventData":{"outputActive":true}}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles the discriminant.  An
//! unknown `type` fails to decode; the link logs it and keeps going.  A
//! `command` envelope that fails to decode is reported separately as
//! [`RelayProtocolError::InvalidCommand`] so the controller can be told.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::command::{Command, CommandKind, CommandResult};
use crate::protocol::obs::{InputEntry, ObsEvent, SceneEntry};

/// A relay frame that could not be understood.  Never fatal.
#[derive(Debug, Error)]
pub enum RelayProtocolError {
    #[error("unrecognised relay envelope: {0}")]
    Decode(#[from] serde_json::Error),

    /// A `command` envelope with an unknown method or mistyped params.
    #[error("invalid command: {0}")]
    InvalidCommand(#[source] serde_json::Error),
}

/// Which side of the pairing a connection represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayRole {
    Host,
    Client,
}

/// Command vocabulary used by remote controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMethod {
    Record,
    Stream,
    Scene,
    Mute,
    Filter,
    Visibility,
}

impl RelayMethod {
    /// The abstract command kind this method maps to.
    pub fn kind(self) -> CommandKind {
        match self {
            Self::Record => CommandKind::Record,
            Self::Stream => CommandKind::Stream,
            Self::Scene => CommandKind::Scene,
            Self::Mute => CommandKind::Mute,
            Self::Filter => CommandKind::Filter,
            Self::Visibility => CommandKind::Visibility,
        }
    }
}

/// Arguments of a relay `command` envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Explicit state; older controllers send it as `enabled`.
    #[serde(default, alias = "enabled", skip_serializing_if = "Option::is_none")]
    pub value: Option<bool>,
}

/// Snapshot of OBS state pushed to a newly connected remote controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsSnapshot {
    pub scenes: Vec<SceneEntry>,
    pub inputs: Vec<InputEntry>,
    /// Every input plus every source placed in any scene, first seen first.
    #[serde(default)]
    pub all_sources: Vec<String>,
    pub current_scene: String,
    /// Mute flag per input name.
    #[serde(default)]
    pub mute_states: BTreeMap<String, bool>,
    /// Enabled flag per item of the current scene, keyed `<scene>-<itemId>`.
    #[serde(default)]
    pub visibility_states: BTreeMap<String, bool>,
    #[serde(rename = "rec")]
    pub recording: bool,
    #[serde(rename = "str")]
    pub streaming: bool,
}

/// Key of one entry in [`ObsSnapshot::visibility_states`].
pub fn visibility_key(scene: &str, scene_item_id: i64) -> String {
    format!("{scene}-{scene_item_id}")
}

/// Recording and streaming flags, answered to `request_status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStatus {
    #[serde(rename = "rec")]
    pub recording: bool,
    #[serde(rename = "str")]
    pub streaming: bool,
}

/// Every envelope type that travels over the relay link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEnvelope {
    /// Sent by the bridge immediately after the socket opens.
    Register { role: RelayRole, code: String },

    /// Liveness probe, in either direction.
    Ping,

    /// Reply to [`RelayEnvelope::Ping`].
    Pong,

    /// A command from the remote controller.
    Command {
        method: RelayMethod,
        #[serde(default)]
        params: RelayParams,
    },

    /// The answer to a [`RelayEnvelope::Command`].
    Result(CommandResult),

    /// A control-plane event forwarded to the remote controller.
    ObsEvent(ObsEvent),

    /// Full state snapshot forwarded to the remote controller.
    ObsData(ObsSnapshot),

    /// The relay paired a controller with this bridge.
    PeerConnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// The controller asks for a fresh snapshot.
    RequestUpdate,

    /// The controller asks for the recording and streaming flags only.
    RequestStatus,

    /// Reply to [`RelayEnvelope::RequestStatus`].
    ObsStatus(OutputStatus),

    /// The relay accepted the registration; no controller yet.
    Waiting {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// The relay paired this connection with an existing peer.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// The relay reports a problem (e.g. the code already has a host).
    Error {
        #[serde(default)]
        message: String,
    },
}

impl RelayEnvelope {
    /// Builds the host registration envelope for `code`.
    pub fn register_host(code: impl Into<String>) -> Self {
        Self::Register {
            role: RelayRole::Host,
            code: code.into(),
        }
    }

    /// Short name of the variant for log lines (never includes payloads).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Command { .. } => "command",
            Self::Result(_) => "result",
            Self::ObsEvent(_) => "obs_event",
            Self::ObsData(_) => "obs_data",
            Self::PeerConnected { .. } => "peer_connected",
            Self::RequestUpdate => "request_update",
            Self::RequestStatus => "request_status",
            Self::ObsStatus(_) => "obs_status",
            Self::Waiting { .. } => "waiting",
            Self::Connected { .. } => "connected",
            Self::Error { .. } => "error",
        }
    }

    /// Decodes one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayProtocolError::Decode`] for malformed JSON or an
    /// unknown `type`, and [`RelayProtocolError::InvalidCommand`] for a
    /// `command` envelope whose method or params do not decode.
    pub fn decode(text: &str) -> Result<Self, RelayProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let is_command = value.get("type").and_then(Value::as_str) == Some("command");
        serde_json::from_value(value).map_err(|e| {
            if is_command {
                RelayProtocolError::InvalidCommand(e)
            } else {
                RelayProtocolError::Decode(e)
            }
        })
    }

    /// Encodes the envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayProtocolError::Decode`] if serialisation fails.
    pub fn encode(&self) -> Result<String, RelayProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Converts a relay command into the abstract [`Command`].
///
/// No validation happens here; the translator rejects incomplete commands so
/// that every failure is reported the same way regardless of the sink.
pub fn command_from_relay(method: RelayMethod, params: RelayParams, timestamp: i64) -> Command {
    Command {
        kind: method.kind(),
        target: params.target,
        filter: params.filter,
        value: params.value,
        timestamp,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
