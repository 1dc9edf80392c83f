//! Envelopes exchanged with local WebSocket clients.
//!
//! Every frame is `{"type": ..., "payload": ...}`:
//!
//! ```json
//! {"type":"command","payload":{"kind":"mute","target":"Mic"}}
//! {"type":"result","payload":{"success":true,"command":{"kind":"mute","target":"Mic"},"timestamp":1700000000000}}
//! {"type":"subscribe"}
//! ```
//!
//! Decoding happens in two steps so that the bridge can tell a frame it does
//! not understand at all ("invalid message format") apart from a well-formed
//! `command` whose payload is wrong ("invalid command: ...").

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::command::{Command, CommandResult};
use crate::protocol::obs::ObsEvent;

/// A client frame that could not be turned into a [`ClientEnvelope`].
#[derive(Debug, Error)]
pub enum ClientProtocolError {
    /// Not JSON, or no string `type` field.
    #[error("invalid message format")]
    InvalidFormat,

    /// A `command` frame whose payload is not a valid command.
    #[error("invalid command: {0}")]
    InvalidCommand(#[source] serde_json::Error),

    /// A well-formed frame with a `type` the bridge does not handle.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Body of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// Every envelope type on the direct-client socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Command(Command),
    Result(CommandResult),
    Subscribe,
    Unsubscribe,
    Ping,
    Pong,
    Error(ErrorPayload),
    /// A control-plane event, delivered only to subscribed clients.
    Event(ObsEvent),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl ClientEnvelope {
    /// Builds an `error` envelope.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            error: message.into(),
        })
    }

    /// Decodes one text frame from a client.
    ///
    /// Payloads of `subscribe`, `unsubscribe`, `ping`, and `pong` are ignored.
    ///
    /// # Errors
    ///
    /// See [`ClientProtocolError`] for the three failure classes.
    pub fn decode(text: &str) -> Result<Self, ClientProtocolError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|_| ClientProtocolError::InvalidFormat)?;

        match raw.kind.as_str() {
            "command" => serde_json::from_value(raw.payload)
                .map(Self::Command)
                .map_err(ClientProtocolError::InvalidCommand),
            "subscribe" => Ok(Self::Subscribe),
            "unsubscribe" => Ok(Self::Unsubscribe),
            "ping" => Ok(Self::Ping),
            "pong" => Ok(Self::Pong),
            _ => Err(ClientProtocolError::UnknownType(raw.kind)),
        }
    }

    /// Encodes the envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Fails only if a payload cannot be represented as JSON.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
