//! Control-plane frames exchanged with OBS (obs-websocket protocol v5).
//!
//! Every frame is a JSON object with an operation code and a data object:
//!
//! ```json
//! {"op":6,"d":{"requestType":"ToggleRecord","requestId":"req-1"}}
//! ```
//!
//! # Operation codes
//!
//! | op | Name                   | Direction     |
//! |----|------------------------|---------------|
//! | 0  | Hello                  | OBS → bridge  |
//! | 1  | Identify               | bridge → OBS  |
//! | 2  | Identified             | OBS → bridge  |
//! | 3  | Reidentify             | bridge → OBS  |
//! | 5  | Event                  | OBS → bridge  |
//! | 6  | Request                | bridge → OBS  |
//! | 7  | RequestResponse        | OBS → bridge  |
//! | 8  | RequestBatch           | bridge → OBS  |
//! | 9  | RequestBatchResponse   | OBS → bridge  |
//!
//! The protocol is append-only: an op code this module does not know decodes
//! to [`ObsMessage::Other`] instead of an error, so a newer OBS never breaks
//! the bridge.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// RPC version the bridge asks for in `Identify`.
pub const RPC_VERSION: u32 = 1;

/// `eventSubscriptions` bitmask for every non-high-volume event category
/// (general, config, scenes, inputs, transitions, filters, outputs, scene
/// items, media inputs, vendors, UI).
pub const EVENT_SUBSCRIPTION_ALL: u32 = 0x7FF;

/// Event emitted by OBS whenever the program scene changes.
pub const SCENE_CHANGED_EVENT: &str = "CurrentProgramSceneChanged";

/// Errors raised while encoding or decoding control-plane frames.
///
/// A decode error means one frame is dropped; it never tears down the link.
#[derive(Debug, Error)]
pub enum ObsProtocolError {
    /// The text was not a JSON `{op, d}` object.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The frame had a known op code but its `d` object did not fit.
    #[error("invalid payload for op {op}: {source}")]
    BadPayload {
        op: u8,
        #[source]
        source: serde_json::Error,
    },

    /// A response payload did not have the expected shape.
    #[error("unexpected {request_type} response: {source}")]
    BadResponse {
        request_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// A frame could not be serialised.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

// ── Op codes ──────────────────────────────────────────────────────────────────

/// Operation codes of the obs-websocket v5 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Hello = 0,
    Identify = 1,
    Identified = 2,
    Reidentify = 3,
    Event = 5,
    Request = 6,
    RequestResponse = 7,
    RequestBatch = 8,
    RequestBatchResponse = 9,
}

impl OpCode {
    /// Maps a raw op value to a known code.
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            0 => Self::Hello,
            1 => Self::Identify,
            2 => Self::Identified,
            3 => Self::Reidentify,
            5 => Self::Event,
            6 => Self::Request,
            7 => Self::RequestResponse,
            8 => Self::RequestBatch,
            9 => Self::RequestBatchResponse,
            _ => return None,
        })
    }
}

// ── Frame payloads ────────────────────────────────────────────────────────────

/// Greeting OBS sends as soon as the socket opens (op 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    /// Present only when OBS has authentication enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthChallenge>,
}

/// Challenge and salt for the authentication string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// The bridge's reply to `Hello` (op 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

/// Confirmation that the session is ready (op 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

/// An event pushed by OBS (op 5).
///
/// The same shape is forwarded verbatim to relay peers and local clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsEvent {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Value,
}

impl ObsEvent {
    /// Returns the new scene name if this is a program-scene change.
    pub fn scene_change(&self) -> Option<&str> {
        if self.event_type != SCENE_CHANGED_EVENT {
            return None;
        }
        self.event_data.get("sceneName").and_then(Value::as_str)
    }
}

/// A request sent to OBS (op 6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

/// Outcome block of a [`RequestResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// OBS's answer to one [`Request`] (op 7), matched by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ObsMessage {
    Hello(Hello),
    Identified(Identified),
    Event(ObsEvent),
    RequestResponse(RequestResponse),
    /// A valid frame the bridge does not act on (unknown or outbound-only op).
    Other(u8),
}

// ── Encoding / decoding ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct OutFrame<'a, T> {
    op: u8,
    d: &'a T,
}

#[derive(Deserialize)]
struct InFrame {
    op: u8,
    #[serde(default)]
    d: Value,
}

/// Serialises `d` as a frame with operation code `op`.
///
/// # Errors
///
/// Returns [`ObsProtocolError::Encode`] if `d` cannot be serialised.
pub fn encode_frame<T: Serialize>(op: OpCode, d: &T) -> Result<String, ObsProtocolError> {
    serde_json::to_string(&OutFrame { op: op as u8, d }).map_err(ObsProtocolError::Encode)
}

/// Serialises an `Identify` frame.
///
/// # Errors
///
/// Returns [`ObsProtocolError::Encode`] if serialisation fails.
pub fn encode_identify(identify: &Identify) -> Result<String, ObsProtocolError> {
    encode_frame(OpCode::Identify, identify)
}

/// Serialises a `Request` frame.
///
/// # Errors
///
/// Returns [`ObsProtocolError::Encode`] if serialisation fails.
pub fn encode_request(request: &Request) -> Result<String, ObsProtocolError> {
    encode_frame(OpCode::Request, request)
}

/// Decodes one inbound text frame.
///
/// # Errors
///
/// Returns [`ObsProtocolError::Malformed`] when the text is not an `{op, d}`
/// object and [`ObsProtocolError::BadPayload`] when a known op carries a data
/// object of the wrong shape.  Unknown op codes are **not** errors.
pub fn decode_frame(text: &str) -> Result<ObsMessage, ObsProtocolError> {
    let frame: InFrame = serde_json::from_str(text).map_err(ObsProtocolError::Malformed)?;
    let op = frame.op;
    let bad = |source| ObsProtocolError::BadPayload { op, source };

    Ok(match OpCode::from_u8(op) {
        Some(OpCode::Hello) => ObsMessage::Hello(serde_json::from_value(frame.d).map_err(bad)?),
        Some(OpCode::Identified) => {
            ObsMessage::Identified(serde_json::from_value(frame.d).map_err(bad)?)
        }
        Some(OpCode::Event) => ObsMessage::Event(serde_json::from_value(frame.d).map_err(bad)?),
        Some(OpCode::RequestResponse) => {
            ObsMessage::RequestResponse(serde_json::from_value(frame.d).map_err(bad)?)
        }
        _ => ObsMessage::Other(op),
    })
}

/// Computes the `Identify.authentication` string.
///
/// ```text
/// secret = base64(sha256(password + salt))
/// auth   = base64(sha256(secret + challenge))
/// ```
pub fn authentication_string(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

// ── Response payloads ─────────────────────────────────────────────────────────
//
// Only the fields the bridge reads are modelled; OBS sends more.

/// Decodes a response payload into `T`.  A missing payload is treated as `{}`.
///
/// # Errors
///
/// Returns [`ObsProtocolError::BadResponse`] if the payload does not fit `T`.
pub fn parse_response<T: DeserializeOwned>(
    request_type: &str,
    data: Value,
) -> Result<T, ObsProtocolError> {
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|source| ObsProtocolError::BadResponse {
        request_type: request_type.to_string(),
        source,
    })
}

/// `GetCurrentProgramScene`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentProgramScene {
    pub current_program_scene_name: String,
}

/// One entry of `GetSceneItemList`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItem {
    pub scene_item_id: i64,
    pub source_name: String,
    #[serde(default)]
    pub scene_item_enabled: bool,
}

/// `GetSceneItemList`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemList {
    #[serde(default)]
    pub scene_items: Vec<SceneItem>,
}

/// `GetSceneItemEnabled`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemEnabled {
    pub scene_item_enabled: bool,
}

/// `GetSourceFilter` (only the enabled flag).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFilter {
    pub filter_enabled: bool,
}

/// `ToggleInputMute`, `GetInputMute`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMuted {
    pub input_muted: bool,
}

/// `ToggleRecord`, `ToggleStream`, `GetRecordStatus`, `GetStreamStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputActive {
    pub output_active: bool,
}

/// One entry of `GetSceneList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntry {
    pub scene_name: String,
}

/// `GetSceneList`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneList {
    #[serde(default)]
    pub current_program_scene_name: Option<String>,
    #[serde(default)]
    pub scenes: Vec<SceneEntry>,
}

/// One entry of `GetInputList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEntry {
    pub input_name: String,
    #[serde(default)]
    pub input_kind: String,
}

/// `GetInputList`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputList {
    #[serde(default)]
    pub inputs: Vec<InputEntry>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
