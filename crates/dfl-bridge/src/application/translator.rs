//! Command translator: abstract [`Command`] → concrete [`ControlRequest`].
//!
//! This is a pure function with no I/O.  It checks the per-kind field rules
//! first, so an incomplete command is rejected before anything is sent to
//! OBS, and the rejection reads differently from a network or timeout failure.
//!
//! # Mapping
//!
//! | Command kind | Control request            | OBS requests issued                                   |
//! |--------------|----------------------------|-------------------------------------------------------|
//! | `mute`       | `ToggleInputMute`          | `ToggleInputMute`                                     |
//! | `scene`      | `SetCurrentProgramScene`   | `SetCurrentProgramScene`                              |
//! | `record`     | `ToggleRecord`             | `ToggleRecord`                                        |
//! | `stream`     | `ToggleStream`             | `ToggleStream`                                        |
//! | `visibility` | `SetSceneItemVisibility`   | `GetSceneItemList`, `GetSceneItemEnabled`, `SetSceneItemEnabled` |
//! | `filter`     | `SetSourceFilter`          | `GetSourceFilter`, `SetSourceFilterEnabled`           |

use dfl_core::{Command, CommandKind, ValidationError};

/// OBS request type names used by the bridge.
pub mod request_types {
    pub const TOGGLE_INPUT_MUTE: &str = "ToggleInputMute";
    pub const SET_CURRENT_PROGRAM_SCENE: &str = "SetCurrentProgramScene";
    pub const GET_CURRENT_PROGRAM_SCENE: &str = "GetCurrentProgramScene";
    pub const TOGGLE_RECORD: &str = "ToggleRecord";
    pub const TOGGLE_STREAM: &str = "ToggleStream";
    pub const GET_SCENE_ITEM_LIST: &str = "GetSceneItemList";
    pub const GET_SCENE_ITEM_ENABLED: &str = "GetSceneItemEnabled";
    pub const SET_SCENE_ITEM_ENABLED: &str = "SetSceneItemEnabled";
    pub const GET_SOURCE_FILTER: &str = "GetSourceFilter";
    pub const SET_SOURCE_FILTER_ENABLED: &str = "SetSourceFilterEnabled";
    pub const GET_SCENE_LIST: &str = "GetSceneList";
    pub const GET_INPUT_LIST: &str = "GetInputList";
    pub const GET_INPUT_MUTE: &str = "GetInputMute";
    pub const GET_RECORD_STATUS: &str = "GetRecordStatus";
    pub const GET_STREAM_STATUS: &str = "GetStreamStatus";
}

/// A validated command in control-plane terms.
///
/// `enabled: None` on the two-step variants means "toggle": read the current
/// state, then write its inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    ToggleInputMute {
        input_name: String,
    },
    SetCurrentProgramScene {
        scene_name: String,
    },
    ToggleRecord,
    ToggleStream,
    SetSceneItemVisibility {
        source_name: String,
        enabled: Option<bool>,
    },
    SetSourceFilter {
        source_name: String,
        filter_name: String,
        enabled: Option<bool>,
    },
}

impl ControlRequest {
    /// Name of the OBS request that performs the write.
    pub fn request_type(&self) -> &'static str {
        use request_types::*;
        match self {
            Self::ToggleInputMute { .. } => TOGGLE_INPUT_MUTE,
            Self::SetCurrentProgramScene { .. } => SET_CURRENT_PROGRAM_SCENE,
            Self::ToggleRecord => TOGGLE_RECORD,
            Self::ToggleStream => TOGGLE_STREAM,
            Self::SetSceneItemVisibility { .. } => SET_SCENE_ITEM_ENABLED,
            Self::SetSourceFilter { .. } => SET_SOURCE_FILTER_ENABLED,
        }
    }
}

/// Validates `command` and maps it to a [`ControlRequest`].
///
/// Target and filter names are trimmed.
///
/// # Errors
///
/// Returns the [`ValidationError`] from [`Command::validate`].
pub fn translate(command: &Command) -> Result<ControlRequest, ValidationError> {
    command.validate()?;

    // `validate` guarantees these are present for the kinds that need them.
    let target = || {
        command
            .target_name()
            .map(|t| t.trim().to_string())
            .ok_or(ValidationError::MissingTarget { kind: command.kind })
    };

    Ok(match command.kind {
        CommandKind::Mute => ControlRequest::ToggleInputMute {
            input_name: target()?,
        },
        CommandKind::Scene => ControlRequest::SetCurrentProgramScene {
            scene_name: target()?,
        },
        CommandKind::Record => ControlRequest::ToggleRecord,
        CommandKind::Stream => ControlRequest::ToggleStream,
        CommandKind::Visibility => ControlRequest::SetSceneItemVisibility {
            source_name: target()?,
            enabled: command.value,
        },
        CommandKind::Filter => ControlRequest::SetSourceFilter {
            source_name: target()?,
            filter_name: command
                .filter_name()
                .map(|f| f.trim().to_string())
                .ok_or(ValidationError::MissingFilter)?,
            enabled: command.value,
        },
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
