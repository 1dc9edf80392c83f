//! The abstract command vocabulary shared by every controller.
//!
//! A controller (a local WebSocket client or a remote peer behind the relay)
//! never speaks the OBS control protocol directly.  It submits a [`Command`]:
//!
//! ```json
//! {"kind":"filter","target":"Camera","filter":"Blur","timestamp":1700000000000}
//! ```
//!
//! The bridge validates it, translates it into one or more OBS requests, and
//! answers with exactly one [`CommandResult`].
//!
//! # Validation rules
//!
//! | Kind         | `target` | `filter` |
//! |--------------|----------|----------|
//! | `mute`       | required | –        |
//! | `scene`      | required | –        |
//! | `record`     | –        | –        |
//! | `stream`     | –        | –        |
//! | `visibility` | required | –        |
//! | `filter`     | required | required |
//!
//! A value that is absent, empty, or whitespace-only counts as missing.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The six things a controller can ask the bridge to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Toggle the mute state of an audio input.
    Mute,
    /// Switch the current program scene.
    Scene,
    /// Toggle recording.
    Record,
    /// Toggle streaming.
    Stream,
    /// Toggle (or set) the visibility of a source in the current scene.
    Visibility,
    /// Toggle (or set) a named filter on a source.
    Filter,
}

impl CommandKind {
    /// Lower-case wire name, also used in log lines and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Scene => "scene",
            Self::Record => "record",
            Self::Stream => "stream",
            Self::Visibility => "visibility",
            Self::Filter => "filter",
        }
    }

    /// Returns `true` for kinds that must name a target input, scene, or source.
    pub fn requires_target(self) -> bool {
        matches!(
            self,
            Self::Mute | Self::Scene | Self::Visibility | Self::Filter
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a command is rejected before anything is sent to OBS.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A kind that operates on a named object arrived without a name.
    #[error("{kind} command requires a non-empty target")]
    MissingTarget { kind: CommandKind },

    /// A `filter` command arrived without the filter name.
    #[error("filter command requires a non-empty filter name")]
    MissingFilter,
}

/// An abstract control command submitted by a controller.
///
/// Created on receipt from a sink, consumed once by the translator, and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// What to do.
    pub kind: CommandKind,

    /// Input, scene, or source name the command operates on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Filter name (only meaningful for [`CommandKind::Filter`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Explicit target state for `visibility` / `filter`.
    ///
    /// When absent the bridge toggles the current state instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<bool>,

    /// Milliseconds since the Unix epoch, as stamped by the submitter.
    #[serde(default)]
    pub timestamp: i64,
}

impl Command {
    /// Creates a command of `kind` with no target, stamped with the current time.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            target: None,
            filter: None,
            value: None,
            timestamp: now_millis(),
        }
    }

    /// Sets the target name.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the filter name.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets an explicit target state.
    pub fn with_value(mut self, value: bool) -> Self {
        self.value = Some(value);
        self
    }

    /// Returns the target if it is present and not blank.
    pub fn target_name(&self) -> Option<&str> {
        non_blank(self.target.as_deref())
    }

    /// Returns the filter name if it is present and not blank.
    pub fn filter_name(&self) -> Option<&str> {
        non_blank(self.filter.as_deref())
    }

    /// Checks the per-kind field requirements.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingTarget`] when a targeted kind has no
    /// usable target, and [`ValidationError::MissingFilter`] when a `filter`
    /// command has no usable filter name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.kind.requires_target() && self.target_name().is_none() {
            return Err(ValidationError::MissingTarget { kind: self.kind });
        }
        if self.kind == CommandKind::Filter && self.filter_name().is_none() {
            return Err(ValidationError::MissingFilter);
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// The single answer produced for every accepted command.
///
/// Produced exactly once per command, after the OBS round trip completes,
/// fails, or times out, or immediately when validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// `true` when OBS accepted every request the command required.
    pub success: bool,

    /// The command this result answers, echoed back unchanged.
    pub command: Command,

    /// Human-readable failure reason; present only when `success` is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Resulting on/off state when OBS reports one (muted, active, visible,
    /// filter enabled).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Milliseconds since the Unix epoch at which the result was produced.
    pub timestamp: i64,
}

impl CommandResult {
    /// Builds a successful result.
    pub fn success(command: Command, enabled: Option<bool>) -> Self {
        Self {
            success: true,
            command,
            error: None,
            enabled,
            timestamp: now_millis(),
        }
    }

    /// Builds a failed result carrying `error` as the reason.
    pub fn failure(command: Command, error: impl Into<String>) -> Self {
        Self {
            success: false,
            command,
            error: Some(error.into()),
            enabled: None,
            timestamp: now_millis(),
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before 1970 yields 0 rather than panicking.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targeted_kinds_reject_missing_target() {
        for kind in [
            CommandKind::Mute,
            CommandKind::Scene,
            CommandKind::Visibility,
            CommandKind::Filter,
        ] {
            // Arrange
            let cmd = Command::new(kind);

            // Act
            let result = cmd.validate();

            // Assert
            assert_eq!(result, Err(ValidationError::MissingTarget { kind }));
        }
    }

    #[test]
    fn test_blank_target_counts_as_missing() {
        let cmd = Command::new(CommandKind::Mute).with_target("   ");
        assert_eq!(
            cmd.validate(),
            Err(ValidationError::MissingTarget {
                kind: CommandKind::Mute
            })
        );
    }

    #[test]
    fn test_record_and_stream_need_no_target() {
        assert_eq!(Command::new(CommandKind::Record).validate(), Ok(()));
        assert_eq!(Command::new(CommandKind::Stream).validate(), Ok(()));
    }

    #[test]
    fn test_filter_requires_filter_name() {
        // Arrange: target present, filter name missing
        let cmd = Command::new(CommandKind::Filter).with_target("Camera");

        // Act / Assert
        assert_eq!(cmd.validate(), Err(ValidationError::MissingFilter));
    }

    #[test]
    fn test_complete_filter_command_is_valid() {
        let cmd = Command::new(CommandKind::Filter)
            .with_target("Camera")
            .with_filter("Blur");
        assert_eq!(cmd.validate(), Ok(()));
    }

    #[test]
    fn test_validation_messages_name_the_kind() {
        let err = ValidationError::MissingTarget {
            kind: CommandKind::Scene,
        };
        assert_eq!(err.to_string(), "scene command requires a non-empty target");
    }

    #[test]
    fn test_command_parses_from_minimal_json() {
        // Arrange: controllers may omit the timestamp and optional fields
        let json = r#"{"kind":"mute","target":"Mic"}"#;

        // Act
        let cmd: Command = serde_json::from_str(json).unwrap();

        // Assert
        assert_eq!(cmd.kind, CommandKind::Mute);
        assert_eq!(cmd.target_name(), Some("Mic"));
        assert_eq!(cmd.filter, None);
        assert_eq!(cmd.timestamp, 0);
    }

    #[test]
    fn test_unknown_kind_is_a_parse_error() {
        let result = serde_json::from_str::<Command>(r#"{"kind":"explode"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_success_result_omits_error_field() {
        // Arrange
        let result = CommandResult::success(Command::new(CommandKind::Record), Some(true));

        // Act
        let json = serde_json::to_value(&result).unwrap();

        // Assert
        assert_eq!(json["success"], true);
        assert_eq!(json["enabled"], true);
        assert!(json.get("error").is_none());
        assert_eq!(json["command"]["kind"], "record");
    }

    #[test]
    fn test_failure_result_carries_reason() {
        let result = CommandResult::failure(Command::new(CommandKind::Stream), "boom");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.enabled, None);
    }

    #[test]
    fn test_now_millis_is_after_2020() {
        // 2020-01-01T00:00:00Z in milliseconds
        assert!(now_millis() > 1_577_836_800_000);
    }
}
