//! Command execution on top of the control plane.
//!
//! [`CommandExecutor`] takes a validated [`ControlRequest`] and performs the
//! OBS round trips it needs, through the [`ControlPlane`] trait:
//!
//! - **Single step** (`mute`, `scene`, `record`, `stream`): one request.
//! - **Two step** (`visibility`, `filter`): read the current enabled flag,
//!   then write its inverse.  Visibility first resolves the numeric scene
//!   item id of the source within the current program scene.
//!
//! Two-step toggles are not atomic on the OBS side.  If another controller
//! changes the state between the read and the write, the write still applies
//! the inverse of the value that was read.
//!
//! Every outcome, including validation failures, becomes exactly one
//! [`CommandResult`]; nothing is silently dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use dfl_core::protocol::obs::{
    parse_response, CurrentProgramScene, InputMuted, OutputActive, SceneItemEnabled,
    SceneItemList, SourceFilter,
};
use dfl_core::{Command, CommandResult, ObsProtocolError, SceneCache, ValidationError};

use super::translator::{request_types, translate, ControlRequest};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a single OBS request did not produce a response payload.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The control-plane link is not `Ready`.
    #[error("not connected to OBS")]
    NotConnected,

    /// The link dropped while the request was in flight.
    #[error("connection to OBS lost")]
    ConnectionLost,

    /// No response arrived within the per-request deadline.
    #[error("{request_type} timed out after {}s", .timeout.as_secs_f32())]
    Timeout {
        request_type: String,
        timeout: Duration,
    },

    /// The request could not be handed to the socket writer.
    #[error("failed to send {request_type}: {reason}")]
    Transport {
        request_type: String,
        reason: String,
    },

    /// OBS answered with `requestStatus.result == false`.
    #[error("OBS rejected {request_type} (code {code}){}", comment_suffix(.comment))]
    Rejected {
        request_type: String,
        code: u32,
        comment: Option<String>,
    },

    /// The request could not be encoded or the response did not fit.
    #[error(transparent)]
    Protocol(#[from] ObsProtocolError),
}

fn comment_suffix(comment: &Option<String>) -> String {
    match comment {
        Some(c) if !c.is_empty() => format!(": {c}"),
        _ => String::new(),
    }
}

/// Why a command failed.  Its `Display` text becomes `CommandResult.error`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Request(#[from] RequestError),

    /// Neither the scene cache nor OBS could name the current program scene.
    #[error("current program scene is unknown")]
    NoCurrentScene,

    /// The visibility target is not an item of the current scene.
    #[error("source '{source_name}' not found in scene '{scene}'")]
    SourceNotFound { source_name: String, scene: String },
}

// ── Control-plane seam ────────────────────────────────────────────────────────

/// One OBS request: a request type plus optional request data.
#[derive(Debug, Clone, PartialEq)]
pub struct ObsRequest {
    pub request_type: String,
    pub request_data: Option<Value>,
}

impl ObsRequest {
    /// A request without data (e.g. `ToggleRecord`).
    pub fn new(request_type: &str) -> Self {
        Self {
            request_type: request_type.to_string(),
            request_data: None,
        }
    }

    /// A request carrying `data`.
    pub fn with_data(request_type: &str, data: Value) -> Self {
        Self {
            request_type: request_type.to_string(),
            request_data: Some(data),
        }
    }
}

/// Anything that can carry a request to OBS and return its response data.
///
/// The production implementation is
/// [`ObsClient`](crate::infrastructure::obs_conn::ObsClient); tests use the
/// generated `MockControlPlane`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Sends `request` and waits for its response.
    ///
    /// Returns the `responseData` object, or `Value::Null` when OBS sent none.
    async fn send_request(&self, request: ObsRequest) -> Result<Value, RequestError>;
}

// ── Executor ──────────────────────────────────────────────────────────────────

/// Runs commands against the control plane.
pub struct CommandExecutor {
    control: Arc<dyn ControlPlane>,
    scenes: Arc<Mutex<SceneCache>>,
}

impl CommandExecutor {
    /// Creates an executor sharing `scenes` with the control-plane client
    /// that keeps it up to date from events.
    pub fn new(control: Arc<dyn ControlPlane>, scenes: Arc<Mutex<SceneCache>>) -> Self {
        Self { control, scenes }
    }

    /// The control plane this executor talks to.
    pub fn control(&self) -> &dyn ControlPlane {
        self.control.as_ref()
    }

    /// Executes `command` and produces its single result.
    pub async fn execute(&self, command: Command) -> CommandResult {
        match self.run(&command).await {
            Ok(enabled) => {
                debug!(kind = %command.kind, ?enabled, "command succeeded");
                CommandResult::success(command, enabled)
            }
            Err(e) => {
                warn!(kind = %command.kind, error = %e, "command failed");
                CommandResult::failure(command, e.to_string())
            }
        }
    }

    async fn run(&self, command: &Command) -> Result<Option<bool>, CommandError> {
        use request_types::*;

        let request = translate(command)?;
        debug!(kind = %command.kind, request = request.request_type(), "translated command");
        match request {
            ControlRequest::ToggleInputMute { input_name } => {
                let data = self
                    .send(ObsRequest::with_data(
                        TOGGLE_INPUT_MUTE,
                        json!({ "inputName": input_name }),
                    ))
                    .await?;
                Ok(parse_response::<InputMuted>(TOGGLE_INPUT_MUTE, data)
                    .ok()
                    .map(|r| r.input_muted))
            }

            ControlRequest::SetCurrentProgramScene { scene_name } => {
                // Record the switch before sending: the change event may
                // arrive after the next command has already read the cache.
                self.with_scenes(|c| c.begin_switch(scene_name.clone()));
                let request = ObsRequest::with_data(
                    SET_CURRENT_PROGRAM_SCENE,
                    json!({ "sceneName": scene_name }),
                );
                if let Err(e) = self.send(request).await {
                    self.with_scenes(|c| c.abandon(&scene_name));
                    return Err(e.into());
                }
                Ok(None)
            }

            ControlRequest::ToggleRecord => self.toggle_output(TOGGLE_RECORD).await,
            ControlRequest::ToggleStream => self.toggle_output(TOGGLE_STREAM).await,

            ControlRequest::SetSceneItemVisibility {
                source_name,
                enabled,
            } => self.set_visibility(source_name, enabled).await.map(Some),

            ControlRequest::SetSourceFilter {
                source_name,
                filter_name,
                enabled,
            } => self
                .set_filter(source_name, filter_name, enabled)
                .await
                .map(Some),
        }
    }

    async fn toggle_output(&self, request_type: &str) -> Result<Option<bool>, CommandError> {
        let data = self.send(ObsRequest::new(request_type)).await?;
        Ok(parse_response::<OutputActive>(request_type, data)
            .ok()
            .map(|r| r.output_active))
    }

    async fn set_visibility(
        &self,
        source_name: String,
        enabled: Option<bool>,
    ) -> Result<bool, CommandError> {
        use request_types::*;

        let scene = self.current_scene().await?;

        let items: SceneItemList = decode(
            GET_SCENE_ITEM_LIST,
            self.send(ObsRequest::with_data(
                GET_SCENE_ITEM_LIST,
                json!({ "sceneName": scene }),
            ))
            .await?,
        )?;
        let item_id = items
            .scene_items
            .iter()
            .find(|item| item.source_name == source_name)
            .map(|item| item.scene_item_id)
            .ok_or_else(|| CommandError::SourceNotFound {
                source_name: source_name.clone(),
                scene: scene.clone(),
            })?;

        let target = match enabled {
            Some(value) => value,
            None => {
                let current: SceneItemEnabled = decode(
                    GET_SCENE_ITEM_ENABLED,
                    self.send(ObsRequest::with_data(
                        GET_SCENE_ITEM_ENABLED,
                        json!({ "sceneName": scene, "sceneItemId": item_id }),
                    ))
                    .await?,
                )?;
                !current.scene_item_enabled
            }
        };

        self.send(ObsRequest::with_data(
            SET_SCENE_ITEM_ENABLED,
            json!({
                "sceneName": scene,
                "sceneItemId": item_id,
                "sceneItemEnabled": target,
            }),
        ))
        .await?;
        Ok(target)
    }

    async fn set_filter(
        &self,
        source_name: String,
        filter_name: String,
        enabled: Option<bool>,
    ) -> Result<bool, CommandError> {
        use request_types::*;

        let target = match enabled {
            Some(value) => value,
            None => {
                let current: SourceFilter = decode(
                    GET_SOURCE_FILTER,
                    self.send(ObsRequest::with_data(
                        GET_SOURCE_FILTER,
                        json!({ "sourceName": source_name, "filterName": filter_name }),
                    ))
                    .await?,
                )?;
                !current.filter_enabled
            }
        };

        self.send(ObsRequest::with_data(
            SET_SOURCE_FILTER_ENABLED,
            json!({
                "sourceName": source_name,
                "filterName": filter_name,
                "filterEnabled": target,
            }),
        ))
        .await?;
        Ok(target)
    }

    /// Scene to scope a visibility lookup: the cache if it knows one,
    /// otherwise whatever OBS reports (which then seeds the cache).
    async fn current_scene(&self) -> Result<String, CommandError> {
        if let Some(scene) = self.with_scenes(|c| c.current().map(str::to_string)) {
            return Ok(scene);
        }

        let reply: CurrentProgramScene = decode(
            request_types::GET_CURRENT_PROGRAM_SCENE,
            self.send(ObsRequest::new(request_types::GET_CURRENT_PROGRAM_SCENE))
                .await?,
        )?;
        let scene = reply.current_program_scene_name;
        if scene.is_empty() {
            return Err(CommandError::NoCurrentScene);
        }
        self.with_scenes(|c| c.reconcile(scene.clone()));
        Ok(scene)
    }

    async fn send(&self, request: ObsRequest) -> Result<Value, RequestError> {
        self.control.send_request(request).await
    }

    fn with_scenes<R>(&self, f: impl FnOnce(&mut SceneCache) -> R) -> R {
        let mut cache = self.scenes.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut cache)
    }
}

fn decode<T: DeserializeOwned>(request_type: &str, data: Value) -> Result<T, CommandError> {
    parse_response(request_type, data)
        .map_err(|e| CommandError::Request(RequestError::Protocol(e)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
