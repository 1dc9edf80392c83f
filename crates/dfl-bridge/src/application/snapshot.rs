//! One-shot OBS state snapshots for newly paired relay peers.
//!
//! A remote controller that just joined knows nothing about the studio.  When
//! the relay reports `peer_connected` (or the controller sends
//! `request_update`), the bridge answers with a single `obs_data` envelope
//! holding the scene and input lists, every known source, the current scene,
//! per-input mute flags, per-item visibility for the current scene, and
//! whether recording and streaming are active.  A `request_status` envelope
//! gets only the last two flags.

use std::collections::BTreeMap;

use dfl_core::protocol::obs::{
    parse_response, InputList, InputMuted, OutputActive, SceneItem, SceneItemList, SceneList,
};
use dfl_core::protocol::relay::{visibility_key, ObsSnapshot, OutputStatus};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::executor::{ControlPlane, ObsRequest, RequestError};
use super::translator::request_types::{
    GET_INPUT_LIST, GET_INPUT_MUTE, GET_RECORD_STATUS, GET_SCENE_ITEM_LIST, GET_SCENE_LIST,
    GET_STREAM_STATUS,
};

/// Queries OBS for everything in an [`ObsSnapshot`].
///
/// The scene list, input list and output flags are required; the first
/// failure among them aborts the snapshot.  Scene item lists and mute flags
/// are collected per scene and per input, and a failure there only leaves
/// that entry out (inputs without audio have no mute state).
///
/// # Errors
///
/// Returns the failing request's [`RequestError`].
pub async fn collect_snapshot(control: &dyn ControlPlane) -> Result<ObsSnapshot, RequestError> {
    let scenes: SceneList = query(control, ObsRequest::new(GET_SCENE_LIST)).await?;
    let inputs: InputList = query(control, ObsRequest::new(GET_INPUT_LIST)).await?;
    let status = collect_output_status(control).await?;
    let current_scene = scenes.current_program_scene_name.clone().unwrap_or_default();

    let mut all_sources = Vec::new();
    for input in &inputs.inputs {
        push_unique(&mut all_sources, &input.input_name);
    }

    let mut visibility_states = BTreeMap::new();
    for scene in &scenes.scenes {
        let Some(items) = scene_items(control, &scene.scene_name).await else {
            continue;
        };
        for item in &items {
            push_unique(&mut all_sources, &item.source_name);
        }
        if scene.scene_name == current_scene {
            visibility_states.extend(items.iter().map(|item| {
                (
                    visibility_key(&current_scene, item.scene_item_id),
                    item.scene_item_enabled,
                )
            }));
        }
    }

    let mut mute_states = BTreeMap::new();
    for input in &inputs.inputs {
        let request = ObsRequest::with_data(GET_INPUT_MUTE, json!({"inputName": input.input_name}));
        match query::<InputMuted>(control, request).await {
            Ok(mute) => {
                mute_states.insert(input.input_name.clone(), mute.input_muted);
            }
            Err(e) => debug!(input = %input.input_name, error = %e, "no mute state for input"),
        }
    }

    Ok(ObsSnapshot {
        scenes: scenes.scenes,
        inputs: inputs.inputs,
        all_sources,
        current_scene,
        mute_states,
        visibility_states,
        recording: status.recording,
        streaming: status.streaming,
    })
}

/// Queries OBS for the recording and streaming flags.
///
/// # Errors
///
/// Returns the failing request's [`RequestError`].
pub async fn collect_output_status(
    control: &dyn ControlPlane,
) -> Result<OutputStatus, RequestError> {
    let record: OutputActive = query(control, ObsRequest::new(GET_RECORD_STATUS)).await?;
    let stream: OutputActive = query(control, ObsRequest::new(GET_STREAM_STATUS)).await?;
    Ok(OutputStatus {
        recording: record.output_active,
        streaming: stream.output_active,
    })
}

async fn scene_items(control: &dyn ControlPlane, scene: &str) -> Option<Vec<SceneItem>> {
    let request = ObsRequest::with_data(GET_SCENE_ITEM_LIST, json!({"sceneName": scene}));
    match query::<SceneItemList>(control, request).await {
        Ok(list) => Some(list.scene_items),
        Err(e) => {
            debug!(%scene, error = %e, "no item list for scene");
            None
        }
    }
}

fn push_unique(sources: &mut Vec<String>, name: &str) {
    if !name.is_empty() && !sources.iter().any(|s| s == name) {
        sources.push(name.to_string());
    }
}

async fn query<T: DeserializeOwned>(
    control: &dyn ControlPlane,
    request: ObsRequest,
) -> Result<T, RequestError> {
    let request_type = request.request_type.clone();
    let data = control.send_request(request).await?;
    Ok(parse_response(&request_type, data)?)
}
