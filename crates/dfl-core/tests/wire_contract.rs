//! Integration tests for the dfl-core wire contract.
//!
//! These tests drive the public API the way the bridge does: decode what a
//! peer sent, act on it through the domain types, and encode the answer.
//! Frames are written out literally so a change to the JSON shape shows up
//! here before it reaches a real controller.

use dfl_core::{
    domain::join_code::GENERATED_CODE_LEN,
    protocol::{
        client::ClientEnvelope,
        obs::{
            authentication_string, decode_frame, encode_identify, encode_request, parse_response,
            Identify, ObsMessage, Request, SceneItemList, EVENT_SUBSCRIPTION_ALL, RPC_VERSION,
        },
        relay::{command_from_relay, RelayEnvelope},
    },
    CommandKind, CommandResult, JoinCode, Reconciliation, RequestIdCounter, SceneCache,
};
use serde_json::{json, Value};

#[test]
fn test_handshake_with_authentication() {
    // Arrange: the Hello example from the obs-websocket protocol documentation
    let hello = r#"{"op":0,"d":{"obsWebSocketVersion":"5.1.0","rpcVersion":1,
        "authentication":{"challenge":"+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=",
        "salt":"lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI="}}}"#;

    // Act
    let ObsMessage::Hello(hello) = decode_frame(hello).expect("hello decodes") else {
        panic!("expected hello");
    };
    let auth = hello.authentication.expect("challenge present");
    let identify = Identify {
        rpc_version: RPC_VERSION,
        authentication: Some(authentication_string(
            "supersecretpassword",
            &auth.salt,
            &auth.challenge,
        )),
        event_subscriptions: EVENT_SUBSCRIPTION_ALL,
    };
    let frame: Value = serde_json::from_str(&encode_identify(&identify).unwrap()).unwrap();

    // Assert
    assert_eq!(frame["op"], 1);
    assert_eq!(frame["d"]["rpcVersion"], 1);
    assert_eq!(frame["d"]["eventSubscriptions"], 0x7FF);
    assert_eq!(
        frame["d"]["authentication"],
        "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4="
    );
}

#[test]
fn test_request_ids_correlate_out_of_order_responses() {
    // Arrange
    let ids = RequestIdCounter::new();
    let first = Request {
        request_type: "GetSceneItemList".to_string(),
        request_id: ids.next_id(),
        request_data: Some(json!({"sceneName": "Main"})),
    };
    let second = Request {
        request_type: "ToggleRecord".to_string(),
        request_id: ids.next_id(),
        request_data: None,
    };
    let sent: Value = serde_json::from_str(&encode_request(&first).unwrap()).unwrap();
    assert_eq!(sent["d"]["requestId"], "req-1");
    assert!(serde_json::from_str::<Value>(&encode_request(&second).unwrap()).unwrap()["d"]
        .get("requestData")
        .is_none());

    // Act: OBS answers the second request first
    let late = r#"{"op":7,"d":{"requestType":"GetSceneItemList","requestId":"req-1",
        "requestStatus":{"result":true,"code":100},
        "responseData":{"sceneItems":[{"sceneItemId":3,"sourceName":"Logo"}]}}}"#;
    let early = r#"{"op":7,"d":{"requestType":"ToggleRecord","requestId":"req-2",
        "requestStatus":{"result":true,"code":100},"responseData":{"outputActive":true}}}"#;
    let ObsMessage::RequestResponse(early) = decode_frame(early).unwrap() else {
        panic!("expected response");
    };
    let ObsMessage::RequestResponse(late) = decode_frame(late).unwrap() else {
        panic!("expected response");
    };

    // Assert
    assert_eq!(early.request_id, second.request_id);
    assert_eq!(late.request_id, first.request_id);
    let items: SceneItemList =
        parse_response(&late.request_type, late.response_data.unwrap_or_default()).unwrap();
    assert_eq!(items.scene_items[0].scene_item_id, 3);
}

#[test]
fn test_scene_event_reconciles_cache() {
    // Arrange
    let mut cache = SceneCache::new();
    cache.begin_switch("B");
    let frame =
        r#"{"op":5,"d":{"eventType":"CurrentProgramSceneChanged","eventData":{"sceneName":"B"}}}"#;

    // Act
    let ObsMessage::Event(event) = decode_frame(frame).unwrap() else {
        panic!("expected event");
    };
    let outcome = cache.reconcile(event.scene_change().unwrap());

    // Assert
    assert_eq!(outcome, Reconciliation::Confirmed);
    assert_eq!(cache.current(), Some("B"));
}

#[test]
fn test_relay_command_answer_cycle() {
    // Arrange
    let inbound = r#"{"type":"command","method":"Scene","params":{"target":"Intro"}}"#;

    // Act
    let RelayEnvelope::Command { method, params } = RelayEnvelope::decode(inbound).unwrap()
    else {
        panic!("expected command");
    };
    let cmd = command_from_relay(method, params, 1_700_000_000_000);
    assert!(cmd.validate().is_ok());
    let reply = RelayEnvelope::Result(CommandResult::success(cmd, None))
        .encode()
        .unwrap();

    // Assert
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["type"], "result");
    assert_eq!(reply["success"], true);
    assert_eq!(reply["command"]["kind"], "scene");
    assert_eq!(reply["command"]["timestamp"], 1_700_000_000_000_i64);
}

#[test]
fn test_client_command_with_missing_target_fails_validation() {
    let env =
        ClientEnvelope::decode(r#"{"type":"command","payload":{"kind":"visibility"}}"#).unwrap();
    let ClientEnvelope::Command(cmd) = env else {
        panic!("expected command");
    };

    let err = cmd.validate().unwrap_err();

    assert_eq!(cmd.kind, CommandKind::Visibility);
    assert_eq!(err.to_string(), "visibility command requires a non-empty target");
}

#[test]
fn test_generated_join_code_parses_back() {
    let code = JoinCode::generate();

    let parsed = JoinCode::parse(&code.as_str().to_lowercase()).unwrap();

    assert_eq!(code.as_str().len(), GENERATED_CODE_LEN);
    assert_eq!(parsed, code);
}
