//! Direct-client endpoint: envelope handling, result routing, subscriptions.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_tungstenite::connect_async;

use common::{eventually, within, Bridge, FakeObs, JsonPeer};
use dfl_bridge::infrastructure::ws_server::{self, ClientSettings};
use dfl_bridge::infrastructure::LinkState;

fn settings() -> ClientSettings {
    ClientSettings {
        queue_capacity: 16,
        ping_interval: Duration::from_secs(30),
        write_timeout: Duration::from_secs(2),
    }
}

/// Starts the endpoint on an ephemeral port and returns its address.
async fn serve(bridge: &Bridge) -> SocketAddr {
    let listener = ws_server::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ws_server::serve(
        listener,
        Arc::clone(&bridge.router),
        settings(),
        bridge.shutdown.clone(),
    ));
    addr
}

async fn connect(addr: SocketAddr) -> JsonPeer {
    let (ws, _) = within(connect_async(format!("ws://{addr}")))
        .await
        .unwrap();
    JsonPeer::new(ws)
}

/// Round-trips a ping so everything sent before it has been processed.
async fn sync(client: &mut JsonPeer) {
    client.send(json!({"type": "ping"}));
    assert_eq!(client.recv().await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let bridge = Bridge::start("ws://127.0.0.1:1", None, Duration::from_secs(1));
    let addr = serve(&bridge).await;
    let mut client = connect(addr).await;

    sync(&mut client).await;
}

#[tokio::test]
async fn test_malformed_frames_get_error_envelopes() {
    // Arrange
    let bridge = Bridge::start("ws://127.0.0.1:1", None, Duration::from_secs(1));
    let addr = serve(&bridge).await;
    let mut client = connect(addr).await;

    // Act / Assert
    client.send_raw("this is not json");
    assert_eq!(
        client.recv().await,
        json!({"type": "error", "payload": {"error": "invalid message format"}})
    );

    client.send(json!({"type": "launch_rockets"}));
    assert_eq!(
        client.recv().await["payload"]["error"],
        "unknown message type: launch_rockets"
    );

    client.send(json!({"type": "command", "payload": {"kind": "explode"}}));
    let error = client.recv().await;
    assert_eq!(error["type"], "error");
    assert!(error["payload"]["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid command"));

    // The session survives all of it.
    sync(&mut client).await;
}

#[tokio::test]
async fn test_invalid_command_gets_failed_result() {
    let bridge = Bridge::start("ws://127.0.0.1:1", None, Duration::from_secs(1));
    let addr = serve(&bridge).await;
    let mut client = connect(addr).await;

    client.send(json!({"type": "command", "payload": {"kind": "scene", "target": "  "}}));

    let result = client.recv().await;
    assert_eq!(result["type"], "result");
    assert_eq!(result["payload"]["success"], false);
    assert_eq!(
        result["payload"]["error"],
        "scene command requires a non-empty target"
    );
}

#[tokio::test]
async fn test_result_goes_only_to_the_submitting_client() {
    // Arrange
    let mut obs = FakeObs::start(false).await;
    let bridge = Bridge::start(&obs.url(), None, Duration::from_secs(2));
    let mut obs_peer = obs.accept().await;
    within(bridge.obs.wait_for_state(LinkState::Ready)).await;
    let addr = serve(&bridge).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    eventually(|| bridge.router.sink_count() == 2).await;

    // Act
    alice.send(json!({"type": "command", "payload": {"kind": "mute", "target": "Mic", "timestamp": 42}}));
    let request = obs_peer.next_request().await;
    assert_eq!(request["requestType"], "ToggleInputMute");
    obs_peer.respond(&request, json!({"inputMuted": false}));

    // Assert
    let result = alice.recv().await;
    assert_eq!(result["type"], "result");
    assert_eq!(result["payload"]["success"], true);
    assert_eq!(result["payload"]["enabled"], false);
    assert_eq!(result["payload"]["command"]["timestamp"], 42);
    bob.expect_silence(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_results_follow_submission_order() {
    // Arrange
    let mut obs = FakeObs::start(false).await;
    let bridge = Bridge::start(&obs.url(), None, Duration::from_secs(2));
    let mut obs_peer = obs.accept().await;
    within(bridge.obs.wait_for_state(LinkState::Ready)).await;
    let addr = serve(&bridge).await;
    let mut client = connect(addr).await;

    // Act
    client.send(json!({"type": "command", "payload": {"kind": "record"}}));
    client.send(json!({"type": "command", "payload": {"kind": "stream"}}));

    // Assert: the second request is only sent once the first is answered
    let first = obs_peer.next_request().await;
    assert_eq!(first["requestType"], "ToggleRecord");
    obs_peer.expect_no_request(Duration::from_millis(100)).await;
    obs_peer.respond(&first, json!({"outputActive": true}));
    let second = obs_peer.next_request().await;
    assert_eq!(second["requestType"], "ToggleStream");
    obs_peer.respond(&second, json!({"outputActive": false}));

    assert_eq!(client.recv().await["payload"]["command"]["kind"], "record");
    assert_eq!(client.recv().await["payload"]["command"]["kind"], "stream");
}

#[tokio::test]
async fn test_events_respect_subscription() {
    // Arrange
    let mut obs = FakeObs::start(false).await;
    let bridge = Bridge::start(&obs.url(), None, Duration::from_secs(2));
    let obs_peer = obs.accept().await;
    within(bridge.obs.wait_for_state(LinkState::Ready)).await;
    let addr = serve(&bridge).await;
    let mut quiet = connect(addr).await;
    let mut listening = connect(addr).await;
    eventually(|| bridge.router.sink_count() == 2).await;
    quiet.send(json!({"type": "unsubscribe"}));
    sync(&mut quiet).await;

    // Act
    obs_peer.event("StreamStateChanged", json!({"outputActive": true}));

    // Assert
    let event = listening.recv().await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["payload"]["eventType"], "StreamStateChanged");
    quiet.expect_silence(Duration::from_millis(200)).await;

    // Subscribing again restores delivery.
    quiet.send(json!({"type": "subscribe"}));
    sync(&mut quiet).await;
    obs_peer.event("SceneCreated", json!({"sceneName": "Outro"}));
    assert_eq!(quiet.recv().await["payload"]["eventType"], "SceneCreated");
}

#[tokio::test]
async fn test_disconnect_detaches_sink() {
    let bridge = Bridge::start("ws://127.0.0.1:1", None, Duration::from_secs(1));
    let addr = serve(&bridge).await;
    let client = connect(addr).await;
    eventually(|| bridge.router.sink_count() == 1).await;

    drop(client);

    eventually(|| bridge.router.sink_count() == 0).await;
}
