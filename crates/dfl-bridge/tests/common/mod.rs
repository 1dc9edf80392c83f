//! Shared fixtures for the dfl-bridge integration tests.
//!
//! - [`FakeObs`] speaks enough of obs-websocket v5 to complete the handshake
//!   (optionally with authentication) and hands each connection to the test
//!   as an [`ObsPeer`], which sees every request and decides the answer.
//! - [`JsonPeer`] wraps any WebSocket (relay side or client side) as a pair
//!   of JSON channels.
//! - [`Bridge`] wires an `ObsClient`, executor and router the way `main.rs`
//!   does.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use dfl_bridge::application::{CommandExecutor, EventPublisher, EventRouter};
use dfl_bridge::infrastructure::{ObsClient, ObsClientOptions, Shutdown};
use dfl_core::SceneCache;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Reference credentials from the obs-websocket protocol documentation.
pub const PASSWORD: &str = "supersecretpassword";
pub const SALT: &str = "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=";
pub const CHALLENGE: &str = "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=";
pub const EXPECTED_AUTH: &str = "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4=";

/// Scene the fake reports for `GetCurrentProgramScene`.
pub const PROGRAM_SCENE: &str = "Main";

// ── Fake OBS ──────────────────────────────────────────────────────────────────

pub struct FakeObs {
    pub addr: SocketAddr,
    peers: mpsc::UnboundedReceiver<ObsPeer>,
}

impl FakeObs {
    /// Listens on an ephemeral port.  With `require_auth` the Hello carries
    /// the reference challenge and a wrong answer is closed with 4009.
    pub async fn start(require_auth: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, peers) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_obs_peer(stream, require_auth, tx.clone()));
            }
        });

        Self { addr, peers }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Waits for the next connection that completes the handshake.
    pub async fn accept(&mut self) -> ObsPeer {
        timeout(WAIT, self.peers.recv())
            .await
            .expect("bridge should connect to OBS in time")
            .expect("fake OBS listener stopped")
    }
}

/// One identified connection, as seen from the OBS side.
///
/// Dropping it closes the socket.
pub struct ObsPeer {
    /// The `d` object of the Identify frame.
    pub identify: Value,
    requests: mpsc::UnboundedReceiver<Value>,
    frames: mpsc::UnboundedSender<Message>,
}

impl ObsPeer {
    /// The `d` object of the next request (other than the scene seed).
    pub async fn next_request(&mut self) -> Value {
        timeout(WAIT, self.requests.recv())
            .await
            .expect("request should arrive in time")
            .expect("connection closed")
    }

    pub async fn expect_no_request(&mut self, wait: Duration) {
        if let Ok(Some(request)) = timeout(wait, self.requests.recv()).await {
            panic!("unexpected request: {request}");
        }
    }

    pub fn respond(&self, request: &Value, data: Value) {
        self.send(json!({"op": 7, "d": {
            "requestType": request["requestType"],
            "requestId": request["requestId"],
            "requestStatus": {"result": true, "code": 100},
            "responseData": data
        }}));
    }

    pub fn reject(&self, request: &Value, code: u32, comment: &str) {
        self.send(json!({"op": 7, "d": {
            "requestType": request["requestType"],
            "requestId": request["requestId"],
            "requestStatus": {"result": false, "code": code, "comment": comment}
        }}));
    }

    pub fn event(&self, event_type: &str, data: Value) {
        self.send(json!({"op": 5, "d": {
            "eventType": event_type,
            "eventIntent": 1,
            "eventData": data
        }}));
    }

    fn send(&self, frame: Value) {
        let _ = self.frames.send(Message::Text(frame.to_string()));
    }
}

async fn serve_obs_peer(
    stream: TcpStream,
    require_auth: bool,
    peers: mpsc::UnboundedSender<ObsPeer>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    let mut hello = json!({"obsWebSocketVersion": "5.5.0", "rpcVersion": 1});
    if require_auth {
        hello["authentication"] = json!({"challenge": CHALLENGE, "salt": SALT});
    }
    if send_json(&mut ws, json!({"op": 0, "d": hello})).await.is_err() {
        return;
    }

    let identify = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                if frame["op"] == 1 {
                    break frame["d"].clone();
                }
            }
            Some(Ok(_)) => {}
            _ => return,
        }
    };

    if require_auth && identify["authentication"] != EXPECTED_AUTH {
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Library(4009),
                reason: "Authentication failed.".into(),
            }))
            .await;
        return;
    }
    if send_json(&mut ws, json!({"op": 2, "d": {"negotiatedRpcVersion": 1}}))
        .await
        .is_err()
    {
        return;
    }

    let (request_tx, requests) = mpsc::unbounded_channel();
    let (frames, mut outgoing) = mpsc::unbounded_channel();
    let peer = ObsPeer {
        identify,
        requests,
        frames,
    };
    if peers.send(peer).is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["op"] != 6 {
                        continue;
                    }
                    let request = frame["d"].clone();
                    // The bridge seeds its scene cache right after Identified.
                    if request["requestType"] == "GetCurrentProgramScene" {
                        let reply = json!({"op": 7, "d": {
                            "requestType": "GetCurrentProgramScene",
                            "requestId": request["requestId"],
                            "requestStatus": {"result": true, "code": 100},
                            "responseData": {"currentProgramSceneName": PROGRAM_SCENE}
                        }});
                        if send_json(&mut ws, reply).await.is_err() {
                            break;
                        }
                    } else if request_tx.send(request).is_err() {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                _ => break,
            },
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    if ws.send(frame).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
        }
    }
}

async fn send_json<S>(ws: &mut WebSocketStream<S>, value: Value) -> Result<(), ()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ws.send(Message::Text(value.to_string()))
        .await
        .map_err(|_| ())
}

// ── JSON peer ─────────────────────────────────────────────────────────────────

/// A WebSocket seen as JSON in / JSON out.  Dropping it closes the socket.
pub struct JsonPeer {
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl JsonPeer {
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (mut write, mut read) = ws.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let value = serde_json::from_str(&text).unwrap();
                            if incoming_tx.send(value).is_err() {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    text = outgoing_rx.recv() => match text {
                        Some(text) => {
                            if write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write.close().await;
                            break;
                        }
                    },
                }
            }
        });

        Self { incoming, outgoing }
    }

    pub fn send(&self, value: Value) {
        self.send_raw(&value.to_string());
    }

    /// Sends `text` verbatim, even if it is not JSON.
    pub fn send_raw(&self, text: &str) {
        self.outgoing.send(text.to_string()).unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, self.incoming.recv())
            .await
            .expect("message should arrive in time")
            .expect("connection closed")
    }

    /// Skips heartbeats and returns the next message of type `kind`.
    pub async fn recv_type(&mut self, kind: &str) -> Value {
        loop {
            let value = self.recv().await;
            if value["type"] == kind {
                return value;
            }
        }
    }

    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(value)) = timeout(wait, self.incoming.recv()).await {
            panic!("unexpected message: {value}");
        }
    }
}

// ── Bridge wiring ─────────────────────────────────────────────────────────────

pub struct Bridge {
    pub obs: Arc<ObsClient>,
    pub router: Arc<EventRouter>,
    pub scenes: Arc<Mutex<SceneCache>>,
    pub shutdown: Shutdown,
}

impl Bridge {
    /// Wires the bridge against `obs_url` and starts the OBS supervisor.
    pub fn start(obs_url: &str, password: Option<&str>, request_timeout: Duration) -> Self {
        let options = ObsClientOptions {
            url: obs_url.to_string(),
            password: password.map(str::to_string),
            request_timeout,
            reconnect_delay: Duration::from_millis(50),
            handshake_timeout: Duration::from_secs(2),
        };
        let scenes = Arc::new(Mutex::new(SceneCache::new()));
        let events = EventPublisher::default();
        let obs = Arc::new(ObsClient::new(options, Arc::clone(&scenes), events.clone()));
        let executor = Arc::new(CommandExecutor::new(obs.clone(), Arc::clone(&scenes)));
        let router = Arc::new(EventRouter::new(executor, events));
        let shutdown = Shutdown::new();

        tokio::spawn(Arc::clone(&obs).run(shutdown.clone()));

        Self {
            obs,
            router,
            scenes,
            shutdown,
        }
    }

    /// Scene the cache currently reports.
    pub fn cached_scene(&self) -> Option<String> {
        self.scenes.lock().unwrap().current().map(str::to_string)
    }

    /// Waits until the link is ready and the cache holds the seeded scene.
    pub async fn wait_until_seeded(&self) {
        eventually(|| self.cached_scene().as_deref() == Some(PROGRAM_SCENE)).await;
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Polls `check` until it holds or [`WAIT`] elapses.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Awaits `future` with the shared deadline.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    timeout(WAIT, future).await.expect("timed out")
}
