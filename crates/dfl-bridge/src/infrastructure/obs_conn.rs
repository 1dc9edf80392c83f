//! Control-plane client: the single connection to OBS.
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected ──dial──► Connecting ──socket open──► AwaitingHello
//!      ▲                                                  │ Hello (op 0)
//!      │                                                  ▼ send Identify (op 1)
//!      │                                             Identifying
//!      │                                                  │ Identified (op 2)
//!      │       read error / close / shutdown              ▼
//!      └────────────────────────────────────────────── Ready
//! ```
//!
//! [`ObsClient::run`] is the supervisor: it walks this state machine, serves
//! the connection while `Ready`, and after any failure waits a fixed delay and
//! starts over.  It never gives up; only the shutdown signal stops it.
//!
//! # Request correlation (for beginners)
//!
//! OBS answers requests in whatever order it finishes them.  Each request
//! therefore carries a process-unique `requestId`, and the caller parks on a
//! `oneshot` channel stored in the *pending table* under that id.  The read
//! loop looks up the id of every response and completes the matching
//! channel.  Every request ends in exactly one of three ways, and each one
//! removes its table entry:
//!
//! 1. the matching response arrives;
//! 2. the per-request timeout fires;
//! 3. the connection drops, and teardown completes every waiting channel
//!    with "connection lost".
//!
//! # Locking
//!
//! The socket handle (here: the sender half of the writer queue) and the
//! pending table live behind one `std::sync::Mutex`.  The lock is held only
//! to read or swap the handle and to touch the table, never across an
//! `.await`; the actual socket write happens in a separate writer task.
//! Teardown clears the handle and drains the table under the same lock, so
//! a request can never register against a connection that is already gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use dfl_core::protocol::obs::{
    authentication_string, decode_frame, encode_identify, encode_request, parse_response,
    CurrentProgramScene, Identify, ObsMessage, Request, RequestResponse, EVENT_SUBSCRIPTION_ALL,
    RPC_VERSION,
};
use dfl_core::{ObsEvent, ObsProtocolError, Reconciliation, RequestIdCounter, SceneCache};

use crate::application::executor::{ControlPlane, ObsRequest, RequestError};
use crate::application::router::EventPublisher;
use crate::application::translator::request_types::GET_CURRENT_PROGRAM_SCENE;
use crate::domain::BridgeConfig;

use super::shutdown::Shutdown;

/// Upper bound for Hello + Identify + Identified.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsRead = SplitStream<WsStream>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type Waiter = oneshot::Sender<Result<Value, RequestError>>;

// ── Public types ──────────────────────────────────────────────────────────────

/// Where the control-plane link currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Ready,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting-hello",
            Self::Identifying => "identifying",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Why one connection attempt failed before reaching `Ready`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not reach OBS at {url}: {source}")]
    Dial {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("OBS requires a password but none is configured")]
    PasswordRequired,

    /// OBS closed the socket mid-handshake, typically with code 4009 after
    /// a wrong password.
    #[error("OBS closed the connection during the handshake: {reason}")]
    Closed { reason: String },

    #[error("OBS handshake timed out")]
    Timeout,

    #[error("handshake transport error: {0}")]
    Transport(#[from] WsError),

    #[error("handshake protocol error: {0}")]
    Protocol(#[from] ObsProtocolError),
}

/// Settings for [`ObsClient`].
#[derive(Clone)]
pub struct ObsClientOptions {
    pub url: String,
    pub password: Option<String>,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
}

impl From<&BridgeConfig> for ObsClientOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            url: config.obs_url.clone(),
            password: config.obs_password.clone(),
            request_timeout: config.request_timeout,
            reconnect_delay: config.reconnect_delay,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Connection state guarded by [`ObsClient::conn`].
#[derive(Default)]
struct ConnectionState {
    /// Writer queue of the live socket; `None` means "not connected".
    outbound: Option<mpsc::UnboundedSender<String>>,
    pending: HashMap<String, Waiter>,
    /// Incremented each time a connection reaches `Ready`.
    generation: u64,
    last_error: Option<String>,
}

/// The live half of a `Ready` connection, handed from `connect` to `serve`.
struct Session {
    generation: u64,
    read: WsRead,
    write: WsWrite,
    outbound: mpsc::UnboundedReceiver<String>,
}

/// Owns the connection to OBS.
///
/// Share it as `Arc<ObsClient>`: one clone runs [`run`](Self::run), the rest
/// send requests through the [`ControlPlane`] impl.
pub struct ObsClient {
    options: ObsClientOptions,
    conn: Mutex<ConnectionState>,
    state: watch::Sender<LinkState>,
    ids: RequestIdCounter,
    scenes: Arc<Mutex<SceneCache>>,
    events: EventPublisher,
}

impl ObsClient {
    pub fn new(
        options: ObsClientOptions,
        scenes: Arc<Mutex<SceneCache>>,
        events: EventPublisher,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            options,
            conn: Mutex::new(ConnectionState::default()),
            state,
            ids: RequestIdCounter::new(),
            scenes,
            events,
        }
    }

    // ── Observers ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Resolves the next time the link is in state `want` (immediately if it
    /// already is).
    pub async fn wait_for_state(&self, want: LinkState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == want).await;
    }

    /// Number of requests currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// How many times a connection has reached `Ready`.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Reason the last connection ended or the last attempt failed.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Sends one request and waits for its response data.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotConnected`] when the link is not `Ready`.
    /// - [`RequestError::Timeout`] when no response arrives in time.
    /// - [`RequestError::ConnectionLost`] when the link drops first.
    /// - [`RequestError::Rejected`] when OBS reports a failed status.
    pub async fn request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> Result<Value, RequestError> {
        let request = Request {
            request_type: request_type.to_string(),
            request_id: self.ids.next_id(),
            request_data,
        };
        let frame = encode_request(&request)?;
        let (tx, rx) = oneshot::channel();

        let outbound = {
            let mut conn = self.lock();
            let Some(outbound) = conn.outbound.clone() else {
                return Err(RequestError::NotConnected);
            };
            conn.pending.insert(request.request_id.clone(), tx);
            outbound
        };
        // Removes the table entry on every exit path, including cancellation.
        let _entry = PendingEntry {
            client: self,
            request_id: &request.request_id,
        };

        if outbound.send(frame).is_err() {
            return Err(RequestError::Transport {
                request_type: request.request_type.clone(),
                reason: "socket writer has stopped".to_string(),
            });
        }
        debug!(request_type, request_id = %request.request_id, "request sent");

        match timeout(self.options.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RequestError::ConnectionLost),
            Err(_) => Err(RequestError::Timeout {
                request_type: request.request_type.clone(),
                timeout: self.options.request_timeout,
            }),
        }
    }

    // ── Supervisor ────────────────────────────────────────────────────────────

    /// Connects, serves, and reconnects until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        info!(url = %self.options.url, "OBS connection supervisor started");

        loop {
            let attempt = tokio::select! {
                _ = shutdown.wait() => break,
                attempt = self.connect() => attempt,
            };

            match attempt {
                Ok(session) => {
                    let reason = self.serve(session, &shutdown).await;
                    self.teardown(&reason);
                }
                Err(e) => {
                    warn!(error = %e, "OBS connection attempt failed");
                    self.teardown(&e.to_string());
                }
            }

            if shutdown.is_triggered() {
                break;
            }
            debug!(delay = ?self.options.reconnect_delay, "reconnecting to OBS");
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = sleep(self.options.reconnect_delay) => {}
            }
        }

        self.teardown("shutting down");
        info!("OBS connection supervisor stopped");
    }

    /// Dials OBS and completes the handshake.
    async fn connect(&self) -> Result<Session, ConnectError> {
        self.set_state(LinkState::Connecting);
        let (ws, _) = connect_async(self.options.url.as_str())
            .await
            .map_err(|source| ConnectError::Dial {
                url: self.options.url.clone(),
                source,
            })?;

        self.set_state(LinkState::AwaitingHello);
        let (mut write, mut read) = ws.split();
        let rpc_version = timeout(
            self.options.handshake_timeout,
            self.handshake(&mut write, &mut read),
        )
        .await
        .map_err(|_| ConnectError::Timeout)??;

        let (tx, outbound) = mpsc::unbounded_channel();
        let generation = {
            let mut conn = self.lock();
            conn.generation += 1;
            conn.outbound = Some(tx);
            conn.last_error = None;
            conn.generation
        };
        self.set_state(LinkState::Ready);
        info!(url = %self.options.url, generation, rpc_version, "connected to OBS");

        Ok(Session {
            generation,
            read,
            write,
            outbound,
        })
    }

    async fn handshake(&self, write: &mut WsWrite, read: &mut WsRead) -> Result<u32, ConnectError> {
        let hello = loop {
            match next_message(read).await? {
                ObsMessage::Hello(hello) => break hello,
                other => debug!(?other, "ignoring frame before Hello"),
            }
        };
        debug!(
            obs_websocket = %hello.obs_web_socket_version,
            rpc_version = hello.rpc_version,
            auth = hello.authentication.is_some(),
            "received Hello"
        );

        let authentication = match (&hello.authentication, &self.options.password) {
            (None, _) => None,
            (Some(_), None) => return Err(ConnectError::PasswordRequired),
            (Some(auth), Some(password)) => Some(authentication_string(
                password,
                &auth.salt,
                &auth.challenge,
            )),
        };
        let identify = Identify {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions: EVENT_SUBSCRIPTION_ALL,
        };
        write
            .send(WsMessage::Text(encode_identify(&identify)?))
            .await?;
        self.set_state(LinkState::Identifying);

        loop {
            match next_message(read).await? {
                ObsMessage::Identified(identified) => {
                    return Ok(identified.negotiated_rpc_version)
                }
                other => debug!(?other, "ignoring frame before Identified"),
            }
        }
    }

    /// Runs the read loop of a `Ready` connection; returns why it ended.
    async fn serve(self: &Arc<Self>, session: Session, shutdown: &Shutdown) -> String {
        let Session {
            generation,
            mut read,
            write,
            outbound,
        } = session;

        let mut writer = tokio::spawn(write_frames(write, outbound));
        let seeder = tokio::spawn({
            let client = Arc::clone(self);
            async move { client.seed_scene_cache().await }
        });

        let reason = loop {
            tokio::select! {
                _ = shutdown.wait() => break "shutting down".to_string(),
                joined = &mut writer => break match joined {
                    Ok(Err(e)) => format!("write failed: {e}"),
                    _ => "writer stopped".to_string(),
                },
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text),
                    Some(Ok(WsMessage::Close(frame))) => break close_reason(frame),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read failed: {e}"),
                    None => break "connection closed".to_string(),
                },
            }
        };

        writer.abort();
        seeder.abort();
        debug!(generation, %reason, "OBS session ended");
        reason
    }

    fn handle_frame(&self, text: &str) {
        match decode_frame(text) {
            Ok(ObsMessage::RequestResponse(response)) => self.resolve(response),
            Ok(ObsMessage::Event(event)) => self.dispatch_event(event),
            Ok(ObsMessage::Hello(_) | ObsMessage::Identified(_)) => {
                debug!("ignoring handshake frame on a ready connection");
            }
            Ok(ObsMessage::Other(op)) => debug!(op, "ignoring frame with unhandled op code"),
            Err(e) => warn!(error = %e, "dropping undecodable OBS frame"),
        }
    }

    /// Completes the waiter registered under the response's request id.
    fn resolve(&self, response: RequestResponse) {
        let waiter = self.lock().pending.remove(&response.request_id);
        let Some(waiter) = waiter else {
            debug!(request_id = %response.request_id, "no caller waiting for this response");
            return;
        };

        let outcome = if response.request_status.result {
            Ok(response.response_data.unwrap_or(Value::Null))
        } else {
            Err(RequestError::Rejected {
                request_type: response.request_type,
                code: response.request_status.code,
                comment: response.request_status.comment,
            })
        };
        // The caller may have given up in the meantime.
        let _ = waiter.send(outcome);
    }

    fn dispatch_event(&self, event: ObsEvent) {
        if let Some(scene) = event.scene_change().map(str::to_string) {
            match self.scenes().reconcile(scene.as_str()) {
                Reconciliation::Superseded { pending } => {
                    debug!(%pending, %scene, "pending scene switch superseded");
                }
                outcome => debug!(?outcome, %scene, "program scene changed"),
            }
        }

        debug!(event_type = %event.event_type, "OBS event");
        self.events.publish(event);
    }

    async fn seed_scene_cache(&self) {
        let reply = self
            .request(GET_CURRENT_PROGRAM_SCENE, None)
            .await
            .and_then(|data| Ok(parse_response::<CurrentProgramScene>(GET_CURRENT_PROGRAM_SCENE, data)?));

        match reply {
            Ok(reply) => {
                let scene = reply.current_program_scene_name;
                self.scenes().reconcile(scene.as_str());
                debug!(%scene, "scene cache seeded");
            }
            Err(e) => warn!(error = %e, "could not read the current program scene"),
        }
    }

    /// Drops the connection handle and fails every pending request.
    fn teardown(&self, reason: &str) {
        let (waiters, was_connected) = {
            let mut conn = self.lock();
            let was_connected = conn.outbound.take().is_some();
            conn.last_error = Some(reason.to_string());
            let waiters: Vec<Waiter> = conn.pending.drain().map(|(_, w)| w).collect();
            (waiters, was_connected)
        };

        let failed = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(RequestError::ConnectionLost));
        }

        if was_connected {
            self.scenes().clear();
            info!(reason, failed_requests = failed, "disconnected from OBS");
        }
        self.set_state(LinkState::Disconnected);
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "OBS link state");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scenes(&self) -> MutexGuard<'_, SceneCache> {
        self.scenes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ControlPlane for ObsClient {
    async fn send_request(&self, request: ObsRequest) -> Result<Value, RequestError> {
        self.request(&request.request_type, request.request_data)
            .await
    }
}

/// Pending-table entry owned by one in-flight [`ObsClient::request`] call.
struct PendingEntry<'a> {
    client: &'a ObsClient,
    request_id: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.client.lock().pending.remove(self.request_id);
    }
}

// ── Socket helpers ────────────────────────────────────────────────────────────

/// Reads frames until one decodes; used only during the handshake.
async fn next_message(read: &mut WsRead) -> Result<ObsMessage, ConnectError> {
    loop {
        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => match decode_frame(&text) {
                Ok(message) => return Ok(message),
                Err(e) => warn!(error = %e, "dropping undecodable OBS frame"),
            },
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(ConnectError::Closed {
                    reason: close_reason(frame),
                })
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ConnectError::Transport(e)),
            None => {
                return Err(ConnectError::Closed {
                    reason: "connection closed".to_string(),
                })
            }
        }
    }
}

/// Drains the writer queue into the socket.
async fn write_frames(
    mut write: WsWrite,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> Result<(), WsError> {
    while let Some(frame) = outbound.recv().await {
        write.send(WsMessage::Text(frame)).await?;
    }
    let _ = write.close().await;
    Ok(())
}

pub(super) fn close_reason(frame: Option<CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) if frame.reason.is_empty() => format!("closed with code {}", u16::from(frame.code)),
        Some(frame) => format!("closed with code {}: {}", u16::from(frame.code), frame.reason),
        None => "closed by peer".to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
