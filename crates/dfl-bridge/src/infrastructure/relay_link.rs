//! Relay link: the outbound connection that makes this bridge reachable by
//! remote controllers.
//!
//! # How pairing works (for beginners)
//!
//! The bridge usually sits behind NAT, so a phone cannot dial it.  Instead
//! both sides dial a public relay service.  The bridge connects to
//! `<relay>?code=<JOIN CODE>&role=host` and sends
//! `{"type":"register","role":"host","code":"<JOIN CODE>"}`.  A controller
//! that joins with the same code is paired with it, and from then on the
//! relay forwards envelopes between the two.
//!
//! ```text
//! bridge ──register(code)──► relay ◄──join(code)── controller
//!        ◄──── command ─────       ◄──── command ──
//!        ───── result ─────►       ───── result ──►
//!        ───── obs_event ──►       ───── obs_event ►
//! ```
//!
//! # Tasks per connection
//!
//! - **reader** (this task): decodes envelopes and dispatches them.  A
//!   `command` that does not decode is answered with an `error` envelope.
//!   While the command queue is full the reader waits for space, so results
//!   keep their submission order; shutdown still interrupts the wait.
//! - **writer**: drains the outbound queue and sends a `ping` envelope every
//!   heartbeat interval so idle proxies keep the socket open.
//! - **event forwarder**: copies OBS events into the outbound queue, dropping
//!   new events when the queue is full.
//! - **command worker**: executes relay commands in arrival order and queues
//!   one `result` per command.
//!
//! When the socket drops, everything above is torn down, the relay sink is
//! detached from the router, and [`RelayLink::run`] reconnects after a fixed
//! delay.  The join code never changes for the life of the process.

use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use dfl_core::domain::command::now_millis;
use dfl_core::protocol::relay::{command_from_relay, RelayEnvelope, RelayProtocolError};
use dfl_core::{Command, JoinCode};

use crate::application::executor::RequestError;
use crate::application::router::{EventRouter, SinkId};
use crate::domain::BridgeConfig;

use super::obs_conn::close_reason;
use super::shutdown::Shutdown;

/// Envelopes that may wait in the outbound queue.
pub const RELAY_QUEUE_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsRead = SplitStream<WsStream>;
type WsWrite = SplitSink<WsStream, WsMessage>;

/// Observable state of the relay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    /// The register envelope went out; commands may arrive.
    Registered,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Registered => "registered",
        })
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("could not reach relay at {url}: {source}")]
    Dial {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("failed to register with the relay: {0}")]
    Register(#[from] WsError),

    #[error(transparent)]
    Protocol(#[from] RelayProtocolError),
}

/// Settings for [`RelayLink`].
#[derive(Debug, Clone)]
pub struct RelayLinkOptions {
    /// Full URL including `code` and `role` query parameters.
    pub endpoint: String,
    pub code: JoinCode,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub queue_capacity: usize,
}

impl RelayLinkOptions {
    /// Options for `config`, or `None` when no relay URL is configured.
    pub fn from_config(config: &BridgeConfig) -> Option<Self> {
        config.relay_endpoint().map(|endpoint| Self {
            endpoint,
            code: config.join_code.clone(),
            heartbeat_interval: config.heartbeat_interval,
            reconnect_delay: config.reconnect_delay,
            queue_capacity: RELAY_QUEUE_CAPACITY,
        })
    }
}

#[derive(Default)]
struct LinkSlot {
    /// Outbound queue of the live socket; `None` means "not connected".
    outbound: Option<mpsc::Sender<RelayEnvelope>>,
    generation: u64,
    last_error: Option<String>,
}

struct Session {
    generation: u64,
    read: WsRead,
    write: WsWrite,
}

/// Maintains the host connection to the relay service.
pub struct RelayLink {
    options: RelayLinkOptions,
    router: Arc<EventRouter>,
    slot: Mutex<LinkSlot>,
    state: watch::Sender<RelayState>,
}

impl RelayLink {
    pub fn new(options: RelayLinkOptions, router: Arc<EventRouter>) -> Self {
        let (state, _) = watch::channel(RelayState::Disconnected);
        Self {
            options,
            router,
            slot: Mutex::new(LinkSlot::default()),
            state,
        }
    }

    pub fn code(&self) -> &JoinCode {
        &self.options.code
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub async fn wait_for_state(&self, want: RelayState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == want).await;
    }

    /// How many times registration has succeeded.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Connects, serves, and reconnects until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        info!(code = %self.options.code, "relay link started");

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
                    warn!(error = %e, "relay connection attempt failed");
                    self.teardown(&e.to_string());
                }
            }

            if shutdown.is_triggered() {
                break;
            }
            debug!(delay = ?self.options.reconnect_delay, "reconnecting to relay");
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = sleep(self.options.reconnect_delay) => {}
            }
        }

        self.teardown("shutting down");
        info!("relay link stopped");
    }

    async fn connect(&self) -> Result<Session, RelayError> {
        self.set_state(RelayState::Connecting);
        let (ws, _) = connect_async(self.options.endpoint.as_str())
            .await
            .map_err(|source| RelayError::Dial {
                url: self.options.endpoint.clone(),
                source,
            })?;

        let (mut write, read) = ws.split();
        let register = RelayEnvelope::register_host(self.options.code.as_str()).encode()?;
        write.send(WsMessage::Text(register)).await?;

        let generation = {
            let mut slot = self.lock();
            slot.generation += 1;
            slot.last_error = None;
            slot.generation
        };
        self.set_state(RelayState::Registered);
        info!(code = %self.options.code, generation, "registered with relay");

        Ok(Session {
            generation,
            read,
            write,
        })
    }

    /// Runs one registered connection; returns why it ended.
    async fn serve(&self, session: Session, shutdown: &Shutdown) -> String {
        let Session {
            generation,
            mut read,
            write,
        } = session;

        let (tx, rx) = mpsc::channel(self.options.queue_capacity);
        self.lock().outbound = Some(tx.clone());

        let mut writer = tokio::spawn(write_envelopes(
            write,
            rx,
            self.options.heartbeat_interval,
        ));
        let forwarder = self.router.spawn_event_forwarder(
            SinkId::Relay,
            tx.clone(),
            RelayEnvelope::ObsEvent,
            Arc::new(AtomicBool::new(true)),
        );
        let commands =
            self.router
                .spawn_command_worker(SinkId::Relay, tx.clone(), RelayEnvelope::Result);

        let reason = loop {
            tokio::select! {
                _ = shutdown.wait() => break "shutting down".to_string(),
                joined = &mut writer => break match joined {
                    Ok(Err(e)) => format!("write failed: {e}"),
                    _ => "writer stopped".to_string(),
                },
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => tokio::select! {
                        _ = shutdown.wait() => break "shutting down".to_string(),
                        _ = self.handle_text(&text, &tx, &commands) => {}
                    },
                    Some(Ok(WsMessage::Close(frame))) => break close_reason(frame),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read failed: {e}"),
                    None => break "connection closed".to_string(),
                },
            }
        };

        writer.abort();
        forwarder.abort();
        self.router.detach(SinkId::Relay);
        debug!(generation, %reason, "relay session ended");
        reason
    }

    async fn handle_text(
        &self,
        text: &str,
        outbound: &mpsc::Sender<RelayEnvelope>,
        commands: &mpsc::Sender<Command>,
    ) {
        let envelope = match RelayEnvelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e @ RelayProtocolError::InvalidCommand(_)) => {
                warn!(error = %e, "rejecting relay command");
                let reply = RelayEnvelope::Error {
                    message: e.to_string(),
                };
                let _ = outbound.send(reply).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "ignoring undecodable relay frame");
                return;
            }
        };

        match envelope {
            RelayEnvelope::Ping => {
                let _ = outbound.send(RelayEnvelope::Pong).await;
            }
            RelayEnvelope::Pong => {}
            RelayEnvelope::Command { method, params } => {
                let command = command_from_relay(method, params, now_millis());
                debug!(kind = %command.kind, "relay command");
                if commands.send(command).await.is_err() {
                    warn!("relay command worker has stopped");
                }
            }
            RelayEnvelope::PeerConnected { .. } | RelayEnvelope::RequestUpdate => {
                let router = Arc::clone(&self.router);
                spawn_reply(
                    outbound.clone(),
                    "snapshot",
                    async move { router.snapshot().await },
                    RelayEnvelope::ObsData,
                );
            }
            RelayEnvelope::RequestStatus => {
                let router = Arc::clone(&self.router);
                spawn_reply(
                    outbound.clone(),
                    "output status",
                    async move { router.output_status().await },
                    RelayEnvelope::ObsStatus,
                );
            }
            RelayEnvelope::Waiting { .. } => {
                info!(code = %self.options.code, "waiting for a controller to join");
            }
            RelayEnvelope::Connected { .. } => info!("controller paired through relay"),
            RelayEnvelope::Error { message } => warn!(%message, "relay reported an error"),
            other => debug!(kind = other.type_name(), "ignoring relay envelope"),
        }
    }

    fn teardown(&self, reason: &str) {
        let was_connected = {
            let mut slot = self.lock();
            slot.last_error = Some(reason.to_string());
            slot.outbound.take().is_some()
        };
        if was_connected {
            info!(reason, "disconnected from relay");
        }
        self.set_state(RelayState::Disconnected);
    }

    fn set_state(&self, state: RelayState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "relay link state");
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Answers a state request off the reader task.
///
/// A failed query is reported to the controller as an `error` envelope.
fn spawn_reply<T, Fut>(
    outbound: mpsc::Sender<RelayEnvelope>,
    what: &'static str,
    query: Fut,
    wrap: fn(T) -> RelayEnvelope,
) where
    T: Send + 'static,
    Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
{
    tokio::spawn(async move {
        let reply = match query.await {
            Ok(value) => wrap(value),
            Err(e) => {
                warn!(error = %e, what, "could not answer relay request");
                RelayEnvelope::Error {
                    message: format!("{what} unavailable: {e}"),
                }
            }
        };
        let _ = outbound.send(reply).await;
    });
}

/// Drains `outbound` into the socket, interleaving heartbeat pings.
async fn write_envelopes(
    mut write: WsWrite,
    mut outbound: mpsc::Receiver<RelayEnvelope>,
    heartbeat: Duration,
) -> Result<(), WsError> {
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let envelope = tokio::select! {
            next = outbound.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
            _ = ticker.tick() => RelayEnvelope::Ping,
        };
        match envelope.encode() {
            Ok(text) => write.send(WsMessage::Text(text)).await?,
            Err(e) => warn!(error = %e, kind = envelope.type_name(), "dropping relay envelope"),
        }
    }

    let _ = write.close().await;
    Ok(())
}
