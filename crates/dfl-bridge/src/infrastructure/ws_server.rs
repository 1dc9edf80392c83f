//! Direct-client WebSocket server: accept loop and per-client sessions.
//!
//! Controllers on the same network can skip the relay and connect straight
//! to the bridge.  This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket session.
//! 3. Registering the session with the [`EventRouter`] under a fresh
//!    [`SinkId::Client`] id.
//! 4. Running the per-session tasks:
//!    - **reader** (the session task itself): decodes `{type, payload}`
//!      envelopes and dispatches them.
//!    - **writer**: drains the bounded outbound queue, sends a WebSocket ping
//!      every ping interval, and gives up on a write that exceeds the write
//!      deadline.
//!    - **event forwarder**: copies OBS events into the queue while the client
//!      is subscribed, dropping new events when the queue is full.
//!    - **command worker**: executes this client's commands in order; results
//!      go to this client only.
//! 5. Detaching the sink when the session ends, whatever the cause.
//!
//! A slow or dead client can only fill its own queue; the accept loop and
//! every other client keep running.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use dfl_core::protocol::client::ClientEnvelope;

use crate::application::router::{EventRouter, SinkId};
use crate::domain::BridgeConfig;

use super::shutdown::Shutdown;

type WsWrite = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Per-session settings shared by every direct client.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub queue_capacity: usize,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
}

impl From<&BridgeConfig> for ClientSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            queue_capacity: config.client_queue_capacity,
            ping_interval: config.client_ping_interval,
            write_timeout: config.client_write_timeout,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the direct-client listener.
///
/// # Errors
///
/// Returns an error if the address is in use or the process lacks
/// permission to bind it.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind direct-client listener on {addr}"))
}

/// Binds `addr` and serves direct clients until `shutdown` fires.
///
/// # Errors
///
/// Returns an error only if the listener cannot be bound.
pub async fn run_server(
    addr: SocketAddr,
    router: Arc<EventRouter>,
    settings: ClientSettings,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let listener = bind(addr).await?;
    serve(listener, router, settings, shutdown).await;
    Ok(())
}

/// Accepts connections on `listener` until `shutdown` fires.
///
/// Each connection is handed to its own task immediately, so the loop never
/// waits on a client.
pub async fn serve(
    listener: TcpListener,
    router: Arc<EventRouter>,
    settings: ClientSettings,
    shutdown: Shutdown,
) {
    match listener.local_addr() {
        Ok(addr) => info!("direct-client endpoint listening on ws://{addr}"),
        Err(e) => warn!("direct-client endpoint listening (address unknown: {e})"),
    }

    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait() => {
                info!("shutdown signalled; stopping accept loop");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                debug!("new direct connection from {peer_addr}");
                let router = Arc::clone(&router);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_client_session(stream, peer_addr, router, settings, shutdown).await;
                });
            }
            // Transient (e.g. out of file descriptors); keep accepting.
            Err(e) => error!("accept error: {e}"),
        }
    }
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Wraps [`run_session`] and logs how the session ended.
async fn handle_client_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<EventRouter>,
    settings: ClientSettings,
    shutdown: Shutdown,
) {
    let sink = SinkId::Client(Uuid::new_v4());
    match run_session(raw_stream, peer_addr, sink, &router, settings, &shutdown).await {
        Ok(()) => info!(%sink, "session {peer_addr} closed normally"),
        Err(e) => warn!(%sink, "session {peer_addr} closed with error: {e:#}"),
    }
    router.detach(sink);
}

/// Runs the complete lifecycle of one direct client.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails, a read fails, or the
/// writer gives up on the client.
async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    sink: SinkId,
    router: &Arc<EventRouter>,
    settings: ClientSettings,
    shutdown: &Shutdown,
) -> anyhow::Result<()> {
    // ── Step 1: Complete the WebSocket handshake ───────────────────────────────
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    info!(%sink, "direct client connected from {peer_addr}");

    let (write, mut read) = ws_stream.split();

    // ── Step 2: Outbound queue and its writer ─────────────────────────────────
    let (tx, rx) = mpsc::channel::<ClientEnvelope>(settings.queue_capacity);
    let mut writer = tokio::spawn(write_envelopes(write, rx, settings));

    // ── Step 3: Attach to the router ──────────────────────────────────────────
    let subscribed = Arc::new(AtomicBool::new(true));
    let forwarder = router.spawn_event_forwarder(
        sink,
        tx.clone(),
        ClientEnvelope::Event,
        Arc::clone(&subscribed),
    );
    let commands = router.spawn_command_worker(sink, tx.clone(), ClientEnvelope::Result);

    // ── Step 4: Read loop ─────────────────────────────────────────────────────
    let outcome = loop {
        tokio::select! {
            _ = shutdown.wait() => {
                let _ = tx.try_send(ClientEnvelope::error("bridge shutting down"));
                break Ok(());
            }
            joined = &mut writer => break match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow!("writer task failed: {e}")),
            },
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let envelope = match ClientEnvelope::decode(&text) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            debug!(%sink, error = %e, "rejecting client frame");
                            if tx.send(ClientEnvelope::error(e.to_string())).await.is_err() {
                                break Ok(());
                            }
                            continue;
                        }
                    };
                    match envelope {
                        ClientEnvelope::Command(command) => {
                            debug!(%sink, kind = %command.kind, "client command");
                            // Waits while this client's command queue is full.
                            tokio::select! {
                                _ = shutdown.wait() => {
                                    let _ = tx.try_send(ClientEnvelope::error("bridge shutting down"));
                                    break Ok(());
                                }
                                sent = commands.send(command) => if sent.is_err() {
                                    break Err(anyhow!("command worker stopped"));
                                },
                            }
                        }
                        ClientEnvelope::Subscribe => subscribed.store(true, Ordering::Relaxed),
                        ClientEnvelope::Unsubscribe => subscribed.store(false, Ordering::Relaxed),
                        ClientEnvelope::Ping => {
                            if tx.send(ClientEnvelope::Pong).await.is_err() {
                                break Ok(());
                            }
                        }
                        // `decode` yields only the variants above.
                        other => debug!(%sink, ?other, "ignoring client envelope"),
                    }
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!(%sink, "ignoring binary frame from direct client");
                }
                Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                // Ping/Pong control frames are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(anyhow!(e).context("read failed")),
            },
        }
    };

    // ── Step 5: Tear down ─────────────────────────────────────────────────────
    forwarder.abort();
    drop(commands);
    drop(tx);
    // Give the writer a moment to flush a final error frame, then stop it.
    if !writer.is_finished() {
        let _ = timeout(settings.write_timeout, &mut writer).await;
        writer.abort();
    }
    outcome
}

/// Drains `outbound` into the socket and keeps the connection alive.
///
/// # Errors
///
/// Returns an error when a write fails or exceeds `settings.write_timeout`.
async fn write_envelopes(
    mut write: WsWrite,
    mut outbound: mpsc::Receiver<ClientEnvelope>,
    settings: ClientSettings,
) -> anyhow::Result<()> {
    let mut ticker = interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            next = outbound.recv() => match next {
                Some(envelope) => match envelope.encode() {
                    Ok(text) => WsMessage::Text(text),
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable client envelope");
                        continue;
                    }
                },
                None => break,
            },
            _ = ticker.tick() => WsMessage::Ping(Vec::new()),
        };
        send_with_deadline(&mut write, frame, settings.write_timeout).await?;
    }

    let _ = write.close().await;
    Ok(())
}

async fn send_with_deadline(
    write: &mut WsWrite,
    frame: WsMessage,
    deadline: Duration,
) -> anyhow::Result<()> {
    match timeout(deadline, write.send(frame)).await {
        Ok(result) => result.map_err(|e: WsError| anyhow!(e).context("write failed")),
        Err(_) => Err(anyhow!("write timed out after {deadline:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_settings_follow_config() {
        // Arrange
        let config = BridgeConfig {
            client_queue_capacity: 16,
            client_ping_interval: Duration::from_secs(7),
            client_write_timeout: Duration::from_secs(3),
            ..BridgeConfig::default()
        };

        // Act
        let settings = ClientSettings::from(&config);

        // Assert
        assert_eq!(settings.queue_capacity, 16);
        assert_eq!(settings.ping_interval, Duration::from_secs(7));
        assert_eq!(settings.write_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let taken = first.local_addr().unwrap();

        let err = bind(taken).await.unwrap_err();

        assert!(format!("{err:#}").contains("failed to bind direct-client listener"));
    }
}
