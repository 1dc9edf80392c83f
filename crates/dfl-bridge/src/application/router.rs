//! Event router: who hears what.
//!
//! Two flows pass through here:
//!
//! ```text
//!                 ┌──────────────► relay link    (broadcast)
//! OBS events ─────┤
//!                 └──────────────► each client   (broadcast)
//!
//! sink command ──► command worker ──► executor ──► result ──► same sink only
//! ```
//!
//! - **Events** are one-to-many.  [`EventPublisher`] wraps a Tokio
//!   `broadcast` channel; every attached sink holds its own receiver.
//! - **Results** are point-to-point.  Each sink gets its own command worker
//!   (see [`EventRouter::spawn_command_worker`]) that executes that sink's
//!   commands one at a time, so results reach the sink in the order it
//!   submitted them.  Commands from different sinks run independently.
//!
//! # Full queues
//!
//! Every sink drains a bounded outbound queue.  When an event arrives and
//! the queue is full, the *new* event is dropped and a warning logged; the
//! broadcast itself never waits for a slow sink.  Results are different:
//! the command worker waits for room, which only stalls that sink's own
//! commands, so a result is never lost.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dfl_core::protocol::relay::{ObsSnapshot, OutputStatus};
use dfl_core::{Command, CommandResult, ObsEvent};

use super::executor::{CommandExecutor, RequestError};
use super::snapshot::{collect_output_status, collect_snapshot};

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Commands a sink may queue before its reader waits.
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Identity of one attached sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkId {
    /// The relay link (at most one).
    Relay,
    /// A directly connected WebSocket client.
    Client(Uuid),
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relay => f.write_str("relay"),
            Self::Client(id) => write!(f, "client:{id}"),
        }
    }
}

/// Sending half of the OBS event stream.
///
/// Cloned into the control-plane client, which publishes every event it
/// receives.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<ObsEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcasts `event`; returns how many receivers got it.
    pub fn publish(&self, event: ObsEvent) -> usize {
        // `send` only fails when nobody is listening.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObsEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

/// Registry of attached sinks plus the command path into the executor.
pub struct EventRouter {
    executor: Arc<CommandExecutor>,
    events: EventPublisher,
    sinks: Mutex<HashSet<SinkId>>,
}

impl EventRouter {
    pub fn new(executor: Arc<CommandExecutor>, events: EventPublisher) -> Self {
        Self {
            executor,
            events,
            sinks: Mutex::new(HashSet::new()),
        }
    }

    /// Registers `sink` and returns its event receiver.
    ///
    /// Dropping the receiver stops delivery; call [`detach`](Self::detach)
    /// as well so the registry stays accurate.
    pub fn attach(&self, sink: SinkId) -> broadcast::Receiver<ObsEvent> {
        let count = {
            let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
            sinks.insert(sink);
            sinks.len()
        };
        info!(%sink, sinks = count, "sink attached");
        self.events.subscribe()
    }

    /// Removes `sink`; returns `false` if it was not attached.
    pub fn detach(&self, sink: SinkId) -> bool {
        let (removed, count) = {
            let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
            (sinks.remove(&sink), sinks.len())
        };
        if removed {
            info!(%sink, sinks = count, "sink detached");
        }
        removed
    }

    pub fn is_attached(&self, sink: SinkId) -> bool {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&sink)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.events
    }

    /// Executes one command outside any worker.
    pub async fn execute(&self, command: Command) -> CommandResult {
        self.executor.execute(command).await
    }

    /// Collects the current OBS state for a relay peer.
    ///
    /// # Errors
    ///
    /// Returns the first [`RequestError`] hit while querying OBS.
    pub async fn snapshot(&self) -> Result<ObsSnapshot, RequestError> {
        collect_snapshot(self.executor.control()).await
    }

    /// Reads the recording and streaming flags.
    ///
    /// # Errors
    ///
    /// Returns the first [`RequestError`] hit while querying OBS.
    pub async fn output_status(&self) -> Result<OutputStatus, RequestError> {
        collect_output_status(self.executor.control()).await
    }

    /// Attaches `sink` and starts forwarding events into `outbound`.
    ///
    /// Events are wrapped with `wrap` and skipped while `subscribed` is
    /// `false`.  A full queue drops the event (drop-new).  The task ends
    /// when `outbound` closes or the task is aborted; it does not detach the
    /// sink.
    pub fn spawn_event_forwarder<T, F>(
        &self,
        sink: SinkId,
        outbound: mpsc::Sender<T>,
        wrap: F,
        subscribed: Arc<AtomicBool>,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: Fn(ObsEvent) -> T + Send + 'static,
    {
        let mut events = self.attach(sink);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !subscribed.load(Ordering::Relaxed) {
                            continue;
                        }
                        match outbound.try_send(wrap(event)) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!(%sink, "outbound queue full; event dropped");
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%sink, skipped, "sink fell behind the event stream");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(%sink, "event forwarder stopped");
        })
    }

    /// Starts the command worker for `sink`.
    ///
    /// Commands sent into the returned channel are executed strictly in order;
    /// each result is wrapped with `wrap` and pushed into `results`.  Pushing
    /// waits for room, so a slow sink only ever stalls its own worker.  The
    /// worker stops when the returned sender is dropped or `results` closes.
    pub fn spawn_command_worker<T, F>(
        &self,
        sink: SinkId,
        results: mpsc::Sender<T>,
        wrap: F,
    ) -> mpsc::Sender<Command>
    where
        T: Send + 'static,
        F: Fn(CommandResult) -> T + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Command>(COMMAND_QUEUE_CAPACITY);
        let executor = Arc::clone(&self.executor);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                debug!(%sink, kind = %command.kind, "executing command");
                let result = executor.execute(command).await;
                if results.send(wrap(result)).await.is_err() {
                    debug!(%sink, "sink closed; command worker stopping");
                    break;
                }
            }
        });

        tx
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
