//! Single-client connection management
//!
//! [`ConnectionManager`] owns at most one open client connection at a time.
//! Every attach gets a fresh generation number and its own set of background
//! tasks (receive loop, drain task, keep-alive), all tied to a cancellation
//! token that fires when that generation closes. Attaching while a connection
//! is open closes the old one completely before the new one is registered.
//!
//! Writes from the immediate path, the drain task and the keep-alive go
//! through one per-connection mutex around the [`FrameSink`], so frames never
//! interleave on the wire.

mod tasks;
pub mod transport;


use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::DeliveryQueue;
use crate::rate::RateController;
use crate::types::{GREETING, QueuedMessage, WireMessage, names};
use crate::{RelayError, Result};

pub use transport::{CloseKind, CloseReason, FrameSink, InboundFrame, InboundStream, OutboundFrame};

/// Protocol ping cadence
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Pause between drain passes over the delivery queue
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Connection notifications buffered per observer
pub const EVENT_CAPACITY: usize = 32;

/// Connection manager settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub drain_interval: Duration,
    pub keep_alive_interval: Duration,
    /// Value of the `sdk-connected` handshake message
    pub greeting: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            greeting: GREETING.to_string(),
        }
    }
}

/// Lifecycle state of a connection (or of the manager's active slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Nothing attached
    Idle,
    Open,
    Closing,
    /// Terminal state of one connection instance
    Closed,
}

/// Notification published to connection observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { generation: u64 },
    Closed { generation: u64, reason: CloseReason },
}

/// Completion handle returned from [`ConnectionManager::attach`]
///
/// The request handler that accepted the transport awaits it so the
/// transport stays alive exactly as long as the connection does.
#[derive(Debug)]
pub struct ConnectionLifetime {
    generation: u64,
    done: oneshot::Receiver<CloseReason>,
}

impl ConnectionLifetime {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait until this connection reaches `Closed`.
    pub async fn closed(self) -> CloseReason {
        self.done.await.unwrap_or_else(|_| CloseReason::aborted("Connection dropped"))
    }
}

/// One connection generation
pub(crate) struct Connection {
    generation: u64,
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    cancel: CancellationToken,
    state: Mutex<ConnectionState>,
    done: Mutex<Option<oneshot::Sender<CloseReason>>>,
}

impl Connection {
    fn new(generation: u64, sink: Box<dyn FrameSink>, done: oneshot::Sender<CloseReason>) -> Self {
        Self {
            generation,
            sink: tokio::sync::Mutex::new(sink),
            cancel: CancellationToken::new(),
            state: Mutex::new(ConnectionState::Open),
            done: Mutex::new(Some(done)),
        }
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    /// Write under the sink lock. Once cancelled, nothing reaches the sink.
    async fn write(&self, frame: OutboundFrame) -> Result<()> {
        let mut sink = self.sink.lock().await;
        if self.cancel.is_cancelled() {
            return Err(RelayError::ConnectionClosed { generation: self.generation });
        }
        sink.send(frame).await
    }
}

struct Shared {
    config: ConnectionConfig,
    queue: Arc<DeliveryQueue>,
    rate: Arc<RateController>,
    active: Mutex<Option<Arc<Connection>>>,
    // Attach and explicit close are one critical section
    attach_lock: tokio::sync::Mutex<()>,
    // Held by a drain task for each pass so two generations never drain at once
    drain_lock: tokio::sync::Mutex<()>,
    generations: AtomicU64,
    closing: AtomicUsize,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Owner of the single active client connection
///
/// Cheap to clone; all clones share the same slot.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        queue: Arc<DeliveryQueue>,
        rate: Arc<RateController>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                queue,
                rate,
                active: Mutex::new(None),
                attach_lock: tokio::sync::Mutex::new(()),
                drain_lock: tokio::sync::Mutex::new(()),
                generations: AtomicU64::new(0),
                closing: AtomicUsize::new(0),
                events,
            }),
        }
    }

    /// Register a new client transport as the active connection.
    ///
    /// Any open connection is driven to `Closed` first. The new connection is
    /// greeted with `sdk-connected` and gets its receive loop, drain task and
    /// keep-alive started.
    pub async fn attach<S>(&self, sink: S, inbound: InboundStream) -> ConnectionLifetime
    where
        S: FrameSink,
    {
        let _attach = self.shared.attach_lock.lock().await;

        if let Some(previous) = self.take_active(None) {
            info!(generation = previous.generation, "replacing active client connection");
            self.shutdown(previous, CloseReason::superseded()).await;
        }

        let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let (done_tx, done_rx) = oneshot::channel();
        let conn = Arc::new(Connection::new(generation, Box::new(sink), done_tx));
        *lock(&self.shared.active) = Some(Arc::clone(&conn));
        let _ = self.shared.events.send(ConnectionEvent::Opened { generation });
        info!(generation, "client connected");

        let greeting = serde_json::Value::from(self.shared.config.greeting.as_str());
        if let Err(e) = self.write_message(&conn, names::SDK_CONNECTED, &greeting).await {
            warn!(generation, error = %e, "failed to greet client");
        }

        tokio::spawn(tasks::receive_loop(self.clone(), Arc::clone(&conn), inbound));
        tokio::spawn(tasks::drain_loop(self.clone(), Arc::clone(&conn)));
        tokio::spawn(tasks::keep_alive(self.clone(), conn));

        ConnectionLifetime { generation, done: done_rx }
    }

    /// Send one message on the immediate path.
    ///
    /// Fails with [`RelayError::NotConnected`] when nothing is attached.
    pub async fn send(&self, name: &str, value: impl Into<serde_json::Value>) -> Result<()> {
        let conn = self.active().ok_or(RelayError::NotConnected)?;
        self.write_message(&conn, name, &value.into()).await
    }

    pub async fn send_message(&self, message: &QueuedMessage) -> Result<()> {
        let conn = self.active().ok_or(RelayError::NotConnected)?;
        self.write_message(&conn, &message.name, &message.value).await
    }

    /// Close the active connection, if any. Returns whether one was open.
    pub async fn close(&self, description: impl Into<String>) -> bool {
        let _attach = self.shared.attach_lock.lock().await;
        match self.take_active(None) {
            Some(conn) => {
                self.shutdown(conn, CloseReason::shutdown(description)).await;
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.active() {
            Some(conn) => conn.state(),
            None if self.shared.closing.load(Ordering::Acquire) > 0 => ConnectionState::Closing,
            None => ConnectionState::Idle,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Generation of the active connection
    pub fn generation(&self) -> Option<u64> {
        self.active().map(|conn| conn.generation)
    }

    /// Stream of open/close notifications from now on
    ///
    /// An observer that falls more than [`EVENT_CAPACITY`] notifications
    /// behind skips the oldest ones; the gap is logged.
    pub fn events(&self) -> impl Stream<Item = ConnectionEvent> + Send + 'static {
        BroadcastStream::new(self.shared.events.subscribe()).filter_map(|event| async move {
            match event {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "connection event observer lagged, notifications dropped");
                    None
                }
            }
        })
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.shared.queue
    }

    pub fn rate(&self) -> &Arc<RateController> {
        &self.shared.rate
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    fn active(&self) -> Option<Arc<Connection>> {
        lock(&self.shared.active).clone()
    }

    /// Take the active connection out of the slot, optionally only if it is
    /// still the given generation.
    fn take_active(&self, generation: Option<u64>) -> Option<Arc<Connection>> {
        let mut active = lock(&self.shared.active);
        match (active.as_ref(), generation) {
            (Some(conn), Some(expected)) if conn.generation != expected => None,
            _ => active.take(),
        }
    }

    /// Close a specific generation. A no-op if it is no longer active.
    pub(crate) async fn close_generation(&self, generation: u64, reason: CloseReason) -> bool {
        match self.take_active(Some(generation)) {
            Some(conn) => {
                self.shutdown(conn, reason).await;
                true
            }
            None => false,
        }
    }

    /// Drive a connection that has been removed from the slot to `Closed`.
    async fn shutdown(&self, conn: Arc<Connection>, reason: CloseReason) {
        let generation = conn.generation;
        self.shared.closing.fetch_add(1, Ordering::AcqRel);
        conn.set_state(ConnectionState::Closing);
        conn.cancel.cancel();

        {
            let mut sink = conn.sink.lock().await;
            if let Err(e) = sink.close(&reason.description).await {
                debug!(generation, error = %e, "close handshake failed");
            }
        }

        conn.set_state(ConnectionState::Closed);
        if let Some(done) = lock(&conn.done).take() {
            let _ = done.send(reason.clone());
        }
        self.shared.closing.fetch_sub(1, Ordering::AcqRel);
        info!(generation, reason = %reason, "client connection closed");
        let _ = self.shared.events.send(ConnectionEvent::Closed { generation, reason });
    }

    async fn write_message(
        &self,
        conn: &Arc<Connection>,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<()> {
        let text = WireMessage::new(name, value).to_json()?;
        self.write(conn, OutboundFrame::Text(text)).await
    }

    /// Write a frame; a transport failure closes the connection.
    async fn write(&self, conn: &Arc<Connection>, frame: OutboundFrame) -> Result<()> {
        match conn.write(frame).await {
            Err(e) if e.is_transport_failure() => {
                warn!(generation = conn.generation, error = %e, "client transport failed");
                self.close_generation(conn.generation, CloseReason::aborted("Connection aborted"))
                    .await;
                Err(e)
            }
            result => result,
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
