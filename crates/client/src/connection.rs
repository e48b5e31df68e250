//! WebSocket connection manager.
//!
//! [`ConnectionManager`] owns the single persistent connection to a job
//! worker. Call [`ConnectionManager::connect`] to open it; outbound
//! frames go through [`ConnectionManager::send`], inbound frames and
//! the terminal close/error event reach the observers registered with
//! [`on_message`](ConnectionManager::on_message),
//! [`on_close`](ConnectionManager::on_close) and
//! [`on_error`](ConnectionManager::on_error).
//!
//! Each open connection runs two tasks: a writer that drains an
//! outbound channel into the socket (and sends keepalive pings), and a
//! reader that delivers inbound frames to observers one at a time.
//! Reconnection is left to the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use jobwire_core::CorrelationId;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::InvokeError;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

type MessageObserver = Arc<dyn Fn(&InboundFrame) + Send + Sync>;
type CloseObserver = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&InvokeError) + Send + Sync>;

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// WebSocket URL, e.g. `ws://localhost:3000/websocket`.
    pub url: String,
    pub connect_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from(&ClientConfig::new(url))
    }
}

impl From<&ClientConfig> for Endpoint {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: config.connect_timeout,
            keepalive_interval: config.keepalive_interval,
        }
    }
}

/// Identifies one opened connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    /// Unique per successful `connect`, used to correlate log lines.
    pub session_id: Uuid,
    pub url: String,
}

/// A data frame received from the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Binary(Vec<u8>),
    Text(String),
}

/// How a connection ended.
enum Terminal {
    Closed(String),
    Failed(InvokeError),
}

/// Live session state: the outbound channel and the token that stops
/// the session tasks.
struct Session {
    handle: ConnectionHandle,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

enum Slot {
    Idle,
    Connecting(CancellationToken),
    Open(Session),
}

#[derive(Default)]
struct Observers {
    message: RwLock<Vec<MessageObserver>>,
    close: RwLock<Vec<CloseObserver>>,
    error: RwLock<Vec<ErrorObserver>>,
}

/// Owns the persistent connection to one worker endpoint.
///
/// Created behind an `Arc`; the session tasks hold only weak
/// references, so dropping the last `Arc` stops them.
pub struct ConnectionManager {
    endpoint: Endpoint,
    state: watch::Sender<ConnectionState>,
    slot: Mutex<Slot>,
    /// Serializes connect attempts so concurrent callers share one.
    connect_lock: tokio::sync::Mutex<()>,
    next_correlation_id: AtomicU64,
    has_opened: AtomicBool,
    observers: Observers,
}

impl ConnectionManager {
    pub fn new(endpoint: Endpoint) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Arc::new(Self {
            endpoint,
            state,
            slot: Mutex::new(Slot::Idle),
            connect_lock: tokio::sync::Mutex::new(()),
            next_correlation_id: AtomicU64::new(1),
            has_opened: AtomicBool::new(false),
            observers: Observers::default(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether a connection has ever been opened by this manager.
    pub fn has_opened(&self) -> bool {
        self.has_opened.load(Ordering::Acquire)
    }

    /// Allocate a correlation id unique for the lifetime of this manager.
    pub fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId::new(self.next_correlation_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Handle of the open connection, if any.
    pub fn handle(&self) -> Option<ConnectionHandle> {
        match &*self.lock_slot() {
            Slot::Open(session) => Some(session.handle.clone()),
            _ => None,
        }
    }

    /// Open the connection.
    ///
    /// Returns the existing handle when already open. Callers arriving
    /// while another connect is in progress wait for it and reuse its
    /// connection if it succeeded. A failed or timed-out attempt leaves
    /// the state `Closed`.
    pub async fn connect(self: &Arc<Self>) -> Result<ConnectionHandle, InvokeError> {
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }

        let abort = CancellationToken::new();
        {
            let mut slot = self.lock_slot();
            *slot = Slot::Connecting(abort.clone());
            self.set_state(ConnectionState::Connecting);
        }

        let url = self.endpoint.url.as_str();
        tracing::info!(url = %url, "Connecting to job worker");

        let attempt = tokio::select! {
            _ = abort.cancelled() => {
                tracing::info!(url = %url, "Connect aborted by close");
                return Err(InvokeError::ConnectionClosed("closed while connecting".into()));
            }
            result = tokio::time::timeout(self.endpoint.connect_timeout, connect_async(url)) => result,
        };

        let ws_stream = match attempt {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                self.reset_connecting();
                tracing::warn!(url = %url, error = %e, "Failed to connect to job worker");
                return Err(InvokeError::Connection(format!(
                    "Failed to connect to {url}: {e}"
                )));
            }
            Err(_) => {
                self.reset_connecting();
                tracing::warn!(
                    url = %url,
                    timeout_ms = self.endpoint.connect_timeout.as_millis() as u64,
                    "Timed out connecting to job worker",
                );
                return Err(InvokeError::Connection(format!(
                    "Timed out after {:?} connecting to {url}",
                    self.endpoint.connect_timeout
                )));
            }
        };

        let handle = ConnectionHandle {
            session_id: Uuid::new_v4(),
            url: url.to_string(),
        };

        {
            let mut slot = self.lock_slot();
            if !matches!(*slot, Slot::Connecting(_)) || abort.is_cancelled() {
                // close() ran after the handshake finished; drop the socket.
                return Err(InvokeError::ConnectionClosed("closed while connecting".into()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let (sink, stream) = ws_stream.split();

            tokio::spawn(write_loop(
                Arc::downgrade(self),
                handle.session_id,
                sink,
                rx,
                self.endpoint.keepalive_interval,
            ));
            tokio::spawn(read_loop(
                Arc::downgrade(self),
                handle.session_id,
                stream,
                cancel.clone(),
            ));

            *slot = Slot::Open(Session {
                handle: handle.clone(),
                outbound: tx,
                cancel,
            });
            self.has_opened.store(true, Ordering::Release);
            self.set_state(ConnectionState::Open);
        }

        tracing::info!(
            session_id = %handle.session_id,
            url = %url,
            "Connected to job worker",
        );
        Ok(handle)
    }

    /// Queue one binary frame for the worker.
    ///
    /// Fails with [`InvokeError::NotConnected`] unless the state is `Open`.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), InvokeError> {
        match &*self.lock_slot() {
            Slot::Open(session) => session
                .outbound
                .send(Message::Binary(frame))
                .map_err(|_| InvokeError::NotConnected),
            _ => Err(InvokeError::NotConnected),
        }
    }

    /// Close the connection.
    ///
    /// Sends a Close frame, stops the session tasks and delivers the
    /// close event to observers. Aborts an in-progress connect. No-op
    /// when already closed.
    pub fn close(&self) {
        let session = {
            let mut slot = self.lock_slot();
            match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Idle => return,
                Slot::Connecting(abort) => {
                    self.set_state(ConnectionState::Closing);
                    abort.cancel();
                    self.set_state(ConnectionState::Closed);
                    return;
                }
                Slot::Open(session) => {
                    self.set_state(ConnectionState::Closing);
                    session
                }
            }
        };

        tracing::info!(session_id = %session.handle.session_id, "Closing connection");

        // The writer sends the Close frame and exits; the reader stops on
        // the token.
        let _ = session.outbound.send(Message::Close(None));
        session.cancel.cancel();
        drop(session);

        self.set_state(ConnectionState::Closed);
        self.emit(Terminal::Closed("closed by client".into()));
    }

    /// Register an observer for inbound data frames.
    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        write_lock(&self.observers.message).push(Arc::new(f));
    }

    /// Register an observer for an orderly close (either side).
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        write_lock(&self.observers.close).push(Arc::new(f));
    }

    /// Register an observer for a transport failure that ended the connection.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&InvokeError) + Send + Sync + 'static,
    {
        write_lock(&self.observers.error).push(Arc::new(f));
    }

    // ---- private helpers ----

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    fn reset_connecting(&self) {
        let mut slot = self.lock_slot();
        if matches!(*slot, Slot::Connecting(_)) {
            *slot = Slot::Idle;
            self.set_state(ConnectionState::Closed);
        }
    }

    /// Tear down the session `session_id` after its reader or writer
    /// hit the end of the connection.
    ///
    /// Only the first caller finds the session in the slot, so each
    /// connection reports exactly one terminal event.
    fn finish(&self, session_id: Uuid, terminal: Terminal) {
        let session = {
            let mut slot = self.lock_slot();
            if !matches!(&*slot, Slot::Open(s) if s.handle.session_id == session_id) {
                return;
            }
            let Slot::Open(session) = std::mem::replace(&mut *slot, Slot::Idle) else {
                return;
            };
            session
        };

        session.cancel.cancel();
        drop(session);
        self.set_state(ConnectionState::Closed);

        match &terminal {
            Terminal::Closed(reason) => {
                tracing::info!(session_id = %session_id, reason = %reason, "Connection closed");
            }
            Terminal::Failed(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Connection failed");
            }
        }
        self.emit(terminal);
    }

    fn dispatch(&self, frame: &InboundFrame) {
        let observers = read_lock(&self.observers.message);
        for observer in observers {
            observer(frame);
        }
    }

    fn emit(&self, terminal: Terminal) {
        match terminal {
            Terminal::Closed(reason) => {
                let observers = read_lock(&self.observers.close);
                for observer in observers {
                    observer(&reason);
                }
            }
            Terminal::Failed(error) => {
                let observers = read_lock(&self.observers.error);
                for observer in observers {
                    observer(&error);
                }
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        match slot {
            Slot::Open(session) => session.cancel.cancel(),
            Slot::Connecting(abort) => abort.cancel(),
            Slot::Idle => {}
        }
    }
}

fn read_lock<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Forward queued frames to the socket until the channel closes or a
/// Close frame has been sent. Sends a Ping on every keepalive tick.
async fn write_loop(
    manager: Weak<ConnectionManager>,
    session_id: Uuid,
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    keepalive: Option<Duration>,
) {
    let mut keepalive = keepalive.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        let outcome = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => {
                    let closing = matches!(msg, Message::Close(_));
                    match sink.send(msg).await {
                        Ok(()) if closing => break,
                        Ok(()) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            _ = next_tick(&mut keepalive) => {
                tracing::trace!(session_id = %session_id, "Keepalive ping");
                sink.send(Message::Ping(Vec::new())).await
            }
        };

        if let Err(e) = outcome {
            tracing::debug!(session_id = %session_id, error = %e, "WebSocket send failed");
            if let Some(manager) = manager.upgrade() {
                manager.finish(session_id, Terminal::Failed(e.into()));
            }
            break;
        }
    }
}

async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Deliver inbound frames to the observers, in arrival order, until
/// the connection ends or the session is cancelled.
async fn read_loop(
    manager: Weak<ConnectionManager>,
    session_id: Uuid,
    mut stream: SplitStream<WsStream>,
    cancel: CancellationToken,
) {
    let terminal = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        let frame = match next {
            Some(Ok(Message::Binary(bytes))) => InboundFrame::Binary(bytes),
            Some(Ok(Message::Text(text))) => InboundFrame::Text(text),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = match frame {
                    Some(frame) => format!("{} {}", u16::from(frame.code), frame.reason),
                    None => "closed by worker".to_string(),
                };
                break Terminal::Closed(reason);
            }
            Some(Ok(Message::Frame(_))) => continue,
            Some(Err(e)) => break Terminal::Failed(e.into()),
            None => break Terminal::Closed("stream ended".to_string()),
        };

        match manager.upgrade() {
            Some(manager) => manager.dispatch(&frame),
            None => return,
        }
    };

    if let Some(manager) = manager.upgrade() {
        manager.finish(session_id, terminal);
    }
}
