//! Core JSON-RPC session over a message socket.
//!
//! A [`Session`] owns one transport connection at a time, correlates requests
//! with their responses, and recovers from dropped connections. All session
//! state sits behind a single mutex; transport events are funnelled through
//! one pump task, so the correlation queues are only ever mutated under that
//! lock, in event order.
//!
//! Two mechanisms bring a dead connection back:
//!
//! - **Reactive reconnect** runs when a connection closes abnormally. It
//!   rejects requests that were already on the wire, keeps requests that were
//!   still waiting to be sent, and retries after `delay` up to
//!   `max_attempts` times before giving up with a single terminal error.
//! - **Idle watchdog** polls every `disconnect_check_interval` and connects
//!   when the session sits disconnected with no reconnect under way.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use wsrpc_wire::{chunk_timeout_payload, message_id, Request, RequestId, Response};

use crate::config::SessionConfig;
use crate::deferred::{deferred, deferred_with_timeout, DeferredState, ResponseHandle};
use crate::error::{Result, SessionError};
use crate::queue::{RequestQueue, RequestRecord};
use crate::reassembler::{MessageReassembler, StallCallback};
use crate::reconnect::ReconnectState;
use crate::transport::{
    Connection, Connector, EventSink, ReadyState, TransportError, TransportEvent, WsConnector,
    CLOSE_NORMAL,
};

/// Connection status derived from the live transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Handshake under way
    Connecting,
    /// Open and ready to send
    Connected,
    /// No usable connection
    #[default]
    Disconnected,
}

/// Events emitted by sessions
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection opened
    Connect,
    /// The connection closed
    Disconnect {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// A complete inbound message, matched or not
    Message(Value),
    /// A failure nobody was synchronously waiting for
    Error(SessionError),
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Status at the time of the snapshot
    pub status: ConnectionStatus,
    /// Connections opened
    pub connects: u64,
    /// Reactive reconnect attempts scheduled
    pub reconnect_attempts: u64,
    /// Whether a reconnect is under way
    pub reconnecting: bool,
    /// Request frames handed to the transport
    pub requests_sent: u64,
    /// Responses matched to a request
    pub responses_matched: u64,
    /// Complete messages received
    pub messages_received: u64,
    /// Timestamp of the last inbound frame
    pub last_message_in: Option<Instant>,
}

struct SessionState {
    connection: Option<Box<dyn Connection>>,
    /// Generation of the most recently opened connection
    generation: u64,
    /// Generation whose events are currently handled
    listening: Option<u64>,
    /// Open event seen for the current connection
    opened: bool,
    pending: RequestQueue,
    sent: RequestQueue,
    reconnect: ReconnectState,
    reconnect_timer: Option<JoinHandle<()>>,
    reassembler: MessageReassembler,
    stats: SessionStats,
    disposed: bool,
}

impl SessionState {
    fn status(&self) -> ConnectionStatus {
        match self.connection.as_ref().map(|c| c.ready_state()) {
            Some(ReadyState::Connecting) => ConnectionStatus::Connecting,
            // Until the open event is handled, pending requests have not been
            // flushed yet and new ones must queue behind them.
            Some(ReadyState::Open) if self.opened => ConnectionStatus::Connected,
            Some(ReadyState::Open) => ConnectionStatus::Connecting,
            _ => ConnectionStatus::Disconnected,
        }
    }

    fn detach(&mut self) {
        self.listening = None;
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

struct SessionInner {
    endpoint: String,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    this: Weak<SessionInner>,
}

/// Handle to a JSON-RPC session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session using `connector` for its connections.
    ///
    /// Nothing is dialed until [`connect`](Self::connect) or
    /// [`request`](Self::request) is called, or the idle watchdog fires.
    /// Must be called from within a Tokio runtime.
    pub fn new(
        endpoint: impl Into<String>,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let endpoint = endpoint.into();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let inner = Arc::new_cyclic(|this: &Weak<SessionInner>| {
            let stalled = this.clone();
            let on_stall: StallCallback = Arc::new(move || {
                if let Some(inner) = stalled.upgrade() {
                    inner.on_chunk_timeout();
                }
            });
            let reassembler =
                MessageReassembler::new(config.chunk_timeout, config.auto_reconnect, on_stall);

            SessionInner {
                endpoint: endpoint.clone(),
                config: config.clone(),
                connector,
                state: Mutex::new(SessionState {
                    connection: None,
                    generation: 0,
                    listening: None,
                    opened: false,
                    pending: RequestQueue::new(),
                    sent: RequestQueue::new(),
                    reconnect: ReconnectState::new(),
                    reconnect_timer: None,
                    reassembler,
                    stats: SessionStats::default(),
                    disposed: false,
                }),
                events,
                transport_tx,
                tasks: Mutex::new(Vec::new()),
                this: this.clone(),
            }
        });

        let mut tasks = vec![tokio::spawn(pump(Arc::downgrade(&inner), transport_rx))];
        if config.auto_reconnect {
            tasks.push(tokio::spawn(watch_idle(
                Arc::downgrade(&inner),
                config.disconnect_check_interval,
            )));
        }
        *inner.tasks.lock() = tasks;

        info!(
            "Created session for {} (auto_reconnect: {}, max_attempts: {})",
            endpoint, config.auto_reconnect, config.max_attempts
        );

        Self { inner }
    }

    /// Create a session over WebSocket
    pub fn websocket(endpoint: impl Into<String>, config: SessionConfig) -> Self {
        Self::new(endpoint, config, Arc::new(WsConnector::new()))
    }

    /// Endpoint this session dials
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Open a new connection, replacing any current one.
    ///
    /// Fails only when the transport cannot even start connecting; handshake
    /// failures arrive later as events. A caller-issued connect also lifts
    /// the suspension left by an exhausted reconnect budget.
    pub fn connect(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(SessionError::Disposed);
        }
        state.cancel_reconnect_timer();
        state.reconnect.finish();
        state.reconnect.exhausted = false;
        self.inner.connect_locked(&mut state)
    }

    /// Close the connection and reject every outstanding request with
    /// [`SessionError::Closed`]. `code` defaults to 1000.
    pub fn disconnect(&self, code: Option<u16>, reason: Option<&str>) {
        let code = code.unwrap_or(CLOSE_NORMAL);
        let reason = reason.unwrap_or_default().to_string();

        let mut state = self.inner.state.lock();
        info!("Disconnecting from {} (code {})", self.inner.endpoint, code);
        state.detach();
        state.cancel_reconnect_timer();
        state.reconnect.finish();
        if state.status() != ConnectionStatus::Disconnected {
            if let Some(connection) = state.connection.as_ref() {
                connection.close(code, &reason);
            }
        }
        self.inner.teardown(&mut state, code, reason);
    }

    /// Hard reset: forget every outstanding request without settling it,
    /// zero the reconnect counters and listen to the current connection again.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        let dropped = state.pending.len() + state.sent.len();
        state.pending.clear();
        state.sent.clear();
        state.reconnect.reset();
        state.cancel_reconnect_timer();
        state.reassembler.clear();
        if state.connection.is_some() {
            state.listening = Some(state.generation);
        }
        info!("Session for {} reset, dropped {} requests", self.inner.endpoint, dropped);
    }

    /// Issue a request.
    ///
    /// Fails synchronously when the request has no usable id, reuses an id
    /// that is still outstanding, or cannot be encoded. Otherwise returns a
    /// handle that settles with the matching response. If sending fails the
    /// error is emitted as a [`SessionEvent::Error`] and the handle never
    /// settles; awaiting it then yields [`SessionError::Abandoned`].
    pub fn request(&self, request: Request) -> Result<ResponseHandle<Response>> {
        let id = match &request.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => return Err(SessionError::MissingRequestId),
        };
        let payload = request
            .to_text()
            .map_err(|e| SessionError::Encode(e.to_string()))?;

        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.disposed {
            return Err(SessionError::Disposed);
        }
        if state.sent.contains(&id) || state.pending.contains(&id) {
            return Err(SessionError::DuplicateRequestId(id));
        }

        if !inner.config.auto_reconnect && state.status() == ConnectionStatus::Disconnected {
            inner.connect_locked(&mut state)?;
        }

        let (deferred, handle) = match inner.config.request_timeout {
            Some(timeout) => {
                deferred_with_timeout(timeout, format!("Request {} timed out after {:?}", id, timeout))
            }
            None => deferred(),
        };
        let events = inner.events.clone();
        deferred.on_reject(move |error| {
            let _ = events.send(SessionEvent::Error(error.clone()));
        });
        // Only the timer rejects with Timeout, and it never holds the state lock.
        let this = inner.this.clone();
        let timed_out = id.clone();
        deferred.on_reject(move |error| {
            if let (SessionError::Timeout(_), Some(inner)) = (error, this.upgrade()) {
                inner.forget_timed_out(&timed_out);
            }
        });

        let record = RequestRecord {
            id: id.clone(),
            payload,
            deferred,
        };

        if state.status() == ConnectionStatus::Connecting {
            debug!("Queueing request {} until connected", id);
            state.pending.insert(record);
            return Ok(handle);
        }

        let text = record.payload.clone();
        state.sent.insert(record);
        let sent = match state.connection.as_ref() {
            Some(connection) => connection.send(text),
            None => Err(TransportError::NotOpen),
        };
        match sent {
            Ok(()) => {
                state.stats.requests_sent += 1;
                trace!("Sent request {}", id);
            }
            Err(e) => {
                state.sent.remove(&id);
                error!("Failed to send request {}: {}", id, e);
                inner.emit(SessionEvent::Error(SessionError::Send(e.to_string())));
            }
        }

        Ok(handle)
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status()
    }

    /// Requests waiting for the connection to open
    pub fn pending_queue_size(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Requests sent and awaiting a response
    pub fn sent_queue_size(&self) -> usize {
        self.inner.state.lock().sent.len()
    }

    /// Snapshot of session statistics
    pub fn stats(&self) -> SessionStats {
        let state = self.inner.state.lock();
        SessionStats {
            status: state.status(),
            reconnecting: state.reconnect.in_progress,
            ..state.stats.clone()
        }
    }

    /// Subscribe to session events. Events emitted before subscribing are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Stop the background tasks and close the connection. Outstanding
    /// requests are left unsettled.
    pub fn dispose(&self) {
        for task in std::mem::take(&mut *self.inner.tasks.lock()) {
            task.abort();
        }

        let mut state = self.inner.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.detach();
        state.cancel_reconnect_timer();
        state.reassembler.clear();
        if let Some(connection) = state.connection.take() {
            connection.close(CLOSE_NORMAL, "");
        }
        info!("Session for {} disposed", self.inner.endpoint);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.endpoint)
            .field("status", &self.status())
            .finish()
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn connect_locked(&self, state: &mut SessionState) -> Result<()> {
        state.generation += 1;
        let generation = state.generation;
        let sink = EventSink::new(generation, self.transport_tx.clone());

        match self.connector.open(&self.endpoint, sink) {
            Ok(connection) => {
                if let Some(previous) = state.connection.replace(connection) {
                    previous.close(CLOSE_NORMAL, "");
                }
                state.listening = Some(generation);
                state.opened = false;
                state.reassembler.clear();
                state.stats.connects += 1;
                debug!("Connecting to {} (connection {})", self.endpoint, generation);
                Ok(())
            }
            Err(e) if state.reconnect.in_progress => {
                warn!("Reconnect to {} failed: {}", self.endpoint, e);
                // Retry from a fresh task instead of recursing.
                let this = self.this.clone();
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    if let Some(inner) = this.upgrade() {
                        let mut state = inner.state.lock();
                        inner.reconnect_locked(&mut state);
                    }
                });
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.endpoint, e);
                Err(match e {
                    TransportError::Rejected(reason) => SessionError::Connection {
                        endpoint: self.endpoint.clone(),
                        reason,
                    },
                    TransportError::Unknown | TransportError::NotOpen => {
                        SessionError::InvalidClient(self.endpoint.clone())
                    }
                })
            }
        }
    }

    fn reconnect_locked(&self, state: &mut SessionState) {
        if state.disposed || !state.reconnect.begin() {
            return;
        }

        let interrupted = state.sent.reject_all(&SessionError::PendingRequestsOnReconnect);
        if interrupted > 0 {
            warn!("Rejected {} in-flight requests on reconnect", interrupted);
        }

        let max_attempts = self.config.max_attempts;
        match state.reconnect.next_attempt(max_attempts) {
            Some(attempt) => {
                info!(
                    "Reconnecting to {} in {:?} (attempt {}/{})",
                    self.endpoint, self.config.delay, attempt, max_attempts
                );
                state.stats.reconnect_attempts += 1;

                let this = self.this.clone();
                let delay = self.config.delay;
                state.cancel_reconnect_timer();
                state.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = this.upgrade() {
                        inner.reconnect_timer_fired();
                    }
                }));
            }
            None => {
                state.reconnect.mark_exhausted();
                state.pending.reject_all(&SessionError::PendingRequestsOnReconnect);
                state.sent.reject_all(&SessionError::PendingRequestsOnReconnect);
                state.detach();
                error!("Max attempts of {} reached for {}", max_attempts, self.endpoint);
                self.emit(SessionEvent::Error(SessionError::MaxAttemptsReached(max_attempts)));
            }
        }
    }

    fn reconnect_timer_fired(&self) {
        let mut state = self.state.lock();
        state.reconnect_timer = None;
        if state.disposed {
            return;
        }
        state.detach();
        if let Err(e) = self.connect_locked(&mut state) {
            self.emit(SessionEvent::Error(e));
        }
        state.reconnect.finish();
    }

    fn check_idle(&self) {
        let mut state = self.state.lock();
        if state.disposed
            || state.reconnect.in_progress
            || state.reconnect.exhausted
            || state.status() != ConnectionStatus::Disconnected
        {
            return;
        }

        debug!("Session for {} is idle and disconnected, connecting", self.endpoint);
        if let Err(e) = self.connect_locked(&mut state) {
            self.emit(SessionEvent::Error(e));
        }
    }

    fn handle_transport_event(&self, generation: u64, event: TransportEvent) {
        let mut state = self.state.lock();
        if state.listening != Some(generation) {
            trace!("Ignoring event from connection {}: {:?}", generation, event);
            return;
        }

        match event {
            TransportEvent::Open => self.on_open(&mut state),
            TransportEvent::Message(text) => self.on_message(&mut state, &text),
            TransportEvent::Close { code, reason } => self.on_close(&mut state, code, reason),
            TransportEvent::Error(reason) => {
                warn!("Transport error on {}: {}", self.endpoint, reason);
                self.emit(SessionEvent::Error(SessionError::Transport(reason)));
            }
        }
    }

    fn on_open(&self, state: &mut SessionState) {
        state.opened = true;
        state.reconnect.on_connected();
        info!("Connected to {}", self.endpoint);
        self.emit(SessionEvent::Connect);

        let records = state.pending.drain();
        if !records.is_empty() {
            debug!("Flushing {} queued requests", records.len());
        }
        for record in records {
            let sent = match state.connection.as_ref() {
                Some(connection) => connection.send(record.payload.clone()),
                None => Err(TransportError::NotOpen),
            };
            match sent {
                Ok(()) => {
                    state.stats.requests_sent += 1;
                    state.sent.insert(record);
                }
                Err(e) => {
                    error!("Failed to send queued request {}: {}", record.id, e);
                    self.emit(SessionEvent::Error(SessionError::Send(e.to_string())));
                }
            }
        }
    }

    fn on_message(&self, state: &mut SessionState, text: &str) {
        state.stats.last_message_in = Some(Instant::now());

        for value in state.reassembler.parse(text) {
            state.stats.messages_received += 1;

            let record = message_id(&value).and_then(|id| state.sent.remove(&id));
            if let Some(record) = record {
                match Response::from_value(value.clone()) {
                    Ok(response) => {
                        state.stats.responses_matched += 1;
                        trace!("Response for request {}", record.id);
                        record.deferred.resolve(response);
                    }
                    Err(e) => {
                        warn!("Malformed response for request {}: {}", record.id, e);
                        record
                            .deferred
                            .reject(SessionError::MalformedResponse(e.to_string()));
                    }
                }
            }

            self.emit(SessionEvent::Message(value));
        }
    }

    fn on_close(&self, state: &mut SessionState, code: u16, reason: String) {
        state.detach();
        state.opened = false;

        if code != CLOSE_NORMAL && self.config.auto_reconnect {
            warn!("Connection to {} closed abnormally (code {})", self.endpoint, code);
            self.emit(SessionEvent::Disconnect { code, reason });
            self.reconnect_locked(state);
        } else {
            info!("Connection to {} closed (code {})", self.endpoint, code);
            self.teardown(state, code, reason);
        }
    }

    fn teardown(&self, state: &mut SessionState, code: u16, reason: String) {
        state.detach();
        self.emit(SessionEvent::Disconnect {
            code,
            reason: reason.clone(),
        });

        let error = SessionError::Closed { code, reason };
        let rejected = state.pending.reject_all(&error) + state.sent.reject_all(&error);
        if rejected > 0 {
            debug!("Rejected {} outstanding requests on close", rejected);
        }
    }

    fn forget_timed_out(&self, id: &RequestId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for queue in [&mut state.pending, &mut state.sent] {
            let expired = queue
                .get(id)
                .is_some_and(|record| record.deferred.state() == DeferredState::Rejected);
            if expired {
                queue.remove(id);
                debug!("Dropped timed out request {}", id);
            }
        }
    }

    // Listeners stay attached; the connection remains usable for new requests.
    fn on_chunk_timeout(&self) {
        let mut state = self.state.lock();
        // The fragment may have completed while this callback waited for the lock.
        if state.disposed || !state.reassembler.has_leftover() {
            return;
        }

        let error = SessionError::ChunkTimeout(chunk_timeout_payload());
        state.pending.reject_all(&error);
        state.sent.reject_all(&error);
        self.emit(SessionEvent::Error(error));
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        let state = self.state.get_mut();
        state.cancel_reconnect_timer();
        if let Some(connection) = state.connection.take() {
            connection.close(CLOSE_NORMAL, "");
        }
    }
}

async fn pump(session: Weak<SessionInner>, mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
    while let Some((generation, event)) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.handle_transport_event(generation, event);
    }
}

async fn watch_idle(session: Weak<SessionInner>, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.check_idle();
    }
}
