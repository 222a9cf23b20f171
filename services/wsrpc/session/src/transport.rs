//! Message socket transport.
//!
//! The session talks to the network through the [`Connector`] and
//! [`Connection`] traits. Opening a connection is synchronous: the connector
//! validates the endpoint and returns a handle immediately, and everything
//! after that (handshake, inbound frames, close) arrives later as
//! [`TransportEvent`]s on the [`EventSink`] it was given.
//!
//! [`WsConnector`] is the production implementation on top of
//! `tokio-tungstenite`.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request as HandshakeRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Close code for a normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the peer vanished without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code reported when a close frame carried no status
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection lifecycle as seen by the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in progress
    Connecting,
    /// Ready to send
    Open,
    /// Close requested, waiting for the peer
    Closing,
    /// Closed or failed
    Closed,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }
}

/// Events delivered by a connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed
    Open,
    /// A text frame arrived
    Message(String),
    /// The connection closed
    Close {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// The socket reported an error; a `Close` follows
    Error(String),
}

/// Destination for one connection's events.
///
/// Every event is tagged with the generation of the connection that produced
/// it, so the receiver can ignore stragglers from connections it has already
/// let go of.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    /// Create a sink for connection `generation`
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sink tags events with
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event; returns false once the receiver is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The endpoint was rejected with a reason
    #[error("{0}")]
    Rejected(String),

    /// The transport could not be created and gave no reason
    #[error("transport could not be created")]
    Unknown,

    /// Send attempted on a socket that is not open
    #[error("socket is not open")]
    NotOpen,
}

/// Factory for connections
pub trait Connector: Send + Sync {
    /// Start connecting to `endpoint`. Returns as soon as the attempt is
    /// under way; progress is reported through `sink`.
    fn open(&self, endpoint: &str, sink: EventSink) -> Result<Box<dyn Connection>, TransportError>;
}

/// A single socket connection
pub trait Connection: Send + Sync {
    /// Queue a text frame
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Start a close handshake with `code` and `reason`
    fn close(&self, code: u16, reason: &str);

    /// Current lifecycle state
    fn ready_state(&self) -> ReadyState;
}

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// WebSocket connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, endpoint: &str, sink: EventSink) -> Result<Box<dyn Connection>, TransportError> {
        let request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        match request.uri().scheme_str() {
            Some("ws") | Some("wss") => {}
            other => {
                return Err(TransportError::Rejected(format!(
                    "unsupported scheme {:?} in {}",
                    other.unwrap_or(""),
                    endpoint
                )))
            }
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::Unknown)?;

        let state = Arc::new(AtomicU8::new(ReadyState::Connecting.as_u8()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        info!("Attempting to connect to {}", endpoint);
        runtime.spawn(run_socket(request, sink, state.clone(), outbound_rx));

        Ok(Box::new(WsConnection {
            state,
            outbound: outbound_tx,
        }))
    }
}

/// Handle to a WebSocket driven by a background task
pub struct WsConnection {
    state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection for WsConnection {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&self, code: u16, reason: &str) {
        match self.ready_state() {
            ReadyState::Closing | ReadyState::Closed => return,
            ReadyState::Connecting | ReadyState::Open => {}
        }
        set_state(&self.state, ReadyState::Closing);
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }
}

fn set_state(state: &AtomicU8, ready: ReadyState) {
    state.store(ready.as_u8(), Ordering::Release);
}

fn fail(state: &AtomicU8, sink: &EventSink, error: String) {
    set_state(state, ReadyState::Closed);
    sink.emit(TransportEvent::Error(error));
    sink.emit(TransportEvent::Close {
        code: CLOSE_ABNORMAL,
        reason: String::new(),
    });
}

async fn run_socket(
    request: HandshakeRequest,
    sink: EventSink,
    state: Arc<AtomicU8>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let uri = request.uri().to_string();

    let handshake = connect_async(request);
    tokio::pin!(handshake);

    let ws = tokio::select! {
        result = &mut handshake => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!("Failed to connect to {}: {}", uri, e);
                fail(&state, &sink, e.to_string());
                return;
            }
        },
        command = outbound.recv() => {
            // Closed before the handshake finished
            let (code, reason) = match command {
                Some(Outbound::Close { code, reason }) => (code, reason),
                _ => (CLOSE_NORMAL, String::new()),
            };
            set_state(&state, ReadyState::Closed);
            sink.emit(TransportEvent::Close { code, reason });
            return;
        }
    };

    info!("Connected to {}", uri);
    if state.load(Ordering::Acquire) == ReadyState::Connecting.as_u8() {
        set_state(&state, ReadyState::Open);
    }
    sink.emit(TransportEvent::Open);

    let (mut write, mut read) = ws.split();
    let mut closing = false;

    loop {
        tokio::select! {
            command = outbound.recv(), if !closing => {
                let (code, reason) = match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::text(text)).await {
                            warn!("Send to {} failed: {}", uri, e);
                            fail(&state, &sink, e.to_string());
                            return;
                        }
                        continue;
                    }
                    Some(Outbound::Close { code, reason }) => (code, reason),
                    None => (CLOSE_NORMAL, String::new()),
                };

                debug!("Closing connection to {} with code {}", uri, code);
                closing = true;
                set_state(&state, ReadyState::Closing);
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                if write.send(Message::Close(Some(frame))).await.is_err() {
                    set_state(&state, ReadyState::Closed);
                    sink.emit(TransportEvent::Close { code, reason: String::new() });
                    return;
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    sink.emit(TransportEvent::Message(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    info!("Connection to {} closed with code {}", uri, code);
                    let _ = write.close().await;
                    set_state(&state, ReadyState::Closed);
                    sink.emit(TransportEvent::Close { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Connection to {} failed: {}", uri, e);
                    fail(&state, &sink, e.to_string());
                    return;
                }
                None => {
                    set_state(&state, ReadyState::Closed);
                    sink.emit(TransportEvent::Close {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    });
                    return;
                }
            }
        }
    }
}
