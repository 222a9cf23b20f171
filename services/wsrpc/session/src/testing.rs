//! In-memory transport for session tests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use crate::transport::{
    Connection, Connector, EventSink, ReadyState, TransportError, TransportEvent, CLOSE_ABNORMAL,
};

#[derive(Default)]
struct ConnectorState {
    connections: Vec<Arc<MockConnection>>,
    opens: Vec<Instant>,
    refuse: bool,
    fail_open: Option<TransportError>,
}

/// Connector handing out scripted connections
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every handshake right after `open` returns
    pub fn refuse_handshakes(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Make `open` itself fail
    pub fn fail_open(&self, error: Option<TransportError>) {
        self.state.lock().fail_open = error;
    }

    pub fn opens(&self) -> Vec<Instant> {
        self.state.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    pub fn last(&self) -> Arc<MockConnection> {
        self.state
            .lock()
            .connections
            .last()
            .cloned()
            .expect("no connection opened")
    }
}

impl Connector for MockConnector {
    fn open(&self, _endpoint: &str, sink: EventSink) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.state.lock();
        state.opens.push(Instant::now());
        if let Some(error) = state.fail_open.clone() {
            return Err(error);
        }

        let connection = Arc::new(MockConnection::new(sink));
        if state.refuse {
            connection.refuse();
        }
        state.connections.push(connection.clone());
        Ok(Box::new(connection))
    }
}

/// Scripted connection; the test drives its lifecycle
pub struct MockConnection {
    sink: EventSink,
    ready: Mutex<ReadyState>,
    sent: Mutex<Vec<String>>,
    closed_with: Mutex<Option<(u16, String)>>,
    fail_sends: AtomicBool,
}

impl MockConnection {
    fn new(sink: EventSink) -> Self {
        Self {
            sink,
            ready: Mutex::new(ReadyState::Connecting),
            sent: Mutex::new(Vec::new()),
            closed_with: Mutex::new(None),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn accept(&self) {
        *self.ready.lock() = ReadyState::Open;
        self.sink.emit(TransportEvent::Open);
    }

    pub fn refuse(&self) {
        *self.ready.lock() = ReadyState::Closed;
        self.sink.emit(TransportEvent::Error("connection refused".to_string()));
        self.sink.emit(TransportEvent::Close {
            code: CLOSE_ABNORMAL,
            reason: String::new(),
        });
    }

    pub fn deliver(&self, text: &str) {
        self.sink.emit(TransportEvent::Message(text.to_string()));
    }

    /// Peer-initiated close
    pub fn drop_connection(&self, code: u16, reason: &str) {
        *self.ready.lock() = ReadyState::Closed;
        self.sink.emit(TransportEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed_with.lock().clone()
    }
}

impl Connection for Arc<MockConnection> {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("mock send failure".to_string()));
        }
        if *self.ready.lock() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        *self.ready.lock() = ReadyState::Closed;
        *self.closed_with.lock() = Some((code, reason.to_string()));
        self.sink.emit(TransportEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn ready_state(&self) -> ReadyState {
        *self.ready.lock()
    }
}
