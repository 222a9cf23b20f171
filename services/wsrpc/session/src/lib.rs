//! Resilient JSON-RPC client sessions over WebSocket for wsrpc.
//!
//! This crate turns an unreliable message socket into a request/response
//! channel: callers issue correlated requests and await their responses while
//! the session reconnects, reassembles fragmented frames and makes sure every
//! request is settled at most once.
//!
//! ## Features
//!
//! - **Correlation Queues**: Requests issued while connecting are held and
//!   flushed in order on open
//! - **Reactive Reconnect**: Bounded retries with a fixed delay after an
//!   abnormal close
//! - **Idle Watchdog**: Periodic reconnect of a session left disconnected
//! - **Message Reassembly**: Split and merged frames are recovered into
//!   complete messages, with a stall timer for fragments that never complete
//! - **Pluggable Transport**: `tokio-tungstenite` by default, any
//!   [`Connector`] in tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsrpc_session::{Session, SessionConfig, SessionEvent};
//! use wsrpc_wire::Request;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), wsrpc_session::SessionError> {
//! let session = Session::websocket("ws://127.0.0.1:8546", SessionConfig::default());
//! let mut events = session.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             SessionEvent::Connect => println!("connected"),
//!             SessionEvent::Disconnect { code, reason } => {
//!                 println!("disconnected: {} {}", code, reason);
//!             }
//!             SessionEvent::Message(value) => println!("message: {}", value),
//!             SessionEvent::Error(error) => println!("error: {}", error),
//!         }
//!     }
//! });
//!
//! session.connect()?;
//! let response = session
//!     .request(Request::new(1u64, "eth_blockNumber", Some(json!([]))))?
//!     .await?;
//! println!("block: {:?}", response.outcome());
//!
//! session.disconnect(None, None);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod deferred;
pub mod error;
pub mod queue;
pub mod reassembler;
pub mod reconnect;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::SessionConfig;
pub use deferred::{deferred, deferred_with_timeout, Deferred, DeferredState, ResponseHandle};
pub use error::{Result, SessionError};
pub use queue::{RequestQueue, RequestRecord};
pub use reassembler::{MessageReassembler, StallCallback, DEFAULT_STALL_TIMEOUT};
pub use reconnect::ReconnectState;
pub use session::{ConnectionStatus, Session, SessionEvent, SessionStats};
pub use transport::{
    Connection, Connector, EventSink, ReadyState, TransportError, TransportEvent, WsConnection,
    WsConnector, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS,
};
