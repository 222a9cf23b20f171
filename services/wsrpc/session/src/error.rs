//! Session error types.
//!
//! Errors are delivered both to the caller awaiting a request and to every
//! event subscriber, so they are cheap to clone and carry owned strings only.

use thiserror::Error;
use wsrpc_wire::RequestId;

/// Errors raised by the session and delivered to request handles
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The transport refused to start a connection
    #[error("Error while connecting to {endpoint}. Reason: {reason}")]
    Connection {
        /// Endpoint that was dialed
        endpoint: String,
        /// Reason given by the transport
        reason: String,
    },

    /// The transport could not even be constructed for this endpoint
    #[error("invalid client for {0}")]
    InvalidClient(String),

    /// Reconnect budget spent without a successful connection
    #[error("Max attempts of {0} reached")]
    MaxAttemptsReached(u32),

    /// Request was in flight when the connection dropped
    #[error("Pending requests on reconnecting")]
    PendingRequestsOnReconnect,

    /// A partial message never completed; carries the synthetic protocol error
    #[error("{0}")]
    ChunkTimeout(String),

    /// Another outstanding request already uses this id
    #[error("duplicate request id {0}")]
    DuplicateRequestId(RequestId),

    /// Request has no usable id
    #[error("request id is missing")]
    MissingRequestId,

    /// Transport rejected an outbound frame
    #[error("send failed: {0}")]
    Send(String),

    /// Connection closed while the request was outstanding
    #[error("connection closed (code {code}): {reason}")]
    Closed {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },

    /// Transport-level error reported by the socket
    #[error("transport error: {0}")]
    Transport(String),

    /// Matched response failed shape validation
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Request could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// Per-request timeout elapsed
    #[error("{0}")]
    Timeout(String),

    /// The request was dropped without being settled
    #[error("request abandoned")]
    Abandoned,

    /// The session was disposed
    #[error("session disposed")]
    Disposed,
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
