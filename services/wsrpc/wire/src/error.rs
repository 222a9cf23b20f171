//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Payload is not valid JSON or does not match the message shape
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Response carries neither `result` nor `error`
    #[error("response has neither result nor error")]
    MissingOutcome,

    /// Response carries both `result` and `error`
    #[error("response has both result and error")]
    AmbiguousOutcome,

    /// Top-level value is not a JSON object
    #[error("message is not a json object")]
    NotAnObject,
}
