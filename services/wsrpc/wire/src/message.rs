//! JSON-RPC 2.0 message model.
//!
//! Requests are built by callers and serialized once when they are queued.
//! Inbound traffic is kept as raw [`serde_json::Value`]s until the session
//! knows whether a value answers one of its requests; only then is it turned
//! into a typed [`Response`].

use crate::error::WireError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol version sent with every request
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code carried by the synthetic chunk-timeout error
pub const CHUNK_TIMEOUT_CODE: i64 = 2;

static NULL: Value = Value::Null;

/// Identifier correlating a request with its response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier
    Number(serde_json::Number),
    /// String identifier
    String(String),
}

impl RequestId {
    /// Whether this id is unusable for correlation (empty string)
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestId::String(s) if s.is_empty())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        RequestId::Number(value.into())
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value.into())
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

/// Outbound JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version, always "2.0" for requests built here
    pub jsonrpc: String,
    /// Correlation id; requests without one cannot be tracked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Build a request with the given id
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Build a request that carries no id
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Serialize to the text sent over the socket
    pub fn to_text(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error object of a failed call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Error code
    pub code: i64,
    /// Human readable message
    pub message: String,
    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Inbound JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version as sent by the server
    #[serde(default)]
    pub jsonrpc: String,
    /// Id of the request being answered
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Success value; `Some(Value::Null)` when the server sent `"result": null`
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

// A present-but-null field must stay distinguishable from a missing one.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Response {
    /// Convert an inbound value, enforcing exactly one of `result`/`error`
    pub fn from_value(value: Value) -> Result<Self, WireError> {
        if !value.is_object() {
            return Err(WireError::NotAnObject);
        }
        let response: Response = serde_json::from_value(value)?;
        match (&response.result, &response.error) {
            (Some(_), Some(_)) => Err(WireError::AmbiguousOutcome),
            (None, None) => Err(WireError::MissingOutcome),
            _ => Ok(response),
        }
    }

    /// Result or error of the call
    pub fn outcome(&self) -> Result<&Value, &ResponseError> {
        match (&self.result, &self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            // from_value rejects this shape; a hand-built response may not
            (None, None) => Ok(&NULL),
        }
    }
}

/// Peek at the `id` of an inbound value without fully decoding it
pub fn message_id(value: &Value) -> Option<RequestId> {
    match value.as_object()?.get("id")? {
        Value::Number(n) => Some(RequestId::Number(n.clone())),
        Value::String(s) => Some(RequestId::String(s.clone())),
        _ => None,
    }
}

/// Text of the synthetic protocol error raised when a partial message stalls
pub fn chunk_timeout_payload() -> String {
    serde_json::json!({
        "id": 1,
        "jsonrpc": JSONRPC_VERSION,
        "error": { "code": CHUNK_TIMEOUT_CODE, "message": "Chunk timeout" },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = Request::new(7u64, "eth_blockNumber", Some(json!([])));
        let text = request.to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "eth_blockNumber");

        let notification = Request::notification("ping", None);
        let text = notification.to_text().unwrap();
        assert!(!text.contains("\"id\""));
        assert!(!text.contains("params"));
    }

    #[test]
    fn test_request_id_forms() {
        let numeric: RequestId = serde_json::from_value(json!(42)).unwrap();
        let textual: RequestId = serde_json::from_value(json!("abc")).unwrap();

        assert_eq!(numeric, RequestId::from(42u64));
        assert_eq!(textual, RequestId::from("abc"));
        assert_eq!(numeric.to_string(), "42");
        assert!(RequestId::from("").is_empty());
        assert!(!RequestId::from(0u64).is_empty());
    }

    #[test]
    fn test_response_outcomes() {
        let ok = Response::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})).unwrap();
        assert_eq!(ok.outcome(), Ok(&json!("0x10")));

        let failed = Response::from_value(json!({
            "jsonrpc": "2.0",
            "id": "a",
            "error": {"code": -32601, "message": "method not found"}
        }))
        .unwrap();
        let error = failed.outcome().unwrap_err();
        assert_eq!(error.code, -32601);
        assert_eq!(failed.id, Some(RequestId::from("a")));
    }

    #[test]
    fn test_null_result_is_present() {
        let response = Response::from_value(json!({"jsonrpc": "2.0", "id": 3, "result": null})).unwrap();
        assert_eq!(response.result, Some(Value::Null));
    }

    #[test]
    fn test_response_shape_violations() {
        let neither = Response::from_value(json!({"jsonrpc": "2.0", "id": 1}));
        assert!(matches!(neither, Err(WireError::MissingOutcome)));

        let both = Response::from_value(json!({
            "id": 1,
            "result": 1,
            "error": {"code": 1, "message": "x"}
        }));
        assert!(matches!(both, Err(WireError::AmbiguousOutcome)));

        let batch = Response::from_value(json!([{"id": 1, "result": 1}]));
        assert!(matches!(batch, Err(WireError::NotAnObject)));
    }

    #[test]
    fn test_message_id_peek() {
        assert_eq!(message_id(&json!({"id": 5, "result": 1})), Some(RequestId::from(5u64)));
        assert_eq!(message_id(&json!({"id": "x"})), Some(RequestId::from("x")));
        assert_eq!(message_id(&json!({"id": null, "method": "subscription"})), None);
        assert_eq!(message_id(&json!({"method": "notify"})), None);
        assert_eq!(message_id(&json!([{"id": 1}])), None);
    }

    #[test]
    fn test_chunk_timeout_payload() {
        let value: Value = serde_json::from_str(&chunk_timeout_payload()).unwrap();
        assert_eq!(value["error"]["code"], CHUNK_TIMEOUT_CODE);
        assert_eq!(value["error"]["message"], "Chunk timeout");
        assert_eq!(value["id"], 1);
    }
}
