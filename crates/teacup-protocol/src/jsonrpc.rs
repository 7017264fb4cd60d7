//! JSON-RPC 2.0 Envelope
//!
//! One envelope per frame. `params`, `result` and `error.data` are kept as raw
//! JSON so nothing the proxy observes is ever re-encoded.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

/// Protocol version tag every envelope must carry
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes
///
/// Only the standard -32700..-32600 range is ever emitted by the proxy itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn code(&self) -> i64 {
        *self as i64
    }
}

/// JSON-RPC 2.0 Error Object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// A single wire envelope.
///
/// Requests, notifications and responses share one shape; [`RpcMessage::classify`]
/// tells them apart. An `id` of zero (or null, or absent) means "no id".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub jsonrpc: String,

    #[serde(default, deserialize_with = "nullable_id")]
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

fn nullable_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(0))
}

/// What a parsed envelope means for request tracking
#[derive(Debug, Clone, Copy)]
pub enum Envelope<'a> {
    /// `id == 0` with a method: fire and forget
    Notification {
        method: &'a str,
        params: Option<&'a RawValue>,
    },
    /// Fresh call awaiting a reply
    Request {
        id: i64,
        method: &'a str,
        params: Option<&'a RawValue>,
    },
    /// Reply to an earlier call made by the opposite peer
    Response { id: i64, reply: Reply<'a> },
}

#[derive(Debug, Clone, Copy)]
pub enum Reply<'a> {
    Result(Option<&'a RawValue>),
    Error(&'a RpcError),
}

impl RpcMessage {
    /// Parse one frame. Failure only means the frame cannot be tracked.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Method name, treating an empty string the same as an absent one
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref().filter(|m| !m.is_empty())
    }

    pub fn has_valid_version(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }

    /// Classify for tracking. Returns `None` for an id-less frame that also
    /// carries no method, which cannot be attributed to anything.
    pub fn classify(&self) -> Option<Envelope<'_>> {
        let params = self.params.as_deref();

        if self.id == 0 {
            return self
                .method()
                .map(|method| Envelope::Notification { method, params });
        }

        if let Some(method) = self.method() {
            return Some(Envelope::Request {
                id: self.id,
                method,
                params,
            });
        }

        let reply = match &self.error {
            Some(err) => Reply::Error(err),
            None => Reply::Result(self.result.as_deref()),
        };
        Some(Envelope::Response { id: self.id, reply })
    }

    /// Build a call envelope
    pub fn request<P: Serialize>(
        id: i64,
        method: impl Into<String>,
        params: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: Some(method.into()),
            params: Some(serde_json::value::to_raw_value(params)?),
            result: None,
            error: None,
        })
    }

    /// Create a success response
    pub fn success<T: Serialize>(id: i64, result: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: Some(serde_json::value::to_raw_value(result)?),
            error: None,
        })
    }

    /// Create an error response
    pub fn error(id: i64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: None,
            error: Some(RpcError::new(code, message)),
        }
    }

    /// Encode as a single frame (no trailing newline)
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Best-effort recovery of a numeric id from a frame that failed to parse as
/// an envelope, so an error reply can still be correlated by the caller.
pub fn recover_id(frame: &str) -> Option<i64> {
    let value: Value = serde_json::from_str(frame).ok()?;
    value.get("id")?.as_i64().filter(|id| *id != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_request() {
        let msg = RpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":7,"method":"Game.Launch","params":{"gameId":3}}"#,
        )
        .unwrap();

        match msg.classify() {
            Some(Envelope::Request { id, method, params }) => {
                assert_eq!(id, 7);
                assert_eq!(method, "Game.Launch");
                assert_eq!(params.unwrap().get(), r#"{"gameId":3}"#);
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_notification_without_id() {
        let msg = RpcMessage::parse(r#"{"jsonrpc":"2.0","method":"Log","params":{}}"#).unwrap();
        assert!(matches!(
            msg.classify(),
            Some(Envelope::Notification { method: "Log", .. })
        ));

        let msg = RpcMessage::parse(r#"{"jsonrpc":"2.0","id":null,"method":"Tick"}"#).unwrap();
        assert_eq!(msg.id, 0);
        assert!(matches!(
            msg.classify(),
            Some(Envelope::Notification { method: "Tick", .. })
        ));
    }

    #[test]
    fn test_classify_idless_frame_without_method() {
        let msg = RpcMessage::parse(r#"{"jsonrpc":"2.0","result":true}"#).unwrap();
        assert!(msg.classify().is_none());
    }

    #[test]
    fn test_classify_response() {
        let ok = RpcMessage::parse(r#"{"jsonrpc":"2.0","id":4,"result":[1,2]}"#).unwrap();
        match ok.classify() {
            Some(Envelope::Response {
                id: 4,
                reply: Reply::Result(Some(raw)),
            }) => assert_eq!(raw.get(), "[1,2]"),
            other => panic!("expected result response, got {:?}", other),
        }

        let err = RpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        match err.classify() {
            Some(Envelope::Response {
                reply: Reply::Error(e),
                ..
            }) => {
                assert_eq!(e.code, ErrorCode::MethodNotFound.code());
                assert_eq!(e.message, "nope");
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_null_result_is_absent() {
        let msg = RpcMessage::parse(r#"{"jsonrpc":"2.0","id":2,"result":null}"#).unwrap();
        assert!(matches!(
            msg.classify(),
            Some(Envelope::Response {
                reply: Reply::Result(None),
                ..
            })
        ));
    }

    #[test]
    fn test_empty_method_counts_as_absent() {
        let msg = RpcMessage::parse(r#"{"jsonrpc":"2.0","id":9,"method":"","result":1}"#).unwrap();
        assert!(msg.method().is_none());
        assert!(matches!(msg.classify(), Some(Envelope::Response { id: 9, .. })));
    }

    #[test]
    fn test_parse_failures() {
        assert!(RpcMessage::parse("not json").is_err());
        assert!(RpcMessage::parse(r#"{"jsonrpc":"2.0","id":"abc","method":"x"}"#).is_err());
    }

    #[test]
    fn test_success_frame_shape() {
        let frame = RpcMessage::success(1, &serde_json::json!({"ok": true}))
            .unwrap()
            .to_frame()
            .unwrap();
        assert_eq!(frame, r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#);
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = RpcMessage::error(3, ErrorCode::InvalidParams, "bad address")
            .to_frame()
            .unwrap();
        assert_eq!(
            frame,
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"bad address"}}"#
        );
    }

    #[test]
    fn test_recover_id() {
        assert_eq!(recover_id(r#"{"id":12,"method":42}"#), Some(12));
        assert_eq!(recover_id(r#"{"id":0}"#), None);
        assert_eq!(recover_id("{oops"), None);
        assert_eq!(recover_id(r#"[1,2,3]"#), None);
    }
}
