//! `Proxy.Connect` handshake
//!
//! The first frame on a new connection must be a `Proxy.Connect` call naming
//! the real target. [`negotiate`] waits for it, dials the target and replies.
//! Every way this can fail is a [`HandshakeError`] variant mapped to exactly
//! one JSON-RPC error code.

use std::time::Duration;

use teacup_protocol::jsonrpc::recover_id;
use teacup_protocol::{
    ConnectParams, ConnectResult, ErrorCode, FrameWriter, RpcMessage, TransportError,
    CONNECT_METHOD,
};
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct HandshakeSettings {
    /// Wait for the first frame
    pub timeout: Duration,
    /// Wait for the target to accept
    pub dial_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Timed out after {0:?} waiting for Proxy.Connect")]
    Timeout(Duration),

    #[error("Peer disconnected before sending Proxy.Connect")]
    Disconnected,

    #[error("While parsing Proxy.Connect message: {source}")]
    Parse {
        id: Option<i64>,
        source: serde_json::Error,
    },

    #[error("Expected request to have jsonrpc: \"2.0\", but got {version:?}")]
    Version { id: i64, version: String },

    #[error("Expected first call to be Proxy.Connect but was {method:?}")]
    WrongMethod { id: i64, method: String },

    #[error("While parsing Proxy.Connect params: {reason}")]
    InvalidParams { id: i64, reason: String },

    #[error("While connecting to {address}: {source}")]
    Dial {
        id: i64,
        address: String,
        source: std::io::Error,
    },

    #[error("While writing Proxy.Connect response: {0}")]
    Reply(#[source] TransportError),
}

impl HandshakeError {
    /// JSON-RPC code reported to the peer, if this failure gets a reply
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            HandshakeError::Timeout(_)
            | HandshakeError::Disconnected
            | HandshakeError::Reply(_) => None,
            HandshakeError::Parse { .. } => Some(ErrorCode::ParseError),
            HandshakeError::Version { .. } | HandshakeError::WrongMethod { .. } => {
                Some(ErrorCode::InvalidRequest)
            }
            HandshakeError::InvalidParams { .. } => Some(ErrorCode::InvalidParams),
            HandshakeError::Dial { .. } => Some(ErrorCode::InternalError),
        }
    }

    /// Request id to answer, when one could be recovered
    pub fn reply_id(&self) -> Option<i64> {
        let id = match self {
            HandshakeError::Timeout(_)
            | HandshakeError::Disconnected
            | HandshakeError::Reply(_) => return None,
            HandshakeError::Parse { id, .. } => return *id,
            HandshakeError::Version { id, .. }
            | HandshakeError::WrongMethod { id, .. }
            | HandshakeError::InvalidParams { id, .. }
            | HandshakeError::Dial { id, .. } => *id,
        };
        (id != 0).then_some(id)
    }

    /// Error reply for the peer, or `None` when there is nobody to answer
    pub fn reply(&self) -> Option<RpcMessage> {
        Some(RpcMessage::error(self.reply_id()?, self.code()?, self.to_string()))
    }
}

/// A validated `Proxy.Connect` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub id: i64,
    pub address: String,
}

/// Outcome of a successful handshake
#[derive(Debug)]
pub struct Connected {
    pub id: i64,
    pub address: String,
    pub stream: TcpStream,
}

/// Check that `frame` is a well-formed `Proxy.Connect` call
pub fn validate(frame: &str) -> Result<ConnectRequest, HandshakeError> {
    let msg = RpcMessage::parse(frame).map_err(|source| HandshakeError::Parse {
        id: recover_id(frame),
        source,
    })?;

    if !msg.has_valid_version() {
        return Err(HandshakeError::Version {
            id: msg.id,
            version: msg.jsonrpc,
        });
    }

    if msg.method() != Some(CONNECT_METHOD) {
        return Err(HandshakeError::WrongMethod {
            id: msg.id,
            method: msg.method.unwrap_or_default(),
        });
    }

    let Some(params) = msg.params.as_deref() else {
        return Err(HandshakeError::InvalidParams {
            id: msg.id,
            reason: "missing params".to_string(),
        });
    };

    let params: ConnectParams =
        serde_json::from_str(params.get()).map_err(|e| HandshakeError::InvalidParams {
            id: msg.id,
            reason: e.to_string(),
        })?;

    if params.address.trim().is_empty() {
        return Err(HandshakeError::InvalidParams {
            id: msg.id,
            reason: "address is empty".to_string(),
        });
    }

    Ok(ConnectRequest {
        id: msg.id,
        address: params.address,
    })
}

/// Dial the requested target within `timeout`
pub async fn dial(request: &ConnectRequest, timeout: Duration) -> Result<TcpStream, HandshakeError> {
    let dial_error = |source| HandshakeError::Dial {
        id: request.id,
        address: request.address.clone(),
        source,
    };

    match tokio::time::timeout(timeout, TcpStream::connect(&request.address)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(dial_error(e)),
        Err(_) => Err(dial_error(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("no answer within {:?}", timeout),
        ))),
    }
}

/// Run the handshake on a fresh connection.
///
/// `incoming` yields frames read from the connecting peer; replies go out on
/// `reply`. On failure the error reply (when there is an id to answer) has
/// already been sent by the time this returns.
pub async fn negotiate<W>(
    incoming: &mut UnboundedReceiver<Vec<u8>>,
    reply: &mut FrameWriter<W>,
    settings: HandshakeSettings,
) -> Result<Connected, HandshakeError>
where
    W: AsyncWrite + Unpin,
{
    match attempt(incoming, settings).await {
        Ok((request, stream)) => {
            let ok = RpcMessage::success(request.id, &ConnectResult { ok: true })
                .and_then(|msg| msg.to_frame())
                .map_err(|e| HandshakeError::Reply(TransportError::Io(e.into())))?;
            reply.write_frame(&ok).await.map_err(HandshakeError::Reply)?;

            Ok(Connected {
                id: request.id,
                address: request.address,
                stream,
            })
        }
        Err(err) => {
            if let Some(msg) = err.reply() {
                match msg.to_frame() {
                    Ok(frame) => {
                        if let Err(e) = reply.write_frame(&frame).await {
                            warn!(error = %e, "Could not write error to client");
                        }
                    }
                    Err(e) => warn!(error = %e, "Could not encode error reply"),
                }
            }
            Err(err)
        }
    }
}

async fn attempt(
    incoming: &mut UnboundedReceiver<Vec<u8>>,
    settings: HandshakeSettings,
) -> Result<(ConnectRequest, TcpStream), HandshakeError> {
    let frame = match tokio::time::timeout(settings.timeout, incoming.recv()).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(HandshakeError::Disconnected),
        Err(_) => return Err(HandshakeError::Timeout(settings.timeout)),
    };

    let request = validate(&String::from_utf8_lossy(&frame))?;
    debug!(address = %request.address, "Dialing target");
    let stream = dial(&request, settings.dial_timeout).await?;
    Ok((request, stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use teacup_protocol::transport;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn settings() -> HandshakeSettings {
        HandshakeSettings {
            timeout: Duration::from_millis(200),
            dial_timeout: Duration::from_secs(1),
        }
    }

    fn connect_frame(id: i64, address: &str) -> String {
        format!(
            r#"{{"jsonrpc":"2.0","id":{},"method":"Proxy.Connect","params":{{"address":"{}"}}}}"#,
            id, address
        )
    }

    /// Address on which nothing is listening
    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    /// Run `negotiate` against `frames`, returning its result and whatever it wrote back
    async fn run(frames: &[&str]) -> (Result<Connected, HandshakeError>, Vec<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for frame in frames {
            tx.send(frame.as_bytes().to_vec()).unwrap();
        }
        drop(tx);

        let (ours, theirs) = tokio::io::duplex(4096);
        let (_r, mut writer) = transport::split(ours, CancellationToken::new());
        let (mut peer, _w) = transport::split(theirs, CancellationToken::new());

        let result = negotiate(&mut rx, &mut writer, settings()).await;
        writer.close().await;

        let mut replies = Vec::new();
        while let Some(line) = peer.read_frame().await.unwrap() {
            replies.push(line);
        }
        (result, replies)
    }

    #[test]
    fn test_validate_accepts_connect() {
        let req = validate(&connect_frame(4, "127.0.0.1:9999")).unwrap();
        assert_eq!(
            req,
            ConnectRequest {
                id: 4,
                address: "127.0.0.1:9999".to_string()
            }
        );
    }

    #[test]
    fn test_validate_failures_map_to_codes() {
        let cases: &[(&str, ErrorCode, Option<i64>)] = &[
            ("garbage", ErrorCode::ParseError, None),
            (r#"{"id":8,"method":7}"#, ErrorCode::ParseError, Some(8)),
            (
                r#"{"jsonrpc":"1.0","id":2,"method":"Proxy.Connect","params":{"address":"a:1"}}"#,
                ErrorCode::InvalidRequest,
                Some(2),
            ),
            (
                r#"{"jsonrpc":"2.0","id":3,"method":"Game.List"}"#,
                ErrorCode::InvalidRequest,
                Some(3),
            ),
            (
                r#"{"jsonrpc":"2.0","id":5,"method":"Proxy.Connect"}"#,
                ErrorCode::InvalidParams,
                Some(5),
            ),
            (
                r#"{"jsonrpc":"2.0","id":6,"method":"Proxy.Connect","params":{"addr":"x"}}"#,
                ErrorCode::InvalidParams,
                Some(6),
            ),
            (
                r#"{"jsonrpc":"2.0","id":7,"method":"Proxy.Connect","params":{"address":""}}"#,
                ErrorCode::InvalidParams,
                Some(7),
            ),
        ];

        for (frame, code, id) in cases {
            let err = validate(frame).unwrap_err();
            assert_eq!(err.code(), Some(*code), "frame: {}", frame);
            assert_eq!(err.reply_id(), *id, "frame: {}", frame);
        }
    }

    #[test]
    fn test_notification_connect_gets_no_reply() {
        let err = validate(r#"{"jsonrpc":"2.0","method":"Hello"}"#).unwrap_err();
        assert!(matches!(err, HandshakeError::WrongMethod { id: 0, .. }));
        assert!(err.reply().is_none());
    }

    #[tokio::test]
    async fn test_dial_failure_replies_internal_error() {
        let target = closed_port().await;
        let frame = connect_frame(1, &target);

        let (result, replies) = run(&[&frame]).await;

        assert!(matches!(result, Err(HandshakeError::Dial { .. })));
        assert_eq!(replies.len(), 1);
        let reply: serde_json::Value = serde_json::from_str(&replies[0]).unwrap();
        assert_eq!(reply["jsonrpc"], "2.0");
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["error"]["code"], -32603);
        assert!(reply["error"]["message"].as_str().unwrap().contains(&target));
        assert!(reply.get("result").is_none());
    }

    #[tokio::test]
    async fn test_success_replies_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let frame = connect_frame(1, &target);

        let (result, replies) = run(&[&frame]).await;

        let connected = result.unwrap();
        assert_eq!(connected.address, target);
        assert_eq!(replies, vec![r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#]);
    }

    #[tokio::test]
    async fn test_wrong_method_replies_invalid_request() {
        let (result, replies) = run(&[r#"{"jsonrpc":"2.0","id":9,"method":"Game.List"}"#]).await;

        assert!(matches!(result, Err(HandshakeError::WrongMethod { .. })));
        let reply: serde_json::Value = serde_json::from_str(&replies[0]).unwrap();
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_timeout_sends_nothing() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (ours, _theirs) = tokio::io::duplex(64);
        let (_r, mut writer) = transport::split(ours, CancellationToken::new());

        let err = negotiate(&mut rx, &mut writer, settings()).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Timeout(_)));
        assert!(err.reply().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_before_connect() {
        let (result, replies) = run(&[]).await;
        assert!(matches!(result, Err(HandshakeError::Disconnected)));
        assert!(replies.is_empty());
    }
}
