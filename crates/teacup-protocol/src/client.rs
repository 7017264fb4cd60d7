use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::connect::{ConnectParams, CONNECT_METHOD};
use crate::jsonrpc::{RpcError, RpcMessage};
use crate::transport::{self, FrameReader, FrameWriter, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("proxy closed the connection during the handshake")]
    Disconnected,

    #[error("proxy refused the connection: [{code}] {message}")]
    Refused { code: i64, message: String },
}

/// Client side of a proxied connection.
///
/// Performs the `Proxy.Connect` handshake, after which frames go straight
/// through to the target.
pub struct ProxyClient {
    reader: FrameReader<ReadHalf<TcpStream>>,
    writer: FrameWriter<WriteHalf<TcpStream>>,
}

impl ProxyClient {
    pub async fn connect(proxy: &str, target: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(proxy).await.map_err(TransportError::from)?;
        let (reader, writer) = transport::split(stream, CancellationToken::new());
        let mut client = Self { reader, writer };

        let params = ConnectParams {
            address: target.to_string(),
        };
        let request = RpcMessage::request(1, CONNECT_METHOD, &params)?;
        client.send(&request.to_frame()?).await?;

        let Some(line) = client.recv().await? else {
            return Err(ClientError::Disconnected);
        };
        let reply = RpcMessage::parse(&line)?;
        if let Some(RpcError { code, message, .. }) = reply.error {
            return Err(ClientError::Refused { code, message });
        }

        Ok(client)
    }

    pub async fn send(&mut self, frame: &str) -> Result<(), ClientError> {
        Ok(self.writer.write_frame(frame).await?)
    }

    /// Next frame from the target, `None` once the proxy hangs up
    pub async fn recv(&mut self) -> Result<Option<String>, ClientError> {
        Ok(self.reader.read_frame().await?)
    }

    pub async fn close(mut self) {
        self.writer.close().await;
    }
}
