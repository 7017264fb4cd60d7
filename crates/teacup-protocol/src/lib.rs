pub mod client;
pub mod connect;
pub mod jsonrpc;
pub mod transport;

pub use client::{ClientError, ProxyClient};
pub use connect::{ConnectParams, ConnectResult, CONNECT_METHOD};
pub use jsonrpc::{Envelope, ErrorCode, Reply, RpcError, RpcMessage, JSONRPC_VERSION};
pub use transport::{FrameReader, FrameWriter, TransportError};
