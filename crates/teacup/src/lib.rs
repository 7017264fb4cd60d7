//! Debugging proxy for line-delimited JSON-RPC over TCP.
//!
//! A client opens a connection with `Proxy.Connect`, after which every frame
//! is relayed unchanged to the target while request/response pairs are
//! tracked and printed.

pub mod broker;
pub mod config;
pub mod event;
pub mod handshake;
pub mod relay;
pub mod render;
pub mod server;

pub use broker::{Broker, Tracking};
pub use config::{ConfigError, ProxyConfig};
pub use event::{Direction, Event, EventKind, EventStatus};
pub use handshake::{HandshakeError, HandshakeSettings};
pub use relay::{run_session, CloseReason, SessionConfig, SessionReport};
pub use render::{EventSink, MethodFilter, Renderer, StdoutSink};
pub use server::{ProxyServer, ServerError};
