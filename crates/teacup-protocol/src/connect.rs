//! `Proxy.Connect` handshake payloads
//!
//! The first frame on every proxied connection names the real target.

use serde::{Deserialize, Serialize};

/// Method name of the handshake call
pub const CONNECT_METHOD: &str = "Proxy.Connect";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Address of the TCP endpoint to connect to (`host:port`)
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResult {
    pub ok: bool,
}
