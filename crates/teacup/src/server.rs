//! Proxy listener
//!
//! Accepts TCP connections and runs one relay session per connection until
//! the shutdown token fires. Sessions already running are then torn down and
//! awaited before [`ProxyServer::serve`] returns.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::ProxyConfig;
use crate::relay::{self, CloseReason, SessionConfig};
use crate::render::EventSink;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("Failed to read local address: {0}")]
    LocalAddr(std::io::Error),
}

/// Intercepting proxy (cheaply cloneable)
#[derive(Clone)]
pub struct ProxyServer {
    listen: String,
    session: Arc<SessionConfig>,
    sink: Arc<dyn EventSink>,
    active: Arc<AtomicUsize>,
}

impl ProxyServer {
    pub fn new(listen: impl Into<String>, session: SessionConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            listen: listen.into(),
            session: Arc::new(session),
            sink,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(config: &ProxyConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::new(config.listen.clone(), config.session(), sink)
    }

    /// Address the proxy is configured to listen on
    pub fn listen(&self) -> &str {
        &self.listen
    }

    /// Number of sessions currently running
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.listen)
            .await
            .map_err(|source| ServerError::BindFailed {
                address: self.listen.clone(),
                source,
            })
    }

    /// Bind and serve until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept loop over an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let local: SocketAddr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        info!(address = %local, "Proxy listening");

        let sessions = TaskTracker::new();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!(client = %peer, "New client connected");
                            self.active.fetch_add(1, Ordering::SeqCst);

                            let config = self.session.clone();
                            let sink = self.sink.clone();
                            let active = self.active.clone();
                            let shutdown = shutdown.clone();
                            sessions.spawn(async move {
                                let report = relay::run_session(stream, &config, sink, shutdown).await;
                                if let CloseReason::Handshake(e) = &report.reason {
                                    debug!(client = %peer, error = %e, "Client rejected");
                                }
                                active.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!(sessions = sessions.len(), "Proxy shutting down");
                    break;
                }
            }
        }

        sessions.close();
        sessions.wait().await;
        Ok(())
    }
}
