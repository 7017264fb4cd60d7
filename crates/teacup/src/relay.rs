//! Relay Engine
//!
//! One session per accepted connection:
//!
//! ```text
//! AwaitingHandshake --Proxy.Connect ok--> Relaying --either side gone--> Closed
//!         \-------------- handshake failed --------------------------/
//! ```
//!
//! Two producer tasks read frames from the peers into unbounded queues. The
//! relay loop is the only consumer: it tracks each frame with the session's
//! [`Broker`] and then writes it, unchanged, to the other peer. Tracking never
//! decides whether a frame is forwarded.

use std::sync::Arc;

use teacup_protocol::transport::{self, FrameReader, FrameWriter};
use teacup_protocol::TransportError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::broker::Broker;
use crate::event::{Direction, Event};
use crate::handshake::{self, Connected, HandshakeError, HandshakeSettings};
use crate::render::{pick_color, EventSink, MethodFilter, Renderer};

/// Settings shared by every session of one proxy
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handshake: HandshakeSettings,
    pub filter: MethodFilter,
    pub color: bool,
}

#[derive(Debug)]
pub enum CloseReason {
    /// `Proxy.Connect` did not succeed; nothing was relayed
    Handshake(HandshakeError),
    /// A peer hung up or could no longer be read
    PeerClosed,
    /// Forwarding to the peer on the receiving end of this direction failed
    WriteFailed(Direction),
    /// The proxy itself is shutting down
    Shutdown,
}

/// Summary of a finished session
#[derive(Debug)]
pub struct SessionReport {
    /// Dialed target, if the handshake got that far
    pub address: Option<String>,
    pub reason: CloseReason,
    /// Frames relayed client → server
    pub outbound_frames: u64,
    /// Frames relayed server → client
    pub inbound_frames: u64,
    /// Every event of the session, all terminal
    pub events: Vec<Event>,
}

/// Display name of a session: the target port in braces
pub fn display_name(address: &str) -> String {
    let port = address
        .rsplit_once(':')
        .map(|(_, port)| port)
        .filter(|port| !port.is_empty())
        .unwrap_or(address);
    format!("{{{}}}", port)
}

/// Serve one client connection until it is fully torn down.
///
/// Never fails: every peer-caused problem ends the session and is reported in
/// the returned [`SessionReport`].
pub async fn run_session<S>(
    client: S,
    config: &SessionConfig,
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) -> SessionReport
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let session = shutdown.child_token();
    trace!("Awaiting Proxy.Connect");

    let (client_reader, mut client_writer) = transport::split(client, CancellationToken::new());
    let (client_tx, mut from_client) = mpsc::unbounded_channel();
    let client_task = spawn_producer(client_reader, client_tx, session.clone(), Direction::Outbound);

    let connected =
        handshake::negotiate(&mut from_client, &mut client_writer, config.handshake).await;

    let Connected { address, stream, .. } = match connected {
        Ok(connected) => connected,
        Err(err) => {
            match &err {
                HandshakeError::Timeout(_) => warn!("Timed out waiting for Proxy.Connect"),
                HandshakeError::Disconnected => debug!("Client left before Proxy.Connect"),
                other => warn!(error = %other, "Proxy.Connect failed"),
            }

            client_writer.close().await;
            session.cancel();
            let _ = client_task.await;

            return SessionReport {
                address: None,
                reason: CloseReason::Handshake(err),
                outbound_frames: 0,
                inbound_frames: 0,
                events: Vec::new(),
            };
        }
    };

    info!(address = %address, "Connected to target, relaying");

    let (server_reader, server_writer) = transport::split(stream, CancellationToken::new());
    let (server_tx, mut from_server) = mpsc::unbounded_channel();
    let server_task = spawn_producer(server_reader, server_tx, session.clone(), Direction::Inbound);

    let renderer = Renderer::new(
        display_name(&address),
        config.color.then(pick_color),
        config.filter.clone(),
    );
    let mut relay = Relay {
        broker: Broker::new(renderer, sink),
        client: client_writer,
        server: server_writer,
        outbound_frames: 0,
        inbound_frames: 0,
    };

    let reason = relay
        .run(&mut from_client, &mut from_server, &session, &shutdown)
        .await;

    // Whatever the producers queued before the session ended still goes out
    if !matches!(reason, CloseReason::WriteFailed(_)) {
        relay.drain(&mut from_server, Direction::Inbound).await;
        relay.drain(&mut from_client, Direction::Outbound).await;
    }

    relay.client.close().await;
    relay.server.close().await;
    session.cancel();
    let _ = tokio::join!(client_task, server_task);

    let events = relay.broker.retire();
    info!(
        address = %address,
        ?reason,
        outbound = relay.outbound_frames,
        inbound = relay.inbound_frames,
        events = events.len(),
        "Session closed"
    );

    SessionReport {
        address: Some(address),
        reason,
        outbound_frames: relay.outbound_frames,
        inbound_frames: relay.inbound_frames,
        events,
    }
}

/// Read frames from one peer until it goes away, then end the session
fn spawn_producer<R>(
    mut reader: FrameReader<R>,
    tx: UnboundedSender<Vec<u8>>,
    session: CancellationToken,
    from: Direction,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match reader.read_bytes().await {
                Ok(Some(frame)) => {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(peer = from.peer(), "Peer closed the connection");
                    break;
                }
                Err(e) if e.is_benign() => break,
                Err(e) => {
                    warn!(peer = from.peer(), error = %e, "While reading from peer");
                    break;
                }
            }
        }
        session.cancel();
    })
}

struct Relay<C, U> {
    broker: Broker,
    client: FrameWriter<C>,
    server: FrameWriter<U>,
    outbound_frames: u64,
    inbound_frames: u64,
}

impl<C, U> Relay<C, U>
where
    C: AsyncWrite + Unpin,
    U: AsyncWrite + Unpin,
{
    async fn run(
        &mut self,
        from_client: &mut UnboundedReceiver<Vec<u8>>,
        from_server: &mut UnboundedReceiver<Vec<u8>>,
        session: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> CloseReason {
        loop {
            let (from, frame) = tokio::select! {
                Some(frame) = from_server.recv() => (Direction::Inbound, frame),
                Some(frame) = from_client.recv() => (Direction::Outbound, frame),
                _ = session.cancelled() => {
                    return if shutdown.is_cancelled() {
                        CloseReason::Shutdown
                    } else {
                        CloseReason::PeerClosed
                    };
                }
            };

            if let Err(e) = self.forward(from, &frame).await {
                let to = from.opposite();
                if !e.is_benign() {
                    warn!(peer = to.peer(), error = %e, "While forwarding frame");
                }
                return CloseReason::WriteFailed(from);
            }
        }
    }

    /// Forward frames already queued in `rx` without waiting for more
    async fn drain(&mut self, rx: &mut UnboundedReceiver<Vec<u8>>, from: Direction) {
        while let Ok(frame) = rx.try_recv() {
            if let Err(e) = self.forward(from, &frame).await {
                debug!(peer = from.opposite().peer(), error = %e, "Dropped queued frames at teardown");
                return;
            }
        }
    }

    /// Track `frame`, then write it unchanged to the peer it was meant for
    async fn forward(&mut self, from: Direction, frame: &[u8]) -> Result<(), TransportError> {
        let tracking = self.broker.track(from, frame);
        trace!(from = from.peer(), ?tracking, "Relaying frame");

        match from {
            Direction::Outbound => {
                self.server.write_frame(frame).await?;
                self.outbound_frames += 1;
            }
            Direction::Inbound => {
                self.client.write_frame(frame).await?;
                self.inbound_frames += 1;
            }
        }
        Ok(())
    }
}
