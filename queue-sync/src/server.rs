//! WebSocket relay: rendezvous service and channel forwarder.
//!
//! Architecture:
//! ```text
//! Host ("queue-room-squad7") ──┐                     ┌── Client A (peer-1f..)
//!                              ├── identity registry ┤
//!                              │   channel table     │
//!                              └──── Data/Close ─────┴── Client B (peer-9c..)
//! ```
//!
//! Each WebSocket connection may bind one identity. Duplicate identities are
//! refused, which is what makes a room code exclusive. A `Connect` from one
//! identity to another opens a relayed channel: both ends get `Opened`, the
//! acceptor also gets `Incoming`. Data is forwarded in order on the
//! connection's outbound queue. When either side closes the channel, or its
//! connection drops, the other side gets `Close`.
//!
//! The relay never looks inside channel payloads.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ChannelId, RejectReason, RelayFrame};
use crate::room::PeerId;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum registered identities
    pub max_peers: usize,
    /// Frames larger than this are dropped
    pub max_frame_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            max_peers: 1024,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub registered_peers: usize,
    pub open_channels: usize,
    pub frames_relayed: u64,
    pub bytes_relayed: u64,
    pub rejected_registrations: u64,
    pub dropped_frames: u64,
}

type ConnId = u64;

struct Connection {
    peer_id: Option<PeerId>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

struct RelayChannel {
    opener: ConnId,
    acceptor: ConnId,
}

impl RelayChannel {
    fn other_end(&self, conn: ConnId) -> Option<ConnId> {
        if conn == self.opener {
            Some(self.acceptor)
        } else if conn == self.acceptor {
            Some(self.opener)
        } else {
            None
        }
    }
}

/// Registry and channel table, shared by all connection tasks.
#[derive(Default)]
struct RelayState {
    connections: HashMap<ConnId, Connection>,
    identities: HashMap<PeerId, ConnId>,
    channels: HashMap<ChannelId, RelayChannel>,
    stats: RelayStats,
}

impl RelayState {
    fn send_to(&self, conn: ConnId, frame: &RelayFrame) {
        let Some(connection) = self.connections.get(&conn) else { return };
        match frame.encode() {
            Ok(bytes) => {
                // Receiver gone means the connection is shutting down.
                let _ = connection.outbound.send(bytes);
            }
            Err(e) => log::error!("Cannot encode relay frame: {e}"),
        }
    }

    fn peer_of(&self, conn: ConnId) -> Option<PeerId> {
        self.connections.get(&conn).and_then(|c| c.peer_id.clone())
    }

    fn handle_frame(&mut self, conn: ConnId, frame: RelayFrame, config: &RelayConfig) {
        match frame {
            RelayFrame::Register { peer_id } => self.register(conn, peer_id, config),
            RelayFrame::Unregister => {
                self.drop_channels_of(conn);
                self.unbind(conn);
            }
            RelayFrame::Connect { channel, target } => self.connect(conn, channel, target),
            RelayFrame::Data { channel, payload } => {
                let Some(other) = self.channels.get(&channel).and_then(|c| c.other_end(conn))
                else {
                    log::debug!("Dropping data for unknown channel {channel}");
                    self.stats.dropped_frames += 1;
                    return;
                };
                self.stats.frames_relayed += 1;
                self.stats.bytes_relayed += payload.len() as u64;
                self.send_to(other, &RelayFrame::Data { channel, payload });
            }
            RelayFrame::Close { channel } => {
                let Some(other) = self.channels.get(&channel).and_then(|c| c.other_end(conn))
                else {
                    return;
                };
                self.channels.remove(&channel);
                self.send_to(other, &RelayFrame::Close { channel });
            }
            other => {
                log::warn!("Connection {conn} sent a relay-only frame: {other:?}");
                self.stats.dropped_frames += 1;
            }
        }
    }

    fn register(&mut self, conn: ConnId, peer_id: Option<PeerId>, config: &RelayConfig) {
        let wanted = peer_id.unwrap_or_else(PeerId::anonymous);

        let holder = self.identities.get(&wanted).copied();
        let reject = match holder {
            Some(holder) if holder != conn => Some(RejectReason::IdentityTaken),
            Some(_) => None,
            None if self.identities.len() >= config.max_peers => Some(RejectReason::ServerFull),
            None => None,
        };
        if let Some(reason) = reject {
            log::info!("Refusing {wanted} on connection {conn}: {reason:?}");
            self.stats.rejected_registrations += 1;
            self.send_to(
                conn,
                &RelayFrame::Rejected {
                    peer_id: Some(wanted),
                    reason,
                },
            );
            return;
        }

        self.unbind(conn);
        self.identities.insert(wanted.clone(), conn);
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.peer_id = Some(wanted.clone());
        }
        log::info!("Connection {conn} registered as {wanted}");
        self.send_to(conn, &RelayFrame::Registered { peer_id: wanted });
    }

    fn connect(&mut self, conn: ConnId, channel: ChannelId, target: PeerId) {
        let from = self.peer_of(conn);
        let acceptor = self.identities.get(&target).copied();
        let (Some(from), Some(acceptor)) = (from, acceptor) else {
            log::debug!("Connect from {conn} to unknown {target}");
            self.send_to(conn, &RelayFrame::Unavailable { channel, target });
            return;
        };
        if acceptor == conn || self.channels.contains_key(&channel) {
            log::warn!("Refusing channel {channel} from {from} to {target}");
            self.send_to(conn, &RelayFrame::Unavailable { channel, target });
            return;
        }

        self.channels.insert(channel, RelayChannel { opener: conn, acceptor });
        log::debug!("Opened {channel}: {from} -> {target}");
        self.send_to(acceptor, &RelayFrame::Incoming { channel, from });
        self.send_to(acceptor, &RelayFrame::Opened { channel });
        self.send_to(conn, &RelayFrame::Opened { channel });
    }

    /// Remove every channel of `conn`, telling the far ends.
    fn drop_channels_of(&mut self, conn: ConnId) {
        let doomed: Vec<(ChannelId, ConnId)> = self
            .channels
            .iter()
            .filter_map(|(id, ch)| ch.other_end(conn).map(|other| (*id, other)))
            .collect();
        for (channel, other) in doomed {
            self.channels.remove(&channel);
            self.send_to(other, &RelayFrame::Close { channel });
        }
    }

    fn unbind(&mut self, conn: ConnId) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            if let Some(peer_id) = connection.peer_id.take() {
                self.identities.remove(&peer_id);
                log::info!("Released {peer_id}");
            }
        }
    }

    fn snapshot(&self) -> RelayStats {
        RelayStats {
            registered_peers: self.identities.len(),
            open_channels: self.channels.len(),
            ..self.stats.clone()
        }
    }
}

/// The relay server.
#[derive(Clone)]
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<Mutex<RelayState>>,
    next_conn: Arc<AtomicU64>,
}

impl RelayServer {
    /// Create a new relay with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(RelayState::default())),
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        {
            let mut state = self.state.lock().await;
            state.connections.insert(conn, Connection { peer_id: None, outbound });
            state.stats.total_connections += 1;
            state.stats.active_connections += 1;
        }
        log::info!("WebSocket connection {conn} established from {addr}");

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            if bytes.len() > self.config.max_frame_bytes {
                                log::warn!("Dropping {} byte frame from {addr}", bytes.len());
                                self.state.lock().await.stats.dropped_frames += 1;
                                continue;
                            }
                            match RelayFrame::decode(&bytes) {
                                Ok(frame) => {
                                    self.state.lock().await.handle_frame(conn, frame, &self.config);
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = ws_sender.send(Message::Binary(frame.into())).await {
                        log::warn!("Send to {addr} failed: {e}");
                        break;
                    }
                }
            }
        }

        // Cleanup: close channels, free identity
        {
            let mut state = self.state.lock().await;
            state.drop_channels_of(conn);
            state.unbind(conn);
            state.connections.remove(&conn);
            state.stats.active_connections -= 1;
        }
        let _ = ws_sender.close().await;
        Ok(())
    }

    /// Get relay statistics.
    pub async fn stats(&self) -> RelayStats {
        self.state.lock().await.snapshot()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
