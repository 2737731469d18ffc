//! [`Transport`] over a WebSocket connection to a [`RelayServer`](crate::server::RelayServer).
//!
//! Provides:
//! - A writer task draining an unbounded outbound queue into the socket
//! - A reader task turning relay frames into [`TransportEvent`]s
//! - Local bookkeeping of the bound identity and live channels, so sends on
//!   dead channels fail fast
//!
//! All `Transport` methods are synchronous: they only enqueue frames.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ChannelId, RejectReason, RelayFrame};
use crate::room::PeerId;
use crate::transport::{Transport, TransportError, TransportEvent};

/// What the reader task has learned about this connection.
#[derive(Debug, Default)]
struct LinkState {
    peer_id: Option<PeerId>,
    channels: HashSet<ChannelId>,
}

/// WebSocket relay transport.
pub struct WsTransport {
    url: String,
    link: Arc<Mutex<LinkState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: mpsc::UnboundedSender<Vec<u8>>,
    event_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    reader: JoinHandle<()>,
}

impl WsTransport {
    /// Connect to a relay, e.g. `ws://127.0.0.1:9000`.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        log::info!("Connected to relay {url}");

        // Writer task: forward outgoing channel to WebSocket
        let (outgoing_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: relay frames to transport events
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(LinkState::default()));
        let reader_link = link.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match ws_reader.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        match RelayFrame::decode(&bytes) {
                            Ok(frame) => {
                                if let Some(event) = translate(&reader_link, frame) {
                                    let _ = event_tx.send(event);
                                }
                            }
                            Err(e) => log::warn!("Failed to decode relay frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break "relay closed the connection".to_string();
                    }
                    Some(Err(e)) => break e.to_string(),
                    _ => {}
                }
            };

            // Connection lost
            log::warn!("Relay connection lost: {reason}");
            if let Ok(mut link) = reader_link.lock() {
                *link = LinkState::default();
            }
            let _ = event_tx.send(TransportEvent::Lost {
                error: TransportError::ConnectionLost(reason),
            });
        });

        Ok(Self {
            url,
            link,
            outgoing_tx,
            event_rx: Some(event_rx),
            reader,
        })
    }

    /// Identity currently bound at the relay.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.link.lock().ok().and_then(|link| link.peer_id.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn send_frame(&self, frame: &RelayFrame) -> Result<(), TransportError> {
        let bytes = frame.encode().map_err(|e| TransportError::Io(e.to_string()))?;
        self.outgoing_tx
            .send(bytes)
            .map_err(|_| TransportError::ConnectionLost("writer stopped".into()))
    }

    fn with_link<R>(&self, f: impl FnOnce(&mut LinkState) -> R) -> Result<R, TransportError> {
        let mut link = self
            .link
            .lock()
            .map_err(|_| TransportError::Io("link state lock poisoned".into()))?;
        Ok(f(&mut link))
    }
}

/// Update link bookkeeping for a relay frame and map it to an event.
fn translate(link: &Mutex<LinkState>, frame: RelayFrame) -> Option<TransportEvent> {
    let mut link = link.lock().ok()?;
    match frame {
        RelayFrame::Registered { peer_id } => {
            link.peer_id = Some(peer_id.clone());
            Some(TransportEvent::Registered { peer_id })
        }
        RelayFrame::Rejected { peer_id, reason } => {
            let error = match (reason, peer_id) {
                (RejectReason::IdentityTaken, Some(peer_id)) => {
                    TransportError::IdentityTaken(peer_id)
                }
                (RejectReason::ServerFull, _) => TransportError::ServerFull,
                (reason, _) => TransportError::Io(format!("registration rejected: {reason:?}")),
            };
            Some(TransportEvent::RegistrationFailed { error })
        }
        RelayFrame::Incoming { channel, from } => {
            link.channels.insert(channel);
            Some(TransportEvent::IncomingChannel { channel, peer_id: from })
        }
        RelayFrame::Opened { channel } => {
            link.channels.insert(channel);
            Some(TransportEvent::ChannelOpen { channel })
        }
        RelayFrame::Unavailable { channel, target } => {
            link.channels.remove(&channel);
            Some(TransportEvent::PeerUnavailable { channel, peer_id: target })
        }
        RelayFrame::Data { channel, payload } => Some(TransportEvent::Data { channel, payload }),
        RelayFrame::Close { channel } => {
            link.channels
                .remove(&channel)
                .then_some(TransportEvent::ChannelClosed { channel })
        }
        other => {
            log::warn!("Relay sent a client-only frame: {other:?}");
            None
        }
    }
}

impl Transport for WsTransport {
    fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.event_rx.take()
    }

    fn register(&mut self, peer_id: Option<PeerId>) -> Result<(), TransportError> {
        self.send_frame(&RelayFrame::Register { peer_id })
    }

    fn connect(&mut self, target: &PeerId) -> Result<ChannelId, TransportError> {
        let channel = ChannelId::new();
        self.with_link(|link| {
            if link.peer_id.is_none() {
                return Err(TransportError::NotRegistered);
            }
            link.channels.insert(channel);
            Ok(())
        })??;
        self.send_frame(&RelayFrame::Connect {
            channel,
            target: target.clone(),
        })?;
        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, payload: &[u8]) -> Result<(), TransportError> {
        if !self.with_link(|link| link.channels.contains(&channel))? {
            return Err(TransportError::ChannelClosed(channel));
        }
        self.send_frame(&RelayFrame::Data {
            channel,
            payload: payload.to_vec(),
        })
    }

    fn close(&mut self, channel: ChannelId) {
        let known = self
            .with_link(|link| link.channels.remove(&channel))
            .unwrap_or(false);
        if known {
            if let Err(e) = self.send_frame(&RelayFrame::Close { channel }) {
                log::debug!("Close of {channel} not sent: {e}");
            }
        }
    }

    fn release(&mut self) {
        let bound = self
            .with_link(|link| {
                link.channels.clear();
                link.peer_id.take().is_some()
            })
            .unwrap_or(false);
        if bound {
            if let Err(e) = self.send_frame(&RelayFrame::Unregister) {
                log::debug!("Unregister not sent: {e}");
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // Writer exits once `outgoing_tx` is dropped and closes the socket.
        self.reader.abort();
    }
}
