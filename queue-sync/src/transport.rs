//! Capability contract between the coordinator and a peer transport.
//!
//! A transport registers one identity with a rendezvous service and carries
//! reliable, ordered, point-to-point channels between named identities.
//! Requests are fire-and-forget; their outcomes come back later as
//! [`TransportEvent`]s on the receiver returned by [`Transport::take_event_rx`].
//!
//! ```text
//!   coordinator ──register/connect/send/close/release──► Transport
//!        ▲                                                   │
//!        └──────────────── TransportEvent (mpsc) ◄───────────┘
//! ```
//!
//! Implementations: [`MemoryTransport`](crate::memory::MemoryTransport)
//! (in-process) and [`WsTransport`](crate::client::WsTransport) (WebSocket
//! relay).

use tokio::sync::mpsc;

pub use crate::protocol::ChannelId;
use crate::room::PeerId;

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Identity confirmed by the rendezvous service.
    Registered { peer_id: PeerId },
    /// Registration refused or failed.
    RegistrationFailed { error: TransportError },
    /// A remote peer is opening a channel to us. Usable after `ChannelOpen`.
    IncomingChannel { channel: ChannelId, peer_id: PeerId },
    /// Channel is open in both directions.
    ChannelOpen { channel: ChannelId },
    /// Payload received on a channel, in send order.
    Data { channel: ChannelId, payload: Vec<u8> },
    /// Channel closed by the remote side or the rendezvous service.
    ChannelClosed { channel: ChannelId },
    /// Channel failed; treated like a close.
    ChannelError { channel: ChannelId, error: TransportError },
    /// The target of `connect` is not registered.
    PeerUnavailable { channel: ChannelId, peer_id: PeerId },
    /// Connection to the rendezvous service is gone; every channel is dead.
    Lost { error: TransportError },
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Identity already held by another session.
    IdentityTaken(PeerId),
    /// No identity registered yet.
    NotRegistered,
    /// Channel unknown or already closed.
    ChannelClosed(ChannelId),
    /// Rendezvous service refused for capacity reasons.
    ServerFull,
    /// Link to the rendezvous service failed.
    ConnectionLost(String),
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentityTaken(id) => write!(f, "Identity {id} is already registered"),
            Self::NotRegistered => write!(f, "No identity registered"),
            Self::ChannelClosed(ch) => write!(f, "Channel {ch} is closed"),
            Self::ServerFull => write!(f, "Rendezvous service is full"),
            Self::ConnectionLost(e) => write!(f, "Connection to rendezvous lost: {e}"),
            Self::Io(e) => write!(f, "Transport I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Peer transport used by the [`RoomCoordinator`](crate::coordinator::RoomCoordinator).
///
/// All methods return without waiting for the network. Errors returned here
/// are local and immediate (e.g. the transport is already shut down); remote
/// outcomes arrive as events.
pub trait Transport {
    /// Take the event receiver (can only be called once).
    fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Register under `peer_id`, or under a service-assigned identity if `None`.
    fn register(&mut self, peer_id: Option<PeerId>) -> Result<(), TransportError>;

    /// Begin opening a channel to `target`.
    fn connect(&mut self, target: &PeerId) -> Result<ChannelId, TransportError>;

    /// Send one payload on an open channel.
    fn send(&mut self, channel: ChannelId, payload: &[u8]) -> Result<(), TransportError>;

    /// Close a channel. Closing an unknown channel is a no-op.
    fn close(&mut self, channel: ChannelId);

    /// Release the registered identity and every channel. Idempotent.
    fn release(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        (**self).take_event_rx()
    }

    fn register(&mut self, peer_id: Option<PeerId>) -> Result<(), TransportError> {
        (**self).register(peer_id)
    }

    fn connect(&mut self, target: &PeerId) -> Result<ChannelId, TransportError> {
        (**self).connect(target)
    }

    fn send(&mut self, channel: ChannelId, payload: &[u8]) -> Result<(), TransportError> {
        (**self).send(channel, payload)
    }

    fn close(&mut self, channel: ChannelId) {
        (**self).close(channel)
    }

    fn release(&mut self) {
        (**self).release()
    }
}
