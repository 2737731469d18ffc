//! Roles, connection states, notifications and errors of the coordinator.

use std::fmt;

use crate::protocol::ProtocolError;
use crate::room::{PeerId, RoomId, RoomIdError};
use crate::transport::TransportError;

/// Part this instance plays in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Unset,
    Host,
    Client,
}

/// Connection lifecycle.
///
/// ```text
///  create_room:  Disconnected → Registering → Connected(Host)
///  join_room:    Disconnected → Registering → Connecting → Connected(Client)
///  host lost:    Connected(Client) → Reconnecting ─(grace expires)→ Disconnected
///                                       └─(link reopens)→ Connected(Client)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Waiting for the rendezvous service to confirm our identity.
    Registering,
    /// Client: identity confirmed, channel to the host opening.
    Connecting,
    Connected,
    /// Client: host link dropped, grace window running.
    Reconnecting,
}

/// Why a room attempt or session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// Host identity for this code is held by another session.
    RoomNameTaken(RoomId),
    /// No host is registered for this code.
    RoomNotFound(RoomId),
    /// Registration or channel did not open in time.
    ConnectionTimeout,
    /// Established host link stayed down for the whole grace window.
    HostLost,
    TransportError(TransportError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoomNameTaken(room) => write!(f, "Room {room} is already in use"),
            Self::RoomNotFound(room) => write!(f, "Room {room} was not found"),
            Self::ConnectionTimeout => write!(f, "Connection timed out"),
            Self::HostLost => write!(f, "Lost connection to the room host"),
            Self::TransportError(e) => write!(f, "Transport error: {e}"),
        }
    }
}

/// Notifications for the owner of a coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Connection state changed.
    Connection(ConnectionState),
    /// Current attempt or session ended.
    Disconnected(DisconnectReason),
    /// Hosting started or stopped.
    HostChanged { is_host: bool, room_id: Option<RoomId> },
    /// Host only: a client channel opened.
    PeerJoined(PeerId),
    /// Host only: a client channel closed.
    PeerLeft(PeerId),
}

/// Synchronous failures of coordinator operations.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    InvalidRoomId(RoomIdError),
    /// No room code persisted to rejoin.
    NoSavedRoom,
    /// Client has no host link and is not waiting for one.
    NotConnected,
    /// Offline queue is at capacity.
    QueueFull,
    /// Host refused its own action.
    ActionRejected(String),
    /// Transport event receiver was already taken.
    EventsTaken,
    Transport(TransportError),
    Protocol(ProtocolError),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRoomId(e) => write!(f, "Invalid room code: {e}"),
            Self::NoSavedRoom => write!(f, "No saved room to rejoin"),
            Self::NotConnected => write!(f, "Not connected to a room host"),
            Self::QueueFull => write!(f, "Offline queue is full"),
            Self::ActionRejected(e) => write!(f, "Action rejected: {e}"),
            Self::EventsTaken => write!(f, "Transport events already taken"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Protocol(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<TransportError> for CoordinatorError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for CoordinatorError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<RoomIdError> for CoordinatorError {
    fn from(e: RoomIdError) -> Self {
        Self::InvalidRoomId(e)
    }
}
