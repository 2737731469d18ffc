//! Wire formats.
//!
//! Two layers:
//!
//! ```text
//! ┌───────────────────────── RelayFrame (bincode) ─────────────────────────┐
//! │ Data { channel: 16 bytes, payload: ───────────────────────────────┐    │
//! │                                    │ Message (JSON)               │    │
//! │                                    │ {"type":"ACTION","action":…} │    │
//! │                                    └──────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`Message`] is what coordinators exchange over a data channel. It is
//!   JSON so any peer implementation can speak it:
//!   `{ "type": "JOIN_ROOM"|"STATE_UPDATE"|"ACTION"|"PING", "peerId"?, "data"?, "action"? }`.
//! - [`RelayFrame`] is the framing between a [`WsTransport`](crate::client::WsTransport)
//!   and the [`RelayServer`](crate::server::RelayServer). It carries message
//!   bytes opaquely.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::room::PeerId;

/// Application state blob. The coordinator transports it without looking inside.
pub type ReplicatedState = serde_json::Value;

/// Application action payload, equally opaque.
pub type Action = serde_json::Value;

/// Tags understood by this implementation.
pub const KNOWN_TYPES: &[&str] = &["JOIN_ROOM", "STATE_UPDATE", "ACTION", "PING"];

/// Message exchanged between coordinators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Sent by a client once its channel to the host opens.
    JoinRoom {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    /// Full replicated state, host to client.
    StateUpdate { data: ReplicatedState },
    /// A mutation proposed by a client or announced by the host.
    Action { action: Action },
    /// Keep-alive.
    Ping,
}

impl Message {
    pub fn join_room(peer_id: PeerId) -> Self {
        Self::JoinRoom { peer_id }
    }

    pub fn state_update(data: ReplicatedState) -> Self {
        Self::StateUpdate { data }
    }

    pub fn action(action: Action) -> Self {
        Self::Action { action }
    }

    /// Wire tag of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "JOIN_ROOM",
            Self::StateUpdate { .. } => "STATE_UPDATE",
            Self::Action { .. } => "ACTION",
            Self::Ping => "PING",
        }
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse JSON bytes.
    ///
    /// Frames with a tag outside [`KNOWN_TYPES`] fail with
    /// [`ProtocolError::UnknownType`] so callers can drop them quietly.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        if !KNOWN_TYPES.contains(&tag) {
            return Err(ProtocolError::UnknownType(tag.to_string()));
        }
        serde_json::from_value(value)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Relay channel handle, allocated by the side that opens the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to tell channels apart in logs.
        write!(f, "ch-{}", &self.0.simple().to_string()[..8])
    }
}

/// Why the relay refused a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Identity is held by another session.
    IdentityTaken,
    /// Relay is at its peer limit.
    ServerFull,
}

/// Frame exchanged between a relay transport and the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayFrame {
    // ── transport → relay ──────────────────────────────
    /// Bind an identity; `None` asks the relay to assign one.
    Register { peer_id: Option<PeerId> },
    /// Give the identity back; all of its channels close.
    Unregister,
    /// Open a channel to a named peer.
    Connect { channel: ChannelId, target: PeerId },

    // ── relay → transport ──────────────────────────────
    Registered { peer_id: PeerId },
    Rejected { peer_id: Option<PeerId>, reason: RejectReason },
    /// Another peer opened a channel to us.
    Incoming { channel: ChannelId, from: PeerId },
    /// Channel is usable on this side.
    Opened { channel: ChannelId },
    /// Connect target is not registered.
    Unavailable { channel: ChannelId, target: PeerId },

    // ── both directions ────────────────────────────────
    Data { channel: ChannelId, payload: Vec<u8> },
    Close { channel: ChannelId },
}

impl RelayFrame {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    MissingType,
    UnknownType(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::MissingType => write!(f, "Message has no type tag"),
            Self::UnknownType(t) => write!(f, "Unknown message type {t:?}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
