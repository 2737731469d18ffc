//! # queue-sync — Peer-to-peer state replication for walk-up queue rooms
//!
//! One instance hosts a room under a short code; others join with the code.
//! The host owns the authoritative state and fans every accepted change out
//! to its clients. There is no server-side state: a rendezvous service only
//! binds identities and carries channels between them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   StateProvider   ┌─────────────────┐
//! │ QueueBoard      │ ◄───────────────► │ RoomCoordinator │
//! │ (app state)     │                   │ (roles, routing)│
//! └─────────────────┘                   └────────┬────────┘
//!                                                │ Transport
//!                                 ┌──────────────┴──────────────┐
//!                                 ▼                             ▼
//!                        ┌─────────────────┐          ┌─────────────────┐
//!                        │ MemoryTransport │          │ WsTransport     │
//!                        │ (in-process)    │          │ (WebSocket)     │
//!                        └─────────────────┘          └────────┬────────┘
//!                                                              │
//!                                                     ┌────────┴────────┐
//!                                                     │ RelayServer     │
//!                                                     │ (rendezvous)    │
//!                                                     └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`room`] — Room codes and peer identities
//! - [`protocol`] — JSON room messages and the bincode relay framing
//! - [`transport`] — Transport contract and events
//! - [`provider`] — What the coordinator needs from application state
//! - [`coordinator`] — Room lifecycle, host-authoritative routing, failover
//! - [`session`] — Async driver for a coordinator
//! - [`broadcast`] — Host-side fan-out to client channels
//! - [`board`] — Queue board state provider
//! - [`storage`] — Key-value persistence
//! - [`memory`] — In-process transport for tests and demos
//! - [`server`] / [`client`] — WebSocket relay and its transport

pub mod room;
pub mod protocol;
pub mod transport;
pub mod provider;
pub mod broadcast;
pub mod coordinator;
pub mod session;
pub mod board;
pub mod storage;
pub mod memory;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use room::{PeerId, RoomId, RoomIdError};
pub use protocol::{Action, Message, ProtocolError, RelayFrame, ReplicatedState};
pub use transport::{ChannelId, Transport, TransportError, TransportEvent};
pub use provider::{ProviderError, StateProvider};
pub use broadcast::{BroadcastStats, ConnectionSet};
pub use coordinator::{
    ConnectionState, CoordinatorConfig, CoordinatorError, DisconnectReason, Role,
    RoomCoordinator, RoomEvent,
};
pub use session::SyncSession;
pub use board::{BoardError, QueueAction, QueueBoard, QueueState, Ticket};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use client::WsTransport;
