//! Local key-value persistence.
//!
//! The coordinator keeps the last room code and the last local peer identity
//! here, so the user can rejoin by hand after a restart. The queue board
//! stores its snapshot in the same kind of store.
//!
//! ```text
//! ┌──────────────────┐   get/set/remove   ┌──────────────────────────┐
//! │ RoomCoordinator  │ ─────────────────► │ dyn KeyValueStore        │
//! │ QueueBoard       │                    │  ├─ MemoryStore (HashMap)│
//! └──────────────────┘                    │  └─ FileStore (JSON file)│
//!                                         └──────────────────────────┘
//! ```
//!
//! Handles are cheap to clone and share one underlying map.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Persisted key: last room code (normalized).
pub const KEY_ROOM_ID: &str = "queue-sync.roomId";
/// Persisted key: last local peer identity.
pub const KEY_PEER_ID: &str = "queue-sync.peerId";

/// String-keyed, string-valued persistent map.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    IoError(String),
    SerializationError(String),
    DeserializationError(String),
    LockPoisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "I/O error: {e}"),
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::LockPoisoned => write!(f, "Store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}
