//! Walk-up queue board: the replicated state of a queue room.
//!
//! Players take numbered tickets, the operator calls the next ticket into the
//! team (at most [`TEAM_CAPACITY`] players) or adds a player to the team
//! directly. Every change is a [`QueueAction`] so it can travel through the
//! coordinator as an `ACTION` message and be applied identically everywhere.
//!
//! ```text
//!   enqueue ──► queue: [#3 ana] [#4 bo] [#5 cy]
//!                        │ callNext
//!                        ▼
//!               team:  [#1 di] [#2 ed] [#3 ana] [  ]   now serving: 3
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::{Action, ReplicatedState};
use crate::provider::{ProviderError, StateProvider};
use crate::storage::{KeyValueStore, StoreError};

/// Players per team.
pub const TEAM_CAPACITY: usize = 4;

/// Store key of the board snapshot.
pub const KEY_BOARD: &str = "queue-sync.board";

/// A numbered ticket. Players added to the team directly carry id 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: u64,
    pub name: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// Full board state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub queue: Vec<Ticket>,
    pub team: Vec<Ticket>,
    /// Id the next enqueued ticket gets
    pub current_ticket: u64,
    /// Id of the last called ticket, 0 before the first call
    pub last_called_ticket: u64,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            team: Vec::new(),
            current_ticket: 1,
            last_called_ticket: 0,
        }
    }
}

impl QueueState {
    /// Apply one action. State is untouched when the action is refused.
    pub fn apply(&mut self, action: &QueueAction) -> Result<(), BoardError> {
        match action {
            QueueAction::Enqueue { name, timestamp } => {
                let name = clean_name(name)?;
                self.queue.push(Ticket {
                    id: self.current_ticket,
                    name,
                    timestamp: *timestamp,
                });
                self.current_ticket += 1;
            }
            QueueAction::AddToTeam { name, timestamp } => {
                let name = clean_name(name)?;
                if self.team_is_full() {
                    return Err(BoardError::TeamFull);
                }
                self.team.push(Ticket {
                    id: 0,
                    name,
                    timestamp: *timestamp,
                });
            }
            QueueAction::CallNext => {
                if self.queue.is_empty() {
                    return Err(BoardError::QueueEmpty);
                }
                if self.team_is_full() {
                    return Err(BoardError::TeamFull);
                }
                let next = self.queue.remove(0);
                self.last_called_ticket = next.id;
                self.team.push(next);
            }
            QueueAction::RemoveFromTeam { index } => {
                if *index >= self.team.len() {
                    return Err(BoardError::NoSuchMember(*index));
                }
                self.team.remove(*index);
            }
            QueueAction::ResetQueue => self.queue.clear(),
            QueueAction::ResetAll => *self = Self::default(),
        }
        Ok(())
    }

    pub fn team_is_full(&self) -> bool {
        self.team.len() >= TEAM_CAPACITY
    }

    /// Ticket currently being served.
    pub fn now_serving(&self) -> Option<u64> {
        (self.last_called_ticket != 0).then_some(self.last_called_ticket)
    }
}

fn clean_name(name: &str) -> Result<String, BoardError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BoardError::EmptyName);
    }
    Ok(trimmed.to_string())
}

/// A change to the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum QueueAction {
    Enqueue { name: String, timestamp: u64 },
    AddToTeam { name: String, timestamp: u64 },
    CallNext,
    RemoveFromTeam { index: usize },
    ResetQueue,
    ResetAll,
}

impl QueueAction {
    /// Enqueue stamped with the current time.
    pub fn enqueue(name: impl Into<String>) -> Self {
        Self::Enqueue {
            name: name.into(),
            timestamp: now_millis(),
        }
    }

    /// Direct team add stamped with the current time.
    pub fn add_to_team(name: impl Into<String>) -> Self {
        Self::AddToTeam {
            name: name.into(),
            timestamp: now_millis(),
        }
    }

    /// Encode as an opaque coordinator action.
    pub fn to_action(&self) -> Result<Action, BoardError> {
        serde_json::to_value(self).map_err(|e| BoardError::InvalidAction(e.to_string()))
    }

    pub fn from_action(action: Action) -> Result<Self, BoardError> {
        serde_json::from_value(action).map_err(|e| BoardError::InvalidAction(e.to_string()))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Board errors.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardError {
    EmptyName,
    TeamFull,
    QueueEmpty,
    NoSuchMember(usize),
    InvalidAction(String),
    InvalidState(String),
    Store(StoreError),
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "Player name is empty"),
            Self::TeamFull => write!(f, "Team is full"),
            Self::QueueEmpty => write!(f, "Queue is empty"),
            Self::NoSuchMember(i) => write!(f, "No team member at position {i}"),
            Self::InvalidAction(e) => write!(f, "Invalid queue action: {e}"),
            Self::InvalidState(e) => write!(f, "Invalid queue state: {e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BoardError {}

impl From<StoreError> for BoardError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Queue board backed by an optional store.
///
/// Every applied change (local or remote) rewrites the snapshot under
/// [`KEY_BOARD`], so a restarted host comes back with its queue.
pub struct QueueBoard {
    state: QueueState,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl QueueBoard {
    /// Board that lives in memory only.
    pub fn new() -> Self {
        Self {
            state: QueueState::default(),
            store: None,
        }
    }

    /// Board restored from `store`, empty when nothing was saved.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, BoardError> {
        let state: QueueState = match store.get(KEY_BOARD) {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| BoardError::InvalidState(e.to_string()))?,
            None => QueueState::default(),
        };
        log::debug!(
            "Loaded board: {} queued, {} in team",
            state.queue.len(),
            state.team.len()
        );
        Ok(Self {
            state,
            store: Some(store),
        })
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    /// Apply and persist one action.
    pub fn apply(&mut self, action: &QueueAction) -> Result<(), BoardError> {
        self.state.apply(action)?;
        self.persist();
        Ok(())
    }

    fn persist(&self) {
        let Some(store) = &self.store else { return };
        let result = serde_json::to_string(&self.state)
            .map_err(|e| StoreError::SerializationError(e.to_string()))
            .and_then(|json| store.set(KEY_BOARD, &json));
        if let Err(e) = result {
            log::warn!("Failed to save board: {e}");
        }
    }
}

impl Default for QueueBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StateProvider for QueueBoard {
    fn query_current_state(&self) -> ReplicatedState {
        serde_json::to_value(&self.state).unwrap_or_else(|e| {
            log::error!("Cannot encode board state: {e}");
            ReplicatedState::Null
        })
    }

    fn apply_remote_state(&mut self, state: ReplicatedState) -> Result<(), ProviderError> {
        self.state = serde_json::from_value(state)?;
        self.persist();
        Ok(())
    }

    fn apply_remote_action(&mut self, action: Action) -> Result<(), ProviderError> {
        let action = QueueAction::from_action(action)?;
        self.apply(&action)?;
        Ok(())
    }
}
