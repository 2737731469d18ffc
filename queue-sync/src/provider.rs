//! Contract between the coordinator and the application state it replicates.

use crate::protocol::{Action, ReplicatedState};

/// Error type providers report back; the coordinator only logs it.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Owner of the replicated application state.
///
/// The coordinator never inspects state or actions. It asks for the current
/// state when a client joins a room it hosts and hands over whatever arrives
/// from the network.
pub trait StateProvider {
    /// Full current state, pushed to each newly joined client.
    fn query_current_state(&self) -> ReplicatedState;

    /// Replace local state with an authoritative snapshot.
    fn apply_remote_state(&mut self, state: ReplicatedState) -> Result<(), ProviderError>;

    /// Apply one action. Called for remote actions on every role and for the
    /// host's own actions before they are broadcast.
    fn apply_remote_action(&mut self, action: Action) -> Result<(), ProviderError>;
}

impl<P: StateProvider + ?Sized> StateProvider for Box<P> {
    fn query_current_state(&self) -> ReplicatedState {
        (**self).query_current_state()
    }

    fn apply_remote_state(&mut self, state: ReplicatedState) -> Result<(), ProviderError> {
        (**self).apply_remote_state(state)
    }

    fn apply_remote_action(&mut self, action: Action) -> Result<(), ProviderError> {
        (**self).apply_remote_action(action)
    }
}
