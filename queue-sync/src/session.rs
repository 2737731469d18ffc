//! Async driver for a [`RoomCoordinator`].
//!
//! Owns the transport's event receiver and feeds the coordinator from one
//! task: transport events as they arrive, timers when their deadline passes.
//!
//! ```text
//!  Transport ──TransportEvent──┐
//!                              ├──► select! ──► RoomCoordinator ──► RoomEvent
//!  next_deadline ──sleep_until─┘
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::coordinator::{CoordinatorConfig, CoordinatorError, RoomCoordinator, RoomEvent};
use crate::provider::StateProvider;
use crate::storage::KeyValueStore;
use crate::transport::{Transport, TransportEvent};

/// A coordinator together with the transport events that drive it.
pub struct SyncSession<T: Transport, S: StateProvider> {
    coordinator: RoomCoordinator<T, S>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl<T: Transport, S: StateProvider> SyncSession<T, S> {
    pub fn new(
        mut transport: T,
        provider: S,
        store: Arc<dyn KeyValueStore>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        let transport_rx = transport
            .take_event_rx()
            .ok_or(CoordinatorError::EventsTaken)?;
        Ok(Self {
            coordinator: RoomCoordinator::new(transport, provider, store, config),
            transport_rx,
        })
    }

    pub fn coordinator(&self) -> &RoomCoordinator<T, S> {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut RoomCoordinator<T, S> {
        &mut self.coordinator
    }

    /// Take the room event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        self.coordinator.take_event_rx()
    }

    /// Handle every transport event already queued, then fire due timers.
    ///
    /// Returns the number of transport events handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.transport_rx.try_recv() {
            self.coordinator.handle_transport_event(event);
            handled += 1;
        }
        self.coordinator.handle_timeout();
        handled
    }

    /// Wait for the next transport event or timer and handle it.
    ///
    /// Returns false once the transport has shut down.
    pub async fn step(&mut self) -> bool {
        let deadline = self.coordinator.next_deadline();
        let event = tokio::select! {
            event = self.transport_rx.recv() => Some(event),
            _ = sleep_until(deadline) => None,
        };
        match event {
            Some(Some(event)) => {
                self.coordinator.handle_transport_event(event);
                true
            }
            Some(None) => false,
            None => {
                self.coordinator.handle_timeout();
                true
            }
        }
    }

    /// Drive the coordinator until the transport shuts down.
    pub async fn run(&mut self) {
        while self.step().await {}
        log::info!("Transport closed, session stopped");
    }

    pub fn into_coordinator(self) -> RoomCoordinator<T, S> {
        self.coordinator
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
