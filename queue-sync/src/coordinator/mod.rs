//! Room coordinator: roles, connection lifecycle and replication routing.
//!
//! One coordinator per application instance. It never awaits: the owner feeds
//! it [`TransportEvent`]s and calls [`RoomCoordinator::handle_timeout`] at
//! [`RoomCoordinator::next_deadline`]. [`SyncSession`](crate::session::SyncSession)
//! does both on a tokio task.
//!
//! The host is authoritative. Clients send actions up and never apply them
//! locally; the host applies, forwards and confirms.
//!
//! ```text
//!   client A                     host                          client B
//!   ────────                     ────                          ────────
//!   send_action ──ACTION──► apply_remote_action
//!                                 ├──────────── ACTION ──────► apply_remote_action
//!   apply_remote_state ◄─STATE_UPDATE─┘
//!
//!   join ──channel open──► push STATE_UPDATE (always the first message)
//!        ◄──STATE_UPDATE──
//!        ───JOIN_ROOM────►
//! ```
//!
//! When the host link of a client drops, the client waits out a grace window
//! (optionally retrying once) and then reports [`DisconnectReason::HostLost`].
//! There is no host election.

mod config;
mod events;
mod offline;

pub use config::CoordinatorConfig;
pub use events::{ConnectionState, CoordinatorError, DisconnectReason, Role, RoomEvent};
pub use offline::OfflineQueue;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::broadcast::{BroadcastStats, ConnectionSet};
use crate::protocol::{Action, Message, ProtocolError};
use crate::provider::StateProvider;
use crate::room::{PeerId, RoomId};
use crate::storage::{KeyValueStore, KEY_PEER_ID, KEY_ROOM_ID};
use crate::transport::{ChannelId, Transport, TransportError, TransportEvent};

/// Client side channel to the host.
#[derive(Debug, Clone)]
struct HostLink {
    channel: ChannelId,
    open: bool,
    last_seen: Instant,
}

/// P2P state replication coordinator.
pub struct RoomCoordinator<T: Transport, S: StateProvider> {
    transport: T,
    provider: S,
    store: Arc<dyn KeyValueStore>,
    config: CoordinatorConfig,

    role: Role,
    state: ConnectionState,
    room_id: Option<RoomId>,
    /// Identity confirmed by the rendezvous service
    local_peer: Option<PeerId>,
    /// Identity asked for in the pending registration (host only)
    requested_identity: Option<PeerId>,
    /// Register requests whose reply hasn't arrived. Replies come back in
    /// request order, so only the reply to the last request is current.
    registrations_in_flight: usize,

    /// Host: open client channels
    connections: ConnectionSet,
    /// Host: announced client channels that are not open yet
    pending_inbound: HashMap<ChannelId, PeerId>,
    /// Client: channel to the host
    host_link: Option<HostLink>,
    offline: OfflineQueue,

    connect_deadline: Option<Instant>,
    grace_deadline: Option<Instant>,
    keepalive_at: Option<Instant>,

    event_tx: mpsc::UnboundedSender<RoomEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<RoomEvent>>,
}

impl<T: Transport, S: StateProvider> RoomCoordinator<T, S> {
    pub fn new(
        transport: T,
        provider: S,
        store: Arc<dyn KeyValueStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let offline = OfflineQueue::new(config.offline_queue_capacity);
        Self {
            transport,
            provider,
            store,
            config,
            role: Role::Unset,
            state: ConnectionState::Disconnected,
            room_id: None,
            local_peer: None,
            requested_identity: None,
            registrations_in_flight: 0,
            connections: ConnectionSet::new(),
            pending_inbound: HashMap::new(),
            host_link: None,
            offline,
            connect_deadline: None,
            grace_deadline: None,
            keepalive_at: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the room event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        self.event_rx.take()
    }

    // ── Room lifecycle ──────────────────────────────────────────────

    /// Host a room under a freshly generated code.
    pub fn create_room(&mut self) -> Result<RoomId, CoordinatorError> {
        self.host(RoomId::generate())
    }

    /// Host a room under a chosen code.
    pub fn create_room_with_id(&mut self, code: &str) -> Result<RoomId, CoordinatorError> {
        let room_id = RoomId::parse(code)?;
        self.host(room_id)
    }

    fn host(&mut self, room_id: RoomId) -> Result<RoomId, CoordinatorError> {
        self.teardown();
        let identity = room_id.host_identity();
        log::info!("Creating room {room_id} as {identity}");

        self.role = Role::Host;
        self.room_id = Some(room_id.clone());
        self.requested_identity = Some(identity.clone());
        self.persist_room_id(&room_id);
        self.begin_registration(Some(identity))?;
        Ok(room_id)
    }

    /// Join the room with the given code.
    ///
    /// The outcome arrives later as [`RoomEvent`]s. Returns the normalized
    /// code, or an error for input that can never name a room.
    pub fn join_room(&mut self, code: &str) -> Result<RoomId, CoordinatorError> {
        let room_id = RoomId::parse(code)?;
        self.teardown();
        log::info!("Joining room {room_id}");

        self.role = Role::Client;
        self.room_id = Some(room_id.clone());
        self.persist_room_id(&room_id);
        self.begin_registration(None)?;
        Ok(room_id)
    }

    /// Join the room code saved by the last create or join.
    pub fn rejoin_last_room(&mut self) -> Result<RoomId, CoordinatorError> {
        let saved = self.saved_room_id().ok_or(CoordinatorError::NoSavedRoom)?;
        self.join_room(saved.as_str())
    }

    /// Leave the room, close every channel and release the identity.
    pub fn disconnect(&mut self) {
        if let Some(room_id) = &self.room_id {
            log::info!("Leaving room {room_id}");
        }
        let was_host = self.role == Role::Host && self.state == ConnectionState::Connected;
        self.teardown();
        if was_host {
            self.emit(RoomEvent::HostChanged {
                is_host: false,
                room_id: None,
            });
        }
    }

    fn begin_registration(&mut self, identity: Option<PeerId>) -> Result<(), CoordinatorError> {
        self.set_state(ConnectionState::Registering);
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
        if let Err(e) = self.transport.register(identity) {
            log::error!("Registration request failed: {e}");
            self.teardown();
            return Err(e.into());
        }
        self.registrations_in_flight += 1;
        Ok(())
    }

    // ── Replication ─────────────────────────────────────────────────

    /// Host: push the full current state to every connected client.
    ///
    /// Returns the number of clients reached; always 0 when not hosting.
    pub fn broadcast_state(&mut self) -> Result<usize, CoordinatorError> {
        if self.role != Role::Host || self.state != ConnectionState::Connected {
            log::debug!("Not hosting, state broadcast skipped");
            return Ok(0);
        }
        let bytes = Message::state_update(self.provider.query_current_state()).encode()?;
        let fan_out = self.connections.broadcast(&mut self.transport, &bytes, None);
        Ok(fan_out.delivered)
    }

    /// Submit a local action.
    ///
    /// - Host: applied locally, then sent to every client.
    /// - Client: sent to the host only (queued while the host channel is
    ///   opening or being re-established). Local state changes once the host
    ///   confirms.
    /// - No room: applied locally.
    ///
    /// Returns the number of channels the action was written to.
    pub fn send_action(&mut self, action: Action) -> Result<usize, CoordinatorError> {
        match self.role {
            Role::Unset => {
                self.provider
                    .apply_remote_action(action)
                    .map_err(|e| CoordinatorError::ActionRejected(e.to_string()))?;
                Ok(0)
            }
            Role::Host => {
                let bytes = Message::action(action.clone()).encode()?;
                self.provider
                    .apply_remote_action(action)
                    .map_err(|e| CoordinatorError::ActionRejected(e.to_string()))?;
                let fan_out = self.connections.broadcast(&mut self.transport, &bytes, None);
                Ok(fan_out.delivered)
            }
            Role::Client => {
                let bytes = Message::action(action).encode()?;
                match self.state {
                    ConnectionState::Connected => {
                        let channel = self
                            .host_link
                            .as_ref()
                            .filter(|link| link.open)
                            .map(|link| link.channel)
                            .ok_or(CoordinatorError::NotConnected)?;
                        self.transport.send(channel, &bytes)?;
                        Ok(1)
                    }
                    ConnectionState::Registering
                    | ConnectionState::Connecting
                    | ConnectionState::Reconnecting => {
                        if !self.offline.push(bytes) {
                            return Err(CoordinatorError::QueueFull);
                        }
                        log::debug!("Queued action ({} waiting)", self.offline.len());
                        Ok(0)
                    }
                    ConnectionState::Disconnected => Err(CoordinatorError::NotConnected),
                }
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Hosting a registered room, or connected to a host.
    pub fn is_in_room(&self) -> bool {
        match self.role {
            Role::Host => self.state == ConnectionState::Connected,
            Role::Client => self.state == ConnectionState::Connected,
            Role::Unset => false,
        }
    }

    pub fn local_peer_id(&self) -> Option<&PeerId> {
        self.local_peer.as_ref()
    }

    /// Host: identities of connected clients.
    pub fn peers(&self) -> Vec<PeerId> {
        self.connections.peers()
    }

    pub fn peer_count(&self) -> usize {
        self.connections.len()
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.connections.stats()
    }

    /// Actions waiting for the host channel.
    pub fn queued_actions(&self) -> usize {
        self.offline.len()
    }

    /// Room code saved by the last create or join, if any.
    pub fn saved_room_id(&self) -> Option<RoomId> {
        let saved = self.store.get(KEY_ROOM_ID)?;
        RoomId::parse(&saved).ok()
    }

    /// Identity last confirmed by the rendezvous service.
    pub fn saved_peer_id(&self) -> Option<PeerId> {
        self.store.get(KEY_PEER_ID).map(PeerId::new)
    }

    pub fn provider(&self) -> &S {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut S {
        &mut self.provider
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.connect_deadline, self.grace_deadline, self.keepalive_at]
            .into_iter()
            .flatten()
            .min()
    }

    // ── Input ───────────────────────────────────────────────────────

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Registered { peer_id } => self.on_registered(peer_id),
            TransportEvent::RegistrationFailed { error } => self.on_registration_failed(error),
            TransportEvent::IncomingChannel { channel, peer_id } => {
                self.on_incoming(channel, peer_id)
            }
            TransportEvent::ChannelOpen { channel } => self.on_channel_open(channel),
            TransportEvent::Data { channel, payload } => self.on_data(channel, payload),
            TransportEvent::ChannelClosed { channel } => self.on_channel_down(channel, None),
            TransportEvent::ChannelError { channel, error } => {
                self.on_channel_down(channel, Some(error))
            }
            TransportEvent::PeerUnavailable { channel, peer_id } => {
                self.on_peer_unavailable(channel, peer_id)
            }
            TransportEvent::Lost { error } => self.on_transport_lost(error),
        }
    }

    /// Fire every timer whose deadline has passed.
    pub fn handle_timeout(&mut self) {
        let now = Instant::now();

        if self.connect_deadline.is_some_and(|d| d <= now) {
            self.connect_deadline = None;
            if matches!(
                self.state,
                ConnectionState::Registering | ConnectionState::Connecting
            ) {
                log::warn!(
                    "Connection attempt timed out after {:?}",
                    self.config.connect_timeout
                );
                self.abort(DisconnectReason::ConnectionTimeout);
            }
        }

        if self.grace_deadline.is_some_and(|d| d <= now) {
            self.grace_deadline = None;
            if self.state == ConnectionState::Reconnecting {
                log::warn!(
                    "Host did not return within {:?}",
                    self.config.grace_period
                );
                self.abort(DisconnectReason::HostLost);
            }
        }

        if self.keepalive_at.is_some_and(|d| d <= now) {
            self.keepalive_at = None;
            self.keepalive(now);
        }
    }

    /// Account for one registration reply; false if it answers a superseded request.
    fn registration_reply_is_current(&mut self) -> bool {
        self.registrations_in_flight = self.registrations_in_flight.saturating_sub(1);
        self.registrations_in_flight == 0
    }

    fn on_registered(&mut self, peer_id: PeerId) {
        if !self.registration_reply_is_current() {
            log::debug!("Ignoring registration of {peer_id} from an earlier attempt");
            return;
        }
        if self.state != ConnectionState::Registering {
            log::debug!("Ignoring stale registration of {peer_id}");
            return;
        }
        if self
            .requested_identity
            .as_ref()
            .is_some_and(|wanted| *wanted != peer_id)
        {
            log::debug!("Ignoring registration of unexpected identity {peer_id}");
            return;
        }

        log::info!("Registered as {peer_id}");
        if let Err(e) = self.store.set(KEY_PEER_ID, peer_id.as_str()) {
            log::warn!("Failed to save peer id: {e}");
        }
        self.local_peer = Some(peer_id);

        match self.role {
            Role::Host => {
                self.connect_deadline = None;
                self.set_state(ConnectionState::Connected);
                self.schedule_keepalive();
                self.emit(RoomEvent::HostChanged {
                    is_host: true,
                    room_id: self.room_id.clone(),
                });
            }
            Role::Client => match self.open_host_link() {
                Ok(()) => self.set_state(ConnectionState::Connecting),
                Err(e) => self.abort(DisconnectReason::TransportError(e)),
            },
            Role::Unset => {}
        }
    }

    fn on_registration_failed(&mut self, error: TransportError) {
        if !self.registration_reply_is_current() {
            log::debug!("Ignoring registration failure from an earlier attempt: {error}");
            return;
        }
        if self.state != ConnectionState::Registering {
            log::debug!("Ignoring stale registration failure: {error}");
            return;
        }
        let reason = match self.room_id.clone() {
            Some(room_id)
                if self.role == Role::Host
                    && matches!(error, TransportError::IdentityTaken(_)) =>
            {
                DisconnectReason::RoomNameTaken(room_id)
            }
            _ => DisconnectReason::TransportError(error),
        };
        self.abort(reason);
    }

    fn on_incoming(&mut self, channel: ChannelId, peer_id: PeerId) {
        if self.role != Role::Host || self.state != ConnectionState::Connected {
            log::warn!("Refusing channel {channel} from {peer_id}: not hosting");
            self.transport.close(channel);
            return;
        }
        log::debug!("Incoming channel {channel} from {peer_id}");
        self.pending_inbound.insert(channel, peer_id);
    }

    fn on_channel_open(&mut self, channel: ChannelId) {
        if let Some(peer_id) = self.pending_inbound.remove(&channel) {
            if let Some(previous) = self.connections.insert(peer_id.clone(), channel) {
                log::debug!("{peer_id} replaced channel {previous}");
                self.transport.close(previous);
            }
            // Snapshot goes out before anything else on this channel.
            self.push_state(channel);
            log::info!("{peer_id} joined ({} connected)", self.connections.len());
            self.emit(RoomEvent::PeerJoined(peer_id));
            return;
        }

        let Some(link) = self
            .host_link
            .as_mut()
            .filter(|link| link.channel == channel && !link.open)
        else {
            log::debug!("Open on unknown channel {channel}");
            return;
        };
        link.open = true;
        link.last_seen = Instant::now();

        self.connect_deadline = None;
        self.grace_deadline = None;
        if self.state == ConnectionState::Reconnecting {
            log::info!("Reconnected to host on {channel}");
        } else {
            log::info!("Connected to host on {channel}");
        }
        self.set_state(ConnectionState::Connected);

        if let Some(peer_id) = self.local_peer.clone() {
            self.send_on(channel, &Message::join_room(peer_id));
        }
        for payload in self.offline.take_all() {
            if let Err(e) = self.transport.send(channel, &payload) {
                log::warn!("Failed to replay queued action: {e}");
            }
        }
        self.schedule_keepalive();
    }

    fn on_data(&mut self, channel: ChannelId, payload: Vec<u8>) {
        let from_client = self.connections.contains_channel(&channel);
        if from_client {
            self.connections.touch(&channel);
        } else if let Some(link) = self
            .host_link
            .as_mut()
            .filter(|link| link.channel == channel && link.open)
        {
            link.last_seen = Instant::now();
        } else {
            log::debug!("Dropping {} bytes on unknown channel {channel}", payload.len());
            return;
        }

        let message = match Message::decode(&payload) {
            Ok(message) => message,
            Err(ProtocolError::UnknownType(kind)) => {
                log::debug!("Ignoring message of unknown type {kind:?} on {channel}");
                return;
            }
            Err(e) => {
                log::warn!("Malformed message on {channel}: {e}");
                return;
            }
        };

        match message {
            Message::Ping => {}
            Message::JoinRoom { peer_id } => {
                log::debug!("{peer_id} announced itself on {channel}");
            }
            Message::StateUpdate { data } => {
                if from_client {
                    log::warn!("Ignoring state snapshot from client channel {channel}");
                    return;
                }
                if let Err(e) = self.provider.apply_remote_state(data) {
                    log::warn!("Failed to apply host state: {e}");
                }
            }
            Message::Action { action } => {
                let applied = self.provider.apply_remote_action(action);
                if !from_client {
                    if let Err(e) = applied {
                        log::warn!("Failed to apply host action: {e}");
                    }
                    return;
                }
                match applied {
                    Ok(()) => {
                        let fan_out =
                            self.connections
                                .broadcast(&mut self.transport, &payload, Some(channel));
                        if let Some(origin) = self.connections.peer_for(&channel) {
                            log::debug!(
                                "Forwarded action from {origin} to {} peers",
                                fan_out.delivered
                            );
                        }
                        self.push_state(channel);
                    }
                    Err(e) => log::warn!("Rejected action from {channel}: {e}"),
                }
            }
        }
    }

    fn on_channel_down(&mut self, channel: ChannelId, error: Option<TransportError>) {
        if let Some(e) = &error {
            log::debug!("Channel {channel} failed: {e}");
        }
        if let Some(peer_id) = self.pending_inbound.remove(&channel) {
            log::debug!("Pending channel from {peer_id} closed before opening");
            return;
        }
        if let Some(peer_id) = self.connections.remove_channel(&channel) {
            log::info!("{peer_id} left ({} connected)", self.connections.len());
            self.emit(RoomEvent::PeerLeft(peer_id));
            return;
        }
        if !self
            .host_link
            .as_ref()
            .is_some_and(|link| link.channel == channel)
        {
            log::debug!("Close on unknown channel {channel}");
            return;
        }

        self.host_link = None;
        match self.state {
            ConnectionState::Connected => self.enter_reconnecting(),
            ConnectionState::Connecting => {
                let error = error.unwrap_or(TransportError::ChannelClosed(channel));
                self.abort(DisconnectReason::TransportError(error));
            }
            _ => log::debug!("Reconnect attempt on {channel} failed, waiting out grace window"),
        }
    }

    fn on_peer_unavailable(&mut self, channel: ChannelId, peer_id: PeerId) {
        if !self
            .host_link
            .as_ref()
            .is_some_and(|link| link.channel == channel)
        {
            log::debug!("Ignoring unavailability of {peer_id} on {channel}");
            return;
        }
        self.host_link = None;

        if self.state == ConnectionState::Connecting {
            match self.room_id.clone() {
                Some(room_id) => self.abort(DisconnectReason::RoomNotFound(room_id)),
                None => self.abort(DisconnectReason::ConnectionTimeout),
            }
        } else {
            log::debug!("{peer_id} still unreachable");
        }
    }

    fn on_transport_lost(&mut self, error: TransportError) {
        // Outstanding requests died with the link.
        self.registrations_in_flight = 0;
        if self.role == Role::Unset {
            log::debug!("Transport lost while idle: {error}");
            return;
        }
        log::error!("Rendezvous link lost: {error}");
        self.local_peer = None;
        self.abort(DisconnectReason::TransportError(error));
    }

    // ── Internals ───────────────────────────────────────────────────

    fn open_host_link(&mut self) -> Result<(), TransportError> {
        let room_id = self.room_id.as_ref().ok_or(TransportError::NotRegistered)?;
        let host = room_id.host_identity();
        let channel = self.transport.connect(&host)?;
        log::debug!("Opening {channel} to {host}");
        self.host_link = Some(HostLink {
            channel,
            open: false,
            last_seen: Instant::now(),
        });
        Ok(())
    }

    fn enter_reconnecting(&mut self) {
        log::warn!(
            "Lost connection to host, waiting {:?} for it to return",
            self.config.grace_period
        );
        self.keepalive_at = None;
        self.grace_deadline = Some(Instant::now() + self.config.grace_period);
        self.set_state(ConnectionState::Reconnecting);

        if self.config.reconnect_during_grace {
            if let Err(e) = self.open_host_link() {
                log::warn!("Reconnect attempt failed: {e}");
            }
        }
    }

    fn keepalive(&mut self, now: Instant) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let ping = match Message::Ping.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Cannot encode ping: {e}");
                return;
            }
        };

        match self.role {
            Role::Host => {
                let cutoff = self
                    .config
                    .idle_timeout
                    .and_then(|idle| now.checked_sub(idle));
                if let Some(cutoff) = cutoff {
                    for channel in self.connections.idle_since(cutoff) {
                        self.transport.close(channel);
                        if let Some(peer_id) = self.connections.remove_channel(&channel) {
                            log::warn!("Dropping silent peer {peer_id}");
                            self.emit(RoomEvent::PeerLeft(peer_id));
                        }
                    }
                }
                self.connections.broadcast(&mut self.transport, &ping, None);
            }
            Role::Client => {
                let Some(link) = self.host_link.clone() else { return };
                let silent = self
                    .config
                    .idle_timeout
                    .is_some_and(|idle| now.saturating_duration_since(link.last_seen) >= idle);
                if silent {
                    log::warn!("Host silent on {}", link.channel);
                    self.transport.close(link.channel);
                    self.host_link = None;
                    self.enter_reconnecting();
                    return;
                }
                if let Err(e) = self.transport.send(link.channel, &ping) {
                    log::warn!("Ping to host failed: {e}");
                }
            }
            Role::Unset => return,
        }
        self.schedule_keepalive();
    }

    fn schedule_keepalive(&mut self) {
        self.keepalive_at = Some(Instant::now() + self.config.keepalive_interval);
    }

    /// Send the full current state on one channel.
    fn push_state(&mut self, channel: ChannelId) {
        let message = Message::state_update(self.provider.query_current_state());
        self.send_on(channel, &message);
    }

    fn send_on(&mut self, channel: ChannelId, message: &Message) {
        let result = message
            .encode()
            .map_err(|e| e.to_string())
            .and_then(|bytes| self.transport.send(channel, &bytes).map_err(|e| e.to_string()));
        if let Err(e) = result {
            log::warn!("Failed to send {} on {channel}: {e}", message.type_name());
        }
    }

    /// End the current attempt or session.
    ///
    /// A host gives up its identity and returns to no role. A client keeps its
    /// role and room code so the owner can rejoin.
    fn abort(&mut self, reason: DisconnectReason) {
        log::warn!("Room session ended: {reason}");
        match self.role {
            Role::Host => {
                let was_hosting = self.state == ConnectionState::Connected;
                self.teardown();
                if was_hosting {
                    self.emit(RoomEvent::HostChanged {
                        is_host: false,
                        room_id: None,
                    });
                }
            }
            Role::Client | Role::Unset => {
                self.drop_host_link();
                self.connect_deadline = None;
                self.grace_deadline = None;
                self.keepalive_at = None;
                self.offline.clear();
                self.set_state(ConnectionState::Disconnected);
            }
        }
        self.emit(RoomEvent::Disconnected(reason));
    }

    /// Close everything and return to no role.
    fn teardown(&mut self) {
        for channel in self.connections.drain() {
            self.transport.close(channel);
        }
        for (channel, _) in self.pending_inbound.drain() {
            self.transport.close(channel);
        }
        self.drop_host_link();
        self.connect_deadline = None;
        self.grace_deadline = None;
        self.keepalive_at = None;
        self.offline.clear();

        if self.role != Role::Unset {
            self.transport.release();
        }
        if let Err(e) = self.store.remove(KEY_ROOM_ID) {
            log::warn!("Failed to clear saved room: {e}");
        }
        self.role = Role::Unset;
        self.room_id = None;
        self.local_peer = None;
        self.requested_identity = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn drop_host_link(&mut self) {
        if let Some(link) = self.host_link.take() {
            self.transport.close(link.channel);
        }
    }

    fn persist_room_id(&self, room_id: &RoomId) {
        if let Err(e) = self.store.set(KEY_ROOM_ID, room_id.as_str()) {
            log::warn!("Failed to save room {room_id}: {e}");
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::debug!("Connection state {:?} -> {state:?}", self.state);
            self.state = state;
            self.emit(RoomEvent::Connection(state));
        }
    }

    fn emit(&self, event: RoomEvent) {
        // Owner may have dropped the receiver.
        let _ = self.event_tx.send(event);
    }
}
