//! In-process rendezvous service and transport.
//!
//! [`MemoryNetwork`] plays the role of the rendezvous service: it maps
//! identities to endpoints, rejects duplicate registrations and wires channels
//! between endpoints. Each [`MemoryTransport`] is one endpoint. Delivery is
//! through per-endpoint unbounded channels, so per-channel order is preserved
//! and nothing blocks.
//!
//! Fault injection for tests and demos:
//! - [`MemoryNetwork::sever_peer`] drops every channel of a peer but leaves its
//!   identity registered (a zombie host).
//! - [`MemoryNetwork::evict_peer`] also unbinds the identity and tells the
//!   peer its rendezvous link is gone.
//! - [`MemoryNetwork::stall_connections`] makes new channels hang forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::room::PeerId;
use crate::transport::{ChannelId, Transport, TransportError, TransportEvent};

type EndpointKey = u64;

struct Endpoint {
    peer_id: Option<PeerId>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

struct MemoryChannel {
    opener: EndpointKey,
    acceptor: EndpointKey,
    open: bool,
}

impl MemoryChannel {
    fn other_end(&self, key: EndpointKey) -> Option<EndpointKey> {
        if key == self.opener {
            Some(self.acceptor)
        } else if key == self.acceptor {
            Some(self.opener)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct NetworkInner {
    endpoints: HashMap<EndpointKey, Endpoint>,
    identities: HashMap<PeerId, EndpointKey>,
    channels: HashMap<ChannelId, MemoryChannel>,
    next_endpoint: EndpointKey,
    stalled: bool,
    frames_delivered: u64,
}

impl NetworkInner {
    fn emit(&self, key: EndpointKey, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get(&key) {
            // Receiver dropped means the endpoint stopped listening.
            let _ = endpoint.events.send(event);
        }
    }

    /// Remove every channel touching `key`, notifying the far ends.
    fn drop_channels_of(&mut self, key: EndpointKey) -> usize {
        let doomed: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, ch)| ch.opener == key || ch.acceptor == key)
            .map(|(id, _)| *id)
            .collect();
        for channel in &doomed {
            if let Some(ch) = self.channels.remove(channel) {
                if let Some(other) = ch.other_end(key) {
                    if ch.open || other == ch.opener {
                        self.emit(other, TransportEvent::ChannelClosed { channel: *channel });
                    }
                }
            }
        }
        doomed.len()
    }

    fn unbind(&mut self, key: EndpointKey) {
        if let Some(endpoint) = self.endpoints.get_mut(&key) {
            if let Some(peer_id) = endpoint.peer_id.take() {
                self.identities.remove(&peer_id);
            }
        }
    }
}

/// Shared in-process rendezvous service.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, NetworkInner>, TransportError> {
        self.inner
            .lock()
            .map_err(|_| TransportError::Io("memory network lock poisoned".into()))
    }

    /// Create a new, unregistered endpoint on this network.
    pub fn transport(&self) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = match self.lock() {
            Ok(mut inner) => {
                let key = inner.next_endpoint;
                inner.next_endpoint += 1;
                inner.endpoints.insert(key, Endpoint { peer_id: None, events: tx });
                key
            }
            Err(e) => {
                log::error!("Cannot add memory endpoint: {e}");
                EndpointKey::MAX
            }
        };
        MemoryTransport {
            network: self.clone(),
            key,
            event_rx: Some(rx),
        }
    }

    /// Whether `peer_id` is currently bound.
    pub fn is_registered(&self, peer_id: &PeerId) -> bool {
        self.lock()
            .map(|inner| inner.identities.contains_key(peer_id))
            .unwrap_or(false)
    }

    /// Number of live channels (open or pending).
    pub fn channel_count(&self) -> usize {
        self.lock().map(|inner| inner.channels.len()).unwrap_or(0)
    }

    /// Total data frames delivered so far.
    pub fn frames_delivered(&self) -> u64 {
        self.lock().map(|inner| inner.frames_delivered).unwrap_or(0)
    }

    /// Drop every channel of `peer_id`, keeping its identity bound.
    ///
    /// Returns the number of channels dropped.
    pub fn sever_peer(&self, peer_id: &PeerId) -> usize {
        let Ok(mut inner) = self.lock() else { return 0 };
        let Some(key) = inner.identities.get(peer_id).copied() else { return 0 };
        let dropped = inner.drop_channels_of(key);
        log::info!("Severed {dropped} channels of {peer_id}");
        dropped
    }

    /// Remove `peer_id` from the network entirely.
    pub fn evict_peer(&self, peer_id: &PeerId) -> bool {
        let Ok(mut inner) = self.lock() else { return false };
        let Some(key) = inner.identities.get(peer_id).copied() else { return false };
        inner.drop_channels_of(key);
        inner.unbind(key);
        inner.emit(
            key,
            TransportEvent::Lost {
                error: TransportError::ConnectionLost("evicted from rendezvous".into()),
            },
        );
        log::info!("Evicted {peer_id}");
        true
    }

    /// While stalled, new channels are accepted but never open.
    pub fn stall_connections(&self, stalled: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.stalled = stalled;
        }
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    key: EndpointKey,
    event_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl MemoryTransport {
    /// Identity currently bound to this endpoint.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.network
            .lock()
            .ok()
            .and_then(|inner| inner.endpoints.get(&self.key).and_then(|e| e.peer_id.clone()))
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.event_rx.take()
    }

    fn register(&mut self, peer_id: Option<PeerId>) -> Result<(), TransportError> {
        let mut inner = self.network.lock()?;
        let wanted = peer_id.unwrap_or_else(PeerId::anonymous);

        if let Some(holder) = inner.identities.get(&wanted).copied() {
            if holder != self.key {
                inner.emit(
                    self.key,
                    TransportEvent::RegistrationFailed {
                        error: TransportError::IdentityTaken(wanted),
                    },
                );
                return Ok(());
            }
        }

        inner.unbind(self.key);
        inner.identities.insert(wanted.clone(), self.key);
        if let Some(endpoint) = inner.endpoints.get_mut(&self.key) {
            endpoint.peer_id = Some(wanted.clone());
        }
        inner.emit(self.key, TransportEvent::Registered { peer_id: wanted });
        Ok(())
    }

    fn connect(&mut self, target: &PeerId) -> Result<ChannelId, TransportError> {
        let mut inner = self.network.lock()?;
        let from = inner
            .endpoints
            .get(&self.key)
            .and_then(|e| e.peer_id.clone())
            .ok_or(TransportError::NotRegistered)?;
        let channel = ChannelId::new();

        let Some(acceptor) = inner.identities.get(target).copied() else {
            inner.emit(
                self.key,
                TransportEvent::PeerUnavailable { channel, peer_id: target.clone() },
            );
            return Ok(channel);
        };

        let open = !inner.stalled;
        inner.channels.insert(channel, MemoryChannel { opener: self.key, acceptor, open });
        if open {
            inner.emit(acceptor, TransportEvent::IncomingChannel { channel, peer_id: from });
            inner.emit(acceptor, TransportEvent::ChannelOpen { channel });
            inner.emit(self.key, TransportEvent::ChannelOpen { channel });
        }
        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, payload: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.network.lock()?;
        let other = inner
            .channels
            .get(&channel)
            .filter(|ch| ch.open)
            .and_then(|ch| ch.other_end(self.key))
            .ok_or(TransportError::ChannelClosed(channel))?;
        inner.emit(other, TransportEvent::Data { channel, payload: payload.to_vec() });
        inner.frames_delivered += 1;
        Ok(())
    }

    fn close(&mut self, channel: ChannelId) {
        let Ok(mut inner) = self.network.lock() else { return };
        let is_ours = inner
            .channels
            .get(&channel)
            .is_some_and(|ch| ch.other_end(self.key).is_some());
        if !is_ours {
            return;
        }
        if let Some(ch) = inner.channels.remove(&channel) {
            if ch.open {
                if let Some(other) = ch.other_end(self.key) {
                    inner.emit(other, TransportEvent::ChannelClosed { channel });
                }
            }
        }
    }

    fn release(&mut self) {
        let Ok(mut inner) = self.network.lock() else { return };
        inner.drop_channels_of(self.key);
        inner.unbind(self.key);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.release();
        if let Ok(mut inner) = self.network.lock() {
            inner.endpoints.remove(&self.key);
        }
    }
}
