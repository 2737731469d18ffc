//! Host-side fan-out to the open client channels of a room.
//!
//! A [`ConnectionSet`] holds at most one channel per peer. Sends are
//! best-effort: a failure on one channel is counted and logged, and the
//! remaining channels still get the payload. Each payload is encoded once by
//! the caller and handed to every channel as the same bytes.
//!
//! ```text
//!             ┌──► ch-1 (peer A)   skipped when A is the origin
//!  payload ───┼──► ch-2 (peer B)
//!             └──► ch-3 (peer C)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use crate::room::PeerId;
use crate::transport::{ChannelId, Transport};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
struct Member {
    channel: ChannelId,
    last_seen: Instant,
}

/// Open channels to client peers, keyed by peer identity.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    members: HashMap<PeerId, Member>,
    by_channel: HashMap<ChannelId, PeerId>,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer's channel.
    ///
    /// A peer has at most one channel: if it already had one, that channel is
    /// returned so the caller can close it.
    pub fn insert(&mut self, peer_id: PeerId, channel: ChannelId) -> Option<ChannelId> {
        let replaced = self
            .members
            .insert(peer_id.clone(), Member { channel, last_seen: Instant::now() })
            .map(|old| old.channel);
        if let Some(old) = replaced {
            self.by_channel.remove(&old);
        }
        self.by_channel.insert(channel, peer_id);
        replaced
    }

    /// Remove by channel, returning the peer it belonged to.
    pub fn remove_channel(&mut self, channel: &ChannelId) -> Option<PeerId> {
        let peer_id = self.by_channel.remove(channel)?;
        self.members.remove(&peer_id);
        Some(peer_id)
    }

    /// Peer on the other end of `channel`.
    pub fn peer_for(&self, channel: &ChannelId) -> Option<&PeerId> {
        self.by_channel.get(channel)
    }

    pub fn contains_channel(&self, channel: &ChannelId) -> bool {
        self.by_channel.contains_key(channel)
    }

    /// Record inbound traffic on `channel` for idle detection.
    pub fn touch(&mut self, channel: &ChannelId) {
        if let Some(peer_id) = self.by_channel.get(channel) {
            if let Some(member) = self.members.get_mut(peer_id) {
                member.last_seen = Instant::now();
            }
        }
    }

    /// Channels with no inbound traffic since `cutoff`.
    pub fn idle_since(&self, cutoff: Instant) -> Vec<ChannelId> {
        self.members
            .values()
            .filter(|m| m.last_seen < cutoff)
            .map(|m| m.channel)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All connected peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.members.keys().cloned().collect()
    }

    /// Remove everything, returning the channels so they can be closed.
    pub fn drain(&mut self) -> Vec<ChannelId> {
        self.by_channel.clear();
        self.members.drain().map(|(_, m)| m.channel).collect()
    }

    /// Send `payload` on every channel except `except`.
    pub fn broadcast<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        payload: &[u8],
        except: Option<ChannelId>,
    ) -> FanOut {
        let mut result = FanOut::default();
        for (peer_id, member) in &self.members {
            if Some(member.channel) == except {
                continue;
            }
            match transport.send(member.channel, payload) {
                Ok(()) => result.delivered += 1,
                Err(e) => {
                    log::warn!("Send to {peer_id} on {} failed: {e}", member.channel);
                    result.failed += 1;
                }
            }
        }
        self.messages_sent.fetch_add(result.delivered as u64, Ordering::Relaxed);
        self.messages_dropped.fetch_add(result.failed as u64, Ordering::Relaxed);
        result
    }

    /// Broadcast statistics snapshot.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.members.len(),
        }
    }
}
