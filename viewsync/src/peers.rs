//! Liveness tracking for the other instances in a group.
//!
//! ```text
//! join / ping / pong ──► touch(id, now)    creates or updates
//! data messages      ──► refresh(id, now)  updates known peers only
//! leave              ──► remove(id)
//! heartbeat tick     ──► sweep_stale(now, 15s) ──► evicted ids
//! ```
//!
//! Times are milliseconds on the owning controller's monotonic clock. The
//! registry never holds the local instance.

use std::collections::HashMap;

/// What we know about one remote instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub instance_id: String,
    pub last_seen_at: u64,
}

impl PeerInfo {
    pub fn is_stale(&self, now: u64, threshold_ms: u64) -> bool {
        now.saturating_sub(self.last_seen_at) > threshold_ms
    }
}

#[derive(Debug, Clone)]
pub struct PeerRegistry {
    local_id: String,
    peers: HashMap<String, PeerInfo>,
}

impl PeerRegistry {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            peers: HashMap::new(),
        }
    }

    /// Record traffic from `id`. Returns `true` if the peer was new.
    pub fn touch(&mut self, id: &str, ts: u64) -> bool {
        if id == self.local_id {
            return false;
        }
        match self.peers.get_mut(id) {
            Some(peer) => {
                // Timers can fire out of order relative to frame arrival.
                peer.last_seen_at = peer.last_seen_at.max(ts);
                false
            }
            None => {
                self.peers.insert(
                    id.to_string(),
                    PeerInfo {
                        instance_id: id.to_string(),
                        last_seen_at: ts,
                    },
                );
                true
            }
        }
    }

    /// Bump `last_seen_at` for a peer we already know. Returns `false` for
    /// unknown ids, which stay unknown.
    pub fn refresh(&mut self, id: &str, ts: u64) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.last_seen_at = peer.last_seen_at.max(ts);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.peers.remove(id).is_some()
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&PeerInfo> {
        self.peers.get(id)
    }

    /// Snapshot of all known peers, ordered by id.
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut out: Vec<PeerInfo> = self.peers.values().cloned().collect();
        out.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        out
    }

    /// Evict every peer silent for longer than `threshold_ms`.
    pub fn sweep_stale(&mut self, now: u64, threshold_ms: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|p| p.is_stale(now, threshold_ms))
            .map(|p| p.instance_id.clone())
            .collect();

        for id in &stale {
            self.peers.remove(id);
        }
        stale
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}
