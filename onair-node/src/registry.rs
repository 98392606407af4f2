//! Registry of currently live peers, deduplicated by identity.
//!
//! Membership only. Status bookkeeping for a peer lives in the status map
//! and is coupled to membership by the synchronizer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv6Addr;

use crate::push::STATUS_PATH;

/// A discovered peer and where to reach its push API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub identity: String,
    pub address: String,
    pub port: u16,
}

impl PeerRecord {
    pub fn new(identity: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            identity: identity.into(),
            address: address.into(),
            port,
        }
    }

    /// URL of the peer's status push endpoint
    pub fn status_url(&self) -> String {
        if self.address.parse::<Ipv6Addr>().is_ok() {
            format!("http://[{}]:{}{}", self.address, self.port, STATUS_PATH)
        } else {
            format!("http://{}:{}{}", self.address, self.port, STATUS_PATH)
        }
    }
}

/// Currently reachable peers
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a peer. Returns true if the identity was not known.
    pub fn on_peer_up(&mut self, peer: PeerRecord) -> bool {
        self.peers.insert(peer.identity.clone(), peer).is_none()
    }

    /// Remove a peer if present; unknown identities are ignored
    pub fn on_peer_down(&mut self, identity: &str) -> Option<PeerRecord> {
        self.peers.remove(identity)
    }

    /// Snapshot of the live peer set for fan-out
    pub fn all(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub fn get(&self, identity: &str) -> Option<&PeerRecord> {
        self.peers.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.peers.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_up_reports_new_peers() {
        let mut registry = PeerRegistry::new();
        assert!(registry.on_peer_up(PeerRecord::new("box-a", "10.0.0.2", 8991)));
        assert!(registry.on_peer_up(PeerRecord::new("box-b", "10.0.0.3", 8991)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reannouncement_replaces_entry() {
        let mut registry = PeerRegistry::new();
        registry.on_peer_up(PeerRecord::new("box-a", "10.0.0.2", 8991));

        let is_new = registry.on_peer_up(PeerRecord::new("box-a", "10.0.0.9", 9000));
        assert!(!is_new);
        assert_eq!(registry.len(), 1);

        let peer = registry.get("box-a").unwrap();
        assert_eq!(peer.address, "10.0.0.9");
        assert_eq!(peer.port, 9000);
    }

    #[test]
    fn test_peer_down_is_idempotent() {
        let mut registry = PeerRegistry::new();
        registry.on_peer_up(PeerRecord::new("box-a", "10.0.0.2", 8991));

        assert!(registry.on_peer_down("box-a").is_some());
        assert!(registry.on_peer_down("box-a").is_none());
        assert!(registry.on_peer_down("never-seen").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_status_url() {
        let peer = PeerRecord::new("box-a", "192.168.1.20", 8991);
        assert_eq!(peer.status_url(), "http://192.168.1.20:8991/api/v1/status");

        let peer = PeerRecord::new("box-b", "fe80::1", 8991);
        assert_eq!(peer.status_url(), "http://[fe80::1]:8991/api/v1/status");

        let peer = PeerRecord::new("box-c", "box-c.local", 8991);
        assert_eq!(peer.status_url(), "http://box-c.local:8991/api/v1/status");
    }
}
