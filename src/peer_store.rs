//! Ephemeral peer address book shared by every syncer.
//!
//! Tracks when each peer was first seen, when we last completed a session
//! with it and how many consecutive attempts failed. Nothing is persisted;
//! a restart re-seeds the store from the network profile.

use crate::ip::AddressFamily;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

/// Consecutive failures after which a peer is skipped when dialing.
const MAX_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub address: String,
    pub first_seen: DateTime<Utc>,
    pub last_connect: Option<DateTime<Utc>>,
    pub failures: u32,
}

impl PeerInfo {
    pub fn new(address: String) -> Self {
        Self {
            address,
            first_seen: Utc::now(),
            last_connect: None,
            failures: 0,
        }
    }

    /// Check if peer should be considered unreliable
    pub fn is_unreliable(&self) -> bool {
        self.failures >= MAX_FAILURES
    }

    /// Literal addresses must match `family`. Host names are resolved at
    /// dial time and may yield either family.
    pub fn dialable_over(&self, family: AddressFamily) -> bool {
        match self.address.parse::<SocketAddr>() {
            Ok(addr) => family.matches(&addr),
            Err(_) => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct PeerStore {
    peers: RwLock<HashMap<String, PeerInfo>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `addrs`, typically the bootstrap peers.
    pub fn seeded<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for addr in addrs {
            store.add_peer(addr);
        }
        store
    }

    /// Returns false if the address was already known.
    pub fn add_peer(&self, addr: impl Into<String>) -> bool {
        let addr = addr.into();
        let mut peers = self.peers.write();
        if peers.contains_key(&addr) {
            return false;
        }
        peers.insert(addr.clone(), PeerInfo::new(addr));
        true
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers.read().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().values().cloned().collect()
    }

    pub fn peer(&self, addr: &str) -> Option<PeerInfo> {
        self.peers.read().get(addr).cloned()
    }

    pub fn record_connect(&self, addr: &str) {
        if let Some(peer) = self.peers.write().get_mut(addr) {
            peer.last_connect = Some(Utc::now());
            peer.failures = 0;
        }
    }

    pub fn record_failure(&self, addr: &str) {
        if let Some(peer) = self.peers.write().get_mut(addr) {
            peer.failures += 1;
        }
    }

    /// Up to `limit` addresses of `family` not in `exclude`, least recently
    /// connected first.
    pub fn candidates(
        &self,
        limit: usize,
        exclude: &HashSet<String>,
        family: AddressFamily,
    ) -> Vec<String> {
        let peers = self.peers.read();
        let mut valid: Vec<_> = peers
            .values()
            .filter(|p| {
                !p.is_unreliable() && !exclude.contains(&p.address) && p.dialable_over(family)
            })
            .collect();
        valid.sort_by_key(|p| p.last_connect);
        valid
            .into_iter()
            .take(limit)
            .map(|p| p.address.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_store_deduplicates() {
        let store = PeerStore::seeded(["a:1", "b:2", "a:1"]);
        assert_eq!(store.len(), 2);
        assert!(store.contains("b:2"));
        assert!(!store.add_peer("b:2"));
        assert!(store.add_peer("c:3"));
    }

    #[test]
    fn test_peer_failure_tracking() {
        let store = PeerStore::seeded(["a:1"]);
        for _ in 0..MAX_FAILURES {
            store.record_failure("a:1");
        }
        assert!(store.peer("a:1").unwrap().is_unreliable());
        assert!(store.candidates(10, &HashSet::new(), AddressFamily::V4).is_empty());

        store.record_connect("a:1");
        let info = store.peer("a:1").unwrap();
        assert_eq!(info.failures, 0);
        assert!(info.last_connect.is_some());
    }

    #[test]
    fn test_candidates_respect_limit_and_exclusions() {
        let store = PeerStore::seeded(["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3"]);
        store.record_connect("10.0.0.1:1");

        let exclude: HashSet<String> = ["10.0.0.2:2".to_string()].into_iter().collect();
        let picked = store.candidates(1, &exclude, AddressFamily::V4);
        assert_eq!(picked, vec!["10.0.0.3:3".to_string()]);
        assert_eq!(store.candidates(10, &HashSet::new(), AddressFamily::V4).len(), 3);
    }

    #[test]
    fn test_candidates_are_filtered_by_family_before_the_limit() {
        let store = PeerStore::seeded([
            "[2001:db8::1]:9981",
            "[2001:db8::2]:9981",
            "203.0.113.9:9981",
            "seed.example.net:9981",
        ]);

        let mut v4 = store.candidates(2, &HashSet::new(), AddressFamily::V4);
        v4.sort();
        assert_eq!(v4, vec!["203.0.113.9:9981", "seed.example.net:9981"]);

        let v6 = store.candidates(10, &HashSet::new(), AddressFamily::V6);
        assert_eq!(v6.len(), 3);
        assert!(!v6.contains(&"203.0.113.9:9981".to_string()));
    }
}
