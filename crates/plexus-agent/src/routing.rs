//! The peer routing table.
//!
//! Maps peer name to peer endpoint. Writes take a short exclusive lock;
//! readers take a point-in-time snapshot, so one reasoning-loop iteration
//! always sees a consistent view. The lock is never held across I/O.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::AgentError;

/// Outcome of a `connect` mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// New entry added
    Added,
    /// Entry already present with the same endpoint (idempotent ok)
    Unchanged,
    /// Entry existed with a different endpoint and was overwritten
    Replaced,
}

/// An agent's view of its reachable peers.
pub struct RoutingTable {
    owner: String,
    peers: RwLock<BTreeMap<String, String>>,
}

impl RoutingTable {
    /// Empty table owned by the named agent.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self { owner: owner.into(), peers: RwLock::new(BTreeMap::new()) }
    }

    /// Add or update a peer entry.
    ///
    /// Duplicate connects with the same endpoint are a no-op; a different
    /// endpoint overwrites the entry (the caller emits the event).
    ///
    /// # Errors
    ///
    /// [`AgentError::SelfConnect`] when `peer` is the owner's own name.
    pub fn connect(&self, peer: &str, endpoint: &str) -> Result<ConnectOutcome, AgentError> {
        if peer == self.owner {
            return Err(AgentError::SelfConnect);
        }
        let mut peers = self.peers.write();
        match peers.insert(peer.to_string(), endpoint.to_string()) {
            None => Ok(ConnectOutcome::Added),
            Some(previous) if previous == endpoint => Ok(ConnectOutcome::Unchanged),
            Some(_) => Ok(ConnectOutcome::Replaced),
        }
    }

    /// Remove a peer entry; `true` if it existed.
    pub fn disconnect(&self, peer: &str) -> bool {
        self.peers.write().remove(peer).is_some()
    }

    /// Point-in-time snapshot of the table.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.peers.read().clone()
    }

    /// Peer names currently reachable.
    #[must_use]
    pub fn peer_names(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_contains_own_name() {
        let table = RoutingTable::new("alice");
        let err = table.connect("alice", "http://127.0.0.1:8001/mcp").unwrap_err();
        assert!(matches!(err, AgentError::SelfConnect));
        assert!(table.is_empty());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let table = RoutingTable::new("alice");
        assert_eq!(
            table.connect("bob", "http://127.0.0.1:8002/mcp").unwrap(),
            ConnectOutcome::Added
        );
        assert_eq!(
            table.connect("bob", "http://127.0.0.1:8002/mcp").unwrap(),
            ConnectOutcome::Unchanged
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_different_endpoint_overwrites() {
        let table = RoutingTable::new("alice");
        table.connect("bob", "http://127.0.0.1:8002/mcp").unwrap();
        assert_eq!(
            table.connect("bob", "http://127.0.0.1:9002/mcp").unwrap(),
            ConnectOutcome::Replaced
        );
        assert_eq!(
            table.snapshot().get("bob").unwrap(),
            "http://127.0.0.1:9002/mcp"
        );
    }

    #[test]
    fn test_disconnect_absent_is_noop() {
        let table = RoutingTable::new("alice");
        assert!(!table.disconnect("bob"));

        table.connect("bob", "http://127.0.0.1:8002/mcp").unwrap();
        assert!(table.disconnect("bob"));
        assert!(!table.disconnect("bob"));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let table = RoutingTable::new("alice");
        table.connect("bob", "http://127.0.0.1:8002/mcp").unwrap();

        let snapshot = table.snapshot();
        table.connect("carol", "http://127.0.0.1:8003/mcp").unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(table.len(), 2);
    }
}
