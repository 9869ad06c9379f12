//! In-memory session store.
//!
//! Snapshots live in a `DashMap` keyed by session id, so concurrent sessions
//! never contend on a global lock. Nothing survives the process.

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;
use crate::core::Result;
use crate::storage::{SessionId, SessionStore};

/// Session store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: DashMap<SessionId, Bytes>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no session is stored
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn read(&self, session: &str) -> Result<Option<Bytes>> {
        Ok(self.snapshots.get(session).map(|entry| entry.value().clone()))
    }

    fn write(&self, session: &str, snapshot: Bytes) -> Result<()> {
        debug!("Stored {} bytes for session {}", snapshot.len(), session);
        self.snapshots.insert(session.to_string(), snapshot);
        Ok(())
    }

    fn remove(&self, session: &str) -> Result<bool> {
        Ok(self.snapshots.remove(session).is_some())
    }

    fn sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.snapshots.iter().map(|entry| entry.key().clone()).collect();
        sessions.sort();
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let store = MemoryStore::new();
        assert!(store.read("a").unwrap().is_none());
        store.write("b", Bytes::from_static(b"two")).unwrap();
        store.write("a", Bytes::from_static(b"one")).unwrap();
        store.write("a", Bytes::from_static(b"uno")).unwrap();
        assert_eq!(store.read("a").unwrap().unwrap(), Bytes::from_static(b"uno"));
        assert_eq!(store.sessions(), vec!["a".to_string(), "b".to_string()]);
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(store.len(), 1);
    }
}
