//! Session persistence
//!
//! A session store keeps one binary snapshot per session. The host reads it
//! when a session opens and writes it back on flush or when the last port
//! leaves.

pub mod mem_store;

use bytes::Bytes;
use crate::core::Result;

pub use mem_store::MemoryStore;

/// Session identifier
pub type SessionId = String;

/// Backend holding the latest snapshot of each session
pub trait SessionStore: Send + Sync {
    /// Latest snapshot of `session`, if one was written
    fn read(&self, session: &str) -> Result<Option<Bytes>>;

    /// Replace the snapshot of `session`
    fn write(&self, session: &str, snapshot: Bytes) -> Result<()>;

    /// Forget `session`, returning whether it existed
    fn remove(&self, session: &str) -> Result<bool>;

    /// Every session with a stored snapshot
    fn sessions(&self) -> Vec<SessionId>;
}
