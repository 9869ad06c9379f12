//! Client side of document synchronization
//!
//! A [`Replica`] holds the graph and its local edit API. The [`Engine`]
//! wraps a replica with the pending-transaction queue and the
//! reconciliation logic; [`History`] layers undo and redo on top.

/// Document graph bound to a schema and an editing identity
pub mod replica;

/// Inbox of decoded server events
pub mod pull_stack;

/// Client synchronization engine
pub mod engine;

/// Undo and redo on top of an engine
pub mod history;

use crate::graph::GraphView;

pub use engine::{Engine, PullReport};
pub use history::History;
pub use pull_stack::{PullEvent, PullStack};
pub use replica::Replica;

/// What is currently mutating a replica's graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Controller {
    /// Idle, or local edits by the application
    #[default]
    None,
    /// Local changes being turned into a transaction
    SelfCommit,
    /// Transactions from the sequencer being reconciled
    External,
    /// Undo or redo
    Undo,
    /// A snapshot replacing the graph
    Read,
    /// Pending transactions being fused
    Squash,
    /// Uncommitted changes being rolled back
    Revert,
    /// Uncommitted changes set aside and restored around a pull
    Stash,
}

/// Notified when a replica reaches a new state, before the sync point moves.
///
/// The view still reports what changed since the previous sync point, so
/// observers can look at lifecycles and previous leaf values.
pub trait Observer: Send {
    /// Called after `controller` changed the document
    fn document_changed(&mut self, view: &GraphView<'_>, controller: Controller);
}

impl<F> Observer for F
where
    F: FnMut(&GraphView<'_>, Controller) + Send,
{
    fn document_changed(&mut self, view: &GraphView<'_>, controller: Controller) {
        self(view, controller)
    }
}
