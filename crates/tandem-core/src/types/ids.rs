//! Identifier types for graph nodes and transactions.
//!
//! Every node is named by `(user, actor, seq)`. Each actor only ever
//! increments its own sequence, so identifiers are globally unique without
//! a coordinator.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use crate::constants::{ROOT_ACTOR, ROOT_SEQ, ROOT_USER};

/// Three-part node identifier.
///
/// Ordering is lexicographic over `(user, actor, seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId {
    /// Owning user
    pub user: u64,
    /// Owning actor (device or process instance)
    pub actor: u64,
    /// Per-actor sequence number
    pub seq: u64,
}

impl NodeId {
    /// The null identifier, used as an empty object reference
    pub const NULL: NodeId = NodeId { user: 0, actor: 0, seq: 0 };

    /// Identifier of every document root
    pub const ROOT: NodeId = NodeId { user: ROOT_USER, actor: ROOT_ACTOR, seq: ROOT_SEQ };

    /// Create an identifier from its three parts
    pub const fn new(user: u64, actor: u64, seq: u64) -> Self {
        Self { user, actor, seq }
    }

    /// Whether this is the null identifier
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Identifier `n` positions after this one in the same actor's sequence
    pub fn offset(self, n: u64) -> Self {
        Self { seq: self.seq + n, ..self }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.user, self.actor, self.seq)
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = |what: &str| -> Result<u64, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing {} in node id '{}'", what, s))?
                .parse::<u64>()
                .map_err(|e| format!("invalid {} in node id '{}': {}", what, s, e))
        };
        let id = NodeId::new(next("user")?, next("actor")?, next("seq")?);
        if parts.next().is_some() {
            return Err(format!("trailing data in node id '{}'", s));
        }
        Ok(id)
    }
}

/// Transaction identifier `(user, actor, nbr)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TxId {
    /// Committing user
    pub user: u64,
    /// Committing actor
    pub actor: u64,
    /// Per-actor transaction number
    pub nbr: u64,
}

impl TxId {
    /// Create a transaction identifier
    pub const fn new(user: u64, actor: u64, nbr: u64) -> Self {
        Self { user, actor, nbr }
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}.{}.{}", self.user, self.actor, self.nbr)
    }
}

/// A contiguous run of one actor's transactions, used when squashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxIdRange {
    /// Committing user
    pub user: u64,
    /// Committing actor
    pub actor: u64,
    /// First transaction number, inclusive
    pub first: u64,
    /// Last transaction number, inclusive
    pub last: u64,
}

impl TxIdRange {
    /// Create a range, swapping the bounds if given in reverse
    pub fn new(user: u64, actor: u64, first: u64, last: u64) -> Self {
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        Self { user, actor, first, last }
    }

    /// Range covering the transactions from `first` to `last`
    pub fn spanning(first: TxId, last: TxId) -> Option<Self> {
        if first.user != last.user || first.actor != last.actor {
            return None;
        }
        Some(Self::new(first.user, first.actor, first.nbr, last.nbr))
    }

    /// Whether `id` belongs to this range
    pub fn contains(&self, id: &TxId) -> bool {
        id.user == self.user && id.actor == self.actor && id.nbr >= self.first && id.nbr <= self.last
    }
}

impl fmt::Display for TxIdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}.{}.[{}..={}]", self.user, self.actor, self.first, self.last)
    }
}

/// Hands out fresh identifiers for one `(user, actor)` pair.
///
/// The allocator only tracks its own counter. Whether a range is still free
/// in a given graph is answered by [`crate::graph::Graph::can_allocate`].
#[derive(Debug, Clone)]
pub struct IdAllocator {
    user: u64,
    actor: u64,
    next: u64,
}

impl IdAllocator {
    /// Create an allocator starting at sequence 1
    pub fn new(user: u64, actor: u64) -> Self {
        Self { user, actor, next: 1 }
    }

    /// Owning user
    pub fn user(&self) -> u64 {
        self.user
    }

    /// Owning actor
    pub fn actor(&self) -> u64 {
        self.actor
    }

    /// Reserve `size` contiguous identifiers and return the first one
    pub fn allocate(&mut self, size: u64) -> NodeId {
        let base = NodeId::new(self.user, self.actor, self.next);
        self.next += size.max(1);
        base
    }

    /// Note an identifier seen in imported data so it is never handed out again
    pub fn observe(&mut self, id: NodeId) {
        if id.user == self.user && id.actor == self.actor && id.seq >= self.next {
            self.next = id.seq + 1;
        }
    }

    /// Sequence number the next allocation starts at
    pub fn peek(&self) -> u64 {
        self.next
    }
}
