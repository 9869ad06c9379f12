//! Opcodes: the smallest invertible edits of a document graph.

use std::fmt;
use serde::{Serialize, Deserialize};
use crate::graph::Graph;
use crate::types::error::ExecError;
use crate::types::ids::NodeId;
use crate::types::keys::SlotKey;
use crate::types::schema::{ClassId, Schema};
use crate::types::value::Value;

/// Opcode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OpFlags(u8);

impl OpFlags {
    /// No flag set
    pub const NONE: OpFlags = OpFlags(0);
    /// Not replayed by undo and redo
    pub const OUT_OF_UNDO: OpFlags = OpFlags(1);

    /// Whether every flag of `other` is set
    pub fn contains(&self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the flags of `other`
    pub fn insert(&mut self, other: OpFlags) {
        self.0 |= other.0;
    }

    /// Raw bits
    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// Direction in which an opcode is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply the edit
    Forward,
    /// Apply the inverse edit
    Backward,
}

impl Direction {
    /// The other direction
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// How value mismatches are handled during execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Every expected value must match
    Strict,
    /// A mismatching expected value is rewritten to the observed one
    Correct,
}

/// Edit payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Replace a leaf value
    Set {
        /// Expected current value
        old: Value,
        /// Value to store
        new: Value,
    },
    /// Insert an object into the target container
    Insert {
        /// Slot key
        key: SlotKey,
        /// Class of the inserted object
        class: ClassId,
        /// Base identifier of the inserted object
        node: NodeId,
    },
    /// Erase an object from the target container
    Erase {
        /// Slot key
        key: SlotKey,
        /// Class of the erased object
        class: ClassId,
        /// Identifier of the erased object
        node: NodeId,
    },
    /// Move an object into the target container
    Move {
        /// Moved object
        node: NodeId,
        /// Source container
        src: NodeId,
        /// Key in the source container
        src_key: SlotKey,
        /// Key in the target container
        dst_key: SlotKey,
    },
    /// Push an ephemeral message
    Message {
        /// Message bytes
        payload: Vec<u8>,
    },
}

/// One edit of one graph node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opcode {
    /// Leaf, container or message slot the edit applies to
    pub target: NodeId,
    /// Opcode flags
    pub flags: OpFlags,
    /// Edit payload
    pub op: Op,
}

impl Opcode {
    /// Leaf assignment
    pub fn set(target: NodeId, old: Value, new: Value) -> Self {
        Self { target, flags: OpFlags::NONE, op: Op::Set { old, new } }
    }

    /// Object insertion into `container`
    pub fn insert(container: NodeId, key: SlotKey, class: ClassId, node: NodeId) -> Self {
        Self { target: container, flags: OpFlags::NONE, op: Op::Insert { key, class, node } }
    }

    /// Object erasure from `container`
    pub fn erase(container: NodeId, key: SlotKey, class: ClassId, node: NodeId) -> Self {
        Self { target: container, flags: OpFlags::NONE, op: Op::Erase { key, class, node } }
    }

    /// Move of `node` from `src[src_key]` into `dst[dst_key]`
    pub fn relocate(node: NodeId, src: NodeId, src_key: SlotKey, dst: NodeId, dst_key: SlotKey) -> Self {
        Self { target: dst, flags: OpFlags::NONE, op: Op::Move { node, src, src_key, dst_key } }
    }

    /// Ephemeral message, never replayed by undo
    pub fn message(target: NodeId, payload: Vec<u8>) -> Self {
        Self { target, flags: OpFlags::OUT_OF_UNDO, op: Op::Message { payload } }
    }

    /// Whether undo and redo skip this opcode
    pub fn is_out_of_undo(&self) -> bool {
        self.flags.contains(OpFlags::OUT_OF_UNDO)
    }

    /// Whether this opcode changes container structure
    pub fn is_structural(&self) -> bool {
        matches!(self.op, Op::Insert { .. } | Op::Erase { .. } | Op::Move { .. })
    }

    /// Whether executing this opcode changes nothing
    pub fn is_noop(&self) -> bool {
        matches!(&self.op, Op::Set { old, new } if old == new)
    }

    /// Execute against `graph`.
    ///
    /// In [`Mode::Correct`] a mismatching expected value is rewritten in
    /// place, so the opcode stays the exact inverse of what it did.
    pub fn execute(
        &mut self,
        graph: &mut Graph,
        schema: &Schema,
        direction: Direction,
        mode: Mode,
    ) -> Result<(), ExecError> {
        let correct = mode == Mode::Correct;
        let target = self.target;
        match (&mut self.op, direction) {
            (Op::Set { old, new }, Direction::Forward) => graph.exec_set(target, old, new, correct),
            (Op::Set { old, new }, Direction::Backward) => graph.exec_set(target, new, old, correct),
            (Op::Insert { key, class, node }, Direction::Forward)
            | (Op::Erase { key, class, node }, Direction::Backward) => {
                graph.exec_insert(schema, target, key, *class, *node)
            }
            (Op::Insert { key, class, node }, Direction::Backward)
            | (Op::Erase { key, class, node }, Direction::Forward) => {
                graph.exec_erase(schema, target, key, *class, *node)
            }
            (Op::Move { node, src, src_key, dst_key }, Direction::Forward) => {
                graph.exec_move(schema, *node, *src, src_key, target, dst_key)
            }
            (Op::Move { node, src, src_key, dst_key }, Direction::Backward) => {
                graph.exec_move(schema, *node, target, dst_key, *src, src_key)
            }
            (Op::Message { payload }, direction) => {
                graph.exec_message(target, payload, direction == Direction::Forward)
            }
        }
    }

    /// Turn this opcode into its inverse
    pub fn invert_inplace(&mut self) {
        let target = self.target;
        self.op = match std::mem::replace(&mut self.op, Op::Message { payload: Vec::new() }) {
            Op::Set { old, new } => Op::Set { old: new, new: old },
            Op::Insert { key, class, node } => Op::Erase { key, class, node },
            Op::Erase { key, class, node } => Op::Insert { key, class, node },
            Op::Move { node, src, src_key, dst_key } => {
                self.target = src;
                Op::Move { node, src: target, src_key: dst_key, dst_key: src_key }
            }
            // Retracting a message has no forward form; messages are
            // never inverted outside of backward execution.
            op @ Op::Message { .. } => op,
        };
    }

    /// Inverse of this opcode
    pub fn inverted(&self) -> Self {
        let mut op = self.clone();
        op.invert_inplace();
        op
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            Op::Set { old, new } => write!(f, "set {} {} -> {}", self.target, old, new),
            Op::Insert { key, class, node } => write!(f, "insert {} {} at {}[{}]", class, node, self.target, key),
            Op::Erase { key, class, node } => write!(f, "erase {} {} at {}[{}]", class, node, self.target, key),
            Op::Move { node, src, src_key, dst_key } => {
                write!(f, "move {} from {}[{}] to {}[{}]", node, src, src_key, self.target, dst_key)
            }
            Op::Message { payload } => write!(f, "message {} ({} bytes)", self.target, payload.len()),
        }
    }
}
