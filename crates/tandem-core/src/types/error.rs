//! Error types for the replicated document core
//!
//! Opcode execution, validation and decoding each report their own error
//! type. [`CoreError`] gathers them for the public API.

use thiserror::Error;
use crate::types::ids::{NodeId, TxId};

/// Result type used throughout the crate
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Main error type of the core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Opcode execution failed
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Structural or business-rule validation rejected the graph
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Snapshot encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Schema construction or lookup failed
    #[error("Schema error: {0}")]
    Schema(String),

    /// A peer broke the synchronization protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid argument from the caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested node, member or port does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The sequencer refused a transaction
    #[error("Transaction {id} denied: {reason}")]
    Denied {
        /// Refused transaction
        id: TxId,
        /// Reason reported by the sequencer
        reason: String,
    },

    /// Transport message encoding failed
    #[error("Message encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Transport message decoding failed
    #[error("Message decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Failure of a single opcode
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Target missing or of the wrong kind
    #[error("bad access on {target}: {reason}")]
    BadAccess {
        /// Opcode target
        target: NodeId,
        /// What was wrong
        reason: String,
    },

    /// Structural conflict with the current graph state
    #[error("collision on {target}: {reason}")]
    Collision {
        /// Opcode target
        target: NodeId,
        /// What collided
        reason: String,
    },

    /// Malformed opcode payload
    #[error("corrupted opcode on {target}: {reason}")]
    Corruption {
        /// Opcode target
        target: NodeId,
        /// What was malformed
        reason: String,
    },
}

impl ExecError {
    /// Create a bad access error
    pub fn bad_access(target: NodeId, reason: impl Into<String>) -> Self {
        Self::BadAccess { target, reason: reason.into() }
    }

    /// Create a collision error
    pub fn collision(target: NodeId, reason: impl Into<String>) -> Self {
        Self::Collision { target, reason: reason.into() }
    }

    /// Create a corruption error
    pub fn corruption(target: NodeId, reason: impl Into<String>) -> Self {
        Self::Corruption { target, reason: reason.into() }
    }

    /// Whether this error means the replica state can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExecError::Collision { .. })
    }

    /// Opcode target the error refers to
    pub fn target(&self) -> NodeId {
        match self {
            ExecError::BadAccess { target, .. }
            | ExecError::Collision { target, .. }
            | ExecError::Corruption { target, .. } => *target,
        }
    }
}

/// Rejection raised by structural checks or by a host validator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Validation failed: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    /// Create a validation error
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Snapshot codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended in the middle of a value
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEof {
        /// Byte offset where more input was expected
        offset: usize,
    },

    /// Missing or unsupported header
    #[error("bad header: {0}")]
    BadHeader(String),

    /// Unknown member tag byte
    #[error("unknown tag {tag} at byte {offset}")]
    UnknownTag {
        /// Tag value read
        tag: u8,
        /// Byte offset of the tag
        offset: usize,
    },

    /// Interned name index outside its table
    #[error("unknown {table} name index {index}")]
    UnknownName {
        /// Which name table was consulted
        table: &'static str,
        /// Index read
        index: u64,
    },

    /// String payload is not UTF-8
    #[error("invalid utf-8 text")]
    InvalidUtf8,

    /// Container key is malformed
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Bytes remained after the document
    #[error("{count} trailing bytes after document")]
    TrailingBytes {
        /// Number of bytes left over
        count: usize,
    },

    /// Text codec syntax error
    #[error("line {line}: {message}")]
    Syntax {
        /// One-based line number
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// Snapshot does not match the schema
    #[error("schema mismatch: {0}")]
    Schema(String),

    /// Identifier layout is inconsistent or duplicated
    #[error("identifier layout: {0}")]
    Layout(String),

    /// Objects are nested deeper than the decoder accepts
    #[error("objects nested deeper than {limit} levels")]
    TooDeep {
        /// Deepest nesting accepted
        limit: usize,
    },
}

impl CoreError {
    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether the affected replica must be resynchronized from a snapshot
    pub fn requires_resync(&self) -> bool {
        match self {
            CoreError::Exec(e) => e.is_fatal(),
            CoreError::Protocol(_) => true,
            _ => false,
        }
    }

    /// Whether this is a routine conflict rather than a fault
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::Exec(ExecError::Collision { .. })
                | CoreError::Validation(_)
                | CoreError::Denied { .. }
        )
    }
}
