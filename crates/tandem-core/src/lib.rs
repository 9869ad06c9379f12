//! # Tandem Core
//!
//! Replicated document graph: schema-bound arena, invertible operation log,
//! client reconciliation engine, authoritative sequencer and snapshot codecs.
//! This crate is designed to be WASM-compatible and never owns a socket or
//! a thread.

#![warn(missing_docs)]

/// Core utilities (logging macros)
pub mod core;

/// System constants
pub mod constants;

/// Identifiers, keys, values, schema and errors
pub mod types;

/// Arena graph, diffing and validation
pub mod graph;

/// Opcodes and transactions
pub mod ops;

/// Client replicas, the sync engine and undo history
pub mod document;

/// Authoritative sequencer
pub mod server;

/// Wire protocol and transport seams
pub mod comms;

/// Intermediate representation and snapshot codecs
pub mod backend;

// Re-export commonly used items
pub use types::{CoreError, CoreResult, ExecError, ValidationError, CodecError};
pub use types::{NodeId, TxId, TxIdRange, FloatKey, RandomKey, SlotKey, Value, LeafKind};
pub use types::{ClassId, Schema, SchemaBuilder};
pub use graph::{Graph, GraphView, Lifecycle};
pub use graph::validate::{AcceptAll, Validator};
pub use ops::{Direction, Mode, Opcode, Op, Transaction};
pub use document::{Controller, Engine, History, Observer, PullEvent, PullReport, PullStack, Replica};
pub use server::{PortId, Sequencer};
pub use comms::{Carrier, PortSink, ConnectionState, DirectCarrier, ClientMessage, ServerMessage, Signal};
pub use backend::{IrDocument, IrNode, IrObject};
