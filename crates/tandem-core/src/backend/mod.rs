//! Snapshot serialization: the intermediate representation and its codecs

/// Compact binary snapshot codec
pub mod binary;
/// Schema-independent document tree
pub mod ir;
/// Human-readable snapshot codec
pub mod text;

pub use ir::{IrDocument, IrNode, IrObject, NameTables};
