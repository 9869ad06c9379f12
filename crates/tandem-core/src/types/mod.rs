/// Type definitions for the replicated document core
///
/// This module contains all type definitions organized by category.

/// Identifier types
pub mod ids;
/// Container key types
pub mod keys;
/// Leaf value types
pub mod value;
/// Schema types
pub mod schema;
/// System-wide error types
pub mod error;

// Re-export commonly used types for convenience
pub use ids::{NodeId, TxId, TxIdRange, IdAllocator};
pub use keys::{FloatKey, RandomKey, SlotKey};
pub use value::{LeafKind, Value};
pub use schema::{ClassId, ClassSpec, ContainerKind, EnumId, MemberKind, Schema, SchemaBuilder};
pub use error::{CodecError, CoreError, CoreResult, ExecError, ValidationError};
