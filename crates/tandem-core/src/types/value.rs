//! Leaf values stored in the document graph.

use std::fmt;
use serde::{Serialize, Deserialize};
use crate::types::ids::NodeId;
use crate::types::schema::EnumId;

/// Kind of a leaf member, fixed by the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafKind {
    /// Boolean flag
    Bool,
    /// Signed 64-bit integer
    Int,
    /// 64-bit float
    Float,
    /// Opaque bytes
    Blob,
    /// UTF-8 text
    String,
    /// Enumerator of the given enumeration
    Enum(EnumId),
    /// Reference to another object by identifier
    ObjectRef,
}

impl LeafKind {
    /// Value a freshly created leaf of this kind holds
    pub fn default_value(&self) -> Value {
        match self {
            LeafKind::Bool => Value::Bool(false),
            LeafKind::Int => Value::Int(0),
            LeafKind::Float => Value::Float(0.0),
            LeafKind::Blob => Value::Blob(Vec::new()),
            LeafKind::String => Value::String(String::new()),
            LeafKind::Enum(_) => Value::Enum(0),
            LeafKind::ObjectRef => Value::Ref(NodeId::NULL),
        }
    }

    /// Whether `value` may be stored in a leaf of this kind
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (LeafKind::Bool, Value::Bool(_))
                | (LeafKind::Int, Value::Int(_))
                | (LeafKind::Float, Value::Float(_))
                | (LeafKind::Blob, Value::Blob(_))
                | (LeafKind::String, Value::String(_))
                | (LeafKind::Enum(_), Value::Enum(_))
                | (LeafKind::ObjectRef, Value::Ref(_))
        )
    }

    /// Short name used in logs and the text codec
    pub fn name(&self) -> &'static str {
        match self {
            LeafKind::Bool => "bool",
            LeafKind::Int => "int",
            LeafKind::Float => "float",
            LeafKind::Blob => "blob",
            LeafKind::String => "string",
            LeafKind::Enum(_) => "enum",
            LeafKind::ObjectRef => "ref",
        }
    }
}

/// A leaf value.
///
/// Floats compare by bit pattern so that a value always equals itself and
/// change detection stays exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Float
    Float(f64),
    /// Opaque bytes
    Blob(Vec<u8>),
    /// UTF-8 text
    String(String),
    /// Enumerator index
    Enum(u32),
    /// Object reference, [`NodeId::NULL`] when empty
    Ref(NodeId),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// Boolean payload, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload, if this is a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Byte payload, if this is a blob
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// Enumerator index, if this is an enum value
    pub fn as_enum(&self) -> Option<u32> {
        match self {
            Value::Enum(v) => Some(*v),
            _ => None,
        }
    }

    /// Referenced identifier, if this is a non-null object reference
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Ref(id) if !id.is_null() => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Enum(v) => write!(f, "#{}", v),
            Value::Ref(id) => write!(f, "@{}", id),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Value::Ref(v)
    }
}
