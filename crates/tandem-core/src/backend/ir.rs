//! Intermediate representation shared by the snapshot codecs.
//!
//! A document is a tree of named members. Names are kept as strings so the
//! IR survives schema evolution; the codecs intern them into dense tables.

use std::collections::{BTreeMap, BTreeSet};
use crate::graph::{Body, Graph, GraphView};
use crate::types::error::CodecError;
use crate::types::ids::NodeId;
use crate::types::keys::{FloatKey, RandomKey, SlotKey};
use crate::types::schema::{ClassSpec, MemberKind, Schema};
use crate::types::value::{LeafKind, Value};

/// A whole document
#[derive(Debug, Clone, PartialEq)]
pub struct IrDocument {
    /// Schema version the document was written with
    pub version: String,
    /// Root object
    pub root: IrObject,
}

/// One object with its members in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct IrObject {
    /// Base identifier
    pub id: NodeId,
    /// Class name
    pub class: String,
    /// Named members
    pub members: Vec<(String, IrNode)>,
}

/// Value of one member
#[derive(Debug, Clone, PartialEq)]
pub enum IrNode {
    /// Boolean leaf
    Bool(bool),
    /// Integer leaf
    Int(i64),
    /// Float leaf
    Float(f64),
    /// Blob leaf
    Blob(Vec<u8>),
    /// String leaf
    String(String),
    /// Enum leaf by name
    Enum {
        /// Enumeration name
        name: String,
        /// Enumerator name
        enumerator: String,
    },
    /// Object reference
    ObjectRef(NodeId),
    /// Inline object
    Object(IrObject),
    /// Ordered container
    Ordered(BTreeMap<FloatKey, IrObject>),
    /// Unordered, optional or single container
    Unordered(BTreeMap<RandomKey, IrObject>),
    /// Message slot; carries no state
    Message,
}

/// Sorted name tables of a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTables {
    /// Class names
    pub typenames: BTreeSet<String>,
    /// Member names
    pub members: BTreeSet<String>,
    /// Enumeration names
    pub enums: BTreeSet<String>,
    /// Enumerator names
    pub enumerators: BTreeSet<String>,
}

impl IrDocument {
    /// Collect every name used by the document
    pub fn names(&self) -> NameTables {
        let mut tables = NameTables::default();
        self.root.collect_names(&mut tables);
        tables
    }
}

impl IrObject {
    fn collect_names(&self, tables: &mut NameTables) {
        tables.typenames.insert(self.class.clone());
        for (name, node) in &self.members {
            tables.members.insert(name.clone());
            match node {
                IrNode::Enum { name, enumerator } => {
                    tables.enums.insert(name.clone());
                    tables.enumerators.insert(enumerator.clone());
                }
                IrNode::Object(object) => object.collect_names(tables),
                IrNode::Ordered(items) => items.values().for_each(|o| o.collect_names(tables)),
                IrNode::Unordered(items) => items.values().for_each(|o| o.collect_names(tables)),
                _ => {}
            }
        }
    }

    /// Member by name
    pub fn member(&self, name: &str) -> Option<&IrNode> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    /// Every object of this subtree, this one included, in document order
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a IrObject>) {
        out.push(self);
        for (_, node) in &self.members {
            match node {
                IrNode::Object(object) => object.walk(out),
                IrNode::Ordered(items) => items.values().for_each(|o| o.walk(out)),
                IrNode::Unordered(items) => items.values().for_each(|o| o.walk(out)),
                _ => {}
            }
        }
    }
}

/// Capture the live part of a graph
pub fn write(graph: &Graph, schema: &Schema) -> Result<IrDocument, CodecError> {
    let view = GraphView::new(graph, schema);
    Ok(IrDocument {
        version: schema.version().to_string(),
        root: write_object(&view, graph.root())?,
    })
}

fn write_object(view: &GraphView<'_>, id: NodeId) -> Result<IrObject, CodecError> {
    let graph = view.graph();
    let schema = view.schema();
    let Some(Body::Object { class, members }) = graph.get(id).map(|e| e.body()) else {
        return Err(CodecError::Layout(format!("{} is not an object", id)));
    };
    let spec = schema
        .class(*class)
        .ok_or_else(|| CodecError::Schema(format!("unknown {}", class)))?;

    let mut out = Vec::with_capacity(members.len());
    for (member, &member_id) in spec.members.iter().zip(members) {
        let node = match member.kind {
            MemberKind::Leaf(kind) => {
                let value = view
                    .leaf(member_id)
                    .ok_or_else(|| CodecError::Layout(format!("{} is not a leaf", member_id)))?;
                leaf_to_ir(schema, kind, value)?
            }
            MemberKind::Object(_) => IrNode::Object(write_object(view, member_id)?),
            MemberKind::Container(kind, _) => {
                let children = view.children(member_id);
                let live = children.iter().filter(|c| view.is_live(c.node));
                if kind.is_ordered() {
                    let mut items = BTreeMap::new();
                    for child in live {
                        if let SlotKey::Float(key) = child.key {
                            items.insert(key.clone(), write_object(view, child.node)?);
                        }
                    }
                    IrNode::Ordered(items)
                } else {
                    let mut items = BTreeMap::new();
                    for child in live {
                        if let SlotKey::Random(key) = child.key {
                            items.insert(*key, write_object(view, child.node)?);
                        }
                    }
                    IrNode::Unordered(items)
                }
            }
            MemberKind::Message => IrNode::Message,
        };
        out.push((member.name.clone(), node));
    }
    Ok(IrObject { id, class: spec.name.clone(), members: out })
}

fn leaf_to_ir(schema: &Schema, kind: LeafKind, value: &Value) -> Result<IrNode, CodecError> {
    Ok(match (kind, value) {
        (_, Value::Bool(v)) => IrNode::Bool(*v),
        (_, Value::Int(v)) => IrNode::Int(*v),
        (_, Value::Float(v)) => IrNode::Float(*v),
        (_, Value::Blob(v)) => IrNode::Blob(v.clone()),
        (_, Value::String(v)) => IrNode::String(v.clone()),
        (_, Value::Ref(id)) => IrNode::ObjectRef(*id),
        (LeafKind::Enum(id), Value::Enum(index)) => {
            let spec = schema
                .enumeration(id)
                .ok_or_else(|| CodecError::Schema(format!("unknown enumeration {:?}", id)))?;
            let enumerator = spec
                .enumerators
                .get(*index as usize)
                .ok_or_else(|| CodecError::Schema(format!("enumerator {} out of range for {}", index, spec.name)))?;
            IrNode::Enum { name: spec.name.clone(), enumerator: enumerator.clone() }
        }
        (_, Value::Enum(_)) => return Err(CodecError::Schema("enum value in a non-enum leaf".into())),
    })
}

/// Build a graph from a document.
///
/// Every object comes out added and nothing is synchronized yet, so that
/// structural checks and validators see the whole document as new.
pub fn build(doc: &IrDocument, schema: &Schema) -> Result<Graph, CodecError> {
    if doc.version != schema.version() {
        return Err(CodecError::Schema(format!(
            "document version '{}' does not match schema '{}'",
            doc.version,
            schema.version()
        )));
    }
    let root = schema.root();
    if doc.root.class != root.name {
        return Err(CodecError::Schema(format!("root class '{}' is not '{}'", doc.root.class, root.name)));
    }
    if doc.root.id != NodeId::ROOT {
        return Err(CodecError::Layout(format!("root id {} is not {}", doc.root.id, NodeId::ROOT)));
    }
    let mut graph = Graph::new(schema).map_err(|e| CodecError::Layout(e.to_string()))?;
    fill_object(&mut graph, schema, root, &doc.root)?;
    Ok(graph)
}

fn fill_object(graph: &mut Graph, schema: &Schema, spec: &ClassSpec, object: &IrObject) -> Result<(), CodecError> {
    for (name, node) in &object.members {
        let member = spec
            .member(name)
            .ok_or_else(|| CodecError::Schema(format!("class {} has no member '{}'", spec.name, name)))?;
        let id = object.id.offset(member.offset);
        match (member.kind, node) {
            (MemberKind::Leaf(kind), node) => {
                let value = ir_to_leaf(schema, kind, node, &spec.name, name)?;
                graph.load_leaf(id, value).map_err(|e| CodecError::Layout(e.to_string()))?;
            }
            (MemberKind::Object(class), IrNode::Object(inner)) => {
                let inner_spec = schema
                    .class(class)
                    .ok_or_else(|| CodecError::Schema(format!("unknown {}", class)))?;
                if inner.class != inner_spec.name || inner.id != id {
                    return Err(CodecError::Layout(format!(
                        "inline {} {} expected as {} {}",
                        inner.class, inner.id, inner_spec.name, id
                    )));
                }
                fill_object(graph, schema, inner_spec, inner)?;
            }
            (MemberKind::Container(kind, _), IrNode::Ordered(items)) if kind.is_ordered() => {
                for (key, child) in items {
                    fill_child(graph, schema, id, SlotKey::Float(key.clone()), child)?;
                }
            }
            (MemberKind::Container(kind, _), IrNode::Unordered(items)) if !kind.is_ordered() => {
                for (key, child) in items {
                    fill_child(graph, schema, id, SlotKey::Random(*key), child)?;
                }
            }
            (MemberKind::Message, IrNode::Message) => {}
            (_, _) => {
                return Err(CodecError::Schema(format!(
                    "member {}.{} does not hold this kind of value",
                    spec.name, name
                )))
            }
        }
    }
    Ok(())
}

fn fill_child(
    graph: &mut Graph,
    schema: &Schema,
    container: NodeId,
    key: SlotKey,
    child: &IrObject,
) -> Result<(), CodecError> {
    let spec = schema
        .class_named(&child.class)
        .ok_or_else(|| CodecError::Schema(format!("unknown class '{}'", child.class)))?;
    if child.id.is_null() || graph.contains(child.id) {
        return Err(CodecError::Layout(format!("duplicate or null id {}", child.id)));
    }
    graph
        .exec_insert(schema, container, &key, spec.id, child.id)
        .map_err(|e| CodecError::Layout(e.to_string()))?;
    fill_object(graph, schema, spec, child)
}

fn ir_to_leaf(schema: &Schema, kind: LeafKind, node: &IrNode, class: &str, name: &str) -> Result<Value, CodecError> {
    let value = match (kind, node) {
        (LeafKind::Bool, IrNode::Bool(v)) => Value::Bool(*v),
        (LeafKind::Int, IrNode::Int(v)) => Value::Int(*v),
        (LeafKind::Float, IrNode::Float(v)) => Value::Float(*v),
        (LeafKind::Blob, IrNode::Blob(v)) => Value::Blob(v.clone()),
        (LeafKind::String, IrNode::String(v)) => Value::String(v.clone()),
        (LeafKind::ObjectRef, IrNode::ObjectRef(id)) => Value::Ref(*id),
        (LeafKind::Enum(id), IrNode::Enum { name: enum_name, enumerator }) => {
            let spec = schema
                .enumeration(id)
                .ok_or_else(|| CodecError::Schema(format!("unknown enumeration {:?}", id)))?;
            if spec.name != *enum_name {
                return Err(CodecError::Schema(format!(
                    "{}.{} expects enumeration {}, found {}",
                    class, name, spec.name, enum_name
                )));
            }
            let index = spec
                .value_of(enumerator)
                .ok_or_else(|| CodecError::Schema(format!("{} has no enumerator '{}'", spec.name, enumerator)))?;
            Value::Enum(index)
        }
        _ => {
            return Err(CodecError::Schema(format!(
                "{}.{} expects a {} value",
                class,
                name,
                kind.name()
            )))
        }
    };
    Ok(value)
}
