//! Arena storage for the document graph.
//!
//! Every node lives in one map keyed by [`NodeId`]. Parents and container
//! slots refer to children by identifier, so rollback and re-execution never
//! leave dangling references behind. Each entry carries a change counter
//! propagated to its ancestors; diffing and synchronization only visit
//! entries touched since the last sync point.

/// Changes since the last sync point as opcodes
pub mod diff;
/// Cardinality checks and the host validator seam
pub mod validate;
/// Read-only queries for validators and observers
pub mod view;

use std::collections::BTreeMap;
use ahash::AHashMap;
use crate::types::error::ExecError;
use crate::types::ids::NodeId;
use crate::types::keys::SlotKey;
use crate::types::schema::{ClassId, ContainerKind, MemberKind, Schema};
use crate::types::value::{LeafKind, Value};

pub use view::{GraphView, Lifecycle};

/// State of a container slot relative to the last sync point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Created since the last sync point
    Added,
    /// Present at the last sync point and still present
    Resident,
    /// Present at the last sync point and since removed
    Removed,
    /// Created and removed again since the last sync point
    Discarded,
}

impl SlotState {
    /// Lifecycle as seen by validators
    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            SlotState::Added => Lifecycle::Added,
            SlotState::Resident => Lifecycle::Resident,
            SlotState::Removed | SlotState::Discarded => Lifecycle::Removed,
        }
    }

    fn is_gone(&self) -> bool {
        matches!(self, SlotState::Removed | SlotState::Discarded)
    }
}

/// One slot of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Child object
    pub node: NodeId,
    /// Lifecycle of the slot
    pub state: SlotState,
}

/// A keyed collection of child objects
#[derive(Debug, Clone)]
pub struct Container {
    /// Container flavour
    pub kind: ContainerKind,
    /// Declared element class
    pub class: ClassId,
    /// Slots in key order
    pub slots: BTreeMap<SlotKey, Slot>,
}

/// Payload of an arena entry
#[derive(Debug, Clone)]
pub enum Body {
    /// Object with its members in schema order
    Object {
        /// Object class
        class: ClassId,
        /// Member identifiers, aligned with the class members
        members: Vec<NodeId>,
    },
    /// Leaf value with its value at the last sync point
    Leaf {
        /// Leaf kind
        kind: LeafKind,
        /// Current value
        current: Value,
        /// Value at the last sync point
        before: Value,
    },
    /// Container of objects
    Container(Container),
    /// Ephemeral message slot with the messages pushed since the last sync point
    Message {
        /// Pending payloads in push order
        pending: Vec<Vec<u8>>,
    },
}

/// One node of the graph
#[derive(Debug, Clone)]
pub struct Entry {
    pub(crate) parent: Option<NodeId>,
    pub(crate) key: Option<SlotKey>,
    pub(crate) body: Body,
    pub(crate) moved_from: Option<(NodeId, SlotKey)>,
    pub(crate) changes: u32,
}

impl Entry {
    fn new(parent: Option<NodeId>, key: Option<SlotKey>, body: Body) -> Self {
        Self { parent, key, body, moved_from: None, changes: 0 }
    }

    /// Owning object or container
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Key of the slot holding this object, if it lives in a container
    pub fn key(&self) -> Option<&SlotKey> {
        self.key.as_ref()
    }

    /// Payload
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Changes recorded in this subtree since the last sync point
    pub fn changes(&self) -> u32 {
        self.changes
    }

    /// Class, if this entry is an object
    pub fn class(&self) -> Option<ClassId> {
        match &self.body {
            Body::Object { class, .. } => Some(*class),
            _ => None,
        }
    }
}

/// The document graph
#[derive(Debug, Clone, Default)]
pub struct Graph {
    entries: AHashMap<NodeId, Entry>,
    touched: Vec<NodeId>,
}

impl Graph {
    /// Create a graph holding a default root object, already synchronized
    pub fn new(schema: &Schema) -> Result<Self, ExecError> {
        let mut graph = Self::default();
        graph.instantiate(schema, schema.root().id, NodeId::ROOT, None, None)?;
        graph.synchronize();
        Ok(graph)
    }

    /// Identifier of the document root
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Entry by identifier
    pub fn get(&self, id: NodeId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    /// Whether an identifier is bound
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of bound identifiers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the graph holds no node at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether anything changed since the last sync point
    pub fn has_changes(&self) -> bool {
        self.entries.get(&NodeId::ROOT).map(|e| e.changes > 0).unwrap_or(false)
    }

    /// Whether `size` identifiers starting at `base` are all unbound
    pub fn can_allocate(&self, base: NodeId, size: u64) -> bool {
        (0..size).all(|n| !self.entries.contains_key(&base.offset(n)))
    }

    /// Whether `node` currently lives in `container` under `key`
    pub(crate) fn owns_slot(&self, container: NodeId, key: &SlotKey, node: NodeId) -> bool {
        self.entries
            .get(&node)
            .map(|e| e.parent == Some(container) && e.key.as_ref() == Some(key))
            .unwrap_or(false)
    }

    pub(crate) fn touched(&self) -> &[NodeId] {
        &self.touched
    }

    /// Slot state of the container slot holding `id`, if any
    fn slot_state(&self, id: NodeId) -> Option<SlotState> {
        let entry = self.entries.get(&id)?;
        let key = entry.key.as_ref()?;
        match &self.entries.get(&entry.parent?)?.body {
            Body::Container(c) => c.slots.get(key).map(|s| s.state),
            _ => None,
        }
    }

    /// Lifecycle of the nearest enclosing container slot
    pub fn lifecycle(&self, id: NodeId) -> Option<Lifecycle> {
        let mut current = id;
        loop {
            let entry = self.entries.get(&current)?;
            if entry.key.is_some() {
                return self.slot_state(current).map(|s| s.lifecycle());
            }
            match entry.parent {
                Some(parent) => current = parent,
                None => return Some(Lifecycle::Resident),
            }
        }
    }

    /// Whether `id` is bound and neither it nor any ancestor is removed
    pub fn is_live(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            let Some(entry) = self.entries.get(&current) else {
                return false;
            };
            if entry.key.is_some() {
                match self.slot_state(current) {
                    Some(state) if !state.is_gone() => {}
                    _ => return false,
                }
            }
            match entry.parent {
                Some(parent) => current = parent,
                None => return true,
            }
        }
    }

    /// Identifier of a member of an object
    pub fn member(&self, schema: &Schema, object: NodeId, name: &str) -> Option<NodeId> {
        let Body::Object { class, members } = &self.entries.get(&object)?.body else {
            return None;
        };
        let class = schema.class(*class)?;
        let index = class.members.iter().position(|m| m.name == name)?;
        members.get(index).copied()
    }

    /// Record a change on `id` and every ancestor
    fn touch(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(cid) = current {
            let Some(entry) = self.entries.get_mut(&cid) else {
                break;
            };
            if entry.changes == 0 {
                self.touched.push(cid);
            }
            entry.changes = entry.changes.saturating_add(1);
            current = entry.parent;
        }
    }

    /// Bind an object of `class` and all its members starting at `base`
    pub(crate) fn instantiate(
        &mut self,
        schema: &Schema,
        class: ClassId,
        base: NodeId,
        parent: Option<NodeId>,
        key: Option<SlotKey>,
    ) -> Result<(), ExecError> {
        let spec = schema
            .class(class)
            .ok_or_else(|| ExecError::corruption(base, format!("unknown {}", class)))?;
        if !self.can_allocate(base, spec.size) {
            return Err(ExecError::collision(base, "identifier range already bound"));
        }
        self.bind_object(schema, class, base, parent, key);
        self.touch(base);
        Ok(())
    }

    fn bind_object(
        &mut self,
        schema: &Schema,
        class: ClassId,
        base: NodeId,
        parent: Option<NodeId>,
        key: Option<SlotKey>,
    ) {
        let Some(spec) = schema.class(class) else {
            return;
        };
        let members: Vec<NodeId> = spec.members.iter().map(|m| base.offset(m.offset)).collect();
        for (member, id) in spec.members.iter().zip(&members) {
            let id = *id;
            let body = match member.kind {
                MemberKind::Leaf(kind) => Body::Leaf {
                    kind,
                    current: kind.default_value(),
                    before: kind.default_value(),
                },
                MemberKind::Object(inner) => {
                    self.bind_object(schema, inner, id, Some(base), None);
                    continue;
                }
                MemberKind::Container(kind, class) => Body::Container(Container {
                    kind,
                    class,
                    slots: BTreeMap::new(),
                }),
                MemberKind::Message => Body::Message { pending: Vec::new() },
            };
            let mut entry = Entry::new(Some(base), None, body);
            entry.changes = 1;
            self.touched.push(id);
            self.entries.insert(id, entry);
        }
        let mut entry = Entry::new(parent, key, Body::Object { class, members });
        entry.changes = 1;
        self.touched.push(base);
        self.entries.insert(base, entry);
    }

    /// Unbind an object, its members and the children it still owns
    pub(crate) fn destroy(&mut self, id: NodeId) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        match entry.body {
            Body::Object { members, .. } => {
                for member in members {
                    self.destroy(member);
                }
            }
            Body::Container(container) => {
                for (key, slot) in &container.slots {
                    if self.owns_slot(id, key, slot.node) {
                        self.destroy(slot.node);
                    }
                }
            }
            Body::Leaf { .. } | Body::Message { .. } => {}
        }
    }

    fn container_mut(&mut self, id: NodeId) -> Result<&mut Container, ExecError> {
        match self.entries.get_mut(&id).map(|e| &mut e.body) {
            Some(Body::Container(c)) => Ok(c),
            Some(_) => Err(ExecError::bad_access(id, "not a container")),
            None => Err(ExecError::bad_access(id, "container not bound")),
        }
    }

    fn container(&self, id: NodeId) -> Result<&Container, ExecError> {
        match self.entries.get(&id).map(|e| &e.body) {
            Some(Body::Container(c)) => Ok(c),
            Some(_) => Err(ExecError::bad_access(id, "not a container")),
            None => Err(ExecError::bad_access(id, "container not bound")),
        }
    }

    /// Validate a slot key and element class against a container
    fn check_slot(
        &self,
        schema: &Schema,
        container: NodeId,
        key: &SlotKey,
        class: ClassId,
    ) -> Result<(), ExecError> {
        let c = self.container(container)?;
        let key_matches = matches!(
            (c.kind.is_ordered(), key),
            (true, SlotKey::Float(_)) | (false, SlotKey::Random(_))
        );
        if !key_matches {
            return Err(ExecError::corruption(container, format!("{} key in {} container", key, c.kind.name())));
        }
        if schema.class(class).is_none() {
            return Err(ExecError::corruption(container, format!("unknown {}", class)));
        }
        if !schema.is_a(class, c.class) {
            return Err(ExecError::corruption(
                container,
                format!("{} is not an element class of this container", class),
            ));
        }
        if !self.is_live(container) {
            return Err(ExecError::collision(container, "container is not live"));
        }
        Ok(())
    }

    /// Set a leaf, checking (or in correcting mode rewriting) the expected value
    pub(crate) fn exec_set(
        &mut self,
        target: NodeId,
        expected: &mut Value,
        new: &Value,
        correct: bool,
    ) -> Result<(), ExecError> {
        let live = self.is_live(target);
        let entry = self
            .entries
            .get_mut(&target)
            .ok_or_else(|| ExecError::bad_access(target, "leaf not bound"))?;
        let Body::Leaf { kind, current, .. } = &mut entry.body else {
            return Err(ExecError::bad_access(target, "not a leaf"));
        };
        if !kind.accepts(new) || !kind.accepts(expected) {
            return Err(ExecError::corruption(target, format!("value kind does not match {} leaf", kind.name())));
        }
        if !live {
            return Err(ExecError::collision(target, "leaf owner is not live"));
        }
        if current != expected {
            if !correct {
                return Err(ExecError::collision(
                    target,
                    format!("expected {} but found {}", expected, current),
                ));
            }
            *expected = current.clone();
        }
        *current = new.clone();
        self.touch(target);
        Ok(())
    }

    /// Insert `node` at `key`, creating it or reviving a removed slot
    pub(crate) fn exec_insert(
        &mut self,
        schema: &Schema,
        container: NodeId,
        key: &SlotKey,
        class: ClassId,
        node: NodeId,
    ) -> Result<(), ExecError> {
        self.check_slot(schema, container, key, class)?;
        match self.container(container)?.slots.get(key).copied() {
            None => {
                self.instantiate(schema, class, node, Some(container), Some(key.clone()))?;
                self.container_mut(container)?
                    .slots
                    .insert(key.clone(), Slot { node, state: SlotState::Added });
            }
            Some(slot) if slot.node == node && slot.state.is_gone() => {
                let class_matches = self.entries.get(&node).and_then(|e| e.class()) == Some(class);
                if !class_matches || !self.owns_slot(container, key, node) {
                    return Err(ExecError::collision(container, format!("{} cannot be revived at {}", node, key)));
                }
                let revived = match slot.state {
                    SlotState::Discarded => SlotState::Added,
                    _ => SlotState::Resident,
                };
                if let Some(s) = self.container_mut(container)?.slots.get_mut(key) {
                    s.state = revived;
                }
            }
            Some(slot) => {
                return Err(ExecError::collision(
                    container,
                    format!("key {} already holds {}", key, slot.node),
                ))
            }
        }
        self.touch(node);
        Ok(())
    }

    /// Erase `node` from `key`; the node stays bound until the next sync point
    pub(crate) fn exec_erase(
        &mut self,
        schema: &Schema,
        container: NodeId,
        key: &SlotKey,
        class: ClassId,
        node: NodeId,
    ) -> Result<(), ExecError> {
        self.check_slot(schema, container, key, class)?;
        let slot = match self.container(container)?.slots.get(key).copied() {
            Some(slot) if slot.node == node && !slot.state.is_gone() => slot,
            Some(slot) => {
                return Err(ExecError::collision(
                    container,
                    format!("key {} holds {} ({:?}), not {}", key, slot.node, slot.state, node),
                ))
            }
            None => return Err(ExecError::collision(container, format!("key {} is absent", key))),
        };
        if self.entries.get(&node).and_then(|e| e.class()) != Some(class) {
            return Err(ExecError::corruption(node, format!("class tag {} does not match", class)));
        }
        let erased = match slot.state {
            SlotState::Added => SlotState::Discarded,
            _ => SlotState::Removed,
        };
        if let Some(s) = self.container_mut(container)?.slots.get_mut(key) {
            s.state = erased;
        }
        self.touch(container);
        Ok(())
    }

    /// Move `node` from `src[src_key]` to `dst[dst_key]`
    pub(crate) fn exec_move(
        &mut self,
        schema: &Schema,
        node: NodeId,
        src: NodeId,
        src_key: &SlotKey,
        dst: NodeId,
        dst_key: &SlotKey,
    ) -> Result<(), ExecError> {
        let class = self
            .entries
            .get(&node)
            .and_then(|e| e.class())
            .ok_or_else(|| ExecError::bad_access(node, "moved object not bound"))?;
        self.check_slot(schema, src, src_key, class)?;
        self.check_slot(schema, dst, dst_key, class)?;

        let from = match self.container(src)?.slots.get(src_key).copied() {
            Some(slot) if slot.node == node && !slot.state.is_gone() => slot.state,
            _ => return Err(ExecError::collision(src, format!("{} is not at {}", node, src_key))),
        };
        let to = match self.container(dst)?.slots.get(dst_key).copied() {
            None => SlotState::Added,
            Some(slot) if slot.node == node && slot.state == SlotState::Removed => SlotState::Resident,
            Some(slot) => {
                return Err(ExecError::collision(
                    dst,
                    format!("key {} already holds {}", dst_key, slot.node),
                ))
            }
        };

        {
            let source = self.container_mut(src)?;
            if from == SlotState::Added {
                source.slots.remove(src_key);
            } else if let Some(s) = source.slots.get_mut(src_key) {
                s.state = SlotState::Removed;
            }
        }
        self.container_mut(dst)?
            .slots
            .insert(dst_key.clone(), Slot { node, state: to });

        if let Some(entry) = self.entries.get_mut(&node) {
            entry.parent = Some(dst);
            entry.key = Some(dst_key.clone());
            if to == SlotState::Resident {
                entry.moved_from = None;
            } else if from == SlotState::Resident && entry.moved_from.is_none() {
                entry.moved_from = Some((src, src_key.clone()));
            }
        }
        self.touch(src);
        self.touch(node);
        Ok(())
    }

    /// Push (forward) or pop (backward) an ephemeral message
    pub(crate) fn exec_message(&mut self, target: NodeId, payload: &[u8], push: bool) -> Result<(), ExecError> {
        let live = self.is_live(target);
        let entry = self
            .entries
            .get_mut(&target)
            .ok_or_else(|| ExecError::bad_access(target, "message slot not bound"))?;
        let Body::Message { pending } = &mut entry.body else {
            return Err(ExecError::bad_access(target, "not a message slot"));
        };
        if push {
            if !live {
                return Err(ExecError::collision(target, "message owner is not live"));
            }
            pending.push(payload.to_vec());
        } else {
            match pending.last() {
                Some(last) if last.as_slice() == payload => {
                    pending.pop();
                }
                _ => return Err(ExecError::collision(target, "message to retract is not the latest")),
            }
        }
        self.touch(target);
        Ok(())
    }

    /// Reset every leaf below `object` to its default and erase every child
    /// it still holds, so that a following erase of `object` leaves nothing
    /// behind that a diff would need to describe separately.
    pub(crate) fn clear_subtree(&mut self, schema: &Schema, object: NodeId) -> Result<(), ExecError> {
        let members = match self.entries.get(&object).map(|e| &e.body) {
            Some(Body::Object { members, .. }) => members.clone(),
            _ => return Err(ExecError::bad_access(object, "not an object")),
        };
        for member in members {
            let children: Vec<(SlotKey, Slot)> = match self.entries.get_mut(&member).map(|e| &mut e.body) {
                Some(Body::Leaf { kind, current, .. }) => {
                    let default = kind.default_value();
                    if *current != default {
                        *current = default;
                        self.touch(member);
                    }
                    continue;
                }
                Some(Body::Object { .. }) => {
                    self.clear_subtree(schema, member)?;
                    continue;
                }
                Some(Body::Container(c)) => c
                    .slots
                    .iter()
                    .filter(|(_, s)| !s.state.is_gone())
                    .map(|(k, s)| (k.clone(), *s))
                    .collect(),
                Some(Body::Message { .. }) | None => continue,
            };
            for (key, slot) in children {
                let Some(class) = self.entries.get(&slot.node).and_then(|e| e.class()) else {
                    continue;
                };
                self.clear_subtree(schema, slot.node)?;
                self.exec_erase(schema, member, &key, class, slot.node)?;
            }
        }
        Ok(())
    }

    /// Make the current state the new sync point.
    ///
    /// Leaves take their current value as `before`, added slots become
    /// resident, removed slots are purged (destroying nodes still owned by
    /// the purged slot), and pending messages are dropped.
    pub fn synchronize(&mut self) {
        let touched = std::mem::take(&mut self.touched);
        for id in touched {
            let mut purge: Vec<(SlotKey, NodeId)> = Vec::new();
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            entry.changes = 0;
            entry.moved_from = None;
            match &mut entry.body {
                Body::Leaf { current, before, .. } => {
                    if before != current {
                        *before = current.clone();
                    }
                }
                Body::Container(c) => {
                    c.slots.retain(|key, slot| match slot.state {
                        SlotState::Removed | SlotState::Discarded => {
                            purge.push((key.clone(), slot.node));
                            false
                        }
                        SlotState::Added => {
                            slot.state = SlotState::Resident;
                            true
                        }
                        SlotState::Resident => true,
                    });
                }
                Body::Message { pending } => pending.clear(),
                Body::Object { .. } => {}
            }
            for (key, node) in purge {
                if self.owns_slot(id, &key, node) {
                    self.destroy(node);
                }
            }
        }
    }

    /// Every bound identifier, for snapshot bookkeeping
    pub(crate) fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.keys()
    }

    /// Overwrite a leaf's current and sync-point value, used when importing
    pub(crate) fn load_leaf(&mut self, id: NodeId, value: Value) -> Result<(), ExecError> {
        match self.entries.get_mut(&id).map(|e| &mut e.body) {
            Some(Body::Leaf { kind, current, before }) => {
                if !kind.accepts(&value) {
                    return Err(ExecError::corruption(id, format!("value kind does not match {} leaf", kind.name())));
                }
                *current = value.clone();
                *before = value;
                Ok(())
            }
            _ => Err(ExecError::bad_access(id, "not a leaf")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::keys::RandomKey;
    use crate::types::schema::fixtures;

    fn objects(graph: &Graph, schema: &Schema) -> NodeId {
        graph.member(schema, graph.root(), "objects").unwrap()
    }

    #[test]
    fn test_new_graph_binds_root_layout() {
        let schema = fixtures::patcher();
        let graph = Graph::new(&schema).unwrap();
        assert_eq!(graph.len() as u64, schema.root().size);
        assert!(!graph.has_changes());
        assert!(graph.is_live(graph.root()));
        assert_eq!(graph.lifecycle(graph.root()), Some(Lifecycle::Resident));
    }

    #[test]
    fn test_insert_erase_and_sync_lifecycle() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = objects(&graph, &schema);
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        let key = SlotKey::Random(RandomKey::generate());

        graph.exec_insert(&schema, objects, &key, class, node).unwrap();
        assert_eq!(graph.lifecycle(node), Some(Lifecycle::Added));
        assert!(graph.has_changes());
        assert!(graph.exec_insert(&schema, objects, &key, class, node).is_err());

        graph.synchronize();
        assert_eq!(graph.lifecycle(node), Some(Lifecycle::Resident));

        graph.exec_erase(&schema, objects, &key, class, node).unwrap();
        assert_eq!(graph.lifecycle(node), Some(Lifecycle::Removed));
        assert!(graph.contains(node));
        assert!(!graph.is_live(node));

        graph.synchronize();
        assert!(!graph.contains(node));
        assert_eq!(graph.len() as u64, schema.root().size);
    }

    #[test]
    fn test_erase_of_added_slot_leaves_tombstone_until_sync() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = objects(&graph, &schema);
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        let key = SlotKey::Random(RandomKey::generate());

        graph.exec_insert(&schema, objects, &key, class, node).unwrap();
        graph.exec_erase(&schema, objects, &key, class, node).unwrap();
        assert!(graph.contains(node));
        graph.exec_insert(&schema, objects, &key, class, node).unwrap();
        assert_eq!(graph.lifecycle(node), Some(Lifecycle::Added));
        graph.exec_erase(&schema, objects, &key, class, node).unwrap();
        graph.synchronize();
        assert!(!graph.contains(node));
    }

    #[test]
    fn test_set_checks_expected_value() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let name = graph.member(&schema, graph.root(), "name").unwrap();

        let mut expected = Value::from("");
        graph.exec_set(name, &mut expected, &Value::from("a"), false).unwrap();

        let mut stale = Value::from("");
        let err = graph.exec_set(name, &mut stale, &Value::from("b"), false).unwrap_err();
        assert!(matches!(err, ExecError::Collision { .. }));

        graph.exec_set(name, &mut stale, &Value::from("b"), true).unwrap();
        assert_eq!(stale, Value::from("a"));

        let mut wrong = Value::Int(0);
        let err = graph.exec_set(name, &mut wrong, &Value::Int(1), false).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rejects_wrong_key_kind_and_class() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = objects(&graph, &schema);
        let link = schema.class_named("Link").unwrap().id;
        let float_key = SlotKey::Float(crate::types::keys::FloatKey::generate(None, None).unwrap());
        let object = schema.class_named("Object").unwrap().id;

        let err = graph
            .exec_insert(&schema, objects, &float_key, object, NodeId::new(5, 1, 1))
            .unwrap_err();
        assert!(matches!(err, ExecError::Corruption { .. }));

        let key = SlotKey::Random(RandomKey::generate());
        let err = graph.exec_insert(&schema, objects, &key, link, NodeId::new(5, 1, 1)).unwrap_err();
        assert!(matches!(err, ExecError::Corruption { .. }));

        let comment = schema.class_named("Comment").unwrap().id;
        graph.exec_insert(&schema, objects, &key, comment, NodeId::new(5, 1, 1)).unwrap();
    }

    #[test]
    fn test_move_and_move_back_restores_slots() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = objects(&graph, &schema);
        let layers = graph.member(&schema, graph.root(), "layers").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        let src_key = SlotKey::Random(RandomKey::generate());
        let dst_key = SlotKey::Float(crate::types::keys::FloatKey::generate(None, None).unwrap());

        graph.exec_insert(&schema, objects, &src_key, class, node).unwrap();
        graph.synchronize();

        graph.exec_move(&schema, node, objects, &src_key, layers, &dst_key).unwrap();
        assert_eq!(graph.get(node).unwrap().parent(), Some(layers));
        assert_eq!(graph.get(node).unwrap().moved_from, Some((objects, src_key.clone())));
        assert_eq!(graph.lifecycle(node), Some(Lifecycle::Added));

        graph.exec_move(&schema, node, layers, &dst_key, objects, &src_key).unwrap();
        assert_eq!(graph.get(node).unwrap().parent(), Some(objects));
        assert_eq!(graph.get(node).unwrap().moved_from, None);
        assert_eq!(graph.lifecycle(node), Some(Lifecycle::Resident));
        assert!(graph.container(layers).unwrap().slots.is_empty());

        graph.synchronize();
        assert!(graph.contains(node));
    }

    #[test]
    fn test_sync_keeps_node_moved_out_of_purged_slot() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = objects(&graph, &schema);
        let layers = graph.member(&schema, graph.root(), "layers").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        let src_key = SlotKey::Random(RandomKey::generate());
        let dst_key = SlotKey::Float(crate::types::keys::FloatKey::generate(None, None).unwrap());

        graph.exec_insert(&schema, objects, &src_key, class, node).unwrap();
        graph.synchronize();
        graph.exec_move(&schema, node, objects, &src_key, layers, &dst_key).unwrap();
        graph.synchronize();

        assert!(graph.contains(node));
        assert!(graph.container(objects).unwrap().slots.is_empty());
        assert_eq!(graph.lifecycle(node), Some(Lifecycle::Resident));
    }

    #[test]
    fn test_messages_push_and_retract() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = objects(&graph, &schema);
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        let key = SlotKey::Random(RandomKey::generate());
        graph.exec_insert(&schema, objects, &key, class, node).unwrap();
        let events = graph.member(&schema, node, "events").unwrap();

        graph.exec_message(events, b"bang", true).unwrap();
        assert!(graph.exec_message(events, b"other", false).is_err());
        graph.exec_message(events, b"bang", false).unwrap();
        graph.exec_message(events, b"bang", true).unwrap();
        graph.synchronize();
        assert!(matches!(graph.get(events).unwrap().body(), Body::Message { pending } if pending.is_empty()));
    }
}
