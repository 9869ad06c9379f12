//! Read-only access to a graph for validators and applications.

use crate::graph::{Body, Graph, SlotState};
use crate::types::ids::NodeId;
use crate::types::keys::SlotKey;
use crate::types::schema::{ClassSpec, Schema};
use crate::types::value::Value;

/// Lifecycle of an object relative to the last sync point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Created since the last sync point
    Added,
    /// Present before and after
    Resident,
    /// Erased since the last sync point, still reachable until the next one
    Removed,
}

/// One element of a container as seen through a [`GraphView`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child<'g> {
    /// Slot key
    pub key: &'g SlotKey,
    /// Child object
    pub node: NodeId,
    /// Slot lifecycle
    pub lifecycle: Lifecycle,
}

/// Borrowed view pairing a graph with its schema
#[derive(Clone, Copy)]
pub struct GraphView<'g> {
    graph: &'g Graph,
    schema: &'g Schema,
}

impl<'g> GraphView<'g> {
    /// Create a view
    pub fn new(graph: &'g Graph, schema: &'g Schema) -> Self {
        Self { graph, schema }
    }

    /// Schema of the document
    pub fn schema(&self) -> &'g Schema {
        self.schema
    }

    /// Underlying graph
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Root object identifier
    pub fn root(&self) -> NodeId {
        self.graph.root()
    }

    /// Whether `id` is bound
    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains(id)
    }

    /// Whether `id` is bound and not removed
    pub fn is_live(&self, id: NodeId) -> bool {
        self.graph.is_live(id)
    }

    /// Lifecycle of `id`
    pub fn lifecycle(&self, id: NodeId) -> Option<Lifecycle> {
        self.graph.lifecycle(id)
    }

    /// Class of an object
    pub fn class_of(&self, id: NodeId) -> Option<&'g ClassSpec> {
        self.schema.class(self.graph.get(id)?.class()?)
    }

    /// Whether `id` is an object of class `name` or one of its subclasses
    pub fn is_a(&self, id: NodeId, name: &str) -> bool {
        match (self.graph.get(id).and_then(|e| e.class()), self.schema.class_named(name)) {
            (Some(class), Some(base)) => self.schema.is_a(class, base.id),
            _ => false,
        }
    }

    /// Identifier of a named member
    pub fn member(&self, object: NodeId, name: &str) -> Option<NodeId> {
        self.graph.member(self.schema, object, name)
    }

    /// Current value of a leaf
    pub fn leaf(&self, id: NodeId) -> Option<&'g Value> {
        match self.graph.get(id)?.body() {
            Body::Leaf { current, .. } => Some(current),
            _ => None,
        }
    }

    /// Value of a leaf at the last sync point
    pub fn leaf_before(&self, id: NodeId) -> Option<&'g Value> {
        match self.graph.get(id)?.body() {
            Body::Leaf { before, .. } => Some(before),
            _ => None,
        }
    }

    /// Current value of a named leaf member
    pub fn value(&self, object: NodeId, name: &str) -> Option<&'g Value> {
        self.leaf(self.member(object, name)?)
    }

    /// Whether anything changed at or below `id` since the last sync point
    pub fn changed(&self, id: NodeId) -> bool {
        self.graph.get(id).map(|e| e.changes() > 0).unwrap_or(false)
    }

    /// Parent object of an object held in a container
    pub fn owner(&self, id: NodeId) -> Option<NodeId> {
        let container = self.graph.get(id)?.parent()?;
        self.graph.get(container)?.parent()
    }

    /// Elements of a container in key order.
    ///
    /// Removed elements are listed with [`Lifecycle::Removed`]; elements
    /// that were moved elsewhere are not listed.
    pub fn children(&self, container: NodeId) -> Vec<Child<'g>> {
        let graph = self.graph;
        let Some(Body::Container(c)) = graph.get(container).map(|e| e.body()) else {
            return Vec::new();
        };
        c.slots
            .iter()
            .filter(|(_, slot)| slot.state != SlotState::Discarded)
            .filter(|(key, slot)| graph.owns_slot(container, key, slot.node))
            .map(|(key, slot)| Child { key, node: slot.node, lifecycle: slot.state.lifecycle() })
            .collect()
    }

    /// Live elements of a container in key order
    pub fn live_children(&self, container: NodeId) -> Vec<NodeId> {
        self.children(container)
            .into_iter()
            .filter(|c| c.lifecycle != Lifecycle::Removed)
            .map(|c| c.node)
            .collect()
    }

    /// Live elements of a named container member
    pub fn elements(&self, object: NodeId, name: &str) -> Vec<NodeId> {
        self.member(object, name)
            .map(|container| self.live_children(container))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::keys::RandomKey;
    use crate::types::schema::fixtures;

    #[test]
    fn test_children_hide_discarded_slots() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let class = schema.class_named("Comment").unwrap().id;
        let kept = NodeId::new(5, 1, 1);
        let dropped = NodeId::new(5, 1, 100);
        let (k1, k2) = (SlotKey::from(RandomKey::generate()), SlotKey::from(RandomKey::generate()));

        graph.exec_insert(&schema, objects, &k1, class, kept).unwrap();
        graph.exec_insert(&schema, objects, &k2, class, dropped).unwrap();
        graph.exec_erase(&schema, objects, &k2, class, dropped).unwrap();

        let view = GraphView::new(&graph, &schema);
        assert_eq!(view.elements(view.root(), "objects"), vec![kept]);
        assert!(view.is_a(kept, "Object"));
        assert!(view.is_a(kept, "Comment"));
        assert!(!view.is_a(kept, "Link"));
        assert_eq!(view.owner(kept), Some(view.root()));
        assert_eq!(view.value(kept, "locked"), Some(&Value::Bool(false)));
        assert!(view.changed(view.root()));
    }
}
