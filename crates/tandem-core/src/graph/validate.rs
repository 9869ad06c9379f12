//! Structural validation and the host validator seam.

use crate::graph::view::GraphView;
use crate::graph::{Body, Graph, SlotState};
use crate::types::error::ValidationError;
use crate::types::schema::ContainerKind;

/// Business rules a host enforces on top of the schema.
///
/// Called after every transaction is applied, with the user that committed
/// it. Returning an error makes the replica roll the transaction back.
pub trait Validator: Send + Sync {
    /// Check the graph after a transaction
    fn validate(&self, view: &GraphView<'_>, user: u64) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&GraphView<'_>, u64) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, view: &GraphView<'_>, user: u64) -> Result<(), ValidationError> {
        self(view, user)
    }
}

/// Validator that accepts every graph
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _view: &GraphView<'_>, _user: u64) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Check that every changed live optional or single container holds an
/// allowed combination of added, removed and resident elements
pub fn check_cardinality(graph: &Graph) -> Result<(), ValidationError> {
    for &id in graph.touched() {
        let Some(Body::Container(container)) = graph.get(id).map(|e| e.body()) else {
            continue;
        };
        if !matches!(container.kind, ContainerKind::Optional | ContainerKind::Single) {
            continue;
        }
        if !graph.is_live(id) {
            continue;
        }
        let (mut added, mut removed, mut resident) = (0usize, 0usize, 0usize);
        for slot in container.slots.values() {
            match slot.state {
                SlotState::Added => added += 1,
                SlotState::Removed => removed += 1,
                SlotState::Resident => resident += 1,
                SlotState::Discarded => {}
            }
        }
        let allowed = match container.kind {
            ContainerKind::Optional => matches!(
                (added, removed, resident),
                (0, 0, 0) | (1, 0, 0) | (0, 1, 0) | (1, 1, 0) | (0, 0, 1)
            ),
            _ => matches!((added, removed, resident), (1, 0, 0) | (1, 1, 0) | (0, 0, 1)),
        };
        if !allowed {
            return Err(ValidationError::new(format!(
                "{} container {} holds {} added, {} removed, {} resident",
                container.kind.name(),
                id,
                added,
                removed,
                resident
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ids::NodeId;
    use crate::types::keys::{RandomKey, SlotKey};
    use crate::types::schema::fixtures;

    #[test]
    fn test_optional_cardinality() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let selection = graph.member(&schema, graph.root(), "selection").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let (a, b) = (NodeId::new(5, 1, 1), NodeId::new(5, 1, 100));
        let (ka, kb) = (SlotKey::from(RandomKey::generate()), SlotKey::from(RandomKey::generate()));

        graph.exec_insert(&schema, selection, &ka, class, a).unwrap();
        assert!(check_cardinality(&graph).is_ok());
        graph.exec_insert(&schema, selection, &kb, class, b).unwrap();
        assert!(check_cardinality(&graph).is_err());
        graph.exec_erase(&schema, selection, &kb, class, b).unwrap();
        assert!(check_cardinality(&graph).is_ok());

        graph.synchronize();
        // Replacing the resident element is allowed.
        graph.exec_erase(&schema, selection, &ka, class, a).unwrap();
        graph.exec_insert(&schema, selection, &kb, class, b).unwrap();
        assert!(check_cardinality(&graph).is_ok());
    }

    #[test]
    fn test_single_must_be_filled_on_creation() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let slider = schema.class_named("Slider").unwrap().id;
        let point = schema.class_named("Point").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        graph
            .exec_insert(&schema, objects, &SlotKey::from(RandomKey::generate()), slider, node)
            .unwrap();
        assert!(check_cardinality(&graph).is_err());

        let range = graph.member(&schema, node, "range").unwrap();
        graph
            .exec_insert(&schema, range, &SlotKey::from(RandomKey::generate()), point, NodeId::new(5, 1, 100))
            .unwrap();
        assert!(check_cardinality(&graph).is_ok());
    }

    #[test]
    fn test_closure_validator() {
        let schema = fixtures::patcher();
        let graph = Graph::new(&schema).unwrap();
        let view = GraphView::new(&graph, &schema);
        let only_admin = |_: &GraphView<'_>, user: u64| {
            if user == 1 {
                Ok(())
            } else {
                Err(ValidationError::new("read only"))
            }
        };
        assert!(only_admin.validate(&view, 1).is_ok());
        assert!(only_admin.validate(&view, 2).is_err());
        assert!(AcceptAll.validate(&view, 2).is_ok());
    }
}
