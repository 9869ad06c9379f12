//! Turns the changes recorded since the last sync point into opcodes.
//!
//! Only subtrees with a non-zero change counter are visited. Insertions,
//! moves, assignments and messages come out in tree order; the resets and
//! erasures of removed objects are deferred to the end, so that objects
//! moved out of a removed subtree leave it before it goes away.

use crate::graph::{Body, Graph, SlotState};
use crate::ops::opcode::Opcode;
use crate::types::ids::NodeId;
use crate::types::keys::SlotKey;

struct Diff<'g> {
    graph: &'g Graph,
    main: Vec<Opcode>,
    removals: Vec<Opcode>,
}

/// Opcodes taking the last sync point to the current state
pub fn collect(graph: &Graph) -> Vec<Opcode> {
    let mut diff = Diff { graph, main: Vec::new(), removals: Vec::new() };
    diff.node(graph.root(), false);
    let Diff { mut main, removals, .. } = diff;
    main.extend(removals);
    main
}

impl<'g> Diff<'g> {
    fn emit(&mut self, op: Opcode, removing: bool) {
        if removing {
            self.removals.push(op);
        } else {
            self.main.push(op);
        }
    }

    fn node(&mut self, id: NodeId, removing: bool) {
        let graph = self.graph;
        let Some(entry) = graph.get(id) else {
            return;
        };
        if entry.changes == 0 {
            return;
        }
        match &entry.body {
            Body::Leaf { current, before, .. } => {
                if current != before {
                    self.emit(Opcode::set(id, before.clone(), current.clone()), removing);
                }
            }
            Body::Object { members, .. } => {
                for &member in members {
                    self.node(member, removing);
                }
            }
            Body::Message { pending } => {
                for payload in pending {
                    self.emit(Opcode::message(id, payload.clone()), removing);
                }
            }
            Body::Container(container) => {
                for (key, slot) in &container.slots {
                    self.slot(id, key, slot.node, slot.state, removing);
                }
            }
        }
    }

    fn slot(&mut self, container: NodeId, key: &SlotKey, node: NodeId, state: SlotState, removing: bool) {
        let graph = self.graph;
        if !graph.owns_slot(container, key, node) {
            // Moved elsewhere; the destination slot describes it.
            return;
        }
        let Some(entry) = graph.get(node) else {
            return;
        };
        let Some(class) = entry.class() else {
            return;
        };
        let arrival = match &entry.moved_from {
            Some((src, src_key)) => Opcode::relocate(node, *src, src_key.clone(), container, key.clone()),
            None => Opcode::insert(container, key.clone(), class, node),
        };
        match state {
            SlotState::Added => {
                self.main.push(arrival);
                self.node(node, removing);
            }
            SlotState::Resident => self.node(node, removing),
            SlotState::Removed => {
                self.node(node, true);
                self.removals.push(Opcode::erase(container, key.clone(), class, node));
            }
            SlotState::Discarded => {
                // Created and erased in the same step: only an object that
                // existed elsewhere before needs describing.
                if entry.moved_from.is_some() {
                    self.main.push(arrival);
                    self.node(node, true);
                    self.removals.push(Opcode::erase(container, key.clone(), class, node));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::opcode::tests::describe;
    use crate::ops::opcode::{Direction, Mode, Op};
    use crate::types::keys::{FloatKey, RandomKey};
    use crate::types::schema::fixtures;
    use crate::types::value::Value;

    fn replay(base: &Graph, schema: &crate::types::schema::Schema, ops: &mut [Opcode]) -> Graph {
        let mut copy = base.clone();
        for op in ops.iter_mut() {
            op.execute(&mut copy, schema, Direction::Forward, Mode::Strict).unwrap();
        }
        copy
    }

    #[test]
    fn test_no_changes_no_opcodes() {
        let schema = fixtures::patcher();
        let graph = Graph::new(&schema).unwrap();
        assert!(collect(&graph).is_empty());
    }

    #[test]
    fn test_insert_then_set_replays_on_sync_point() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let base = graph.clone();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        graph
            .exec_insert(&schema, objects, &SlotKey::from(RandomKey::generate()), class, node)
            .unwrap();
        let text = graph.member(&schema, node, "text").unwrap();
        graph.exec_set(text, &mut Value::from(""), &Value::from("osc~"), false).unwrap();

        let mut ops = collect(&graph);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0].op, Op::Insert { .. }));
        assert!(matches!(ops[1].op, Op::Set { .. }));
        let replayed = replay(&base, &schema, &mut ops);
        assert_eq!(describe(&replayed, &schema), describe(&graph, &schema));
    }

    #[test]
    fn test_created_and_erased_emits_nothing() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        let key = SlotKey::from(RandomKey::generate());
        graph.exec_insert(&schema, objects, &key, class, node).unwrap();
        graph.clear_subtree(&schema, node).unwrap();
        graph.exec_erase(&schema, objects, &key, class, node).unwrap();
        assert!(collect(&graph).is_empty());
    }

    #[test]
    fn test_move_out_of_erased_parent_precedes_erase() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let layers = graph.member(&schema, graph.root(), "layers").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let parent = NodeId::new(5, 1, 1);
        let child = NodeId::new(5, 1, 100);
        let parent_key = SlotKey::from(RandomKey::generate());
        let child_key = SlotKey::from(FloatKey::generate(None, None).unwrap());
        graph.exec_insert(&schema, objects, &parent_key, class, parent).unwrap();
        let children = graph.member(&schema, parent, "children").unwrap();
        graph.exec_insert(&schema, children, &child_key, class, child).unwrap();
        let inlets = graph.member(&schema, parent, "inlets").unwrap();
        graph.exec_set(inlets, &mut Value::Int(0), &Value::Int(3), false).unwrap();
        graph.synchronize();
        let base = graph.clone();

        let layer_key = SlotKey::from(FloatKey::generate(None, None).unwrap());
        graph.exec_move(&schema, child, children, &child_key, layers, &layer_key).unwrap();
        graph.clear_subtree(&schema, parent).unwrap();
        graph.exec_erase(&schema, objects, &parent_key, class, parent).unwrap();

        let mut ops = collect(&graph);
        let kinds: Vec<&str> = ops
            .iter()
            .map(|o| match o.op {
                Op::Move { .. } => "move",
                Op::Set { .. } => "set",
                Op::Erase { .. } => "erase",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["move", "set", "erase"]);
        let replayed = replay(&base, &schema, &mut ops);
        assert_eq!(describe(&replayed, &schema), describe(&graph, &schema));
    }

    #[test]
    fn test_moved_then_erased_is_described_from_origin() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let layers = graph.member(&schema, graph.root(), "layers").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        let key = SlotKey::from(RandomKey::generate());
        graph.exec_insert(&schema, objects, &key, class, node).unwrap();
        graph.synchronize();
        let base = graph.clone();

        let layer_key = SlotKey::from(FloatKey::generate(None, None).unwrap());
        graph.exec_move(&schema, node, objects, &key, layers, &layer_key).unwrap();
        graph.exec_erase(&schema, layers, &layer_key, class, node).unwrap();

        let mut ops = collect(&graph);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0].op, Op::Move { .. }));
        assert!(matches!(ops[1].op, Op::Erase { .. }));
        let mut replayed = replay(&base, &schema, &mut ops);
        replayed.synchronize();
        graph.synchronize();
        assert!(!replayed.contains(node));
        assert!(!graph.contains(node));
    }

    #[test]
    fn test_messages_are_out_of_undo() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        graph
            .exec_insert(&schema, objects, &SlotKey::from(RandomKey::generate()), class, node)
            .unwrap();
        graph.synchronize();
        let events = graph.member(&schema, node, "events").unwrap();
        graph.exec_message(events, b"bang", true).unwrap();
        let ops = collect(&graph);
        assert_eq!(ops.len(), 1);
        assert!(ops[0].is_out_of_undo());
    }
}
