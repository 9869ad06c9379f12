//! Transactions: ordered, atomically applied runs of opcodes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use serde::{Serialize, Deserialize};
use crate::constants::LABEL_KEY;
use crate::graph::Graph;
use crate::{log_error, log_trace};
use crate::ops::opcode::{Direction, Mode, Op, Opcode};
use crate::types::error::ExecError;
use crate::types::ids::{NodeId, TxId};
use crate::types::schema::Schema;

/// An identified list of opcodes with free-form metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier
    pub id: TxId,
    /// Free-form metadata; the undo label lives under `"label"`
    pub metadata: BTreeMap<String, String>,
    /// Opcodes in execution order
    pub opcodes: Vec<Opcode>,
}

impl Transaction {
    /// Create an empty transaction
    pub fn new(id: TxId) -> Self {
        Self { id, metadata: BTreeMap::new(), opcodes: Vec::new() }
    }

    /// Create a transaction from opcodes
    pub fn with_opcodes(id: TxId, opcodes: Vec<Opcode>) -> Self {
        Self { id, metadata: BTreeMap::new(), opcodes }
    }

    /// Undo label, if any
    pub fn label(&self) -> Option<&str> {
        self.metadata.get(LABEL_KEY).map(String::as_str)
    }

    /// Set the undo label
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.metadata.insert(LABEL_KEY.to_string(), label.into());
    }

    /// Whether the transaction holds no opcode
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Number of opcodes
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Whether undo has anything to replay
    pub fn is_undoable(&self) -> bool {
        self.opcodes.iter().any(|op| !op.is_out_of_undo())
    }

    /// Execute every opcode, or none.
    ///
    /// Backward execution runs the inverse opcodes in reverse order. When an
    /// opcode fails, the ones already applied are executed in the opposite
    /// direction and the first error is returned.
    pub fn execute(
        &mut self,
        graph: &mut Graph,
        schema: &Schema,
        direction: Direction,
        mode: Mode,
    ) -> Result<(), ExecError> {
        let count = self.opcodes.len();
        let order: Vec<usize> = match direction {
            Direction::Forward => (0..count).collect(),
            Direction::Backward => (0..count).rev().collect(),
        };
        for (done, &index) in order.iter().enumerate() {
            log_trace!("{} {:?} {}", self.id, direction, self.opcodes[index]);
            if let Err(err) = self.opcodes[index].execute(graph, schema, direction, mode) {
                for &undo in order[..done].iter().rev() {
                    if let Err(undo_err) = self.opcodes[undo].execute(graph, schema, direction.opposite(), Mode::Strict) {
                        log_error!("Rollback of {} failed at {}: {}", self.id, self.opcodes[undo], undo_err);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Execute every opcode that applies and drop the ones that do not.
    ///
    /// Returns the errors of the dropped opcodes.
    pub fn apply_tolerant(&mut self, graph: &mut Graph, schema: &Schema, mode: Mode) -> Vec<ExecError> {
        let mut errors = Vec::new();
        self.opcodes.retain_mut(|op| match op.execute(graph, schema, Direction::Forward, mode) {
            Ok(()) => true,
            Err(err) => {
                errors.push(err);
                false
            }
        });
        errors
    }

    /// Transaction undoing this one when executed forward
    pub fn invert(&self) -> Transaction {
        Transaction {
            id: self.id,
            metadata: self.metadata.clone(),
            opcodes: self.opcodes.iter().rev().map(Opcode::inverted).collect(),
        }
    }

    /// Copy keeping only the opcodes undo and redo replay
    pub fn undoable_part(&self) -> Transaction {
        Transaction {
            id: self.id,
            metadata: self.metadata.clone(),
            opcodes: self.opcodes.iter().filter(|op| !op.is_out_of_undo()).cloned().collect(),
        }
    }

    /// Merge consecutive assignments of the same leaf and drop no-ops.
    ///
    /// Assignments are only merged when no structural opcode separates
    /// them, so that a leaf is never assigned while its owner is absent.
    pub fn consolidate(&mut self) {
        let mut out: Vec<Opcode> = Vec::with_capacity(self.opcodes.len());
        let mut last_set: HashMap<NodeId, usize> = HashMap::new();
        for op in self.opcodes.drain(..) {
            if op.is_structural() {
                last_set.clear();
                out.push(op);
                continue;
            }
            let Op::Set { new, .. } = &op.op else {
                out.push(op);
                continue;
            };
            match last_set.get(&op.target) {
                Some(&index) => {
                    if let Op::Set { new: merged, .. } = &mut out[index].op {
                        *merged = new.clone();
                    }
                }
                None => {
                    last_set.insert(op.target, out.len());
                    out.push(op);
                }
            }
        }
        out.retain(|op| !op.is_noop());
        self.opcodes = out;
    }

    /// Fuse a run of transactions into one with identifier `id`
    pub fn squash(id: TxId, txs: &[Transaction]) -> Transaction {
        let mut fused = Transaction::new(id);
        for tx in txs {
            for (key, value) in &tx.metadata {
                fused.metadata.insert(key.clone(), value.clone());
            }
            fused.opcodes.extend(tx.opcodes.iter().cloned());
        }
        fused.consolidate();
        fused
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} opcodes", self.id, self.opcodes.len())?;
        if let Some(label) = self.label() {
            write!(f, ", \"{}\"", label)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Lifecycle;
    use crate::ops::opcode::tests::describe;
    use crate::types::keys::{RandomKey, SlotKey};
    use crate::types::schema::fixtures;
    use crate::types::value::Value;

    #[test]
    fn test_failing_transaction_leaves_graph_untouched() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let name = graph.member(&schema, graph.root(), "name").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let before = describe(&graph, &schema);

        let mut tx = Transaction::with_opcodes(
            TxId::new(5, 1, 1),
            vec![
                Opcode::insert(objects, SlotKey::from(RandomKey::generate()), class, NodeId::new(5, 1, 1)),
                Opcode::set(name, Value::from(""), Value::from("x")),
                Opcode::set(name, Value::from("wrong"), Value::from("y")),
            ],
        );
        let err = tx.execute(&mut graph, &schema, Direction::Forward, Mode::Strict).unwrap_err();
        assert!(matches!(err, ExecError::Collision { .. }));
        assert_eq!(describe(&graph, &schema), before);
        assert_ne!(graph.lifecycle(NodeId::new(5, 1, 1)), Some(Lifecycle::Added));
    }

    #[test]
    fn test_backward_undoes_forward() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let objects = graph.member(&schema, graph.root(), "objects").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);
        let text = node.offset(1);
        let before = describe(&graph, &schema);

        let mut tx = Transaction::with_opcodes(
            TxId::new(5, 1, 1),
            vec![
                Opcode::insert(objects, SlotKey::from(RandomKey::generate()), class, node),
                Opcode::set(text, Value::from(""), Value::from("dac~")),
            ],
        );
        tx.execute(&mut graph, &schema, Direction::Forward, Mode::Strict).unwrap();
        tx.execute(&mut graph, &schema, Direction::Backward, Mode::Strict).unwrap();
        assert_eq!(describe(&graph, &schema), before);
    }

    #[test]
    fn test_apply_tolerant_drops_failures() {
        let schema = fixtures::patcher();
        let mut graph = Graph::new(&schema).unwrap();
        let name = graph.member(&schema, graph.root(), "name").unwrap();
        let mut tx = Transaction::with_opcodes(
            TxId::new(5, 1, 1),
            vec![
                Opcode::set(name, Value::from("stale"), Value::from("a")),
                Opcode::set(NodeId::new(9, 9, 9), Value::Int(0), Value::Int(1)),
            ],
        );
        let errors = tx.apply_tolerant(&mut graph, &schema, Mode::Correct);
        assert_eq!(errors.len(), 1);
        assert_eq!(tx.len(), 1);
        assert_eq!(tx.opcodes[0].op, Op::Set { old: Value::from(""), new: Value::from("a") });
    }

    #[test]
    fn test_consolidate_merges_and_drops_noops() {
        let a = NodeId::new(0, 0, 10);
        let b = NodeId::new(0, 0, 11);
        let mut tx = Transaction::with_opcodes(
            TxId::new(5, 1, 1),
            vec![
                Opcode::set(a, Value::Int(0), Value::Int(1)),
                Opcode::set(b, Value::Int(0), Value::Int(5)),
                Opcode::set(a, Value::Int(1), Value::Int(2)),
                Opcode::set(b, Value::Int(5), Value::Int(0)),
            ],
        );
        tx.consolidate();
        assert_eq!(tx.opcodes, vec![Opcode::set(a, Value::Int(0), Value::Int(2))]);
    }

    #[test]
    fn test_consolidate_keeps_sets_across_structure() {
        let leaf = NodeId::new(5, 1, 2);
        let container = NodeId::new(0, 0, 2);
        let key = SlotKey::from(RandomKey::generate());
        let mut tx = Transaction::with_opcodes(
            TxId::new(5, 1, 1),
            vec![
                Opcode::set(leaf, Value::Int(0), Value::Int(1)),
                Opcode::erase(container, key.clone(), crate::types::schema::ClassId(0), NodeId::new(5, 1, 1)),
                Opcode::insert(container, key, crate::types::schema::ClassId(0), NodeId::new(5, 1, 1)),
                Opcode::set(leaf, Value::Int(1), Value::Int(2)),
            ],
        );
        tx.consolidate();
        assert_eq!(tx.len(), 4);
    }

    #[test]
    fn test_squash_equals_sequential_application() {
        let schema = fixtures::patcher();
        let mut sequential = Graph::new(&schema).unwrap();
        let mut squashed = sequential.clone();
        let name = sequential.member(&schema, sequential.root(), "name").unwrap();
        let objects = sequential.member(&schema, sequential.root(), "objects").unwrap();
        let class = schema.class_named("Object").unwrap().id;
        let node = NodeId::new(5, 1, 1);

        let mut first = Transaction::with_opcodes(
            TxId::new(5, 1, 1),
            vec![
                Opcode::set(name, Value::from(""), Value::from("a")),
                Opcode::insert(objects, SlotKey::from(RandomKey::generate()), class, node),
            ],
        );
        first.set_label("first");
        let mut second = Transaction::with_opcodes(
            TxId::new(5, 1, 2),
            vec![
                Opcode::set(name, Value::from("a"), Value::from("b")),
                Opcode::set(node.offset(5), Value::Int(0), Value::Int(2)),
            ],
        );
        second.set_label("second");

        let mut fused = Transaction::squash(TxId::new(5, 1, 2), &[first.clone(), second.clone()]);
        assert_eq!(fused.label(), Some("second"));

        first.execute(&mut sequential, &schema, Direction::Forward, Mode::Strict).unwrap();
        second.execute(&mut sequential, &schema, Direction::Forward, Mode::Strict).unwrap();
        fused.execute(&mut squashed, &schema, Direction::Forward, Mode::Strict).unwrap();
        assert_eq!(describe(&sequential, &schema), describe(&squashed, &schema));
    }

    #[test]
    fn test_invert_and_undoable() {
        let target = NodeId::new(0, 0, 10);
        let mut tx = Transaction::with_opcodes(
            TxId::new(5, 1, 1),
            vec![Opcode::set(target, Value::Int(0), Value::Int(1)), Opcode::message(target, vec![1])],
        );
        assert!(tx.is_undoable());
        assert_eq!(tx.undoable_part().len(), 1);
        let inv = tx.invert();
        assert_eq!(inv.opcodes[1], Opcode::set(target, Value::Int(1), Value::Int(0)));
        tx.opcodes.remove(0);
        assert!(!tx.is_undoable());
    }
}
