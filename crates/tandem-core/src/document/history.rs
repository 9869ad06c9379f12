//! Undo and redo of committed transactions.
//!
//! The history records what the application commits. Undoing executes the
//! recorded transaction backward in correcting mode, so changes made by
//! other replicas in the meantime are overridden rather than rejected, and
//! commits the result as a new transaction.

use crate::document::{Controller, Engine};
use crate::log_debug;
use crate::ops::{Direction, Transaction};
use crate::types::error::{CoreError, CoreResult};
use crate::types::ids::TxIdRange;

/// Label given to transactions produced by [`History::undo`]
pub const UNDO_LABEL: &str = "undo";

/// Label given to transactions produced by [`History::redo`]
pub const REDO_LABEL: &str = "redo";

/// Undo and redo stacks for one engine
#[derive(Debug, Default)]
pub struct History {
    undo: Vec<Transaction>,
    redo: Vec<Transaction>,
    limit: Option<usize>,
}

impl History {
    /// Create an unbounded history
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a history keeping at most `limit` undo steps
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    /// Record a committed transaction. Clears the redo stack.
    pub fn record(&mut self, tx: &Transaction) {
        if !tx.is_undoable() {
            return;
        }
        self.undo.push(tx.undoable_part());
        self.redo.clear();
        if let Some(limit) = self.limit {
            if self.undo.len() > limit {
                let excess = self.undo.len() - limit;
                self.undo.drain(..excess);
            }
        }
    }

    /// Whether there is something to undo
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Whether there is something to redo
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Label of the step [`History::undo`] would revert
    pub fn undo_label(&self) -> Option<&str> {
        self.undo.last().and_then(|tx| tx.label())
    }

    /// Label of the step [`History::redo`] would replay
    pub fn redo_label(&self) -> Option<&str> {
        self.redo.last().and_then(|tx| tx.label())
    }

    /// Revert the last recorded step and commit the result.
    ///
    /// Returns the committed transaction, or `None` when there was nothing
    /// to undo or the step no longer changes anything.
    pub fn undo(&mut self, engine: &mut Engine) -> CoreResult<Option<Transaction>> {
        self.replay(engine, Direction::Backward)
    }

    /// Replay the last undone step and commit the result
    pub fn redo(&mut self, engine: &mut Engine) -> CoreResult<Option<Transaction>> {
        self.replay(engine, Direction::Forward)
    }

    fn replay(&mut self, engine: &mut Engine, direction: Direction) -> CoreResult<Option<Transaction>> {
        if engine.replica().has_changes() {
            return Err(CoreError::invalid_input("commit or revert local changes before undo or redo"));
        }
        let (from, to, label) = match direction {
            Direction::Backward => (&mut self.undo, &mut self.redo, UNDO_LABEL),
            Direction::Forward => (&mut self.redo, &mut self.undo, REDO_LABEL),
        };
        let Some(mut step) = from.pop() else {
            return Ok(None);
        };
        if let Err(e) = engine.execute_local(&mut step, direction, Controller::Undo) {
            log_debug!("Dropping history step {}: {}", step.id, e);
            return Err(e);
        }
        let committed = engine.commit_labelled(label)?;
        to.push(step);
        Ok(committed)
    }

    /// Replace recorded steps in `range` with their fused form
    pub fn squash(&mut self, range: TxIdRange, tx: &Transaction) {
        for stack in [&mut self.undo, &mut self.redo] {
            if let Some(first) = stack.iter().position(|step| range.contains(&step.id)) {
                stack.retain(|step| !range.contains(&step.id));
                stack.insert(first, tx.undoable_part());
            }
        }
    }

    /// Forget every step
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::validate::AcceptAll;
    use crate::ops::{Op, Opcode};
    use crate::types::ids::TxId;
    use crate::types::schema::fixtures;
    use crate::types::value::Value;

    fn engine() -> Engine {
        Engine::new(fixtures::patcher(), Box::new(AcceptAll), 2, 1).unwrap()
    }

    #[test]
    fn test_undo_redo_cycle() {
        let mut engine = engine();
        let mut history = History::new();
        let root = engine.replica().root();
        let objects = engine.replica().member(root, "objects").unwrap();

        let node = engine.replica_mut().insert(objects, "Object").unwrap();
        engine.replica_mut().set_member(node, "text", "osc~").unwrap();
        engine.set_label("add oscillator");
        history.record(&engine.commit().unwrap().unwrap());
        assert_eq!(history.undo_label(), Some("add oscillator"));

        let undone = history.undo(&mut engine).unwrap().unwrap();
        assert_eq!(undone.label(), Some(UNDO_LABEL));
        assert!(engine.replica().view().live_children(objects).is_empty());
        assert!(history.can_redo());

        history.redo(&mut engine).unwrap();
        assert_eq!(engine.replica().view().live_children(objects), vec![node]);
        assert_eq!(engine.replica().value(node, "text").unwrap(), &Value::from("osc~"));
        assert!(history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(engine.pending_len(), 3);
    }

    #[test]
    fn test_undo_requires_clean_replica() {
        let mut engine = engine();
        let mut history = History::new();
        let root = engine.replica().root();
        engine.replica_mut().set_member(root, "name", "a").unwrap();
        history.record(&engine.commit().unwrap().unwrap());
        engine.replica_mut().set_member(root, "name", "b").unwrap();
        assert!(matches!(history.undo(&mut engine), Err(CoreError::InvalidInput(_))));
        assert!(history.can_undo());
    }

    #[test]
    fn test_messages_are_not_recorded() {
        let mut engine = engine();
        let mut history = History::new();
        let root = engine.replica().root();
        let objects = engine.replica().member(root, "objects").unwrap();
        let node = engine.replica_mut().insert(objects, "Object").unwrap();
        engine.commit().unwrap();
        let events = engine.replica().member(node, "events").unwrap();
        engine.replica_mut().send_message(events, b"bang".to_vec()).unwrap();
        history.record(&engine.commit().unwrap().unwrap());
        assert!(!history.can_undo());
    }

    #[test]
    fn test_squash_replaces_steps() {
        let mut history = History::new();
        let leaf = crate::types::ids::NodeId::ROOT.offset(5);
        let step = |nbr: u64, old: &str, new: &str| {
            Transaction::with_opcodes(
                TxId::new(2, 1, nbr),
                vec![Opcode::set(leaf, Value::from(old), Value::from(new))],
            )
        };
        history.record(&step(1, "", "a"));
        history.record(&step(2, "a", "b"));
        history.record(&step(3, "b", "c"));
        let fused = Transaction::squash(TxId::new(2, 1, 3), &[step(2, "a", "b"), step(3, "b", "c")]);
        history.squash(TxIdRange::new(2, 1, 2, 3), &fused);
        assert_eq!(history.undo.len(), 2);
        assert!(matches!(&history.undo[1].opcodes[0].op, Op::Set { old, new } if old == &Value::from("a") && new == &Value::from("c")));
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = History::with_limit(2);
        for nbr in 1..=3 {
            let tx = Transaction::with_opcodes(
                TxId::new(2, 1, nbr),
                vec![Opcode::set(crate::types::ids::NodeId::ROOT.offset(5), Value::from(""), Value::from("x"))],
            );
            history.record(&tx);
        }
        assert_eq!(history.undo.len(), 2);
        assert_eq!(history.undo[0].id.nbr, 2);
    }
}
