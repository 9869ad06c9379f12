//! A schema-bound document graph with its local edit API.
//!
//! Shared by client engines and the sequencer. Local edits mutate the graph
//! directly; [`Replica::make_transaction`] turns everything changed since the
//! last sync point into a transaction.

use std::ops::Bound;
use std::sync::Arc;
use crate::backend::{binary, ir, IrDocument};
use crate::document::Controller;
use crate::graph::validate::{check_cardinality, Validator};
use crate::graph::{diff, Body, Graph, GraphView, Lifecycle};
use crate::log_error;
use crate::ops::{Direction, Mode, Opcode, Transaction};
use crate::types::error::{CoreError, CoreResult, ValidationError};
use crate::types::ids::{IdAllocator, NodeId, TxId};
use crate::types::keys::{FloatKey, RandomKey, SlotKey};
use crate::types::schema::{ContainerKind, Schema};
use crate::types::value::Value;

/// A document graph bound to a schema, a validator and an editing identity
pub struct Replica {
    schema: Arc<Schema>,
    validator: Box<dyn Validator>,
    graph: Graph,
    allocator: IdAllocator,
    next_tx: u64,
    controller: Controller,
}

impl Replica {
    /// Create a replica holding a default document
    pub fn new(schema: Arc<Schema>, validator: Box<dyn Validator>, user: u64, actor: u64) -> CoreResult<Self> {
        let graph = Graph::new(&schema)?;
        Ok(Self {
            schema,
            validator,
            graph,
            allocator: IdAllocator::new(user, actor),
            next_tx: 1,
            controller: Controller::None,
        })
    }

    /// Document schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Editing user
    pub fn user(&self) -> u64 {
        self.allocator.user()
    }

    /// Editing actor
    pub fn actor(&self) -> u64 {
        self.allocator.actor()
    }

    /// Underlying graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Read-only view for queries
    pub fn view(&self) -> GraphView<'_> {
        GraphView::new(&self.graph, &self.schema)
    }

    /// Root object
    pub fn root(&self) -> NodeId {
        self.graph.root()
    }

    /// What is currently mutating the graph
    pub fn controller(&self) -> Controller {
        self.controller
    }

    pub(crate) fn set_controller(&mut self, controller: Controller) {
        self.controller = controller;
    }

    /// Whether anything changed since the last sync point
    pub fn has_changes(&self) -> bool {
        self.graph.has_changes()
    }

    /// Identifier of a named member
    pub fn member(&self, object: NodeId, name: &str) -> CoreResult<NodeId> {
        self.graph
            .member(&self.schema, object, name)
            .ok_or_else(|| CoreError::not_found(format!("member '{}' of {}", name, object)))
    }

    /// Current value of a leaf
    pub fn get(&self, leaf: NodeId) -> CoreResult<&Value> {
        self.view()
            .leaf(leaf)
            .ok_or_else(|| CoreError::not_found(format!("leaf {}", leaf)))
    }

    /// Current value of a named leaf member
    pub fn value(&self, object: NodeId, name: &str) -> CoreResult<&Value> {
        self.get(self.member(object, name)?)
    }

    /// Assign a leaf
    pub fn set(&mut self, leaf: NodeId, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        let mut current = match self.graph.get(leaf).map(|e| e.body()) {
            Some(Body::Leaf { kind, current, .. }) => {
                if !kind.accepts(&value) {
                    return Err(CoreError::invalid_input(format!(
                        "{} leaf {} cannot hold {}",
                        kind.name(),
                        leaf,
                        value
                    )));
                }
                current.clone()
            }
            _ => return Err(CoreError::not_found(format!("leaf {}", leaf))),
        };
        if !self.graph.is_live(leaf) {
            return Err(CoreError::invalid_input(format!("leaf {} belongs to a removed object", leaf)));
        }
        self.graph.exec_set(leaf, &mut current, &value, false)?;
        Ok(())
    }

    /// Assign a named leaf member
    pub fn set_member(&mut self, object: NodeId, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let leaf = self.member(object, name)?;
        self.set(leaf, value)
    }

    fn container_kind(&self, container: NodeId) -> CoreResult<ContainerKind> {
        match self.graph.get(container).map(|e| e.body()) {
            Some(Body::Container(c)) => Ok(c.kind),
            _ => Err(CoreError::not_found(format!("container {}", container))),
        }
    }

    /// Insert a new object of class `class`.
    ///
    /// Ordered containers append at the end.
    pub fn insert(&mut self, container: NodeId, class: &str) -> CoreResult<NodeId> {
        if self.container_kind(container)?.is_ordered() {
            let len = self.view().live_children(container).len();
            return self.insert_at(container, len, class);
        }
        self.insert_keyed(container, SlotKey::Random(RandomKey::generate()), class)
    }

    /// Insert a new object at `index` of an ordered container
    pub fn insert_at(&mut self, container: NodeId, index: usize, class: &str) -> CoreResult<NodeId> {
        let key = self.ordered_key(container, index, None)?;
        self.insert_keyed(container, key, class)
    }

    fn insert_keyed(&mut self, container: NodeId, key: SlotKey, class: &str) -> CoreResult<NodeId> {
        let spec = self
            .schema
            .class_named(class)
            .ok_or_else(|| CoreError::not_found(format!("class '{}'", class)))?;
        let (class, size) = (spec.id, spec.size);
        let base = self.allocate(size);
        self.graph.exec_insert(&self.schema, container, &key, class, base)?;
        Ok(base)
    }

    fn allocate(&mut self, size: u64) -> NodeId {
        loop {
            let base = self.allocator.allocate(size);
            if self.graph.can_allocate(base, size) {
                return base;
            }
        }
    }

    /// Fresh key placing an element at `index` among the live elements,
    /// ignoring `moving` if it already lives there
    fn ordered_key(&self, container: NodeId, index: usize, moving: Option<NodeId>) -> CoreResult<SlotKey> {
        let Some(Body::Container(c)) = self.graph.get(container).map(|e| e.body()) else {
            return Err(CoreError::not_found(format!("container {}", container)));
        };
        if !c.kind.is_ordered() {
            return Err(CoreError::invalid_input(format!("{} container has no positions", c.kind.name())));
        }
        let live: Vec<&SlotKey> = self
            .view()
            .children(container)
            .into_iter()
            .filter(|child| child.lifecycle != Lifecycle::Removed && Some(child.node) != moving)
            .map(|child| child.key)
            .collect();
        if index > live.len() {
            return Err(CoreError::invalid_input(format!("index {} past the end ({})", index, live.len())));
        }
        let left = index.checked_sub(1).map(|i| live[i]);
        // Removed and moved-away slots still hold their keys until the next
        // sync point, so the upper bound is the next slot of any kind.
        let right = match left {
            Some(left) => c.slots.range((Bound::Excluded(left), Bound::Unbounded)).next(),
            None => c.slots.iter().next(),
        }
        .map(|(key, _)| key);
        let as_float = |key: Option<&SlotKey>| match key {
            Some(SlotKey::Float(k)) => Some(k.clone()),
            _ => None,
        };
        let key = FloatKey::generate(as_float(left).as_ref(), as_float(right).as_ref())?;
        Ok(SlotKey::Float(key))
    }

    /// Slot key of a live element of `container`
    fn key_of(&self, container: NodeId, node: NodeId) -> CoreResult<SlotKey> {
        self.view()
            .children(container)
            .into_iter()
            .find(|child| child.node == node && child.lifecycle != Lifecycle::Removed)
            .map(|child| child.key.clone())
            .ok_or_else(|| CoreError::not_found(format!("{} in container {}", node, container)))
    }

    /// Erase an element and everything below it
    pub fn erase(&mut self, container: NodeId, node: NodeId) -> CoreResult<()> {
        let key = self.key_of(container, node)?;
        let class = self
            .graph
            .get(node)
            .and_then(|e| e.class())
            .ok_or_else(|| CoreError::not_found(format!("object {}", node)))?;
        self.graph.clear_subtree(&self.schema, node)?;
        self.graph.exec_erase(&self.schema, container, &key, class, node)?;
        Ok(())
    }

    /// Erase an object from whichever container holds it
    pub fn erase_object(&mut self, node: NodeId) -> CoreResult<()> {
        let container = self
            .graph
            .get(node)
            .and_then(|e| e.key().and(e.parent()))
            .ok_or_else(|| CoreError::invalid_input(format!("{} is not held by a container", node)))?;
        self.erase(container, node)
    }

    /// Move an object into `dst`; ordered containers append at the end
    pub fn move_to(&mut self, node: NodeId, dst: NodeId) -> CoreResult<()> {
        if self.container_kind(dst)?.is_ordered() {
            let len = self
                .view()
                .live_children(dst)
                .into_iter()
                .filter(|&child| child != node)
                .count();
            return self.move_to_index(node, dst, len);
        }
        self.move_keyed(node, dst, SlotKey::Random(RandomKey::generate()))
    }

    /// Move an object to `index` of an ordered container
    pub fn move_to_index(&mut self, node: NodeId, dst: NodeId, index: usize) -> CoreResult<()> {
        let key = self.ordered_key(dst, index, Some(node))?;
        self.move_keyed(node, dst, key)
    }

    fn move_keyed(&mut self, node: NodeId, dst: NodeId, dst_key: SlotKey) -> CoreResult<()> {
        let (src, src_key) = self
            .graph
            .get(node)
            .and_then(|e| Some((e.parent()?, e.key()?.clone())))
            .ok_or_else(|| CoreError::invalid_input(format!("{} is not held by a container", node)))?;
        self.graph.exec_move(&self.schema, node, src, &src_key, dst, &dst_key)?;
        Ok(())
    }

    /// Push an ephemeral message to a message member
    pub fn send_message(&mut self, target: NodeId, payload: impl Into<Vec<u8>>) -> CoreResult<()> {
        let payload = payload.into();
        self.graph.exec_message(target, &payload, true)?;
        Ok(())
    }

    /// Opcodes describing the changes since the last sync point
    pub fn diff(&self) -> Vec<Opcode> {
        diff::collect(&self.graph)
    }

    /// Transaction describing the changes since the last sync point.
    ///
    /// A transaction number is only consumed when there is something to commit.
    pub fn make_transaction(&mut self) -> Transaction {
        let opcodes = self.diff();
        let id = TxId::new(self.user(), self.actor(), self.next_tx);
        if !opcodes.is_empty() {
            self.next_tx += 1;
        }
        Transaction::with_opcodes(id, opcodes)
    }

    /// Number the next committed transaction will get
    pub fn next_tx(&self) -> u64 {
        self.next_tx
    }

    /// Structural checks followed by the host validator
    pub fn validate(&self, user: u64) -> Result<(), ValidationError> {
        check_cardinality(&self.graph)?;
        self.validator.validate(&self.view(), user)
    }

    /// Execute a transaction and validate the result as committed by `user`.
    ///
    /// On rejection the transaction is executed in the opposite direction,
    /// leaving the graph as it was.
    pub fn execute_validated(
        &mut self,
        tx: &mut Transaction,
        direction: Direction,
        mode: Mode,
        user: u64,
    ) -> CoreResult<()> {
        tx.execute(&mut self.graph, &self.schema, direction, mode)?;
        if let Err(err) = self.validate(user) {
            if let Err(undo) = tx.execute(&mut self.graph, &self.schema, direction.opposite(), Mode::Strict) {
                log_error!("Rolling back rejected {} failed: {}", tx.id, undo);
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Execute a transaction without validation
    pub fn execute(&mut self, tx: &mut Transaction, direction: Direction, mode: Mode) -> CoreResult<()> {
        tx.execute(&mut self.graph, &self.schema, direction, mode)?;
        Ok(())
    }

    /// Execute whatever applies of a transaction, dropping the rest
    pub(crate) fn apply_tolerant(&mut self, tx: &mut Transaction) -> usize {
        tx.apply_tolerant(&mut self.graph, &self.schema, Mode::Correct).len()
    }

    /// Make the current state the new sync point
    pub fn synchronize(&mut self) {
        self.graph.synchronize();
    }

    /// Capture the live document
    pub fn write(&self) -> CoreResult<IrDocument> {
        Ok(ir::write(&self.graph, &self.schema)?)
    }

    /// Replace the whole graph with a document.
    ///
    /// The document is checked against the schema, identifier layout and
    /// wrapper cardinality before anything is swapped in.
    pub fn read(&mut self, doc: &IrDocument) -> CoreResult<()> {
        let mut graph = ir::build(doc, &self.schema)?;
        check_cardinality(&graph)?;
        graph.synchronize();
        for id in graph.ids() {
            self.allocator.observe(*id);
        }
        self.graph = graph;
        Ok(())
    }

    /// Binary snapshot of the live document
    pub fn encode_snapshot(&self) -> CoreResult<Vec<u8>> {
        Ok(binary::encode(&self.write()?))
    }

    /// Replace the graph with a binary snapshot
    pub fn decode_snapshot(&mut self, bytes: &[u8]) -> CoreResult<()> {
        let doc = binary::decode(bytes)?;
        self.read(&doc)
    }
}
