//! Authoritative ordering of transactions.
//!
//! The sequencer owns the reference replica of a document. Every commit
//! received from a port is executed in correcting mode and validated; accepted
//! transactions get the next log position, are acknowledged to their sender
//! and broadcast, as corrected, to every other greeted port.

use std::collections::BTreeMap;
use std::sync::Arc;
use bytes::Bytes;
use crate::backend::IrDocument;
use crate::comms::protocol::{deserialize_client, serialize_server, ClientMessage, ServerMessage, Signal};
use crate::comms::PortSink;
use crate::constants::{SERVER_ACTOR, SERVER_USER};
use crate::document::Replica;
use crate::graph::validate::Validator;
use crate::ops::{Direction, Mode, Transaction};
use crate::types::error::{CoreError, CoreResult};
use crate::types::ids::TxIdRange;
use crate::types::schema::Schema;
use crate::{log_debug, log_error, log_info};

/// Handle of one connected replica
pub type PortId = u64;

/// Identity a replica announced when greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Editing user
    pub user: u64,
    /// Editing actor
    pub actor: u64,
    /// Application metadata from the greeting
    pub metadata: BTreeMap<String, String>,
}

struct Port {
    sink: Box<dyn PortSink>,
    peer: Option<Peer>,
    // Number of the last transaction accepted through this port
    acked: Option<u64>,
}

/// Single authority ordering the transactions of one document
pub struct Sequencer {
    session: String,
    replica: Replica,
    position: u64,
    ports: BTreeMap<PortId, Port>,
    next_port: PortId,
}

impl Sequencer {
    /// Create a sequencer for `session` over a default document
    pub fn new(session: impl Into<String>, schema: Arc<Schema>, validator: Box<dyn Validator>) -> CoreResult<Self> {
        Ok(Self {
            session: session.into(),
            replica: Replica::new(schema, validator, SERVER_USER, SERVER_ACTOR)?,
            position: 0,
            ports: BTreeMap::new(),
            next_port: 1,
        })
    }

    /// Session this sequencer orders
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Replace the reference document.
    ///
    /// Greeted peers receive the new document as a snapshot.
    pub fn load(&mut self, document: &IrDocument) -> CoreResult<()> {
        self.replica.read(document)?;
        let greeted: Vec<PortId> = self.peers().into_iter().map(|(id, _)| id).collect();
        for port in greeted {
            self.send_snapshot(port)?;
        }
        Ok(())
    }

    /// Capture the reference document
    pub fn write(&self) -> CoreResult<IrDocument> {
        self.replica.write()
    }

    /// Reference replica
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Position of the last accepted transaction
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of open ports
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Peers that have greeted, by port
    pub fn peers(&self) -> Vec<(PortId, &Peer)> {
        self.ports
            .iter()
            .filter_map(|(id, port)| port.peer.as_ref().map(|peer| (*id, peer)))
            .collect()
    }

    /// Binary snapshot of the reference document
    pub fn snapshot(&self) -> CoreResult<Vec<u8>> {
        self.replica.encode_snapshot()
    }

    /// Open a port delivering to `sink`
    pub fn connect(&mut self, sink: Box<dyn PortSink>) -> PortId {
        let id = self.next_port;
        self.next_port += 1;
        self.ports.insert(id, Port { sink, peer: None, acked: None });
        log_debug!("Opened port {}", id);
        id
    }

    /// Close a port and return how many remain open
    pub fn disconnect(&mut self, port: PortId) -> usize {
        if let Some(Port { peer: Some(peer), .. }) = self.ports.remove(&port) {
            log_info!("Peer {}.{} left {} through port {}", peer.user, peer.actor, self.session, port);
        }
        self.ports.len()
    }

    /// Handle one encoded client message from `port`
    pub fn receive(&mut self, port: PortId, frame: &[u8]) -> CoreResult<()> {
        if !self.ports.contains_key(&port) {
            return Err(CoreError::not_found(format!("port {}", port)));
        }
        let message = deserialize_client(frame)?;
        match message {
            ClientMessage::Greet { user, actor, schema_version, metadata } => {
                self.greet(port, Peer { user, actor, metadata }, &schema_version)
            }
            ClientMessage::Commit(tx) => self.accept(port, tx),
            ClientMessage::Squash { range, tx } => self.squash(port, range, tx),
            ClientMessage::Signal(signal) => {
                self.peer(port)?;
                self.broadcast(Some(port), &ServerMessage::Signal(signal));
                Ok(())
            }
            ClientMessage::Resync => {
                self.peer(port)?;
                log_debug!("Port {} asked for a snapshot", port);
                self.send_snapshot(port)
            }
        }
    }

    fn peer(&self, port: PortId) -> CoreResult<&Peer> {
        self.ports
            .get(&port)
            .and_then(|p| p.peer.as_ref())
            .ok_or_else(|| CoreError::protocol(format!("port {} has not greeted", port)))
    }

    fn greet(&mut self, port: PortId, peer: Peer, schema_version: &str) -> CoreResult<()> {
        if schema_version != self.replica.schema().version() {
            return Err(CoreError::schema(format!(
                "peer schema {} does not match {}",
                schema_version,
                self.replica.schema().version()
            )));
        }
        if peer.user == SERVER_USER {
            return Err(CoreError::protocol(format!("user {} is reserved", SERVER_USER)));
        }
        let taken = self
            .ports
            .iter()
            .any(|(id, p)| *id != port && p.peer.as_ref().map(|q| (q.user, q.actor)) == Some((peer.user, peer.actor)));
        if taken {
            return Err(CoreError::protocol(format!("actor {}.{} is already connected", peer.user, peer.actor)));
        }
        log_info!("Peer {}.{} joined {} through port {}", peer.user, peer.actor, self.session, port);
        if let Some(p) = self.ports.get_mut(&port) {
            p.peer = Some(peer);
        }
        self.send_snapshot(port)
    }

    fn accept(&mut self, port: PortId, mut tx: Transaction) -> CoreResult<()> {
        let peer = self.peer(port)?;
        if (tx.id.user, tx.id.actor) != (peer.user, peer.actor) {
            let reason = format!("{} was not issued by {}.{}", tx.id, peer.user, peer.actor);
            self.send(port, &ServerMessage::Deny { id: tx.id, reason });
            return Ok(());
        }
        let user = tx.id.user;
        match self.replica.execute_validated(&mut tx, Direction::Forward, Mode::Correct, user) {
            Ok(()) => {
                self.replica.synchronize();
                self.position += 1;
                log_debug!("Accepted {} at position {}", tx, self.position);
                if let Some(p) = self.ports.get_mut(&port) {
                    p.acked = Some(tx.id.nbr);
                }
                self.send(port, &ServerMessage::Ack { position: self.position, id: tx.id });
                self.broadcast(Some(port), &ServerMessage::Ext { position: self.position, tx });
            }
            Err(e) => {
                self.replica.synchronize();
                log_debug!("Denied {}: {}", tx.id, e);
                self.send(port, &ServerMessage::Deny { id: tx.id, reason: e.to_string() });
            }
        }
        Ok(())
    }

    fn squash(&mut self, port: PortId, range: TxIdRange, mut tx: Transaction) -> CoreResult<()> {
        let peer = self.peer(port)?;
        if (range.user, range.actor) != (peer.user, peer.actor) || !range.contains(&tx.id) {
            return Err(CoreError::protocol(format!("{} does not belong to {}.{}", range, peer.user, peer.actor)));
        }
        let acked = self.ports.get(&port).and_then(|p| p.acked);
        if acked.map_or(true, |nbr| range.last > nbr) {
            return Err(CoreError::protocol(format!("{} reaches past the last accepted transaction", range)));
        }
        tx.consolidate();
        self.send(port, &ServerMessage::Squash { range, tx });
        Ok(())
    }

    /// Apply changes made by the sequencer itself and broadcast them.
    ///
    /// `edit` works on the reference replica; if it fails or the result does
    /// not validate, the document is left unchanged.
    pub fn commit<F>(&mut self, edit: F) -> CoreResult<Option<Transaction>>
    where
        F: FnOnce(&mut Replica) -> CoreResult<()>,
    {
        let outcome = edit(&mut self.replica).and_then(|()| self.replica.validate(SERVER_USER).map_err(CoreError::from));
        if let Err(e) = outcome {
            let mut undo = Transaction::with_opcodes(Default::default(), self.replica.diff());
            if let Err(undo_err) = self.replica.execute(&mut undo, Direction::Backward, Mode::Strict) {
                log_error!("Reverting a failed sequencer edit failed: {}", undo_err);
            }
            self.replica.synchronize();
            return Err(e);
        }
        let tx = self.replica.make_transaction();
        self.replica.synchronize();
        if tx.is_empty() {
            return Ok(None);
        }
        self.position += 1;
        log_debug!("Sequencer committed {} at position {}", tx, self.position);
        self.broadcast(None, &ServerMessage::Ext { position: self.position, tx: tx.clone() });
        Ok(Some(tx))
    }

    /// Relay a signal from the sequencer to every peer
    pub fn signal(&mut self, signal: Signal) {
        self.broadcast(None, &ServerMessage::Signal(signal));
    }

    fn send_snapshot(&mut self, port: PortId) -> CoreResult<()> {
        let document = self.snapshot()?;
        self.send(port, &ServerMessage::Snapshot { position: self.position, document });
        Ok(())
    }

    fn send(&self, port: PortId, message: &ServerMessage) {
        let Some(p) = self.ports.get(&port) else {
            return;
        };
        match serialize_server(message) {
            Ok(bytes) => p.sink.deliver(Bytes::from(bytes)),
            Err(e) => log_error!("Failed to encode message for port {}: {}", port, e),
        }
    }

    /// Send to every greeted port except `except`
    fn broadcast(&self, except: Option<PortId>, message: &ServerMessage) {
        let bytes = match serialize_server(message) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                log_error!("Failed to encode broadcast: {}", e);
                return;
            }
        };
        for (id, port) in &self.ports {
            if Some(*id) == except || port.peer.is_none() {
                continue;
            }
            port.sink.deliver(bytes.clone());
        }
    }
}
