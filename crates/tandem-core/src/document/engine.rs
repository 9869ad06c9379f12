//! Client synchronization engine.
//!
//! The engine keeps the local replica ahead of the sequencer. Committed but
//! unacknowledged transactions stay in a pending queue; when an external
//! transaction arrives the pending ones are rolled back, the external one is
//! applied, and the pending ones are replayed on top in correcting mode.
//! Everything the sequencer says is queued on a [`PullStack`] by the carrier
//! and only processed by [`Engine::pull`], on the engine's own thread.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use bytes::Bytes;
use crate::backend::IrDocument;
use crate::comms::protocol::{serialize_client, ClientMessage, Signal};
use crate::comms::{Carrier, ConnectionState};
use crate::constants::{LABEL_KEY, SERVER_USER};
use crate::document::pull_stack::{PullEvent, PullStack};
use crate::document::replica::Replica;
use crate::document::{Controller, Observer};
use crate::graph::validate::Validator;
use crate::ops::{Direction, Mode, Transaction};
use crate::types::error::{CoreError, CoreResult};
use crate::types::ids::{TxId, TxIdRange};
use crate::types::schema::Schema;
use crate::{log_debug, log_error, log_info, log_warn};

/// Pending queue length above which every commit logs a warning
const DEFAULT_PENDING_WARNING: usize = 256;

/// Outcome of one [`Engine::pull`]
#[derive(Debug, Default)]
pub struct PullReport {
    /// External transactions applied, in log order
    pub applied: Vec<TxId>,
    /// Own transactions acknowledged
    pub acked: Vec<TxId>,
    /// Own transactions dropped, by the sequencer or by local replay
    pub denied: Vec<(TxId, String)>,
    /// Own transaction runs fused by the sequencer
    pub squashed: Vec<(TxIdRange, Transaction)>,
    /// Signals relayed from other peers
    pub signals: Vec<Signal>,
    /// Whether a snapshot replaced the document
    pub snapshot: bool,
    /// Whether the engine is waiting for a snapshot after losing sync
    pub resync_required: bool,
}

impl PullReport {
    /// Whether the pull changed nothing and reported nothing
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
            && self.acked.is_empty()
            && self.denied.is_empty()
            && self.squashed.is_empty()
            && self.signals.is_empty()
            && !self.snapshot
            && !self.resync_required
    }
}

#[derive(Debug, Clone)]
struct Pending {
    tx: Transaction,
    pushed: bool,
}

/// Client side of one replicated document
pub struct Engine {
    replica: Replica,
    pending: VecDeque<Pending>,
    stack: Arc<PullStack>,
    carrier: Option<Box<dyn Carrier>>,
    state: ConnectionState,
    position: Option<u64>,
    needs_resync: bool,
    metadata: BTreeMap<String, String>,
    greeting: BTreeMap<String, String>,
    observer: Option<Box<dyn Observer>>,
    pending_warning: usize,
}

impl Engine {
    /// Create a disconnected engine over a default document
    pub fn new(schema: Arc<Schema>, validator: Box<dyn Validator>, user: u64, actor: u64) -> CoreResult<Self> {
        if user == SERVER_USER {
            return Err(CoreError::invalid_input(format!("user {} is reserved for the sequencer", user)));
        }
        Ok(Self {
            replica: Replica::new(schema, validator, user, actor)?,
            pending: VecDeque::new(),
            stack: Arc::new(PullStack::new()),
            carrier: None,
            state: ConnectionState::Disconnected,
            position: None,
            needs_resync: false,
            metadata: BTreeMap::new(),
            greeting: BTreeMap::new(),
            observer: None,
            pending_warning: DEFAULT_PENDING_WARNING,
        })
    }

    /// The local replica
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// The local replica, for edits
    pub fn replica_mut(&mut self) -> &mut Replica {
        &mut self.replica
    }

    /// Inbox the carrier delivers server frames to
    pub fn pull_stack(&self) -> Arc<PullStack> {
        Arc::clone(&self.stack)
    }

    /// Connection status
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Log position of the last event applied
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    /// Whether the engine lost sync and waits for a snapshot
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Number of committed transactions not yet acknowledged
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Identifiers of the pending transactions, oldest first
    pub fn pending_ids(&self) -> Vec<TxId> {
        self.pending.iter().map(|p| p.tx.id).collect()
    }

    /// Set the pending queue length above which commits log a warning
    pub fn set_pending_warning(&mut self, len: usize) {
        self.pending_warning = len;
    }

    /// Pending queue length above which commits log a warning
    pub fn pending_warning(&self) -> usize {
        self.pending_warning
    }

    /// Register the observer notified of document changes
    pub fn set_observer(&mut self, observer: Box<dyn Observer>) {
        self.observer = Some(observer);
    }

    /// Set metadata announced to the sequencer in the greeting
    pub fn set_greeting(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.greeting.insert(key.into(), value.into());
    }

    /// Label the next commit
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.metadata.insert(LABEL_KEY.to_string(), label.into());
    }

    /// Attach metadata to the next commit
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Connect to a sequencer through `carrier` and ask for a snapshot
    pub fn attach(&mut self, carrier: Box<dyn Carrier>) -> CoreResult<()> {
        self.carrier = Some(carrier);
        self.state = ConnectionState::Connecting;
        self.position = None;
        self.needs_resync = false;
        let greet = ClientMessage::Greet {
            user: self.replica.user(),
            actor: self.replica.actor(),
            schema_version: self.replica.schema().version().to_string(),
            metadata: self.greeting.clone(),
        };
        self.send(&greet)
    }

    /// Drop the carrier. Pending transactions stay queued until the next snapshot.
    pub fn detach(&mut self) {
        if self.carrier.take().is_some() {
            log_info!("Replica {}.{} detached", self.replica.user(), self.replica.actor());
        }
        self.state = ConnectionState::Disconnected;
        for pending in &mut self.pending {
            pending.pushed = false;
        }
    }

    fn send(&self, message: &ClientMessage) -> CoreResult<()> {
        let Some(carrier) = &self.carrier else {
            return Ok(());
        };
        let bytes = serialize_client(message)?;
        carrier.send(Bytes::from(bytes))
    }

    fn notify(&mut self, controller: Controller) {
        if !self.replica.has_changes() {
            return;
        }
        if let Some(observer) = &mut self.observer {
            observer.document_changed(&self.replica.view(), controller);
        }
    }

    /// Turn the local changes into a pending transaction.
    ///
    /// Returns `None` when nothing changed since the last sync point.
    pub fn commit(&mut self) -> CoreResult<Option<Transaction>> {
        self.replica.set_controller(Controller::SelfCommit);
        let mut tx = self.replica.make_transaction();
        self.notify(Controller::SelfCommit);
        self.replica.synchronize();
        self.replica.set_controller(Controller::None);
        let metadata = std::mem::take(&mut self.metadata);
        if tx.is_empty() {
            return Ok(None);
        }
        tx.metadata = metadata;
        log_debug!("Committed {}", tx);
        self.pending.push_back(Pending { tx: tx.clone(), pushed: false });
        if self.pending.len() > self.pending_warning {
            log_warn!("{} transactions awaiting acknowledgement", self.pending.len());
        }
        Ok(Some(tx))
    }

    /// Commit the local changes under `label`
    pub fn commit_labelled(&mut self, label: &str) -> CoreResult<Option<Transaction>> {
        self.set_label(label);
        self.commit()
    }

    /// Roll back every uncommitted local change
    pub fn revert(&mut self) -> CoreResult<()> {
        let mut tx = Transaction::with_opcodes(TxId::default(), self.replica.diff());
        if tx.is_empty() {
            return Ok(());
        }
        self.replica.set_controller(Controller::Revert);
        let result = self.replica.execute(&mut tx, Direction::Backward, Mode::Strict);
        self.notify(Controller::Revert);
        self.replica.synchronize();
        self.replica.set_controller(Controller::None);
        result
    }

    /// Execute a transaction as a local edit, with validation.
    ///
    /// The result is committed like any other local change.
    pub fn execute_local(&mut self, tx: &mut Transaction, direction: Direction, controller: Controller) -> CoreResult<()> {
        self.replica.set_controller(controller);
        let user = self.replica.user();
        let result = self.replica.execute_validated(tx, direction, Mode::Correct, user);
        self.replica.set_controller(Controller::None);
        result
    }

    /// Fuse the pending transactions not yet pushed into one.
    ///
    /// The fused transaction keeps the identifier of the newest one.
    pub fn squash(&mut self) -> Option<Transaction> {
        let first = self.pending.iter().position(|p| !p.pushed)?;
        if self.pending.len() - first < 2 {
            return None;
        }
        self.replica.set_controller(Controller::Squash);
        let run: Vec<Transaction> = self.pending.drain(first..).map(|p| p.tx).collect();
        let last = run[run.len() - 1].id;
        let fused = Transaction::squash(last, &run);
        log_debug!("Squashed {} transactions into {}", run.len(), fused);
        self.pending.push_back(Pending { tx: fused.clone(), pushed: false });
        self.replica.set_controller(Controller::None);
        Some(fused)
    }

    /// Ask the sequencer to replace a run of own acknowledged transactions
    /// with their fused form
    pub fn request_squash(&mut self, range: TxIdRange, tx: Transaction) -> CoreResult<()> {
        self.send(&ClientMessage::Squash { range, tx })
    }

    /// Send every pending transaction not yet sent.
    ///
    /// Returns how many were sent. Nothing is sent while disconnected or
    /// waiting for a snapshot.
    pub fn push(&mut self) -> CoreResult<usize> {
        if self.carrier.is_none() || self.needs_resync || self.state != ConnectionState::Connected {
            return Ok(0);
        }
        let mut sent = 0;
        for index in 0..self.pending.len() {
            if self.pending[index].pushed {
                continue;
            }
            let message = ClientMessage::Commit(self.pending[index].tx.clone());
            self.send(&message)?;
            self.pending[index].pushed = true;
            sent += 1;
        }
        Ok(sent)
    }

    /// Relay an ephemeral signal to the other peers
    pub fn signal(&mut self, signal: Signal) -> CoreResult<()> {
        self.send(&ClientMessage::Signal(signal))
    }

    /// Ask the sequencer for a fresh snapshot
    pub fn request_resync(&mut self) -> CoreResult<()> {
        self.needs_resync = true;
        self.send(&ClientMessage::Resync)
    }

    fn force_resync(&mut self) {
        if self.needs_resync {
            return;
        }
        log_warn!(
            "Replica {}.{} lost sync, requesting a snapshot",
            self.replica.user(),
            self.replica.actor()
        );
        if let Err(e) = self.request_resync() {
            log_error!("Failed to request a snapshot: {}", e);
        }
    }

    /// Replace the document with a snapshot, dropping every pending transaction
    pub fn replace_with_snapshot(&mut self, document: &IrDocument) -> CoreResult<()> {
        self.replica.set_controller(Controller::Read);
        let result = self.replica.read(document);
        self.replica.set_controller(Controller::None);
        result?;
        if !self.pending.is_empty() {
            log_debug!("Snapshot dropped {} pending transactions", self.pending.len());
        }
        self.pending.clear();
        self.needs_resync = false;
        Ok(())
    }

    /// Process every queued server event.
    ///
    /// Uncommitted local changes are set aside first and replayed on top of
    /// the result, dropping whatever no longer applies.
    pub fn pull(&mut self) -> CoreResult<PullReport> {
        let mut report = PullReport::default();
        if self.stack.is_empty() {
            report.resync_required = self.needs_resync;
            return Ok(report);
        }

        let mut stash = Transaction::with_opcodes(TxId::default(), self.replica.diff());
        if !stash.is_empty() {
            self.replica.set_controller(Controller::Stash);
            self.replica.execute(&mut stash, Direction::Backward, Mode::Strict)?;
        }

        while let Some(event) = self.stack.pop() {
            self.dispatch(event, &mut report);
        }
        self.notify(if report.snapshot { Controller::Read } else { Controller::External });
        self.replica.synchronize();

        if !stash.is_empty() {
            self.replica.set_controller(Controller::Stash);
            let dropped = self.replica.apply_tolerant(&mut stash);
            if dropped > 0 {
                log_debug!("{} uncommitted changes no longer apply", dropped);
            }
        }
        self.replica.set_controller(Controller::None);
        report.resync_required = self.needs_resync;
        Ok(report)
    }

    fn dispatch(&mut self, event: PullEvent, report: &mut PullReport) {
        if self.needs_resync && !matches!(event, PullEvent::Snapshot { .. } | PullEvent::Signal(_)) {
            log_debug!("Awaiting snapshot, discarding {:?}", event);
            return;
        }
        match event {
            PullEvent::Snapshot { position, document } => self.on_snapshot(position, &document, report),
            PullEvent::External { position, tx } => {
                if self.advance(position) {
                    self.on_external(tx, report);
                }
            }
            PullEvent::Ack { position, id } => {
                if self.advance(position) {
                    self.on_ack(id, report);
                }
            }
            PullEvent::Deny { id, reason } => self.on_deny(id, reason, report),
            PullEvent::Squash { range, tx } => self.on_squash(range, tx, report),
            PullEvent::Signal(signal) => report.signals.push(signal),
            PullEvent::Malformed(reason) => {
                log_error!("Malformed server event: {}", reason);
                self.force_resync();
            }
        }
    }

    /// Move to `position`, which must directly follow the current one
    fn advance(&mut self, position: u64) -> bool {
        match self.position {
            Some(current) if position == current + 1 => {
                self.position = Some(position);
                true
            }
            Some(current) => {
                log_warn!("Expected log position {} but got {}", current + 1, position);
                self.force_resync();
                false
            }
            None => {
                log_debug!("Ignoring event at {} before the first snapshot", position);
                false
            }
        }
    }

    fn on_snapshot(&mut self, position: u64, document: &IrDocument, report: &mut PullReport) {
        match self.replace_with_snapshot(document) {
            Ok(()) => {
                self.position = Some(position);
                if self.carrier.is_some() {
                    self.state = ConnectionState::Connected;
                }
                report.snapshot = true;
                log_info!("Snapshot loaded at position {}", position);
            }
            Err(e) => {
                log_error!("Rejected snapshot at position {}: {}", position, e);
                self.needs_resync = true;
            }
        }
    }

    fn on_external(&mut self, mut tx: Transaction, report: &mut PullReport) {
        self.replica.set_controller(Controller::External);
        for index in (0..self.pending.len()).rev() {
            if let Err(e) = self.replica.execute(&mut self.pending[index].tx, Direction::Backward, Mode::Strict) {
                log_error!("Rolling back pending {} failed: {}", self.pending[index].tx.id, e);
                self.force_resync();
                return;
            }
        }
        if let Err(e) = self.replica.execute(&mut tx, Direction::Forward, Mode::Strict) {
            log_error!("External {} does not apply: {}", tx.id, e);
            self.force_resync();
            return;
        }
        if let Err(e) = self.replica.validate(tx.id.user) {
            log_warn!("External {} fails local validation: {}", tx.id, e);
        }
        log_debug!("Applied external {}", tx);
        report.applied.push(tx.id);
        let pending: Vec<Pending> = self.pending.drain(..).collect();
        self.replay(pending, report);
    }

    /// Re-execute pending transactions on top of the current state,
    /// dropping the ones that no longer apply or validate
    fn replay(&mut self, pending: Vec<Pending>, report: &mut PullReport) {
        let user = self.replica.user();
        for mut p in pending {
            match self.replica.execute_validated(&mut p.tx, Direction::Forward, Mode::Correct, user) {
                Ok(()) => self.pending.push_back(p),
                Err(e) => {
                    if e.requires_resync() {
                        log_error!("Replaying pending {} failed: {}", p.tx.id, e);
                        self.force_resync();
                    } else {
                        log_debug!("Dropped pending {}: {}", p.tx.id, e);
                    }
                    report.denied.push((p.tx.id, e.to_string()));
                }
            }
        }
    }

    fn on_ack(&mut self, id: TxId, report: &mut PullReport) {
        match self.pending.front() {
            Some(front) if front.tx.id == id => {
                self.pending.pop_front();
                log_debug!("Acknowledged {}", id);
                report.acked.push(id);
            }
            _ => {
                log_warn!("Acknowledgement for {} out of order", id);
                self.force_resync();
            }
        }
    }

    fn on_deny(&mut self, id: TxId, reason: String, report: &mut PullReport) {
        let Some(index) = self.pending.iter().position(|p| p.tx.id == id) else {
            log_debug!("Ignoring denial of {} which is no longer pending", id);
            return;
        };
        self.replica.set_controller(Controller::External);
        for i in (index..self.pending.len()).rev() {
            if let Err(e) = self.replica.execute(&mut self.pending[i].tx, Direction::Backward, Mode::Strict) {
                log_error!("Rolling back pending {} failed: {}", self.pending[i].tx.id, e);
                self.force_resync();
                return;
            }
        }
        let rest: Vec<Pending> = self.pending.drain(index..).skip(1).collect();
        log_debug!("Denied {}: {}", id, reason);
        report.denied.push((id, reason));
        self.replay(rest, report);
    }

    fn on_squash(&mut self, range: TxIdRange, tx: Transaction, report: &mut PullReport) {
        if let Some(first) = self.pending.iter().position(|p| range.contains(&p.tx.id)) {
            let covered = self.pending.iter().filter(|p| range.contains(&p.tx.id));
            let (pushed, unpushed) = covered.fold((0, 0), |(s, u), p| if p.pushed { (s + 1, u) } else { (s, u + 1) });
            if pushed > 0 && unpushed > 0 {
                // Fusing would resend edits the sequencer already has.
                log_warn!("Ignoring squash of {}: it mixes sent and unsent transactions", range);
            } else {
                self.replica.set_controller(Controller::Squash);
                self.pending.retain(|p| !range.contains(&p.tx.id));
                self.pending.insert(first, Pending { tx: tx.clone(), pushed: unpushed == 0 });
            }
        }
        report.squashed.push((range, tx));
    }
}
