//! Inbox of server events awaiting the next pull.
//!
//! Carriers deliver raw frames from whatever thread they run on. The stack
//! decodes them on arrival and queues the result; the owning engine drains
//! it on its own thread.

use bytes::Bytes;
use crossbeam::queue::SegQueue;
use crate::backend::{binary, IrDocument};
use crate::comms::protocol::{deserialize_server, ServerMessage, Signal};
use crate::comms::PortSink;
use crate::log_warn;
use crate::ops::Transaction;
use crate::types::ids::{TxId, TxIdRange};

/// A decoded server event
#[derive(Debug, Clone)]
pub enum PullEvent {
    /// Authoritative document at `position`
    Snapshot {
        /// Log position of the last transaction included
        position: u64,
        /// Decoded document
        document: IrDocument,
    },
    /// Transaction committed by another replica
    External {
        /// Log position
        position: u64,
        /// The transaction
        tx: Transaction,
    },
    /// Own transaction accepted
    Ack {
        /// Log position
        position: u64,
        /// Accepted transaction
        id: TxId,
    },
    /// Own transaction refused
    Deny {
        /// Refused transaction
        id: TxId,
        /// Reason given by the sequencer
        reason: String,
    },
    /// Own transactions fused by the sequencer
    Squash {
        /// Replaced transactions
        range: TxIdRange,
        /// Fused transaction
        tx: Transaction,
    },
    /// Relayed signal
    Signal(Signal),
    /// A frame that could not be decoded
    Malformed(String),
}

impl PullEvent {
    /// Decode a server frame
    pub fn decode(frame: &[u8]) -> Self {
        let message = match deserialize_server(frame) {
            Ok(message) => message,
            Err(e) => return PullEvent::Malformed(format!("undecodable server message: {}", e)),
        };
        match message {
            ServerMessage::Snapshot { position, document } => match binary::decode(&document) {
                Ok(document) => PullEvent::Snapshot { position, document },
                Err(e) => PullEvent::Malformed(format!("undecodable snapshot at {}: {}", position, e)),
            },
            ServerMessage::Ext { position, tx } => PullEvent::External { position, tx },
            ServerMessage::Ack { position, id } => PullEvent::Ack { position, id },
            ServerMessage::Deny { id, reason } => PullEvent::Deny { id, reason },
            ServerMessage::Squash { range, tx } => PullEvent::Squash { range, tx },
            ServerMessage::Signal(signal) => PullEvent::Signal(signal),
        }
    }
}

/// Lock-free FIFO of pending server events
#[derive(Debug, Default)]
pub struct PullStack {
    queue: SegQueue<PullEvent>,
}

impl PullStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an already decoded event
    pub fn push(&self, event: PullEvent) {
        self.queue.push(event);
    }

    /// Decode and queue a server frame
    pub fn push_bytes(&self, frame: &[u8]) {
        let event = PullEvent::decode(frame);
        if let PullEvent::Malformed(reason) = &event {
            log_warn!("Queued malformed server frame: {}", reason);
        }
        self.queue.push(event);
    }

    /// Oldest queued event
    pub fn pop(&self) -> Option<PullEvent> {
        self.queue.pop()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl PortSink for PullStack {
    fn deliver(&self, frame: Bytes) {
        self.push_bytes(&frame);
    }
}
