//! Binary protocol between document replicas and the sequencer
//!
//! Defines the client and server messages exchanged over a carrier and
//! their bincode encoding.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use bincode::serde::{encode_to_vec, decode_from_slice};
use bincode::config;
use crate::ops::Transaction;
use crate::types::ids::{NodeId, TxId, TxIdRange};

/// Ephemeral notification relayed between peers without touching the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Node the signal is about
    pub target: NodeId,
    /// Application-defined signal type
    pub kind: u32,
    /// Application-defined payload
    pub payload: Vec<u8>,
}

/// Messages sent by a replica to the sequencer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Introduce the replica and request a snapshot
    Greet {
        /// User the replica edits as
        user: u64,
        /// Actor of the replica
        actor: u64,
        /// Schema version the replica was built with
        schema_version: String,
        /// Application metadata visible to other peers
        metadata: BTreeMap<String, String>,
    },

    /// Submit a local transaction
    Commit(Transaction),

    /// Replace a run of own transactions with their fused form
    Squash {
        /// Replaced transactions
        range: TxIdRange,
        /// Fused transaction
        tx: Transaction,
    },

    /// Relay a signal to the other peers
    Signal(Signal),

    /// Request a fresh snapshot
    Resync,
}

/// Messages sent by the sequencer to a replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Full document state at a position of the transaction log
    Snapshot {
        /// Position of the last transaction included
        position: u64,
        /// Binary snapshot
        document: Vec<u8>,
    },

    /// Transaction committed by another replica
    Ext {
        /// Log position of the transaction
        position: u64,
        /// Committed transaction
        tx: Transaction,
    },

    /// Own transaction accepted
    Ack {
        /// Log position assigned to the transaction
        position: u64,
        /// Accepted transaction
        id: TxId,
    },

    /// Own transaction refused
    Deny {
        /// Refused transaction
        id: TxId,
        /// Human readable reason
        reason: String,
    },

    /// Squash accepted, carrying the fused transaction as the sequencer sees it
    Squash {
        /// Replaced transactions
        range: TxIdRange,
        /// Fused transaction
        tx: Transaction,
    },

    /// Signal relayed from another peer
    Signal(Signal),
}

/// Serialize a client message to binary format
pub fn serialize_client(msg: &ClientMessage) -> Result<Vec<u8>, bincode::error::EncodeError> {
    encode_to_vec(msg, config::standard())
}

/// Deserialize a client message from binary format
pub fn deserialize_client(data: &[u8]) -> Result<ClientMessage, bincode::error::DecodeError> {
    let (msg, _) = decode_from_slice(data, config::standard())?;
    Ok(msg)
}

/// Serialize a server message to binary format
pub fn serialize_server(msg: &ServerMessage) -> Result<Vec<u8>, bincode::error::EncodeError> {
    encode_to_vec(msg, config::standard())
}

/// Deserialize a server message from binary format
pub fn deserialize_server(data: &[u8]) -> Result<ServerMessage, bincode::error::DecodeError> {
    let (msg, _) = decode_from_slice(data, config::standard())?;
    Ok(msg)
}
