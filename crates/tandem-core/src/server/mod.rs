//! Sequencer side of document synchronization

/// Authoritative transaction ordering
pub mod sequencer;

pub use sequencer::{Peer, PortId, Sequencer};
