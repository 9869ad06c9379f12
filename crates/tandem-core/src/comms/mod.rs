//! Communication layer between replicas and the sequencer
//!
//! The core never owns a socket. Clients hand encoded messages to a
//! [`Carrier`]; the sequencer hands them to one [`PortSink`] per connected
//! replica. Hosts plug their transport in behind these two traits.

/// Protocol definitions for replica and sequencer messages
pub mod protocol;

/// In-process carrier wiring an engine straight to a sequencer
pub mod direct;

use bytes::Bytes;
use crate::types::error::CoreResult;

/// Client side of a transport: delivers encoded client messages to the sequencer
pub trait Carrier: Send {
    /// Send one encoded `ClientMessage`
    fn send(&self, bytes: Bytes) -> CoreResult<()>;
}

/// Server side of a transport: delivers encoded server messages to one replica
pub trait PortSink: Send {
    /// Deliver one encoded `ServerMessage`
    fn deliver(&self, bytes: Bytes);
}

/// Connection status of a client engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No carrier attached
    Disconnected,
    /// Greeted, waiting for the first snapshot
    Connecting,
    /// Snapshot received, exchanging transactions
    Connected,
}

// Re-export commonly used items
pub use direct::DirectCarrier;
pub use protocol::{ClientMessage, ServerMessage, Signal};

impl<T: PortSink + Sync + ?Sized> PortSink for std::sync::Arc<T> {
    fn deliver(&self, bytes: Bytes) {
        (**self).deliver(bytes)
    }
}
