//! In-process carrier.
//!
//! Hands client frames straight to a sequencer living in the same process.
//! Used by embedded hosts and tests; the sequencer answers synchronously
//! into the engine's pull stack.

use std::sync::Arc;
use bytes::Bytes;
use parking_lot::Mutex;
use crate::comms::Carrier;
use crate::server::{PortId, Sequencer};
use crate::types::error::CoreResult;

/// Carrier delivering to a shared [`Sequencer`] through one of its ports
#[derive(Clone)]
pub struct DirectCarrier {
    server: Arc<Mutex<Sequencer>>,
    port: PortId,
}

impl DirectCarrier {
    /// Wrap an already opened port
    pub fn new(server: Arc<Mutex<Sequencer>>, port: PortId) -> Self {
        Self { server, port }
    }

    /// Port this carrier speaks through
    pub fn port(&self) -> PortId {
        self.port
    }
}

impl Carrier for DirectCarrier {
    fn send(&self, bytes: Bytes) -> CoreResult<()> {
        self.server.lock().receive(self.port, &bytes)
    }
}
