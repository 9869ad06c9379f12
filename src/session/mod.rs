//! Session hosting
//!
//! A session is one document ordered by one sequencer. The host opens
//! sessions on demand, routes client bytes to them and persists them
//! through a [`SessionStore`](crate::storage::SessionStore).

pub mod host;

pub use host::{Greeting, HostCarrier, PortHandle, SessionHost};
