//! Multi-session host
//!
//! Every open session owns one [`Sequencer`] behind a `parking_lot` mutex.
//! Ports are host-wide handles routed to a session and to the port the
//! sequencer handed out. Sessions open lazily on first connect, from the
//! store when a snapshot exists, and close when their last port leaves.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tandem_core::backend::binary;
use tandem_core::comms::protocol::{deserialize_client, ClientMessage};
use tandem_core::{
    AcceptAll, Carrier, CoreError, CoreResult, Engine, PortId, PortSink, Replica, Schema, Sequencer, Validator,
};
use crate::core::{Config, Error, Result, StorageError};
use crate::storage::{SessionId, SessionStore};
use crate::system::metrics;

// Variant index of a client message, written first by bincode
const GREET_TAG: u8 = 0;
const COMMIT_TAG: u8 = 1;
const SIGNAL_TAG: u8 = 3;
const RESYNC_TAG: u8 = 4;

type ValidatorFactory = Box<dyn Fn(&str) -> Box<dyn Validator> + Send + Sync>;
type Authenticator = Box<dyn Fn(&Greeting) -> bool + Send + Sync>;
type Initialiser = Box<dyn Fn(&mut Replica) -> CoreResult<()> + Send + Sync>;

/// Identity a replica presents when it joins a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Session being joined
    pub session: SessionId,
    /// Editing user
    pub user: u64,
    /// Editing actor
    pub actor: u64,
    /// Application metadata sent with the greeting
    pub metadata: BTreeMap<String, String>,
}

/// Host-wide handle of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortHandle(u64);

impl PortHandle {
    /// Raw handle value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

struct Route {
    session: SessionId,
    port: PortId,
}

/// Hosts many sessions, each ordered by its own sequencer
pub struct SessionHost {
    config: Config,
    schema: Arc<Schema>,
    store: Arc<dyn SessionStore>,
    validators: ValidatorFactory,
    authenticator: Authenticator,
    initialiser: Initialiser,
    sessions: DashMap<SessionId, Arc<Mutex<Sequencer>>>,
    routes: DashMap<PortHandle, Route>,
    next_port: AtomicU64,
}

impl SessionHost {
    /// Create a host accepting every user and every transaction
    pub fn new(config: Config, schema: Arc<Schema>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            schema,
            store,
            validators: Box::new(|_: &str| -> Box<dyn Validator> { Box::new(AcceptAll) }),
            authenticator: Box::new(|_: &Greeting| true),
            initialiser: Box::new(|_: &mut Replica| Ok(())),
            sessions: DashMap::new(),
            routes: DashMap::new(),
            next_port: AtomicU64::new(1),
        }
    }

    /// Build the business validator of each new session
    pub fn with_validators<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn Validator> + Send + Sync + 'static,
    {
        self.validators = Box::new(factory);
        self
    }

    /// Decide who may join a session. Refused ports are closed.
    pub fn with_authenticator<F>(mut self, authenticator: F) -> Self
    where
        F: Fn(&Greeting) -> bool + Send + Sync + 'static,
    {
        self.authenticator = Box::new(authenticator);
        self
    }

    /// Fill the document of sessions that have no stored snapshot
    pub fn with_initialiser<F>(mut self, initialiser: F) -> Self
    where
        F: Fn(&mut Replica) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.initialiser = Box::new(initialiser);
        self
    }

    /// Host configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Schema shared by every session
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Open a port on `session`, opening the session itself if needed
    pub fn connect(&self, session: &str, sink: Box<dyn PortSink>) -> Result<PortHandle> {
        self.open(session)?;
        let entry = self
            .sessions
            .get(session)
            .ok_or_else(|| Error::session(format!("session {} closed while connecting", session)))?;
        let port = entry.value().lock().connect(sink);
        drop(entry);

        let handle = PortHandle(self.next_port.fetch_add(1, Ordering::Relaxed));
        self.routes.insert(handle, Route { session: session.to_string(), port });
        metrics::record(|m| m.sessions.ports.inc());
        debug!("Routed {} to {} port {}", handle, session, port);
        Ok(handle)
    }

    /// Connect `engine` to `session` through a [`HostCarrier`] and greet.
    ///
    /// The engine takes its pending queue warning threshold from
    /// `engine.max_pending`.
    pub fn join(self: &Arc<Self>, session: &str, engine: &mut Engine) -> Result<PortHandle> {
        engine.set_pending_warning(self.config.engine.max_pending);
        let port = self.connect(session, Box::new(engine.pull_stack()))?;
        if let Err(e) = engine.attach(Box::new(HostCarrier::new(Arc::clone(self), port))) {
            engine.detach();
            if self.routes.contains_key(&port) {
                self.disconnect(port)?;
            }
            return Err(e.into());
        }
        Ok(port)
    }

    /// Handle one encoded client message arriving on `port`
    pub fn receive(&self, port: PortHandle, bytes: &[u8]) -> Result<()> {
        let limit = self.config.sessions.max_message_size;
        if bytes.len() > limit {
            metrics::record(|m| m.network.messages_rejected.inc());
            return Err(Error::invalid_input(format!(
                "message of {} bytes exceeds the {} byte limit",
                bytes.len(),
                limit
            )));
        }
        let (session, target) = {
            let route = self
                .routes
                .get(&port)
                .ok_or_else(|| Error::not_found(format!("{}", port)))?;
            (route.session.clone(), route.port)
        };
        metrics::record(|m| m.network.bytes_received.inc_by(bytes.len() as u64));

        let tag = bytes.first().copied();
        if tag == Some(GREET_TAG) {
            self.authenticate(port, &session, bytes)?;
        }

        let shared = self
            .sessions
            .get(&session)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::session(format!("session {} is closed", session)))?;
        let mut sequencer = shared.lock();
        let before = sequencer.position();
        sequencer.receive(target, bytes)?;
        let accepted = sequencer.position() > before;
        drop(sequencer);

        metrics::record(|m| match tag {
            Some(COMMIT_TAG) if accepted => m.transactions.accepted.inc(),
            Some(COMMIT_TAG) => m.transactions.denied.inc(),
            Some(SIGNAL_TAG) => m.sessions.signals_relayed.inc(),
            Some(GREET_TAG) | Some(RESYNC_TAG) => m.sessions.snapshots_sent.inc(),
            _ => {}
        });
        Ok(())
    }

    /// Close `port`. The session is persisted and closed when it was the last one.
    pub fn disconnect(&self, port: PortHandle) -> Result<()> {
        let (_, route) = self
            .routes
            .remove(&port)
            .ok_or_else(|| Error::not_found(format!("{}", port)))?;
        metrics::record(|m| m.sessions.ports.dec());

        let Some(shared) = self.sessions.get(&route.session).map(|entry| Arc::clone(entry.value())) else {
            return Ok(());
        };
        let remaining = shared.lock().disconnect(route.port);
        debug!("Closed {}, {} ports left on {}", port, remaining, route.session);
        if remaining == 0 && self.config.sessions.persist_on_disconnect {
            self.close(&route.session)?;
        }
        Ok(())
    }

    /// Write the snapshot of an open session to the store
    pub fn flush(&self, session: &str) -> Result<()> {
        let shared = self
            .sessions
            .get(session)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_found(format!("session {}", session)))?;
        let sequencer = shared.lock();
        self.persist(&sequencer)
    }

    /// Write every open session to the store and return how many were written
    pub fn flush_all(&self) -> Result<usize> {
        let open: Vec<Arc<Mutex<Sequencer>>> = self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect();
        for shared in &open {
            self.persist(&shared.lock())?;
        }
        info!("Flushed {} sessions", open.len());
        Ok(open.len())
    }

    /// Open sessions, sorted
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        sessions.sort();
        sessions
    }

    /// Users greeted on `session`, sorted and without duplicates
    pub fn connected_users(&self, session: &str) -> Vec<u64> {
        let Some(shared) = self.sessions.get(session).map(|entry| Arc::clone(entry.value())) else {
            return Vec::new();
        };
        let mut users: Vec<u64> = shared.lock().peers().into_iter().map(|(_, peer)| peer.user).collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    /// Run `f` on the sequencer of an open session
    pub fn with_session<R>(&self, session: &str, f: impl FnOnce(&mut Sequencer) -> R) -> Result<R> {
        let shared = self
            .sessions
            .get(session)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_found(format!("session {}", session)))?;
        let mut sequencer = shared.lock();
        Ok(f(&mut sequencer))
    }

    fn open(&self, session: &str) -> Result<()> {
        if self.sessions.contains_key(session) {
            return Ok(());
        }
        let limit = self.config.sessions.max_sessions;
        if self.sessions.len() >= limit {
            return Err(Error::session(format!("session limit of {} reached", limit)));
        }
        let sequencer = self.restore(session)?;
        if let Entry::Vacant(slot) = self.sessions.entry(session.to_string()) {
            slot.insert(Arc::new(Mutex::new(sequencer)));
            metrics::record(|m| m.sessions.open.inc());
            info!("Opened session {}", session);
        }
        Ok(())
    }

    fn restore(&self, session: &str) -> Result<Sequencer> {
        let mut sequencer = Sequencer::new(session, Arc::clone(&self.schema), (self.validators)(session))?;
        match self.store.read(session)? {
            Some(bytes) => {
                let document = binary::decode(&bytes).map_err(|e| StorageError::Corruption {
                    session: session.to_string(),
                    reason: e.to_string(),
                })?;
                sequencer.load(&document)?;
                debug!("Restored {} from {} bytes", session, bytes.len());
            }
            None => {
                let initialiser = &self.initialiser;
                sequencer.commit(|replica| initialiser(replica))?;
            }
        }
        Ok(sequencer)
    }

    fn close(&self, session: &str) -> Result<()> {
        let mut written = Ok(());
        let closed = self.sessions.remove_if(session, |_, shared| {
            let sequencer = shared.lock();
            if sequencer.port_count() > 0 {
                return false;
            }
            written = self.persist(&sequencer);
            written.is_ok()
        });
        written?;
        if closed.is_some() {
            metrics::record(|m| m.sessions.open.dec());
            info!("Closed session {}", session);
        }
        Ok(())
    }

    fn persist(&self, sequencer: &Sequencer) -> Result<()> {
        let snapshot = sequencer.snapshot()?;
        self.store.write(sequencer.session(), Bytes::from(snapshot))
    }

    fn authenticate(&self, port: PortHandle, session: &str, bytes: &[u8]) -> Result<()> {
        // Undecodable greetings are reported by the sequencer
        let Ok(ClientMessage::Greet { user, actor, metadata, .. }) = deserialize_client(bytes) else {
            return Ok(());
        };
        let greeting = Greeting { session: session.to_string(), user, actor, metadata };
        if (self.authenticator)(&greeting) {
            return Ok(());
        }
        warn!("Refused user {}.{} on {}", user, actor, session);
        self.disconnect(port)?;
        Err(Error::permission(format!("user {} may not join {}", user, session)))
    }
}

/// Carrier delivering a client engine's messages straight into a [`SessionHost`]
pub struct HostCarrier {
    host: Arc<SessionHost>,
    port: PortHandle,
}

impl HostCarrier {
    /// Carrier for a port already opened with [`SessionHost::connect`]
    pub fn new(host: Arc<SessionHost>, port: PortHandle) -> Self {
        Self { host, port }
    }

    /// Port this carrier writes to
    pub fn port(&self) -> PortHandle {
        self.port
    }
}

impl Carrier for HostCarrier {
    fn send(&self, bytes: Bytes) -> CoreResult<()> {
        self.host.receive(self.port, &bytes).map_err(|e| match e {
            Error::Core(core) => core,
            other => CoreError::protocol(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tandem_core::comms::protocol::serialize_client;
    use tandem_core::PullStack;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder("host.test.1")
                .class("Doc", |c| c.string("title"))
                .root("Doc")
                .build()
                .unwrap(),
        )
    }

    fn host(config: Config) -> SessionHost {
        SessionHost::new(config, schema(), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_session_limit() {
        let mut config = Config::default();
        config.sessions.max_sessions = 1;
        let host = host(config);
        host.connect("a", Box::new(Arc::new(PullStack::new()))).unwrap();
        host.connect("a", Box::new(Arc::new(PullStack::new()))).unwrap();
        let refused = host.connect("b", Box::new(Arc::new(PullStack::new())));
        assert!(matches!(refused, Err(Error::Session(_))));
        assert_eq!(host.sessions(), vec!["a".to_string()]);
    }

    #[test]
    fn test_oversized_and_unrouted_messages() {
        let mut config = Config::default();
        config.sessions.max_message_size = 1024;
        let host = host(config);
        let port = host.connect("a", Box::new(Arc::new(PullStack::new()))).unwrap();
        assert!(matches!(host.receive(port, &[0u8; 2048]), Err(Error::InvalidInput(_))));
        let resync = serialize_client(&ClientMessage::Resync).unwrap();
        assert!(matches!(host.receive(PortHandle(99), &resync), Err(Error::NotFound(_))));
        // The port has not greeted yet
        assert!(matches!(host.receive(port, &resync), Err(Error::Core(CoreError::Protocol(_)))));
    }

    #[test]
    fn test_initialiser_runs_for_new_sessions() {
        let host = host(Config::default()).with_initialiser(|replica| {
            let root = replica.root();
            replica.set_member(root, "title", "untitled")
        });
        host.connect("a", Box::new(Arc::new(PullStack::new()))).unwrap();
        let title = host
            .with_session("a", |seq| seq.replica().value(seq.replica().root(), "title").cloned())
            .unwrap()
            .unwrap();
        assert_eq!(title, tandem_core::Value::from("untitled"));
    }

    #[test]
    fn test_session_stays_open_without_persistence() {
        let mut config = Config::default();
        config.sessions.persist_on_disconnect = false;
        let host = host(config);
        let port = host.connect("a", Box::new(Arc::new(PullStack::new()))).unwrap();
        host.disconnect(port).unwrap();
        assert_eq!(host.sessions(), vec!["a".to_string()]);
        assert!(host.disconnect(port).is_err());
        assert_eq!(host.flush_all().unwrap(), 1);
    }

    #[test]
    fn test_join_applies_pending_warning() {
        let mut config = Config::default();
        config.engine.max_pending = 8;
        let host = Arc::new(host(config));
        let mut engine = Engine::new(schema(), Box::new(AcceptAll), 2, 1).unwrap();
        assert_ne!(engine.pending_warning(), 8);
        host.join("a", &mut engine).unwrap();
        assert_eq!(engine.pending_warning(), 8);
        assert!(engine.pull().unwrap().snapshot);
    }
}
