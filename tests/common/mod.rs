//! Shared fixtures for the host integration tests
#![allow(dead_code)]

use std::sync::Arc;
use tandem::{Config, MemoryStore, SessionHost, SessionStore};
use tandem_core::{CoreResult, Engine, GraphView, NodeId, Replica, Schema, ValidationError, Validator, Value};

/// Patch-like schema: boxes, links between them and a name
pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder("patch.1")
            .class("Box", |c| c.string("text").float("x").float("y"))
            .class("Link", |c| c.reference("sender").reference("receiver"))
            .class("Patch", |c| {
                c.unordered("objects", "Box")
                    .unordered("links", "Link")
                    .ordered("layers", "Box")
                    .string("name")
            })
            .root("Patch")
            .build()
            .unwrap(),
    )
}

/// Every link must join two live boxes
pub fn links_are_connected(view: &GraphView<'_>, _user: u64) -> Result<(), ValidationError> {
    for link in view.elements(view.root(), "links") {
        for end in ["sender", "receiver"] {
            match view.value(link, end) {
                Some(Value::Ref(target)) if view.is_live(*target) && view.is_a(*target, "Box") => {}
                _ => return Err(ValidationError::new(format!("{} of {} is not connected", end, link))),
            }
        }
    }
    Ok(())
}

/// New sessions start with two boxes
pub fn two_boxes(replica: &mut Replica) -> CoreResult<()> {
    let objects = replica.member(replica.root(), "objects")?;
    for text in ["osc~ 440", "dac~"] {
        let node = replica.insert(objects, "Box")?;
        replica.set_member(node, "text", text)?;
    }
    Ok(())
}

/// Host over `store` validating links and seeding two boxes
pub fn host_with(config: Config, store: Arc<dyn SessionStore>) -> Arc<SessionHost> {
    Arc::new(
        SessionHost::new(config, schema(), store)
            .with_validators(|_| -> Box<dyn Validator> { Box::new(links_are_connected) })
            .with_initialiser(two_boxes),
    )
}

/// Host over a fresh memory store
pub fn host() -> Arc<SessionHost> {
    host_with(Config::default(), Arc::new(MemoryStore::new()))
}

/// Client engine for `user`, not yet connected
pub fn engine(user: u64) -> Engine {
    Engine::new(schema(), Box::new(links_are_connected), user, 1).unwrap()
}

/// Client engine for `user` joined to `session` with its snapshot loaded
pub fn join(host: &Arc<SessionHost>, session: &str, user: u64) -> Engine {
    let mut engine = engine(user);
    host.join(session, &mut engine).unwrap();
    engine.pull().unwrap();
    engine
}

/// Live boxes of a document
pub fn boxes(replica: &Replica) -> Vec<NodeId> {
    let view = replica.view();
    view.elements(view.root(), "objects")
}

/// Number of live boxes and links
pub fn counts(replica: &Replica) -> (usize, usize) {
    let view = replica.view();
    (view.elements(view.root(), "objects").len(), view.elements(view.root(), "links").len())
}

/// Link `sender` to `receiver` as an uncommitted local edit
pub fn link(engine: &mut Engine, sender: NodeId, receiver: NodeId) -> NodeId {
    let replica = engine.replica_mut();
    let links = replica.member(replica.root(), "links").unwrap();
    let link = replica.insert(links, "Link").unwrap();
    replica.set_member(link, "sender", sender).unwrap();
    replica.set_member(link, "receiver", receiver).unwrap();
    link
}

/// Push and pull every engine until nothing is left in flight
pub fn settle(engines: &mut [&mut Engine]) {
    for _ in 0..3 {
        for engine in engines.iter_mut() {
            engine.push().unwrap();
        }
        for engine in engines.iter_mut() {
            engine.pull().unwrap();
        }
    }
}
