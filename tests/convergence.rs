//! End to end reconciliation through a session host

mod common;

use tandem_core::{ConnectionState, Transaction, TxIdRange, Value};

const SESSION: &str = "patch";

fn server_counts(host: &std::sync::Arc<tandem::SessionHost>) -> (usize, usize) {
    host.with_session(SESSION, |seq| common::counts(seq.replica())).unwrap()
}

fn assert_converged(host: &std::sync::Arc<tandem::SessionHost>, engines: &[&tandem_core::Engine]) {
    let reference = host.with_session(SESSION, |seq| seq.write().unwrap()).unwrap();
    for engine in engines {
        assert_eq!(engine.pending_len(), 0);
        assert_eq!(engine.replica().write().unwrap(), reference);
    }
}

#[test]
fn test_delete_reaching_sequencer_first_wins() {
    let host = common::host();
    let mut a = common::join(&host, SESSION, 2);
    let mut b = common::join(&host, SESSION, 3);
    assert_eq!(a.state(), ConnectionState::Connected);

    let boxes = common::boxes(a.replica());
    assert_eq!(boxes.len(), 2);
    for node in &boxes {
        a.replica_mut().erase_object(*node).unwrap();
    }
    a.commit().unwrap();
    common::link(&mut b, boxes[0], boxes[1]);
    let link_tx = b.commit().unwrap().unwrap();

    assert_eq!(a.push().unwrap(), 1);
    assert_eq!(b.push().unwrap(), 1);

    let report = a.pull().unwrap();
    assert_eq!(report.acked.len(), 1);
    let report = b.pull().unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.denied.len(), 1);
    assert_eq!(report.denied[0].0, link_tx.id);

    assert_eq!(common::counts(a.replica()), (0, 0));
    assert_eq!(common::counts(b.replica()), (0, 0));
    assert_eq!(server_counts(&host), (0, 0));
    assert_converged(&host, &[&a, &b]);
}

#[test]
fn test_link_reaching_sequencer_first_wins() {
    let host = common::host();
    let mut a = common::join(&host, SESSION, 2);
    let mut b = common::join(&host, SESSION, 3);

    let boxes = common::boxes(a.replica());
    for node in &boxes {
        a.replica_mut().erase_object(*node).unwrap();
    }
    let delete_tx = a.commit().unwrap().unwrap();
    common::link(&mut b, boxes[0], boxes[1]);
    b.commit().unwrap();

    assert_eq!(b.push().unwrap(), 1);
    assert_eq!(a.push().unwrap(), 1);

    let report = b.pull().unwrap();
    assert_eq!(report.acked.len(), 1);
    let report = a.pull().unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.denied[0].0, delete_tx.id);

    assert_eq!(common::counts(a.replica()), (2, 1));
    assert_eq!(common::counts(b.replica()), (2, 1));
    assert_eq!(server_counts(&host), (2, 1));
    assert_converged(&host, &[&a, &b]);
}

#[test]
fn test_interleaved_edits_converge() {
    let host = common::host();
    let mut a = common::join(&host, SESSION, 2);
    let mut b = common::join(&host, SESSION, 3);
    let mut c = common::join(&host, SESSION, 4);
    let boxes = common::boxes(a.replica());

    for round in 0..4 {
        let replica = a.replica_mut();
        replica.set_member(boxes[0], "x", round as f64).unwrap();
        let layers = replica.member(replica.root(), "layers").unwrap();
        replica.insert_at(layers, 0, "Box").unwrap();
        a.commit().unwrap();

        let replica = b.replica_mut();
        replica.set_member(boxes[0], "x", -(round as f64)).unwrap();
        let layers = replica.member(replica.root(), "layers").unwrap();
        replica.insert(layers, "Box").unwrap();
        b.commit().unwrap();

        let replica = c.replica_mut();
        let root = replica.root();
        replica.set_member(root, "name", format!("round {}", round)).unwrap();
        c.commit().unwrap();

        common::settle(&mut [&mut a, &mut b, &mut c]);
    }

    let layers = {
        let view = a.replica().view();
        view.elements(view.root(), "layers").len()
    };
    assert_eq!(layers, 8);
    let root = c.replica().root();
    assert_eq!(c.replica().value(root, "name").unwrap(), &Value::from("round 3"));
    assert_converged(&host, &[&a, &b, &c]);
}

#[test]
fn test_uncommitted_edits_survive_remote_changes() {
    let host = common::host();
    let mut a = common::join(&host, SESSION, 2);
    let mut b = common::join(&host, SESSION, 3);
    let boxes = common::boxes(a.replica());

    b.replica_mut().set_member(boxes[1], "text", "dac~ 2").unwrap();
    b.commit().unwrap();
    b.push().unwrap();

    a.replica_mut().set_member(boxes[0], "y", 12.5).unwrap();
    a.pull().unwrap();
    assert_eq!(a.replica().value(boxes[1], "text").unwrap(), &Value::from("dac~ 2"));
    assert_eq!(a.replica().value(boxes[0], "y").unwrap(), &Value::Float(12.5));
    assert!(a.replica().has_changes());

    a.commit().unwrap();
    common::settle(&mut [&mut a, &mut b]);
    assert_eq!(b.replica().value(boxes[0], "y").unwrap(), &Value::Float(12.5));
    assert_converged(&host, &[&a, &b]);
}

#[test]
fn test_snapshot_discards_pending() {
    let host = common::host();
    let mut a = common::join(&host, SESSION, 2);
    let root = a.replica().root();

    a.replica_mut().set_member(root, "name", "draft").unwrap();
    a.commit().unwrap();
    assert_eq!(a.pending_len(), 1);

    a.request_resync().unwrap();
    assert!(a.needs_resync());
    assert_eq!(a.push().unwrap(), 0);

    let report = a.pull().unwrap();
    assert!(report.snapshot);
    assert!(!report.resync_required);
    assert_eq!(a.pending_len(), 0);
    assert_eq!(a.replica().value(root, "name").unwrap(), &Value::from(""));
    assert_converged(&host, &[&a]);
}

#[test]
fn test_signals_reach_other_peers_only() {
    let host = common::host();
    let mut a = common::join(&host, SESSION, 2);
    let mut b = common::join(&host, SESSION, 3);
    let target = common::boxes(a.replica())[0];

    let signal = tandem_core::Signal { target, kind: 7, payload: vec![1, 2, 3] };
    a.signal(signal.clone()).unwrap();

    assert!(a.pull().unwrap().signals.is_empty());
    assert_eq!(b.pull().unwrap().signals, vec![signal]);
}

#[test]
fn test_squash_of_acknowledged_commits_keeps_replicas_equal() {
    let host = common::host();
    let mut a = common::join(&host, SESSION, 2);
    let mut b = common::join(&host, SESSION, 3);
    let target = common::boxes(a.replica())[0];

    let mut run = Vec::new();
    for text in ["one", "two"] {
        a.replica_mut().set_member(target, "text", text).unwrap();
        run.push(a.commit().unwrap().unwrap());
    }
    assert_eq!(a.push().unwrap(), 2);
    assert_eq!(a.pull().unwrap().acked.len(), 2);
    assert_eq!(b.pull().unwrap().applied.len(), 2);

    let range = TxIdRange::spanning(run[0].id, run[1].id).unwrap();
    a.request_squash(range, Transaction::squash(run[1].id, &run)).unwrap();
    let report = a.pull().unwrap();
    assert_eq!(report.squashed.len(), 1);
    assert_eq!(report.squashed[0].0, range);
    assert!(!report.resync_required);
    assert!(b.pull().unwrap().squashed.is_empty());

    // Sequencing continues normally after the squash
    b.replica_mut().set_member(target, "text", "three").unwrap();
    b.commit().unwrap();
    common::settle(&mut [&mut a, &mut b]);

    assert_eq!(a.position(), b.position());
    assert_eq!(a.replica().value(target, "text").unwrap(), &Value::from("three"));
    assert_converged(&host, &[&a, &b]);
}

#[test]
fn test_squash_of_unsent_commits_is_refused() {
    let host = common::host();
    let mut a = common::join(&host, SESSION, 2);
    let target = common::boxes(a.replica())[0];

    let mut run = Vec::new();
    for text in ["one", "two"] {
        a.replica_mut().set_member(target, "text", text).unwrap();
        run.push(a.commit().unwrap().unwrap());
    }
    let range = TxIdRange::spanning(run[0].id, run[1].id).unwrap();
    assert!(a.request_squash(range, Transaction::squash(run[1].id, &run)).is_err());

    common::settle(&mut [&mut a]);
    assert_eq!(a.replica().value(target, "text").unwrap(), &Value::from("two"));
    assert_converged(&host, &[&a]);
}
