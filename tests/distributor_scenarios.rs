//! Distributing propagator scenarios under concurrent producers
//!
//! Run with: `cargo test --test distributor_scenarios`

mod common;

use common::{init_tracing, recording_node, Recorder};
use facetflow::{
    Ack, DistributingPropagator, ExecutionContext, FacetKey, Node, NodeState, Propagator,
    PropagatorError,
};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

type Facets = Arc<Mutex<HashMap<FacetKey<u32>, (Arc<Node<u32>>, Arc<Recorder>)>>>;

struct Fixture {
    router: Arc<DistributingPropagator<u32, u32>>,
    generated: Arc<AtomicUsize>,
    facets: Facets,
}

/// Route by `msg % modulus`, backing every facet with a recording node.
fn fixture(modulus: u32, build_delay: Duration) -> Fixture {
    let generated = Arc::new(AtomicUsize::new(0));
    let facets: Facets = Arc::new(Mutex::new(HashMap::new()));

    let (count, registry) = (generated.clone(), facets.clone());
    let router = Arc::new(DistributingPropagator::new(
        "modulo",
        move |msg: &u32| Some(msg % modulus),
        move |key: &FacetKey<u32>, _ctx: &ExecutionContext| {
            count.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(build_delay);
            let (node, recorder) = recording_node(&format!("facet {key}"));
            registry
                .lock()
                .unwrap()
                .insert(key.clone(), (node.clone(), recorder));
            Ok(node)
        },
    ));

    Fixture {
        router,
        generated,
        facets,
    }
}

// === Scenario: 1000 messages, 10 keys, 8 producers ===
#[test]
fn concurrent_producers_build_each_facet_once() {
    init_tracing();
    let f = fixture(10, Duration::from_millis(2));

    let mut messages: Vec<u32> = (0..1000).collect();
    messages.shuffle(&mut rand::thread_rng());

    std::thread::scope(|scope| {
        for chunk in messages.chunks(125) {
            let router = &f.router;
            scope.spawn(move || {
                for &msg in chunk {
                    assert_eq!(router.propagate(msg, false), Some(Ack::Routed));
                }
            });
        }
    });

    assert_eq!(f.generated.load(Ordering::SeqCst), 10);
    assert_eq!(f.router.count(), 10);

    let facets = f.facets.lock().unwrap();
    assert_eq!(facets.len(), 10);
    for (_, recorder) in facets.values() {
        assert_eq!(recorder.delivered(), 100);
        // Facet delivery bypasses normal queuing
        assert_eq!(recorder.direct(), 100);
    }
    drop(facets);

    f.router.close(true);
    assert_eq!(f.router.count(), 0);
    for (node, recorder) in f.facets.lock().unwrap().values() {
        assert_eq!(recorder.closes(), vec![true]);
        assert_eq!(node.state(), NodeState::Closed);
    }
}

// === Scenario: every racer for one key shares one node ===
#[test]
fn racers_on_one_key_share_a_single_node() {
    init_tracing();
    let f = fixture(1, Duration::from_millis(20));
    let racers = 16;
    let barrier = Barrier::new(racers);

    std::thread::scope(|scope| {
        for i in 0..racers {
            let (router, barrier) = (&f.router, &barrier);
            scope.spawn(move || {
                barrier.wait();
                router.propagate(i as u32, false);
            });
        }
    });

    assert_eq!(f.generated.load(Ordering::SeqCst), 1);
    let facets = f.facets.lock().unwrap();
    let (_, recorder) = &facets[&FacetKey::Key(0)];
    assert_eq!(recorder.delivered(), racers);
}

// === Scenario: close(false) closes exactly the facets present at call time ===
#[test]
fn graceful_close_reaches_existing_facets_once() {
    init_tracing();
    let f = fixture(10, Duration::ZERO);
    for msg in [1, 2, 3] {
        f.router.propagate(msg, false);
    }

    f.router.close(false);
    f.router.close(false);
    assert_eq!(f.router.count(), 0);

    // A fresh key after close creates nothing and raises nothing
    assert_eq!(f.router.propagate(7, false), None);
    assert_eq!(f.generated.load(Ordering::SeqCst), 3);

    let facets = f.facets.lock().unwrap();
    assert_eq!(facets.len(), 3);
    for (_, recorder) in facets.values() {
        assert_eq!(recorder.closes(), vec![false]);
        assert!(recorder.errors().is_empty());
    }
}

// === Scenario: error reaches every live facet, then the distributor is closed ===
#[test]
fn error_is_broadcast_then_new_keys_are_declined() {
    init_tracing();
    let f = fixture(10, Duration::ZERO);
    for msg in [4, 5] {
        f.router.propagate(msg, false);
    }

    let err = PropagatorError::upstream("feed lost");
    f.router.error(&err, false);

    for (_, recorder) in f.facets.lock().unwrap().values() {
        assert_eq!(recorder.errors(), vec![err.clone()]);
        assert!(recorder.closes().is_empty());
    }
    assert!(f.router.is_closed());
    assert_eq!(f.router.propagate(6, false), None);
    assert_eq!(f.generated.load(Ordering::SeqCst), 2);
}

// === Scenario: transactional mode flips once and covers late facets ===
#[test]
fn transactional_covers_facets_before_and_after() {
    init_tracing();
    let f = fixture(10, Duration::ZERO);
    f.router.propagate(1, false);
    f.router.propagate(2, false);

    f.router.transactional();
    f.router.transactional();

    f.router.propagate(3, false);

    for (node, recorder) in f.facets.lock().unwrap().values() {
        assert!(node.is_transactional());
        assert_eq!(recorder.escalations(), 1);
    }
}

// === Scenario: transactional flip racing with facet creation misses nothing ===
#[test]
fn transactional_races_with_creation() {
    init_tracing();
    let f = fixture(50, Duration::from_millis(1));

    std::thread::scope(|scope| {
        let router = &f.router;
        scope.spawn(move || {
            for msg in 0..50 {
                router.propagate(msg, false);
            }
        });
        scope.spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            router.transactional();
        });
    });

    let facets = f.facets.lock().unwrap();
    assert_eq!(facets.len(), 50);
    assert!(facets.values().all(|(node, _)| node.is_transactional()));
}

// === Scenario: a completed facet retires itself ===
#[tokio::test]
async fn completed_facet_is_removed_without_distributor_calls() {
    init_tracing();
    let f = fixture(10, Duration::ZERO);
    f.router.propagate(1, false);
    f.router.propagate(2, false);

    let node = f.facets.lock().unwrap()[&FacetKey::Key(1)].0.clone();
    let completion = node.completion();
    tokio::task::spawn_blocking(move || node.close(false))
        .await
        .unwrap();

    assert_eq!(completion.wait().await, Ok(()));
    assert_eq!(f.router.facets(), vec![FacetKey::Key(2)]);
    assert!(!f.router.is_closed());
}

// === Scenario: close racing with producers never leaves an open facet ===
#[test]
fn close_racing_with_producers_leaves_no_open_facet() {
    init_tracing();
    let f = fixture(1000, Duration::ZERO);

    std::thread::scope(|scope| {
        for t in 0..4u32 {
            let router = &f.router;
            scope.spawn(move || {
                for msg in (t * 250)..((t + 1) * 250) {
                    router.propagate(msg, false);
                }
            });
        }
        let router = &f.router;
        scope.spawn(move || {
            std::thread::sleep(Duration::from_millis(1));
            router.close(false);
        });
    });

    assert!(f.router.is_closed());
    assert_eq!(f.router.count(), 0);
    for (node, recorder) in f.facets.lock().unwrap().values() {
        assert_eq!(node.state(), NodeState::Closed);
        assert_eq!(recorder.closes(), vec![false]);
    }
}
