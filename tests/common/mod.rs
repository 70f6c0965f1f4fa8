//! Common helpers for propagator scenario tests
//!
//! `init_tracing()` installs a test-writer subscriber once per test binary.
//! Set `RUST_LOG` (e.g. `facetflow=debug`) to see facet lifecycle events.

#![allow(dead_code)]

use facetflow::{Ack, Edge, Node, Propagator, PropagatorError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call from every test.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("facetflow=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A sink that records every call it receives.
#[derive(Debug, Default)]
pub struct Recorder {
    delivered: AtomicUsize,
    direct: AtomicUsize,
    closes: Mutex<Vec<bool>>,
    errors: Mutex<Vec<PropagatorError>>,
    escalations: AtomicUsize,
}

impl Recorder {
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn direct(&self) -> usize {
        self.direct.load(Ordering::SeqCst)
    }

    /// `force` flag of every close received
    pub fn closes(&self) -> Vec<bool> {
        self.closes.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<PropagatorError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn escalations(&self) -> usize {
        self.escalations.load(Ordering::SeqCst)
    }
}

impl<M> Propagator<M> for Recorder {
    fn description(&self) -> &str {
        "recorder"
    }

    fn error(&self, err: &PropagatorError, _force: bool) {
        self.errors.lock().unwrap().push(err.clone());
    }

    fn close(&self, force: bool) {
        self.closes.lock().unwrap().push(force);
    }

    fn downstream(&self) -> Vec<Edge<M>> {
        Vec::new()
    }

    fn transactional(&self) {
        self.escalations.fetch_add(1, Ordering::SeqCst);
    }

    fn propagate(&self, _msg: M, direct: bool) -> Option<Ack> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        if direct {
            self.direct.fetch_add(1, Ordering::SeqCst);
        }
        Some(Ack::Consumed)
    }
}

/// A node backed by a fresh [`Recorder`].
pub fn recording_node<M: 'static>(name: &str) -> (Arc<Node<M>>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let node = Node::with_propagator(name, recorder.clone());
    (node, recorder)
}
