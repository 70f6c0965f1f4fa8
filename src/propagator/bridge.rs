//! Bridge propagator — fixed fan-out transform relay
//!
//! The downstream edges are captured at construction and used only for
//! lifecycle broadcast. Per-message forwarding is the transform's job; it
//! receives the edges so it can forward wherever it likes.

use super::error::PropagatorError;
use super::traits::{Ack, Propagator};
use crate::graph::{Edge, StateChange};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, trace};

type Transform<M> = Box<dyn Fn(M, &[Edge<M>]) -> Result<Option<Ack>, PropagatorError> + Send + Sync>;

/// Relays messages through a transform and lifecycle through its edges.
pub struct BridgePropagator<M> {
    description: String,
    transform: Transform<M>,
    downstream: Vec<Edge<M>>,
    closed: AtomicBool,
    transactional: AtomicBool,
}

impl<M: 'static> BridgePropagator<M> {
    pub fn new<F>(description: impl Into<String>, downstream: Vec<Edge<M>>, transform: F) -> Self
    where
        F: Fn(M, &[Edge<M>]) -> Result<Option<Ack>, PropagatorError> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            transform: Box::new(transform),
            downstream,
            closed: AtomicBool::new(false),
            transactional: AtomicBool::new(false),
        }
    }
}

impl<M> BridgePropagator<M> {
    /// The fixed downstream edge array
    pub fn edges(&self) -> &[Edge<M>] {
        &self.downstream
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional.load(Ordering::Acquire)
    }

    /// Apply a state change observed upstream to every destination.
    pub fn relay(&self, change: &StateChange) {
        trace!(bridge = %self.description, change = ?change, "relaying state change");
        for edge in &self.downstream {
            edge.node().apply(change);
        }
    }

    fn shut(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<M> Propagator<M> for BridgePropagator<M> {
    fn description(&self) -> &str {
        &self.description
    }

    fn error(&self, err: &PropagatorError, force: bool) {
        if !self.shut() {
            return;
        }
        debug!(bridge = %self.description, error = %err, "broadcasting error");
        for edge in &self.downstream {
            edge.node().error(err, force);
        }
    }

    fn close(&self, force: bool) {
        if !self.shut() {
            return;
        }
        debug!(bridge = %self.description, force, "broadcasting close");
        for edge in &self.downstream {
            edge.node().close(force);
        }
    }

    fn downstream(&self) -> Vec<Edge<M>> {
        self.downstream.clone()
    }

    fn transactional(&self) {
        if self
            .transactional
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Each node escalates whatever propagator it holds right now.
        for edge in self.downstream() {
            edge.node().transactional();
        }
    }

    fn propagate(&self, msg: M, _direct: bool) -> Option<Ack> {
        if self.is_closed() {
            return None;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.transform)(msg, &self.downstream)
        }))
        .unwrap_or_else(|payload| Err(PropagatorError::from_panic(&self.description, payload)));

        match outcome {
            Ok(ack) => ack,
            Err(err) => {
                error!(bridge = %self.description, error = %err, "transform failed");
                None
            }
        }
    }
}
