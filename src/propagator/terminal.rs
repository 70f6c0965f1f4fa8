//! Terminal propagator — caps a branch that must exist but does nothing

use super::error::PropagatorError;
use super::traits::{Ack, Propagator};
use crate::graph::Edge;

/// A pure discard sink.
#[derive(Debug, Clone)]
pub struct TerminalPropagator {
    description: String,
}

impl TerminalPropagator {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

impl Default for TerminalPropagator {
    fn default() -> Self {
        Self::new("terminal")
    }
}

impl<M> Propagator<M> for TerminalPropagator {
    fn description(&self) -> &str {
        &self.description
    }

    fn error(&self, _err: &PropagatorError, _force: bool) {}

    fn close(&self, _force: bool) {}

    fn downstream(&self) -> Vec<Edge<M>> {
        Vec::new()
    }

    fn transactional(&self) {}

    fn propagate(&self, _msg: M, _direct: bool) -> Option<Ack> {
        None
    }
}
