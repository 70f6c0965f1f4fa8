//! Propagator trait — the contract every sink and router implements

use super::error::PropagatorError;
use crate::graph::Edge;

/// Acknowledgement returned from a successful `propagate()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// A terminal sink handled the message
    Consumed,
    /// The message was delivered via internal routing to a facet
    Routed,
    /// A transform forwarded the message to this many destinations
    Forwarded(usize),
}

/// A graph node's message-handling behavior.
///
/// Implementations are shared across producer threads, so every operation
/// takes `&self`. Lifecycle operations never fail back to the caller and are
/// idempotent past their first transition.
pub trait Propagator<M>: Send + Sync {
    /// Diagnostic description
    fn description(&self) -> &str;

    /// Broadcast a fatal failure downstream.
    fn error(&self, err: &PropagatorError, force: bool);

    /// Broadcast a graceful (`force == false`) or forced shutdown downstream.
    fn close(&self, force: bool);

    /// Outgoing edges as currently known; possibly empty.
    fn downstream(&self) -> Vec<Edge<M>>;

    /// Escalate this propagator and its currently known downstream set into
    /// transactional mode. One-way.
    fn transactional(&self);

    /// Deliver a message. `direct` marks delivery that bypassed normal queuing.
    fn propagate(&self, msg: M, direct: bool) -> Option<Ack>;
}
