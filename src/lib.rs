//! Facetflow: Propagator Core for Dataflow Graphs
//!
//! Nodes hand every message to an attached propagator. Propagators decide what
//! happens next: consume it, discard it, transform and forward it, or route it
//! to a dynamically created keyed branch.
//!
//! # Core Concepts
//!
//! - **Propagator**: the message-handling contract (`propagate`, `close`,
//!   `error`, `transactional`, `downstream`)
//! - **Facet**: a keyed downstream branch of a [`DistributingPropagator`],
//!   built on first sighting of its key and removed when its node completes
//! - **Bridge**: a transform relay joining a source node to destinations,
//!   with lifecycle signals crossing in both directions
//!
//! # Example
//!
//! ```
//! use facetflow::{CallbackPropagator, DistributingPropagator, Node};
//! use std::sync::Arc;
//!
//! let router = Arc::new(DistributingPropagator::new(
//!     "by-region",
//!     |order: &(String, u32)| Some(order.0.clone()),
//!     |region, _ctx| {
//!         let name = format!("orders {region}");
//!         Ok(Node::with_propagator(
//!             name.clone(),
//!             Arc::new(CallbackPropagator::sink(name, |_order: (String, u32)| {})),
//!         ))
//!     },
//! ));
//! let entry = Node::with_propagator("orders", router.clone());
//!
//! entry.deliver(("eu".to_string(), 3));
//! entry.deliver(("us".to_string(), 5));
//! assert_eq!(router.count(), 2);
//!
//! entry.close(false);
//! assert_eq!(router.count(), 0);
//! ```

pub mod graph;
pub mod propagator;

pub use graph::{
    Completion, CompletionResult, Edge, ExecutionContext, GraphError, GraphResult, Link,
    LinkHooks, Node, NodeId, NodeState, StateChange,
};
pub use propagator::{
    bridge, Ack, BridgeConfig, BridgePropagator, CallbackPropagator, DistributingPropagator,
    DistributorStats, FacetKey, Propagator, PropagatorError, TerminalPropagator,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
