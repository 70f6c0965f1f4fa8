//! Propagators: the message-handling behavior attached to graph nodes
//!
//! Four implementations share one contract: a callback sink, a discard sink,
//! a fixed fan-out bridge, and a keyed, dynamically growing distributor.

mod bridge;
mod callback;
mod distributing;
mod error;
mod terminal;
mod traits;
mod wiring;

pub use bridge::BridgePropagator;
pub use callback::CallbackPropagator;
pub use distributing::{DistributingPropagator, DistributorStats, FacetKey};
pub use error::PropagatorError;
pub use terminal::TerminalPropagator;
pub use traits::{Ack, Propagator};
pub use wiring::{bridge, BridgeConfig};
