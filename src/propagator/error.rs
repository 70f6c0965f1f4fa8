//! Failures carried through the propagator graph

use std::any::Any;
use thiserror::Error;

/// A failure broadcast through the graph by `error()`.
///
/// `Clone` so that one failure can be delivered to every downstream node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropagatorError {
    #[error("callback in {propagator} failed: {message}")]
    Callback { propagator: String, message: String },

    #[error("transform in {propagator} failed: {message}")]
    Transform { propagator: String, message: String },

    #[error("facet {key} could not be constructed: {message}")]
    FacetConstruction { key: String, message: String },

    #[error("facet {key} failed: {cause}")]
    FacetFailed {
        key: String,
        cause: Box<PropagatorError>,
    },

    #[error("panic in {context}: {message}")]
    Panicked { context: String, message: String },

    #[error("{0}")]
    Upstream(String),
}

impl PropagatorError {
    /// A failure reported from outside the propagator graph
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// Convert a caught panic payload into an error.
    pub fn from_panic(context: &str, payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked {
            context: context.to_string(),
            message,
        }
    }
}
