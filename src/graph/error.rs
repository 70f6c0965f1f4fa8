//! Errors raised while wiring graph regions together

use thiserror::Error;

/// Errors that can occur while linking nodes and propagators
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node already has a propagator attached: {0}")]
    AlreadyLinked(String),

    #[error("bridge requires an edge description or a node description")]
    MissingDescription,

    #[error("link vetoed: {0}")]
    LinkVetoed(String),

    #[error("invalid bridge configuration: {0}")]
    Config(#[from] serde_yaml::Error),
}

/// Result type for wiring operations
pub type GraphResult<T> = Result<T, GraphError>;
