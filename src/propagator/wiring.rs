//! bridge() — joins a source node to destination nodes through a bridge propagator
//!
//! Besides attaching the propagator, the wiring cross-links lifecycle
//! signals: the source's state changes can be relayed through the bridge
//! to every destination, and each destination's state changes can be
//! relayed back to the source. Neither side needs to know about the other.

use super::bridge::BridgePropagator;
use super::error::PropagatorError;
use super::traits::{Ack, Propagator};
use crate::graph::{Edge, GraphError, GraphResult, Link, LinkHooks, Node};
use serde::Deserialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Options recognized by [`bridge`].
///
/// ```yaml
/// edge_description: orders-in
/// node_description: orders-bridge
/// upstream: true
/// downstream: false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Label for the edge from the source into the bridge
    pub edge_description: Option<String>,
    /// Label for the bridge propagator itself
    pub node_description: Option<String>,
    /// Forward each destination's state changes back to the source
    pub upstream: bool,
    /// Forward the source's state changes through the bridge
    pub downstream: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            edge_description: None,
            node_description: None,
            upstream: true,
            downstream: true,
        }
    }
}

impl BridgeConfig {
    /// Config with a bridge (node) description
    pub fn named(description: impl Into<String>) -> Self {
        Self {
            node_description: Some(description.into()),
            ..Self::default()
        }
    }

    /// Parse a config from YAML.
    pub fn from_yaml(yaml: &str) -> GraphResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_edge_description(mut self, description: impl Into<String>) -> Self {
        self.edge_description = Some(description.into());
        self
    }

    pub fn with_node_description(mut self, description: impl Into<String>) -> Self {
        self.node_description = Some(description.into());
        self
    }

    pub fn with_upstream(mut self, upstream: bool) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn with_downstream(mut self, downstream: bool) -> Self {
        self.downstream = downstream;
        self
    }

    /// At least one description must be supplied.
    pub fn validate(&self) -> GraphResult<()> {
        if self.bridge_description().is_none() {
            return Err(GraphError::MissingDescription);
        }
        Ok(())
    }

    /// The node description, falling back to the edge description
    fn bridge_description(&self) -> Option<&str> {
        fn described(d: &Option<String>) -> Option<&str> {
            d.as_deref().filter(|d| !d.is_empty())
        }
        described(&self.node_description).or_else(|| described(&self.edge_description))
    }
}

/// Wire a bridge propagator between `source` and `destinations`.
///
/// Faults raised by `transform` (an `Err` or a panic) are logged and
/// reported as an error on `source`, so failures surface where they
/// originate.
pub fn bridge<M, F>(
    source: &Arc<Node<M>>,
    destinations: &[Arc<Node<M>>],
    transform: F,
    config: BridgeConfig,
) -> GraphResult<Arc<BridgePropagator<M>>>
where
    M: 'static,
    F: Fn(M, &[Edge<M>]) -> Result<Option<Ack>, PropagatorError> + Send + Sync + 'static,
{
    let description = config
        .bridge_description()
        .ok_or(GraphError::MissingDescription)?
        .to_string();

    let edges: Vec<Edge<M>> = destinations
        .iter()
        .map(|dest| Edge::described(format!("{description} -> {}", dest.description()), Arc::clone(dest)))
        .collect();

    let origin = Arc::downgrade(source);
    let label = description.clone();
    let guarded = move |msg: M, edges: &[Edge<M>]| -> Result<Option<Ack>, PropagatorError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| transform(msg, edges)))
            .unwrap_or_else(|payload| Err(PropagatorError::from_panic(&label, payload)));

        outcome.or_else(|err| {
            error!(bridge = %label, error = %err, "bridge transform failed; reporting to source");
            if let Some(source) = origin.upgrade() {
                source.error(&err, false);
            }
            Ok(None)
        })
    };

    let propagator = Arc::new(BridgePropagator::new(description.clone(), edges, guarded));
    let attached: Arc<dyn Propagator<M>> = propagator.clone();

    let relay = Arc::downgrade(&propagator);
    let targets: Vec<Arc<Node<M>>> = destinations.to_vec();
    let BridgeConfig {
        edge_description,
        upstream,
        downstream,
        ..
    } = config;

    let hooks = LinkHooks::none().after(move |source: &Arc<Node<M>>, _link: &Link<M>| {
        if downstream {
            source.subscribe(move |change| {
                if let Some(bridge) = relay.upgrade() {
                    bridge.relay(change);
                }
            });
        }
        if upstream {
            for dest in &targets {
                let origin = Arc::downgrade(source);
                dest.subscribe(move |change| {
                    if let Some(source) = origin.upgrade() {
                        source.apply(change);
                    }
                });
            }
        }
    });

    source.link(attached, edge_description, hooks)?;
    debug!(
        bridge = %description,
        source = %source.description(),
        destinations = destinations.len(),
        upstream,
        downstream,
        "bridge wired"
    );
    Ok(propagator)
}
