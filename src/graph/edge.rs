//! Edges: described links between propagators and the nodes they feed

use super::node::Node;
use crate::propagator::Propagator;
use std::fmt;
use std::sync::Arc;

/// An outgoing edge: an optional description paired with the node it feeds.
///
/// Many edges may reference one node; the node lives as long as its
/// longest holder.
pub struct Edge<M> {
    description: Option<String>,
    node: Arc<Node<M>>,
}

impl<M> Edge<M> {
    /// Create an undescribed edge
    pub fn new(node: Arc<Node<M>>) -> Self {
        Self {
            description: None,
            node,
        }
    }

    /// Create an edge with a description
    pub fn described(description: impl Into<String>, node: Arc<Node<M>>) -> Self {
        Self {
            description: Some(description.into()),
            node,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn node(&self) -> &Arc<Node<M>> {
        &self.node
    }
}

impl<M> Clone for Edge<M> {
    fn clone(&self) -> Self {
        Self {
            description: self.description.clone(),
            node: Arc::clone(&self.node),
        }
    }
}

impl<M> fmt::Debug for Edge<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("description", &self.description)
            .field("node", &self.node.id())
            .finish()
    }
}

/// The edge from a node into its attached propagator.
pub struct Link<M> {
    description: Option<String>,
    propagator: Arc<dyn Propagator<M>>,
}

impl<M> Link<M> {
    pub fn new(description: Option<String>, propagator: Arc<dyn Propagator<M>>) -> Self {
        Self {
            description,
            propagator,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn propagator(&self) -> &Arc<dyn Propagator<M>> {
        &self.propagator
    }
}

impl<M> fmt::Debug for Link<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("description", &self.description)
            .field("propagator", &self.propagator.description())
            .finish()
    }
}
