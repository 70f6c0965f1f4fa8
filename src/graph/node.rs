//! Node representation: a message entry point with a lifecycle

use super::completion::Completion;
use super::edge::Link;
use super::error::{GraphError, GraphResult};
use crate::propagator::{Ack, Propagator, PropagatorError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a NodeId from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Open,
    /// Advisory backpressure; delivery still proceeds
    Paused,
    Closed,
    Errored,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// A lifecycle transition, as seen by state-change listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Paused,
    Resumed,
    Closed { force: bool },
    Errored { error: PropagatorError, force: bool },
}

type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;
type PreLinkHook<M> = Box<dyn FnOnce(&Arc<Node<M>>, &Link<M>) -> GraphResult<()> + Send>;
type PostLinkHook<M> = Box<dyn FnOnce(&Arc<Node<M>>, &Link<M>) + Send>;

/// Wiring hooks run around [`Node::link`].
///
/// `pre` runs before the propagator is attached and may veto the link.
/// `post` runs once the propagator is attached.
pub struct LinkHooks<M> {
    pre: Option<PreLinkHook<M>>,
    post: Option<PostLinkHook<M>>,
}

impl<M> LinkHooks<M> {
    pub fn none() -> Self {
        Self {
            pre: None,
            post: None,
        }
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&Arc<Node<M>>, &Link<M>) -> GraphResult<()> + Send + 'static,
    {
        self.pre = Some(Box::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&Arc<Node<M>>, &Link<M>) + Send + 'static,
    {
        self.post = Some(Box::new(hook));
        self
    }
}

impl<M> Default for LinkHooks<M> {
    fn default() -> Self {
        Self::none()
    }
}

/// A node in a dataflow graph.
///
/// A node accepts messages and hands them to its attached propagator. It owns
/// the lifecycle (open → paused ⇄ open → closed/errored), notifies listeners
/// of every state change, and resolves its completion signal on the first
/// terminal transition.
pub struct Node<M> {
    id: NodeId,
    description: String,
    link: OnceLock<Link<M>>,
    state: Mutex<NodeState>,
    transactional: AtomicBool,
    listeners: Mutex<Vec<StateListener>>,
    completion: Completion,
}

impl<M> Node<M> {
    /// Create an unlinked node. Messages are dropped until a propagator is attached.
    pub fn new(description: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::new(),
            description: description.into(),
            link: OnceLock::new(),
            state: Mutex::new(NodeState::Open),
            transactional: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            completion: Completion::new(),
        })
    }

    /// Create a node with a propagator already attached.
    pub fn with_propagator(
        description: impl Into<String>,
        propagator: Arc<dyn Propagator<M>>,
    ) -> Arc<Self> {
        let node = Self::new(description);
        // Fresh cell: the set cannot fail.
        let _ = node.link.set(Link::new(None, propagator));
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional.load(Ordering::Acquire)
    }

    /// Handle to this node's completion signal
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    pub fn propagator(&self) -> Option<Arc<dyn Propagator<M>>> {
        self.link.get().map(|link| Arc::clone(link.propagator()))
    }

    pub fn link_description(&self) -> Option<&str> {
        self.link.get().and_then(Link::description)
    }

    /// Attach `propagator` to this node through a (possibly described) edge.
    ///
    /// A node is linked at most once.
    pub fn link(
        self: &Arc<Self>,
        propagator: Arc<dyn Propagator<M>>,
        edge_description: Option<String>,
        hooks: LinkHooks<M>,
    ) -> GraphResult<()> {
        if self.link.get().is_some() {
            return Err(GraphError::AlreadyLinked(self.description.clone()));
        }

        let link = Link::new(edge_description, propagator);
        if let Some(pre) = hooks.pre {
            pre(self, &link)?;
        }
        self.link
            .set(link)
            .map_err(|_| GraphError::AlreadyLinked(self.description.clone()))?;

        let Some(link) = self.link.get() else {
            return Err(GraphError::AlreadyLinked(self.description.clone()));
        };
        debug!(
            node = %self.description,
            propagator = %link.propagator().description(),
            edge = ?link.description(),
            "node linked"
        );

        if self.is_transactional() {
            link.propagator().transactional();
        }
        if let Some(post) = hooks.post {
            post(self, link);
        }
        Ok(())
    }

    /// Deliver a message through normal routing.
    pub fn deliver(&self, msg: M) -> Option<Ack> {
        self.dispatch(msg, false)
    }

    /// Deliver a message directly, bypassing normal queuing.
    pub fn deliver_direct(&self, msg: M) -> Option<Ack> {
        self.dispatch(msg, true)
    }

    fn dispatch(&self, msg: M, direct: bool) -> Option<Ack> {
        if self.state().is_terminal() {
            trace!(node = %self.description, "node finished; dropping message");
            return None;
        }
        let Some(link) = self.link.get() else {
            trace!(node = %self.description, "node unlinked; dropping message");
            return None;
        };
        link.propagator().propagate(msg, direct)
    }

    /// Signal backpressure. Returns `true` if the state changed.
    pub fn pause(&self) -> bool {
        let changed = {
            let mut state = self.state.lock();
            if *state == NodeState::Open {
                *state = NodeState::Paused;
                true
            } else {
                false
            }
        };
        if changed {
            self.notify(&StateChange::Paused);
        }
        changed
    }

    /// Lift backpressure. Returns `true` if the state changed.
    pub fn resume(&self) -> bool {
        let changed = {
            let mut state = self.state.lock();
            if *state == NodeState::Paused {
                *state = NodeState::Open;
                true
            } else {
                false
            }
        };
        if changed {
            self.notify(&StateChange::Resumed);
        }
        changed
    }

    /// Shut the node down. Only the first terminal transition has any effect.
    pub fn close(&self, force: bool) -> bool {
        if !self.finish(NodeState::Closed) {
            return false;
        }
        if force {
            warn!(node = %self.description, "node force-closed");
        } else {
            debug!(node = %self.description, "node closed");
        }

        if let Some(link) = self.link.get() {
            link.propagator().close(force);
        }
        self.notify(&StateChange::Closed { force });
        self.completion.resolve(Ok(()));
        true
    }

    /// Fail the node. Only the first terminal transition has any effect.
    pub fn error(&self, err: &PropagatorError, force: bool) -> bool {
        if !self.finish(NodeState::Errored) {
            return false;
        }
        debug!(node = %self.description, error = %err, "node errored");

        if let Some(link) = self.link.get() {
            link.propagator().error(err, force);
        }
        self.notify(&StateChange::Errored {
            error: err.clone(),
            force,
        });
        self.completion.resolve(Err(err.clone()));
        true
    }

    /// Escalate this node and its propagator into transactional mode (one-way).
    pub fn transactional(&self) {
        if self
            .transactional
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(link) = self.link.get() {
            link.propagator().transactional();
        }
    }

    /// Register a state-change listener.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Replay a state change observed on another node onto this one.
    pub fn apply(&self, change: &StateChange) -> bool {
        match change {
            StateChange::Paused => self.pause(),
            StateChange::Resumed => self.resume(),
            StateChange::Closed { force } => self.close(*force),
            StateChange::Errored { error, force } => self.error(error, *force),
        }
    }

    fn finish(&self, terminal: NodeState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = terminal;
        true
    }

    fn notify(&self, change: &StateChange) {
        let listeners: Vec<StateListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(change);
        }
    }
}

impl<M> fmt::Debug for Node<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("state", &self.state())
            .field("transactional", &self.is_transactional())
            .finish()
    }
}
