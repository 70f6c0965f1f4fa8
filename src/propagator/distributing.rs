//! Distributing propagator — keyed, self-cleaning fan-out router
//!
//! Each message is classified into a facet key. The first message for a key
//! installs a placeholder slot; exactly one caller evaluates it by running the
//! generator, and every racer for that key uses the resulting node. A facet
//! whose node completes successfully removes itself; a facet that fails takes
//! the whole distributor down with it.
//!
//! Locking: per-message routing takes the structural lock in shared mode
//! only on first sighting of a key. `close`, `error`, `close_all_facets` and
//! the transactional flip take it exclusively to drain or snapshot the map.
//! Downstream nodes are always closed, errored or escalated after the lock
//! is released.

use super::error::PropagatorError;
use super::traits::{Ack, Propagator};
use crate::graph::{Edge, ExecutionContext, Node};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error, trace, warn};

/// Key of a facet. `Unkeyed` stands in for a classifier that found no key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FacetKey<K> {
    Key(K),
    Unkeyed,
}

impl<K> FacetKey<K> {
    pub fn key(&self) -> Option<&K> {
        match self {
            Self::Key(key) => Some(key),
            Self::Unkeyed => None,
        }
    }

    pub fn is_unkeyed(&self) -> bool {
        matches!(self, Self::Unkeyed)
    }
}

impl<K> From<Option<K>> for FacetKey<K> {
    fn from(key: Option<K>) -> Self {
        key.map_or(Self::Unkeyed, Self::Key)
    }
}

impl<K: fmt::Display> fmt::Display for FacetKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Unkeyed => f.write_str("<unkeyed>"),
        }
    }
}

/// Counters describing a distributor's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistributorStats {
    /// Facets with a resolved node
    pub active: usize,
    /// Facets built by the generator
    pub created: u64,
    /// Facets removed because their node completed successfully
    pub retired: u64,
    /// Messages delivered to a facet
    pub routed: u64,
    /// Messages dropped because the distributor was closed
    pub declined: u64,
}

type Classifier<M, K> = Box<dyn Fn(&M) -> Option<K> + Send + Sync>;
type Generator<M, K> =
    Box<dyn Fn(&FacetKey<K>, &ExecutionContext) -> Result<Arc<Node<M>>, PropagatorError> + Send + Sync>;

/// What evaluating a placeholder produced.
enum Resolution<M> {
    Active(Arc<Node<M>>),
    /// The distributor closed before the slot was evaluated
    Declined,
    /// The slot was drained before it was evaluated; route again
    Evicted,
    Failed(PropagatorError),
}

/// A memoized placeholder for one facet.
struct FacetSlot<M> {
    /// Published while the shared lock is held, so exclusive-mode
    /// snapshots always see every node that has been built.
    node: OnceLock<Arc<Node<M>>>,
    resolution: OnceLock<Resolution<M>>,
}

impl<M> FacetSlot<M> {
    fn new() -> Self {
        Self {
            node: OnceLock::new(),
            resolution: OnceLock::new(),
        }
    }

    fn node(&self) -> Option<Arc<Node<M>>> {
        self.node.get().cloned()
    }
}

/// Fans one upstream stream out into dynamically created, keyed facets.
pub struct DistributingPropagator<M, K> {
    inner: Arc<Distributor<M, K>>,
}

struct Distributor<M, K> {
    description: String,
    classifier: Classifier<M, K>,
    generator: Generator<M, K>,
    context: ExecutionContext,
    facets: DashMap<FacetKey<K>, Arc<FacetSlot<M>>>,
    lock: RwLock<()>,
    closed: AtomicBool,
    transactional: AtomicBool,
    created: AtomicU64,
    retired: AtomicU64,
    routed: AtomicU64,
    declined: AtomicU64,
}

impl<M, K> DistributingPropagator<M, K>
where
    M: 'static,
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Create a distributor whose generator runs in the context captured here.
    ///
    /// The generator runs synchronously on whichever producer first sees a
    /// key, while the structural lock is held in shared mode. It must not
    /// route messages back into this distributor.
    pub fn new<C, G>(description: impl Into<String>, classifier: C, generator: G) -> Self
    where
        C: Fn(&M) -> Option<K> + Send + Sync + 'static,
        G: Fn(&FacetKey<K>, &ExecutionContext) -> Result<Arc<Node<M>>, PropagatorError>
            + Send
            + Sync
            + 'static,
    {
        let description = description.into();
        let context = ExecutionContext::capture(description.clone());
        Self::with_context(description, context, classifier, generator)
    }

    /// Create a distributor with an explicitly supplied execution context.
    pub fn with_context<C, G>(
        description: impl Into<String>,
        context: ExecutionContext,
        classifier: C,
        generator: G,
    ) -> Self
    where
        C: Fn(&M) -> Option<K> + Send + Sync + 'static,
        G: Fn(&FacetKey<K>, &ExecutionContext) -> Result<Arc<Node<M>>, PropagatorError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            inner: Arc::new(Distributor {
                description: description.into(),
                classifier: Box::new(classifier),
                generator: Box::new(generator),
                context,
                facets: DashMap::new(),
                lock: RwLock::new(()),
                closed: AtomicBool::new(false),
                transactional: AtomicBool::new(false),
                created: AtomicU64::new(0),
                retired: AtomicU64::new(0),
                routed: AtomicU64::new(0),
                declined: AtomicU64::new(0),
            }),
        }
    }

    /// Keys currently known, including facets still under construction.
    pub fn facets(&self) -> Vec<FacetKey<K>> {
        self.inner.facets.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of facets with a resolved node.
    pub fn count(&self) -> usize {
        self.inner.active()
    }

    /// Close every current facet without closing the distributor; new keys
    /// are still admitted afterwards.
    pub fn close_all_facets(&self, force: bool) {
        let drained = self.inner.drain();
        debug!(
            distributor = %self.inner.description,
            facets = drained.len(),
            force,
            "closing all facets"
        );
        for node in drained {
            node.close(force);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_transactional(&self) -> bool {
        self.inner.transactional.load(Ordering::Acquire)
    }

    /// The context generators run in
    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    pub fn stats(&self) -> DistributorStats {
        DistributorStats {
            active: self.inner.active(),
            created: self.inner.created.load(Ordering::Relaxed),
            retired: self.inner.retired.load(Ordering::Relaxed),
            routed: self.inner.routed.load(Ordering::Relaxed),
            declined: self.inner.declined.load(Ordering::Relaxed),
        }
    }
}

impl<M, K> Distributor<M, K>
where
    M: 'static,
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn route(self: &Arc<Self>, msg: M) -> Result<Option<Ack>, PropagatorError> {
        let key = FacetKey::from((self.classifier)(&msg));

        loop {
            let existing = self.facets.get(&key).map(|entry| Arc::clone(entry.value()));
            let slot = match existing {
                Some(slot) => slot,
                None => match self.install(&key) {
                    Some(slot) => slot,
                    None => return Ok(self.decline(&key)),
                },
            };

            match slot.resolution.get_or_init(|| self.evaluate(&key, &slot)) {
                Resolution::Active(node) => {
                    let node = Arc::clone(node);
                    self.routed.fetch_add(1, Ordering::Relaxed);
                    trace!(distributor = %self.description, key = ?key, "routing to facet");
                    node.deliver_direct(msg);
                    return Ok(Some(Ack::Routed));
                }
                Resolution::Declined => return Ok(self.decline(&key)),
                Resolution::Evicted => continue,
                Resolution::Failed(err) => return Err(err.clone()),
            }
        }
    }

    /// Install a placeholder for `key` unless one exists. `None` if closed.
    fn install(&self, key: &FacetKey<K>) -> Option<Arc<FacetSlot<M>>> {
        let _shared = self.lock.read();
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let slot = self
            .facets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(FacetSlot::new()));
        Some(Arc::clone(slot.value()))
    }

    /// Run the generator for a freshly installed slot. Called at most once per slot.
    fn evaluate(self: &Arc<Self>, key: &FacetKey<K>, slot: &Arc<FacetSlot<M>>) -> Resolution<M> {
        let node = {
            let _shared = self.lock.read();
            if self.closed.load(Ordering::Acquire) {
                return Resolution::Declined;
            }
            let current = self
                .facets
                .get(key)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot));
            if !current {
                return Resolution::Evicted;
            }

            let built = panic::catch_unwind(AssertUnwindSafe(|| {
                self.context.in_scope(|| (self.generator)(key, &self.context))
            }));
            let node = match built {
                Ok(Ok(node)) => node,
                Ok(Err(err)) => {
                    return Resolution::Failed(PropagatorError::FacetConstruction {
                        key: format!("{key:?}"),
                        message: err.to_string(),
                    })
                }
                Err(payload) => {
                    return Resolution::Failed(PropagatorError::from_panic(&self.description, payload))
                }
            };

            if self.transactional.load(Ordering::Acquire) {
                node.transactional();
            }
            let _ = slot.node.set(Arc::clone(&node));
            node
        };

        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(
            distributor = %self.description,
            key = ?key,
            node = %node.id(),
            "facet created"
        );
        self.watch(key.clone(), slot, &node);
        Resolution::Active(node)
    }

    /// Subscribe to a facet's completion: success retires it, failure fails us.
    fn watch(self: &Arc<Self>, key: FacetKey<K>, slot: &Arc<FacetSlot<M>>, node: &Arc<Node<M>>) {
        let owner = Arc::downgrade(self);
        let slot = Arc::downgrade(slot);
        node.completion().on_complete(move |result| {
            let Some(owner) = owner.upgrade() else {
                return;
            };
            match result {
                Ok(()) => owner.retire(&key, &slot),
                Err(cause) => {
                    let err = PropagatorError::FacetFailed {
                        key: format!("{key:?}"),
                        cause: Box::new(cause.clone()),
                    };
                    if owner.closed.load(Ordering::Acquire) {
                        debug!(distributor = %owner.description, error = %err, "facet failed after shutdown");
                        return;
                    }
                    error!(distributor = %owner.description, error = %err, "facet failed; failing distributor");
                    owner.fail(&err, false);
                }
            }
        });
    }

    /// Remove `key` only if it still maps to the slot that completed.
    fn retire(&self, key: &FacetKey<K>, slot: &Weak<FacetSlot<M>>) {
        let removed = self
            .facets
            .remove_if(key, |_, current| std::ptr::eq(Arc::as_ptr(current), slot.as_ptr()));
        if removed.is_some() {
            self.retired.fetch_add(1, Ordering::Relaxed);
            debug!(distributor = %self.description, key = ?key, "facet retired");
        }
    }

    fn decline(&self, key: &FacetKey<K>) -> Option<Ack> {
        self.declined.fetch_add(1, Ordering::Relaxed);
        trace!(distributor = %self.description, key = ?key, "closed; declining message");
        None
    }

    fn shut(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Take every facet out of the map in one exclusive critical section.
    fn drain(&self) -> Vec<Arc<Node<M>>> {
        let _exclusive = self.lock.write();
        let slots: Vec<Arc<FacetSlot<M>>> =
            self.facets.iter().map(|entry| Arc::clone(entry.value())).collect();
        self.facets.clear();
        slots.iter().filter_map(|slot| slot.node()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<Node<M>>> {
        self.facets.iter().filter_map(|entry| entry.value().node()).collect()
    }

    fn active(&self) -> usize {
        self.facets
            .iter()
            .filter(|entry| entry.value().node.get().is_some())
            .count()
    }

    fn close(&self, force: bool) {
        if !self.shut() {
            return;
        }
        let drained = self.drain();
        if force {
            warn!(distributor = %self.description, facets = drained.len(), "distributor force-closed");
        } else {
            debug!(distributor = %self.description, facets = drained.len(), "distributor closed");
        }
        for node in drained {
            node.close(force);
        }
    }

    fn fail(&self, err: &PropagatorError, force: bool) {
        if !self.shut() {
            return;
        }
        let drained = self.drain();
        error!(
            distributor = %self.description,
            facets = drained.len(),
            error = %err,
            "distributor failed"
        );
        for node in drained {
            node.error(err, force);
        }
    }

    fn escalate(&self) {
        let nodes = {
            let _exclusive = self.lock.write();
            if self
                .transactional
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            self.snapshot()
        };
        debug!(distributor = %self.description, facets = nodes.len(), "transactional mode enabled");
        for node in nodes {
            node.transactional();
        }
    }
}

impl<M, K> Propagator<M> for DistributingPropagator<M, K>
where
    M: 'static,
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn description(&self) -> &str {
        &self.inner.description
    }

    fn error(&self, err: &PropagatorError, force: bool) {
        self.inner.fail(err, force);
    }

    fn close(&self, force: bool) {
        self.inner.close(force);
    }

    fn downstream(&self) -> Vec<Edge<M>> {
        self.inner
            .facets
            .iter()
            .filter_map(|entry| {
                entry.value().node().map(|node| {
                    Edge::described(format!("{}[{:?}]", self.inner.description, entry.key()), node)
                })
            })
            .collect()
    }

    fn transactional(&self) {
        self.inner.escalate();
    }

    fn propagate(&self, msg: M, _direct: bool) -> Option<Ack> {
        let routed = panic::catch_unwind(AssertUnwindSafe(|| self.inner.route(msg)))
            .unwrap_or_else(|payload| Err(PropagatorError::from_panic(&self.inner.description, payload)));

        match routed {
            Ok(ack) => ack,
            Err(err) => {
                error!(distributor = %self.inner.description, error = %err, "routing failed; failing distributor");
                self.inner.fail(&err, false);
                None
            }
        }
    }
}

impl<M, K: Eq + Hash> fmt::Debug for DistributingPropagator<M, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributingPropagator")
            .field("description", &self.inner.description)
            .field("facets", &self.inner.facets.len())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .field("transactional", &self.inner.transactional.load(Ordering::Acquire))
            .finish()
    }
}
