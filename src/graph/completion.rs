//! One-shot completion signal
//!
//! Every node owns a `Completion` that resolves exactly once, when the node
//! reaches a terminal state. Subscribers registered before resolution run
//! on the resolving thread; subscribers registered afterwards run inline.

use crate::propagator::PropagatorError;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Notify;

/// Outcome carried by a resolved completion.
pub type CompletionResult = Result<(), PropagatorError>;

type Subscriber = Box<dyn FnOnce(&CompletionResult) + Send>;

/// A cloneable handle to a one-shot completion signal.
///
/// Clones share state: resolving one resolves all of them.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

struct CompletionInner {
    state: Mutex<CompletionState>,
    notify: Notify,
}

struct CompletionState {
    result: Option<CompletionResult>,
    subscribers: Vec<Subscriber>,
}

impl Completion {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                state: Mutex::new(CompletionState {
                    result: None,
                    subscribers: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolve the signal.
    ///
    /// Returns `true` if this call performed the resolution, `false` if the
    /// signal had already fired (the new result is discarded).
    pub fn resolve(&self, result: CompletionResult) -> bool {
        let subscribers = {
            let mut state = self.inner.state.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.subscribers)
        };

        for subscriber in subscribers {
            run_subscriber(subscriber, &result);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Register a callback that runs exactly once with the final result.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&CompletionResult) + Send + 'static,
    {
        let resolved = {
            let mut state = self.inner.state.lock();
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.subscribers.push(Box::new(callback));
                    return;
                }
            }
        };
        run_subscriber(Box::new(callback), &resolved);
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().result.is_some()
    }

    /// The final result, if the signal has fired.
    pub fn result(&self) -> Option<CompletionResult> {
        self.inner.state.lock().result.clone()
    }

    /// Wait asynchronously for the signal to fire.
    pub async fn wait(&self) -> CompletionResult {
        loop {
            let notified = self.inner.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.result() {
                return result;
            }
            notified.await;
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Completion")
            .field("result", &state.result)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

fn run_subscriber(subscriber: Subscriber, result: &CompletionResult) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| subscriber(result))) {
        let err = PropagatorError::from_panic("completion subscriber", payload);
        tracing::error!(error = %err, "completion subscriber panicked");
    }
}
