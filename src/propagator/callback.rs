//! Callback propagator — terminal sink invoking a user function
//!
//! Faults raised by the function (an `Err` or a panic) are caught and logged
//! at this boundary. They never reach the caller and never become
//! graph-level errors.

use super::error::PropagatorError;
use super::traits::{Ack, Propagator};
use crate::graph::Edge;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

type Callback<M> = Box<dyn Fn(M) -> Result<(), String> + Send + Sync>;

/// A sink that hands every message to a user function.
pub struct CallbackPropagator<M> {
    description: String,
    callback: Callback<M>,
    faults: AtomicU64,
}

impl<M: 'static> CallbackPropagator<M> {
    /// Wrap a fallible callback.
    pub fn new<F, E>(description: impl Into<String>, callback: F) -> Self
    where
        F: Fn(M) -> Result<(), E> + Send + Sync + 'static,
        E: Display,
    {
        Self {
            description: description.into(),
            callback: Box::new(move |msg| callback(msg).map_err(|e| e.to_string())),
            faults: AtomicU64::new(0),
        }
    }

    /// Wrap an infallible callback.
    pub fn sink<F>(description: impl Into<String>, callback: F) -> Self
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        Self::new(description, move |msg| {
            callback(msg);
            Ok::<(), std::convert::Infallible>(())
        })
    }
}

impl<M> CallbackPropagator<M> {
    /// Number of faults caught so far
    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }
}

impl<M> Propagator<M> for CallbackPropagator<M> {
    fn description(&self) -> &str {
        &self.description
    }

    fn error(&self, _err: &PropagatorError, _force: bool) {}

    fn close(&self, _force: bool) {}

    fn downstream(&self) -> Vec<Edge<M>> {
        Vec::new()
    }

    fn transactional(&self) {}

    fn propagate(&self, msg: M, _direct: bool) -> Option<Ack> {
        let fault = match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(msg))) {
            Ok(Ok(())) => return Some(Ack::Consumed),
            Ok(Err(message)) => PropagatorError::Callback {
                propagator: self.description.clone(),
                message,
            },
            Err(payload) => PropagatorError::from_panic(&self.description, payload),
        };

        self.faults.fetch_add(1, Ordering::Relaxed);
        error!(propagator = %self.description, error = %fault, "callback fault isolated");
        None
    }
}
