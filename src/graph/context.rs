//! ExecutionContext: the environment captured when a router is constructed
//!
//! Facet generators run inside the captured context rather than inside
//! whatever context the producing thread happens to carry.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::Span;

/// A construction-time snapshot of the ambient execution environment.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Human-readable name (usually the owning propagator's description)
    name: String,
    /// Tracing span active at capture time
    span: Span,
    /// Name of the thread that captured the context, if it had one
    captured_on: Option<String>,
    /// When the context was captured
    captured_at: DateTime<Utc>,
    /// Free-form attributes handed to generators
    attributes: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Capture the current span and thread.
    pub fn capture(name: impl Into<String>) -> Self {
        Self::with_span(name, Span::current())
    }

    /// A context that is not attached to any span.
    pub fn detached(name: impl Into<String>) -> Self {
        Self::with_span(name, Span::none())
    }

    fn with_span(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
            captured_on: std::thread::current().name().map(str::to_owned),
            captured_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn captured_on(&self) -> Option<&str> {
        self.captured_on.as_deref()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Run `f` with the captured span entered.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.span.in_scope(f)
    }
}
