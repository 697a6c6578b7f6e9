//! The monitoring/measuring collaborator.
//!
//! Agent processing spans and named counter variables are the only two
//! things the core instruments. This module defines that narrow seam as a
//! trait so the core can be exercised with a no-op implementation in tests
//! and a `tracing`-backed one by default.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::Identifier;

/// A single in-flight measurement; dropping it (or calling [`end`](MeasurementGuard::end)
/// explicitly) marks the end of the measured span.
pub trait MeasurementGuard: Send {
    /// End the measurement. Implementations should be idempotent.
    fn end(self: Box<Self>);
}

/// The monitoring/measuring collaborator the agent runtime calls around
/// `process` and that an instrumented environment may call around emits.
pub trait Monitor: Send + Sync {
    /// Begin a named measurement, returning a guard that ends it.
    fn begin(&self, id: &Identifier) -> Box<dyn MeasurementGuard>;

    /// Increment a named counter variable.
    fn incr(&self, id: &Identifier);

    /// Decrement a named counter variable.
    fn decr(&self, id: &Identifier);
}

/// A `Monitor` that does nothing — the tolerated default for callers that
/// don't care about measurements or counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

struct NoopGuard;
impl MeasurementGuard for NoopGuard {
    fn end(self: Box<Self>) {}
}

impl Monitor for NoopMonitor {
    fn begin(&self, _id: &Identifier) -> Box<dyn MeasurementGuard> {
        Box::new(NoopGuard)
    }
    fn incr(&self, _id: &Identifier) {}
    fn decr(&self, _id: &Identifier) {}
}

/// A `Monitor` that logs span entry/exit via `tracing` at debug level and
/// keeps process-wide counter variables so tests can assert on them.
#[derive(Debug, Clone, Default)]
pub struct TracingMonitor {
    variables: Arc<Mutex<HashMap<String, Arc<AtomicI64>>>>,
}

impl TracingMonitor {
    /// Create a fresh monitor with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value of a counter variable (zero if never touched).
    pub fn value(&self, id: &Identifier) -> i64 {
        self.variables
            .lock()
            .expect("monitor variable lock poisoned")
            .get(id.as_str())
            .map(|v| v.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn counter_for(&self, id: &Identifier) -> Arc<AtomicI64> {
        self.variables
            .lock()
            .expect("monitor variable lock poisoned")
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone()
    }
}

struct TracingGuard {
    id: Identifier,
    started: std::time::Instant,
}

impl MeasurementGuard for TracingGuard {
    fn end(self: Box<Self>) {
        tracing::debug!(id = %self.id, elapsed = ?self.started.elapsed(), "measurement ended");
    }
}

impl Monitor for TracingMonitor {
    fn begin(&self, id: &Identifier) -> Box<dyn MeasurementGuard> {
        tracing::debug!(id = %id, "measurement started");
        Box::new(TracingGuard {
            id: id.clone(),
            started: std::time::Instant::now(),
        })
    }

    fn incr(&self, id: &Identifier) {
        self.counter_for(id).fetch_add(1, Ordering::SeqCst);
    }

    fn decr(&self, id: &Identifier) {
        self.counter_for(id).fetch_sub(1, Ordering::SeqCst);
    }
}
