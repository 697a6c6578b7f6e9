//! Events and their shared context.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use crate::error::{CoreError, CoreResult};

/// A type-erased, reference-counted value. The core never inspects or
/// copies payload contents; it only moves the handle around.
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
    /// Wrap a value as an opaque payload.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Recover a typed reference, if the payload was built from `T`.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload").finish_non_exhaustive()
    }
}

/// Shared per-root-emission object: a key/value bag plus an activity
/// counter that reaches zero exactly when every transitive processing
/// caused by the root emission has completed.
pub struct Context {
    values: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    activity: AtomicI64,
    done: Notify,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("activity", &self.activity.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a fresh context with the activity counter initialised to 1,
    /// as happens on a root emission.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            activity: AtomicI64::new(1),
            done: Notify::new(),
        }
    }

    /// Set (or overwrite) a key. Safe to call concurrently with `get`.
    pub async fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let mut guard = self.values.write().await;
        guard.insert(key.into(), Arc::new(value));
    }

    /// Read back a previously set key.
    pub async fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> CoreResult<T> {
        let guard = self.values.read().await;
        let value = guard
            .get(key)
            .ok_or_else(|| CoreError::ContextKeyMissing(key.to_string()))?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| CoreError::ContextKeyMissing(key.to_string()))
    }

    /// Visit every key/value pair present at the moment iteration starts.
    /// Entries inserted by a concurrent `set` after the snapshot is taken
    /// are not guaranteed to be visited.
    pub async fn iterate<F: FnMut(&str, &Arc<dyn Any + Send + Sync>)>(&self, mut visit: F) {
        let snapshot: Vec<(String, Arc<dyn Any + Send + Sync>)> = {
            let guard = self.values.read().await;
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (k, v) in &snapshot {
            visit(k, v);
        }
    }

    /// Increment the activity counter. Called once per derived enqueue,
    /// before the message reaches the subscriber's mailbox.
    pub fn incr_activity(&self) {
        self.activity.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the activity counter. Called once per completed
    /// processing, whether it succeeded, errored or panicked. Fires the
    /// done signal exactly once, at the crossing to zero.
    pub fn decr_activity(&self) {
        let previous = self.activity.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous >= 1, "activity counter went negative");
        if previous == 1 {
            self.done.notify_one();
        }
    }

    /// Current activity counter value, mostly useful for tests.
    pub fn activity_count(&self) -> i64 {
        self.activity.load(Ordering::SeqCst)
    }

    /// Block until the activity counter has reached zero, or `timeout`
    /// elapses. Multiple concurrent callers are not supported.
    pub async fn wait(&self, timeout: Duration) -> CoreResult<()> {
        if self.activity_count() <= 0 {
            return Ok(());
        }
        tokio::time::timeout(timeout, self.done.notified())
            .await
            .map_err(|_| CoreError::WaitTimeout(timeout))
    }
}

/// An immutable message carrying a topic, an opaque payload and a
/// reference to the shared context of the emission tree it belongs to.
#[derive(Clone, Debug)]
pub struct Event {
    topic: String,
    payload: Payload,
    context: Option<Arc<Context>>,
}

impl Event {
    /// Build a new event. `topic` must be non-empty; an empty topic is a
    /// programmer error and panics.
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        let topic = topic.into();
        assert!(!topic.is_empty(), "event topic must not be empty");
        Self {
            topic,
            payload,
            context: None,
        }
    }

    /// The event's topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The event's opaque payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The context this event's processing contributes to, if attached.
    pub fn context(&self) -> Option<Arc<Context>> {
        self.context.clone()
    }

    /// Attach (or replace) the context this event belongs to.
    pub fn set_context(&mut self, context: Arc<Context>) {
        self.context = Some(context);
    }

    /// Builder-style variant of [`Self::set_context`].
    pub fn with_context(mut self, context: Arc<Context>) -> Self {
        self.set_context(context);
        self
    }
}
