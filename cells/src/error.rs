//! Shared error taxonomy for the runtime core.
//!
//! `cells`, `ebus` and `supervisor` all return this single enum so callers
//! match on one type across the whole core rather than converting between
//! parallel per-crate errors.

use std::time::Duration;

use crate::Identifier;

/// Errors produced anywhere in the runtime core.
#[derive(Debug, thiserror::Error, Clone)]
pub enum CoreError {
    /// Adding an agent or ticker whose id is already registered.
    #[error("already exists: {0}")]
    AlreadyExists(Identifier),

    /// Lookup, subscribe, unsubscribe or emit against an unknown id, after
    /// the emit back-off (if any) was exhausted.
    #[error("not found: {0}")]
    NotFound(Identifier),

    /// A behaviour's `init` returned an error.
    #[error("init failed for {id}: {reason}")]
    InitFailure {
        /// Agent that failed to initialise.
        id: Identifier,
        /// Reason reported by the behaviour.
        reason: String,
    },

    /// Pushed a message into a mailbox whose processing loop has stopped.
    #[error("mailbox closed: {0}")]
    QueueClosed(Identifier),

    /// `Context::get` on a key that was never set.
    #[error("context key missing: {0}")]
    ContextKeyMissing(String),

    /// `Context::wait` exceeded its deadline.
    #[error("wait timed out after {0:?}")]
    WaitTimeout(Duration),

    /// A ticker id that is already registered.
    #[error("duplicate ticker: {0}")]
    DuplicateTicker(Identifier),

    /// A ticker id that is not registered.
    #[error("ticker not found: {0}")]
    TickerNotFound(Identifier),

    /// A supervisor exceeded its restart-frequency window.
    #[error("too many restarts: {count} within {elapsed:?}")]
    TooManyRestarts {
        /// Number of restarts observed in the window.
        count: usize,
        /// Wall-clock span the restarts occurred in.
        elapsed: Duration,
    },

    /// A supervisor operation referenced an unknown or already-used child id.
    #[error("invalid child id: {0}")]
    InvalidChildId(Identifier),

    /// Inspecting a supervisor's failure reason while it is still running.
    #[error("supervisor still running")]
    SupervisorStillRunning,

    /// A behaviour's `process` or `recover` reported a fatal, non-recoverable error.
    #[error("behaviour failed: {0}")]
    BehaviourFailed(String),
}

/// Result alias used throughout the core.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
