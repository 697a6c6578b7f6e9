#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **cells** – per-agent mailbox, processing loop and error taxonomy.
//!
//! This crate hosts the part of the runtime core that is local to a single
//! agent: the [`Behaviour`] trait user code implements, the dedicated
//! mailbox and processing loop that serialises one agent's event handling,
//! the [`Emitter`] handed to `process`, the pool-fronting wrapper, and the
//! shared [`Context`]/[`Event`] data model plus error taxonomy every other
//! crate in the workspace re-exports rather than duplicating.
//!
//! It has no knowledge of the subscription graph, supervision, or multiple
//! agents at once — that's `ebus` and `supervisor`.

mod behaviour;
mod error;
mod event;
mod id;
mod mailbox;
mod monitor;
mod pool;
mod runtime;

pub use behaviour::{Behaviour, EnvironmentHandle, Failure, PoolConfig};
pub use error::{CoreError, CoreResult};
pub use event::{Context, Event, Payload};
pub use id::Identifier;
pub use mailbox::{AgentHandle, AgentMessage};
pub use monitor::{MeasurementGuard, Monitor, NoopMonitor, TracingMonitor};
pub use pool::PoolBehaviour;
pub use runtime::{id_set, resolve, spawn, AgentExit, AgentRuntimeHandle, Emitter};
