//! The `Behaviour` trait: user-provided logic plugged into an agent.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::event::{Context, Event};
use crate::id::Identifier;
use crate::runtime::Emitter;

/// The panic payload caught from a behaviour's `process`, or the error it
/// returned — the runtime treats both uniformly and hands either to
/// `recover`.
pub enum Failure {
    /// `process` panicked; this is the payload `catch_unwind` produced.
    Panic(Box<dyn Any + Send>),
    /// `process` returned an error without panicking.
    Error(CoreError),
}

/// The narrow slice of `Environment` a behaviour needs during `init`,
/// defined here (rather than depended on from `ebus`) so `cells` has no
/// dependency on the router crate. `ebus::Environment` implements this.
#[async_trait]
pub trait EnvironmentHandle: Send + Sync {
    /// Subscribe `subscribers` to events emitted by `emitter`.
    async fn subscribe(&self, emitter: &Identifier, subscribers: &[Identifier]) -> CoreResult<()>;

    /// Unsubscribe `subscribers` from events emitted by `emitter`.
    async fn unsubscribe(&self, emitter: &Identifier, subscribers: &[Identifier]) -> CoreResult<()>;

    /// Emit `event` directly to `target`, bypassing the subscription graph.
    async fn emit(&self, target: &Identifier, event: Event) -> CoreResult<Arc<Context>>;
}

/// Declares an agent as poolable: the environment fronts it with `size`
/// inner agent runtimes, round-robining events across them.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Number of inner agent runtimes.
    pub size: usize,
    /// Whether each inner runtime gets its own behaviour instance.
    pub stateful: bool,
}

/// The polymorphic unit of work plugged into an agent runtime.
#[async_trait]
pub trait Behaviour: Send + Sync {
    /// Called once, before the agent starts processing its mailbox.
    async fn init(&mut self, env: Arc<dyn EnvironmentHandle>, id: Identifier) -> CoreResult<()>;

    /// Process one inbound event. The `emitter` publishes derived events to
    /// this agent's current subscribers.
    async fn process(&mut self, event: Event, emitter: &Emitter) -> CoreResult<()>;

    /// Called when `process` panicked or returned an error. Returning `Ok`
    /// means the agent keeps running; returning `Err` is fatal and stops it.
    async fn recover(&mut self, reason: Failure, event: Event) -> CoreResult<()>;

    /// Called once, after the agent has drained a `stop` message.
    async fn stop(&mut self);

    /// Opt an agent into pool fronting. `None` (the default) means the
    /// agent runs as a single instance.
    fn pool_config(&self) -> Option<PoolConfig> {
        None
    }

    /// A stable label for this behaviour's concrete type, used to build the
    /// `cells/<env>/cell/<behaviour-type>` instrumentation identifier.
    /// The default uses `std::any::type_name`; the blanket `Box<dyn
    /// Behaviour>` impl below delegates to the boxed value's own label so
    /// type erasure at the registry boundary doesn't lose it.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl Behaviour for Box<dyn Behaviour> {
    async fn init(&mut self, env: Arc<dyn EnvironmentHandle>, id: Identifier) -> CoreResult<()> {
        (**self).init(env, id).await
    }

    async fn process(&mut self, event: Event, emitter: &Emitter) -> CoreResult<()> {
        (**self).process(event, emitter).await
    }

    async fn recover(&mut self, reason: Failure, event: Event) -> CoreResult<()> {
        (**self).recover(reason, event).await
    }

    async fn stop(&mut self) {
        (**self).stop().await
    }

    fn pool_config(&self) -> Option<PoolConfig> {
        (**self).pool_config()
    }

    fn type_name(&self) -> &'static str {
        (**self).type_name()
    }
}
