//! The environment: agent registry, subscription graph, emit/emitSimple
//! with bounded retry, and pool-behaviour wrapping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use cells::{
    id_set, resolve, spawn as spawn_cell, AgentExit, AgentHandle, Behaviour, Context, CoreError,
    CoreResult, Emitter, Event, Failure, Identifier, Monitor, NoopMonitor, Payload, PoolBehaviour,
    PoolConfig,
};

use crate::ticker::{self, TickerHandle};

/// A callable returning a fresh behaviour instance. Boxed and type-erased
/// since one environment hosts many different agent types.
pub type Factory = Arc<dyn Fn() -> Box<dyn Behaviour> + Send + Sync>;

/// Bounded geometric back-off an `emit` retries through while its target
/// is transiently absent (e.g. mid one-for-all restart). Exhausting it
/// surfaces `NotFound`.
const EMIT_BACKOFF: &[Duration] = &[
    Duration::from_millis(5),
    Duration::from_millis(50),
    Duration::from_millis(500),
    Duration::from_secs(5),
];

struct AgentEntry {
    mailbox: AgentHandle,
    /// Inner pool members, present only when this agent is pool-fronted;
    /// stopped alongside the wrapper on removal.
    inner: Vec<AgentHandle>,
}

struct EnvironmentInner {
    name: String,
    monitor: Arc<dyn Monitor>,
    agents: RwLock<HashMap<Identifier, AgentEntry>>,
    /// Bookkeeping copy of the subscription graph; the source of truth for
    /// `subscribe`/`unsubscribe`/`removeAgent`. Each emitter's own mailbox
    /// additionally holds a locally cached copy, kept in sync by queued
    /// `AddSubscribers`/`RemoveSubscribers` control messages so a single
    /// agent's process loop always sees a set consistent with its own
    /// event ordering.
    graph: RwLock<HashMap<Identifier, HashSet<Identifier>>>,
    tickers: RwLock<HashMap<Identifier, TickerHandle>>,
}

/// A process-local registry of agents, the subscription graph between
/// them, and the tickers feeding them. Cheap to clone — every clone shares
/// the same underlying state.
#[derive(Clone)]
pub struct Environment(Arc<EnvironmentInner>);

impl Environment {
    /// Create a fresh, empty environment named `name` (used to build
    /// instrumentation identifiers) with a no-op monitor.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_monitor(name, Arc::new(NoopMonitor))
    }

    /// Create a fresh, empty environment with an explicit monitor.
    pub fn with_monitor(name: impl Into<String>, monitor: Arc<dyn Monitor>) -> Self {
        Self(Arc::new(EnvironmentInner {
            name: name.into(),
            monitor,
            agents: RwLock::new(HashMap::new()),
            graph: RwLock::new(HashMap::new()),
            tickers: RwLock::new(HashMap::new()),
        }))
    }

    fn handle_for_behaviours(&self) -> Arc<dyn cells::EnvironmentHandle> {
        Arc::new(self.clone())
    }

    fn metrics_scope(&self, label: &str) -> Identifier {
        Identifier::new(["cells", self.0.name.as_str(), "cell", label])
    }

    /// Register a new agent under `id`, built by `factory`. If the
    /// behaviour declares a [`PoolConfig`], the environment transparently
    /// fronts it with `size` inner agent runtimes instead of running it
    /// directly.
    pub async fn add_agent(&self, id: Identifier, factory: Factory) -> CoreResult<AgentHandle> {
        if self.0.agents.read().await.contains_key(&id) {
            return Err(CoreError::AlreadyExists(id));
        }

        let behaviour = factory();
        let entry = match behaviour.pool_config() {
            Some(config) => self.spawn_pool(&id, behaviour, &factory, config).await?,
            None => self.spawn_single(&id, behaviour).await?,
        };

        let mailbox = entry.mailbox.clone();
        self.0.agents.write().await.insert(id.clone(), entry);
        self.0.graph.write().await.entry(id).or_default();
        Ok(mailbox)
    }

    /// Register several agents. Each registration is atomic from the
    /// caller's point of view; the batch stops at the first error, leaving
    /// agents registered before the failing id in place.
    pub async fn add_agents(&self, specs: Vec<(Identifier, Factory)>) -> CoreResult<Vec<AgentHandle>> {
        let mut handles = Vec::with_capacity(specs.len());
        for (id, factory) in specs {
            handles.push(self.add_agent(id, factory).await?);
        }
        Ok(handles)
    }

    async fn spawn_single(&self, id: &Identifier, behaviour: Box<dyn Behaviour>) -> CoreResult<AgentEntry> {
        let scope = self.metrics_scope(behaviour.type_name());
        let runtime = spawn_cell(
            id.clone(),
            behaviour,
            self.handle_for_behaviours(),
            self.0.monitor.clone(),
            scope,
        )
        .await?;
        self.watch_exit(id.clone(), runtime.exit);
        Ok(AgentEntry {
            mailbox: runtime.mailbox,
            inner: Vec::new(),
        })
    }

    async fn spawn_pool(
        &self,
        id: &Identifier,
        first: Box<dyn Behaviour>,
        factory: &Factory,
        config: PoolConfig,
    ) -> CoreResult<AgentEntry> {
        let mut inner_handles = Vec::with_capacity(config.size);

        if config.stateful {
            let mut behaviours = vec![first];
            for _ in 1..config.size {
                behaviours.push(factory());
            }
            for (index, behaviour) in behaviours.into_iter().enumerate() {
                let inner_id = id.child("pool").child(index);
                let scope = self.metrics_scope(behaviour.type_name());
                let runtime = spawn_cell(
                    inner_id.clone(),
                    behaviour,
                    self.handle_for_behaviours(),
                    self.0.monitor.clone(),
                    scope,
                )
                .await?;
                self.watch_exit(inner_id, runtime.exit);
                inner_handles.push(runtime.mailbox);
            }
        } else {
            let label = first.type_name();
            let mut real = first;
            real.init(self.handle_for_behaviours(), id.clone()).await?;
            let shared = Arc::new(AsyncMutex::new(real));
            for index in 0..config.size {
                let inner_id = id.child("pool").child(index);
                let wrapper: Box<dyn Behaviour> = Box::new(SharedBehaviour(shared.clone()));
                let scope = self.metrics_scope(label);
                let runtime = spawn_cell(
                    inner_id.clone(),
                    wrapper,
                    self.handle_for_behaviours(),
                    self.0.monitor.clone(),
                    scope,
                )
                .await?;
                self.watch_exit(inner_id, runtime.exit);
                inner_handles.push(runtime.mailbox);
            }
        }

        let wrapper_scope = self.metrics_scope("pool");
        let pool: Box<dyn Behaviour> = Box::new(PoolBehaviour::new(inner_handles.clone()));
        let runtime = spawn_cell(
            id.clone(),
            pool,
            self.handle_for_behaviours(),
            self.0.monitor.clone(),
            wrapper_scope,
        )
        .await?;
        self.watch_exit(id.clone(), runtime.exit);

        Ok(AgentEntry {
            mailbox: runtime.mailbox,
            inner: inner_handles,
        })
    }

    fn watch_exit(&self, id: Identifier, exit: tokio::sync::oneshot::Receiver<AgentExit>) {
        tokio::spawn(async move {
            match exit.await {
                Ok(AgentExit::Failed(reason)) => {
                    tracing::warn!(agent = %id, error = %reason, "agent terminated with a fatal error");
                }
                Ok(AgentExit::Stopped) => {
                    tracing::debug!(agent = %id, "agent stopped cleanly");
                }
                Err(_) => {
                    tracing::debug!(agent = %id, "agent task dropped without reporting exit");
                }
            }
        });
    }

    /// Remove an agent. Idempotent: removing an unknown id is a no-op.
    /// Severs every subscription edge touching it, in both directions.
    pub async fn remove_agent(&self, id: &Identifier) -> CoreResult<()> {
        let removed = self.0.agents.write().await.remove(id);
        if let Some(entry) = removed {
            let _ = entry.mailbox.stop();
            for inner in &entry.inner {
                let _ = inner.stop();
            }
        }

        let mut graph = self.0.graph.write().await;
        graph.remove(id);
        let mut touched = Vec::new();
        for (emitter, subscribers) in graph.iter_mut() {
            if subscribers.remove(id) {
                touched.push(emitter.clone());
            }
        }
        drop(graph);

        let agents = self.0.agents.read().await;
        for emitter in touched {
            if let Some(entry) = agents.get(&emitter) {
                let _ = entry.mailbox.push(cells::AgentMessage::RemoveSubscribers(id_set(&[id.clone()])));
            }
        }
        Ok(())
    }

    /// Whether `id` is currently registered.
    pub async fn has_agent(&self, id: &Identifier) -> bool {
        self.0.agents.read().await.contains_key(id)
    }

    /// Look up an agent's mailbox handle.
    pub async fn behaviour(&self, id: &Identifier) -> CoreResult<AgentHandle> {
        self.0
            .agents
            .read()
            .await
            .get(id)
            .map(|entry| entry.mailbox.clone())
            .ok_or_else(|| CoreError::NotFound(id.clone()))
    }

    /// Subscribe `subscribers` to events emitted by `emitter`. Idempotent;
    /// duplicates collapse.
    pub async fn subscribe(&self, emitter: &Identifier, subscribers: &[Identifier]) -> CoreResult<()> {
        self.apply_subscription_change(emitter, subscribers, true).await
    }

    /// Unsubscribe `subscribers` from events emitted by `emitter`.
    /// Idempotent.
    pub async fn unsubscribe(&self, emitter: &Identifier, subscribers: &[Identifier]) -> CoreResult<()> {
        self.apply_subscription_change(emitter, subscribers, false).await
    }

    async fn apply_subscription_change(
        &self,
        emitter: &Identifier,
        subscribers: &[Identifier],
        add: bool,
    ) -> CoreResult<()> {
        let agents = self.0.agents.read().await;
        let emitter_handle = agents
            .get(emitter)
            .map(|e| e.mailbox.clone())
            .ok_or_else(|| CoreError::NotFound(emitter.clone()))?;
        for sub in subscribers {
            if !agents.contains_key(sub) {
                return Err(CoreError::NotFound(sub.clone()));
            }
        }

        if add {
            let resolved = resolve(subscribers, &agents.iter().map(|(k, v)| (k.clone(), v.mailbox.clone())).collect());
            drop(agents);
            self.0
                .graph
                .write()
                .await
                .entry(emitter.clone())
                .or_default()
                .extend(subscribers.iter().cloned());
            emitter_handle.push(cells::AgentMessage::AddSubscribers(resolved))?;
        } else {
            drop(agents);
            if let Some(set) = self.0.graph.write().await.get_mut(emitter) {
                for sub in subscribers {
                    set.remove(sub);
                }
            }
            emitter_handle.push(cells::AgentMessage::RemoveSubscribers(id_set(subscribers)))?;
        }
        Ok(())
    }

    /// Emit `event` to `id`. Allocates a fresh context (activity counter
    /// initialised to 1) if the event doesn't already carry one. Retries
    /// through a bounded back-off while `id` is transiently absent.
    pub async fn emit(&self, id: &Identifier, mut event: Event) -> CoreResult<Arc<Context>> {
        let context = event.context().unwrap_or_else(|| Arc::new(Context::new()));
        event.set_context(context.clone());

        for delay in EMIT_BACKOFF {
            if let Some(entry) = self.0.agents.read().await.get(id) {
                entry.mailbox.push_event(event)?;
                return Ok(context);
            }
            tokio::time::sleep(*delay).await;
        }

        match self.0.agents.read().await.get(id) {
            Some(entry) => {
                entry.mailbox.push_event(event)?;
                Ok(context)
            }
            None => Err(CoreError::NotFound(id.clone())),
        }
    }

    /// Convenience wrapper over [`Self::emit`] that builds the event.
    pub async fn emit_simple(&self, id: &Identifier, topic: impl Into<String>, payload: Payload) -> CoreResult<Arc<Context>> {
        self.emit(id, Event::new(topic, payload)).await
    }

    /// Start a ticker that emits to `target` every `period`.
    pub async fn add_ticker(&self, id: Identifier, target: Identifier, period: Duration) -> CoreResult<()> {
        let mut tickers = self.0.tickers.write().await;
        if tickers.contains_key(&id) {
            return Err(CoreError::DuplicateTicker(id));
        }
        let handle = ticker::spawn(id.clone(), target, period, self.clone());
        tickers.insert(id, handle);
        Ok(())
    }

    /// Stop and remove a ticker.
    pub async fn remove_ticker(&self, id: &Identifier) -> CoreResult<()> {
        let mut tickers = self.0.tickers.write().await;
        match tickers.remove(id) {
            Some(mut handle) => {
                handle.stop();
                Ok(())
            }
            None => Err(CoreError::TickerNotFound(id.clone())),
        }
    }

    /// Stop every ticker, then every agent, then clear the registry.
    pub async fn shutdown(&self) {
        let ticker_ids: Vec<Identifier> = self.0.tickers.read().await.keys().cloned().collect();
        for id in ticker_ids {
            let _ = self.remove_ticker(&id).await;
        }
        let agent_ids: Vec<Identifier> = self.0.agents.read().await.keys().cloned().collect();
        for id in agent_ids {
            let _ = self.remove_agent(&id).await;
        }
    }
}

#[async_trait]
impl cells::EnvironmentHandle for Environment {
    async fn subscribe(&self, emitter: &Identifier, subscribers: &[Identifier]) -> CoreResult<()> {
        Environment::subscribe(self, emitter, subscribers).await
    }

    async fn unsubscribe(&self, emitter: &Identifier, subscribers: &[Identifier]) -> CoreResult<()> {
        Environment::unsubscribe(self, emitter, subscribers).await
    }

    async fn emit(&self, target: &Identifier, event: Event) -> CoreResult<Arc<Context>> {
        Environment::emit(self, target, event).await
    }
}

/// Wraps one behaviour instance so several pool members can share it; used
/// when a poolable behaviour declares `stateful: false`.
struct SharedBehaviour(Arc<AsyncMutex<Box<dyn Behaviour>>>);

#[async_trait]
impl Behaviour for SharedBehaviour {
    async fn init(&mut self, _env: Arc<dyn cells::EnvironmentHandle>, _id: Identifier) -> CoreResult<()> {
        // The shared instance was already initialised once before being
        // wrapped; nothing to do per pool member.
        Ok(())
    }

    async fn process(&mut self, event: Event, emitter: &Emitter) -> CoreResult<()> {
        self.0.lock().await.process(event, emitter).await
    }

    async fn recover(&mut self, reason: Failure, event: Event) -> CoreResult<()> {
        self.0.lock().await.recover(reason, event).await
    }

    async fn stop(&mut self) {
        // Only stop the shared instance once all pool members have gone;
        // simplest to make this a no-op and rely on the owner dropping the
        // last Arc, which is the same lifecycle any shared collaborator has.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopBehaviour;

    #[async_trait]
    impl Behaviour for NoopBehaviour {
        async fn init(&mut self, _env: Arc<dyn cells::EnvironmentHandle>, _id: Identifier) -> CoreResult<()> {
            Ok(())
        }
        async fn process(&mut self, _event: Event, _emitter: &Emitter) -> CoreResult<()> {
            Ok(())
        }
        async fn recover(&mut self, _reason: Failure, _event: Event) -> CoreResult<()> {
            Ok(())
        }
        async fn stop(&mut self) {}
    }

    fn noop_factory() -> Factory {
        Arc::new(|| -> Box<dyn Behaviour> { Box::new(NoopBehaviour) })
    }

    #[tokio::test]
    async fn adding_the_same_id_twice_fails() {
        let env = Environment::new("test");
        let id = Identifier::from("dup");
        env.add_agent(id.clone(), noop_factory()).await.unwrap();
        let err = env.add_agent(id, noop_factory()).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn subscribing_an_unknown_subscriber_fails() {
        let env = Environment::new("test");
        let emitter_id = Identifier::from("emitter");
        env.add_agent(emitter_id.clone(), noop_factory()).await.unwrap();
        let err = env
            .subscribe(&emitter_id, &[Identifier::from("ghost")])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn removing_an_agent_is_idempotent() {
        let env = Environment::new("test");
        let id = Identifier::from("gone");
        env.add_agent(id.clone(), noop_factory()).await.unwrap();
        env.remove_agent(&id).await.unwrap();
        env.remove_agent(&id).await.unwrap();
        assert!(!env.has_agent(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn emitting_to_an_unknown_agent_retries_then_fails() {
        let env = Environment::new("test");
        // The paused clock auto-advances through the whole backoff schedule
        // since nothing else is runnable while this await is pending.
        let err = env
            .emit_simple(&Identifier::from("ghost"), "topic", Payload::new(()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn environment_handle_emit_delegates_to_the_inherent_method() {
        let env = Environment::new("test");
        let id = Identifier::from("target");
        env.add_agent(id.clone(), noop_factory()).await.unwrap();
        let handle: Arc<dyn cells::EnvironmentHandle> = Arc::new(env.clone());
        let context = handle
            .emit(&id, Event::new("topic", Payload::new(())))
            .await
            .unwrap();
        context.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(context.activity_count(), 0);
    }
}
