//! The per-agent processing loop, its handle, and the `Emitter` passed
//! into `Behaviour::process`.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::behaviour::{Behaviour, EnvironmentHandle, Failure};
use crate::error::{CoreError, CoreResult};
use crate::event::{Context, Event, Payload};
use crate::id::Identifier;
use crate::mailbox::{self, AgentHandle, AgentMessage};
use crate::monitor::Monitor;

/// How an agent's processing loop ended.
#[derive(Debug)]
pub enum AgentExit {
    /// Drained a `Stop` message and called `Behaviour::stop` cleanly.
    Stopped,
    /// `recover` returned a fatal error; the loop terminated early.
    Failed(CoreError),
}

/// Everything the owner of a freshly spawned agent needs: the mailbox
/// handle to push into, and a one-shot signal of how the loop ended.
pub struct AgentRuntimeHandle {
    /// Push events and control messages here.
    pub mailbox: AgentHandle,
    /// Resolves once when the processing loop terminates.
    pub exit: oneshot::Receiver<AgentExit>,
}

/// Publishes events emitted by a behaviour's `process` call to the
/// agent's current subscribers.
pub struct Emitter {
    own_id: Identifier,
    context: Option<Arc<Context>>,
    subscribers: Arc<StdMutex<HashMap<Identifier, AgentHandle>>>,
}

impl Emitter {
    /// Emit a fully built event to every current subscriber, attaching the
    /// context of the event currently being processed.
    pub fn emit(&self, mut event: Event) -> CoreResult<()> {
        let ctx = event.context().or_else(|| self.context.clone());
        if let Some(ctx) = &ctx {
            event.set_context(ctx.clone());
        }

        let mut subscribers = self
            .subscribers
            .lock()
            .expect("emitter subscriber lock poisoned");
        let mut dead = Vec::new();
        for (sub_id, handle) in subscribers.iter() {
            if let Some(ctx) = &ctx {
                ctx.incr_activity();
            }
            if let Err(err) = handle.push_event(event.clone()) {
                if let Some(ctx) = &ctx {
                    // The delivery will never be processed; undo the
                    // increment so the context can still reach zero.
                    ctx.decr_activity();
                }
                tracing::warn!(emitter = %self.own_id, subscriber = %sub_id, error = %err, "dropping dead subscriber");
                dead.push(sub_id.clone());
            }
        }
        for id in dead {
            subscribers.remove(&id);
        }
        Ok(())
    }

    /// Convenience wrapper that builds the event for you.
    pub fn emit_simple(&self, topic: impl Into<String>, payload: Payload) -> CoreResult<()> {
        self.emit(Event::new(topic, payload))
    }
}

/// Run `init`, then — if it succeeds — spawn the agent's dedicated
/// processing task and return its handle.
pub async fn spawn<B>(
    id: Identifier,
    mut behaviour: B,
    env: Arc<dyn EnvironmentHandle>,
    monitor: Arc<dyn Monitor>,
    metrics_scope: Identifier,
) -> CoreResult<AgentRuntimeHandle>
where
    B: Behaviour + 'static,
{
    behaviour
        .init(env, id.clone())
        .await
        .map_err(|err| CoreError::InitFailure {
            id: id.clone(),
            reason: err.to_string(),
        })?;

    let (handle, mut receiver) = mailbox::mailbox(id.clone());
    let (exit_tx, exit_rx) = oneshot::channel();
    let subscribers: Arc<StdMutex<HashMap<Identifier, AgentHandle>>> =
        Arc::new(StdMutex::new(HashMap::new()));

    tokio::spawn(async move {
        let exit = run_loop(&id, &mut behaviour, &mut receiver, &subscribers, &monitor, &metrics_scope).await;
        behaviour.stop().await;
        let _ = exit_tx.send(exit);
    });

    Ok(AgentRuntimeHandle {
        mailbox: handle,
        exit: exit_rx,
    })
}

async fn run_loop<B: Behaviour>(
    id: &Identifier,
    behaviour: &mut B,
    receiver: &mut mailbox::Receiver,
    subscribers: &Arc<StdMutex<HashMap<Identifier, AgentHandle>>>,
    monitor: &Arc<dyn Monitor>,
    metrics_scope: &Identifier,
) -> AgentExit {
    while let Some(message) = receiver.recv().await {
        match message {
            AgentMessage::Event(event) => {
                if let Some(fatal) = process_one(id, behaviour, event, subscribers, monitor, metrics_scope).await {
                    return AgentExit::Failed(fatal);
                }
            }
            AgentMessage::AddSubscribers(added) => {
                subscribers
                    .lock()
                    .expect("subscriber lock poisoned")
                    .extend(added);
            }
            AgentMessage::RemoveSubscribers(removed) => {
                let mut guard = subscribers.lock().expect("subscriber lock poisoned");
                for id in &removed {
                    guard.remove(id);
                }
            }
            AgentMessage::Stop => return AgentExit::Stopped,
        }
    }
    AgentExit::Stopped
}

async fn process_one<B: Behaviour>(
    id: &Identifier,
    behaviour: &mut B,
    event: Event,
    subscribers: &Arc<StdMutex<HashMap<Identifier, AgentHandle>>>,
    monitor: &Arc<dyn Monitor>,
    metrics_scope: &Identifier,
) -> Option<CoreError> {
    let ctx = event.context();
    let emitter = Emitter {
        own_id: id.clone(),
        context: ctx.clone(),
        subscribers: subscribers.clone(),
    };

    let guard = monitor.begin(metrics_scope);
    monitor.incr(metrics_scope);
    let outcome = AssertUnwindSafe(behaviour.process(event.clone(), &emitter))
        .catch_unwind()
        .await;
    monitor.decr(metrics_scope);
    guard.end();

    let fatal = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => {
            tracing::debug!(agent = %id, error = %err, "process returned an error, recovering");
            behaviour.recover(Failure::Error(err), event).await.err()
        }
        Err(panic) => {
            tracing::warn!(agent = %id, "process panicked, recovering");
            behaviour.recover(Failure::Panic(panic), event).await.err()
        }
    };

    if let Some(ctx) = ctx {
        ctx.decr_activity();
    }
    fatal
}

/// Resolve a set of ids against a lookup, returning handles for every id
/// found. Used when applying subscribe/unsubscribe control messages.
pub fn resolve(ids: &[Identifier], known: &HashMap<Identifier, AgentHandle>) -> HashMap<Identifier, AgentHandle> {
    ids.iter()
        .filter_map(|id| known.get(id).map(|h| (id.clone(), h.clone())))
        .collect()
}

/// A set of ids with no attached handles, used for `RemoveSubscribers`.
pub fn id_set(ids: &[Identifier]) -> HashSet<Identifier> {
    ids.iter().cloned().collect()
}
