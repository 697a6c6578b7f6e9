//! The pool wrapper: fans events across N inner agents round-robin.
//!
//! The environment (`ebus`) decides how many inner agent runtimes to spawn
//! and whether they share one behaviour instance or each get their own; this
//! module only implements the round-robin forwarding itself, as a plain
//! `Behaviour` the environment installs in place of the pooled one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::behaviour::{Behaviour, EnvironmentHandle, Failure};
use crate::error::{CoreError, CoreResult};
use crate::event::Event;
use crate::id::Identifier;
use crate::mailbox::AgentHandle;
use crate::runtime::Emitter;

/// Forwards every inbound event to the next inner agent in a ring,
/// dequeuing its handle from the pool channel, pushing the event into its
/// mailbox, then enqueuing the handle back to the tail of the channel.
pub struct PoolBehaviour {
    ring_tx: mpsc::UnboundedSender<AgentHandle>,
    ring_rx: Arc<Mutex<mpsc::UnboundedReceiver<AgentHandle>>>,
}

impl PoolBehaviour {
    /// Build a pool fronting `inner`, in the order given.
    pub fn new(inner: Vec<AgentHandle>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for handle in inner {
            // Channel has just been created; send cannot fail.
            let _ = tx.send(handle);
        }
        Self {
            ring_tx: tx,
            ring_rx: Arc::new(Mutex::new(rx)),
        }
    }
}

#[async_trait]
impl Behaviour for PoolBehaviour {
    async fn init(&mut self, _env: Arc<dyn EnvironmentHandle>, _id: Identifier) -> CoreResult<()> {
        Ok(())
    }

    async fn process(&mut self, event: Event, _emitter: &Emitter) -> CoreResult<()> {
        let handle = {
            let mut rx = self.ring_rx.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| CoreError::BehaviourFailed("pool has no inner agents".into()))?
        };
        let result = handle.push_event(event);
        // Re-enqueue regardless of outcome: a transiently full mailbox isn't
        // grounds for shrinking the ring.
        let _ = self.ring_tx.send(handle);
        result
    }

    async fn recover(&mut self, _reason: Failure, _event: Event) -> CoreResult<()> {
        // Forwarding failures surface as a returned error from `process`,
        // not a panic; nothing to recover here.
        Ok(())
    }

    async fn stop(&mut self) {}
}
