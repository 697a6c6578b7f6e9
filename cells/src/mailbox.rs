//! An agent's inbound FIFO queue and the handle used to push into it.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{CoreError, CoreResult};
use crate::event::Event;
use crate::id::Identifier;

/// A message waiting in an agent's mailbox.
pub enum AgentMessage {
    /// An event to process.
    Event(Event),
    /// Add these subscriber handles to the agent's local subscriber cache.
    AddSubscribers(HashMap<Identifier, AgentHandle>),
    /// Remove these ids from the agent's local subscriber cache.
    RemoveSubscribers(HashSet<Identifier>),
    /// Drain no further messages; call `Behaviour::stop` and terminate.
    Stop,
}

type Sender = mpsc::UnboundedSender<AgentMessage>;
pub(crate) type Receiver = mpsc::UnboundedReceiver<AgentMessage>;

/// A cheap-to-clone reference to one agent's mailbox.
///
/// Every clone feeds the same unbounded queue; pushing after the agent has
/// stopped returns [`CoreError::QueueClosed`].
#[derive(Clone)]
pub struct AgentHandle {
    id: Identifier,
    sender: Arc<Sender>,
}

impl AgentHandle {
    pub(crate) fn new(id: Identifier, sender: Sender) -> Self {
        Self {
            id,
            sender: Arc::new(sender),
        }
    }

    /// This handle's agent id.
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Enqueue a message. Non-blocking: the mailbox is unbounded.
    pub fn push(&self, message: AgentMessage) -> CoreResult<()> {
        self.sender
            .send(message)
            .map_err(|_| CoreError::QueueClosed(self.id.clone()))
    }

    /// Convenience wrapper over [`Self::push`] for an event.
    pub fn push_event(&self, event: Event) -> CoreResult<()> {
        self.push(AgentMessage::Event(event))
    }

    /// Ask the agent to stop. Asynchronous: returns once the stop message
    /// has been accepted into the mailbox, not once the agent has drained it.
    pub fn stop(&self) -> CoreResult<()> {
        self.push(AgentMessage::Stop)
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle").field("id", &self.id).finish()
    }
}

/// Create a fresh, unbounded mailbox for `id`, returning the handle callers
/// push into and the receiver the processing loop drains.
pub(crate) fn mailbox(id: Identifier) -> (AgentHandle, Receiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AgentHandle::new(id, tx), rx)
}
