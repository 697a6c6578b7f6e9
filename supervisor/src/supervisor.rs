//! The supervisor control loop: registration, failure handling, restart
//! strategies and nested trees.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};

use cells::{CoreError, CoreResult, Identifier};

use crate::child::{ChildFactory, ChildHandle};
use crate::strategy::Strategy;
use crate::window::RestartWindow;

enum ChildExit {
    Clean,
    Failed(CoreError),
}

enum ControlMessage {
    Go {
        id: Identifier,
        factory: ChildFactory,
        ack: oneshot::Sender<CoreResult<()>>,
    },
    Nest {
        id: Identifier,
        strategy: Strategy,
        max_restarts: usize,
        period: Duration,
        ack: oneshot::Sender<CoreResult<Supervisor>>,
    },
    ChildExited {
        id: Identifier,
        generation: u64,
        reason: ChildExit,
    },
    Terminate {
        id: Identifier,
        ack: oneshot::Sender<CoreResult<()>>,
    },
    Stop {
        ack: oneshot::Sender<Option<CoreError>>,
    },
}

enum ChildKind {
    Function {
        factory: ChildFactory,
        terminate_tx: watch::Sender<bool>,
    },
    Nested {
        strategy: Strategy,
        max_restarts: usize,
        period: Duration,
        supervisor: Supervisor,
    },
}

struct ChildEntry {
    generation: u64,
    kind: ChildKind,
}

/// A handle to a running supervisor. Cheap to clone; every clone shares the
/// same control loop and children.
#[derive(Clone)]
pub struct Supervisor {
    id: Identifier,
    mailbox: mpsc::UnboundedSender<ControlMessage>,
}

impl Supervisor {
    /// Start a supervisor's control loop and return its handle, plus a
    /// one-shot that resolves with the fatal reason if this supervisor's
    /// own restart-frequency budget is ever exceeded. The receiver is never
    /// resolved on a clean [`Self::stop`].
    pub fn new(
        id: Identifier,
        strategy: Strategy,
        max_restarts: usize,
        period: Duration,
    ) -> (Self, oneshot::Receiver<CoreError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (fatal_tx, fatal_rx) = oneshot::channel();
        let supervisor = Self {
            id: id.clone(),
            mailbox: tx.clone(),
        };
        tokio::spawn(run(id, strategy, max_restarts, period, rx, tx, fatal_tx));
        (supervisor, fatal_rx)
    }

    /// This supervisor's id.
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Register a function child. `factory` is invoked once now, and again
    /// on every restart.
    pub async fn go(&self, id: Identifier, factory: ChildFactory) -> CoreResult<()> {
        let (ack, rx) = oneshot::channel();
        self.send(ControlMessage::Go { id, factory, ack })?;
        rx.await.map_err(|_| CoreError::SupervisorStillRunning)?
    }

    /// Register a nested supervisor child, returning its own handle so the
    /// caller can register children into it directly.
    pub async fn supervisor(
        &self,
        id: Identifier,
        strategy: Strategy,
        max_restarts: usize,
        period: Duration,
    ) -> CoreResult<Supervisor> {
        let (ack, rx) = oneshot::channel();
        self.send(ControlMessage::Nest {
            id,
            strategy,
            max_restarts,
            period,
            ack,
        })?;
        rx.await.map_err(|_| CoreError::SupervisorStillRunning)?
    }

    /// Stop a single child. Asynchronous from the caller's view: returns
    /// once the stop has been accepted, not once the child has actually
    /// wound down.
    pub async fn terminate(&self, id: &Identifier) -> CoreResult<()> {
        let (ack, rx) = oneshot::channel();
        self.send(ControlMessage::Terminate {
            id: id.clone(),
            ack,
        })?;
        rx.await.map_err(|_| CoreError::SupervisorStillRunning)?
    }

    /// Stop every child and this supervisor. Returns the last fatal reason,
    /// if this supervisor had already recorded one.
    pub async fn stop(&self) -> Option<CoreError> {
        let (ack, rx) = oneshot::channel();
        if self.send(ControlMessage::Stop { ack }).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    fn send(&self, message: ControlMessage) -> CoreResult<()> {
        self.mailbox
            .send(message)
            .map_err(|_| CoreError::QueueClosed(self.id.clone()))
    }
}

async fn run(
    id: Identifier,
    strategy: Strategy,
    max_restarts: usize,
    period: Duration,
    mut receiver: mpsc::UnboundedReceiver<ControlMessage>,
    self_tx: mpsc::UnboundedSender<ControlMessage>,
    fatal_tx: oneshot::Sender<CoreError>,
) {
    let mut children: HashMap<Identifier, ChildEntry> = HashMap::new();
    let mut window = RestartWindow::new(max_restarts, period);
    let mut last_fatal: Option<CoreError> = None;

    while let Some(message) = receiver.recv().await {
        match message {
            ControlMessage::Go { id: child_id, factory, ack } => {
                if children.contains_key(&child_id) {
                    let _ = ack.send(Err(CoreError::AlreadyExists(child_id)));
                    continue;
                }
                let entry = start_function(child_id.clone(), 0, factory, &self_tx);
                children.insert(child_id, entry);
                let _ = ack.send(Ok(()));
            }
            ControlMessage::Nest {
                id: child_id,
                strategy: nested_strategy,
                max_restarts: nested_max,
                period: nested_period,
                ack,
            } => {
                if children.contains_key(&child_id) {
                    let _ = ack.send(Err(CoreError::AlreadyExists(child_id)));
                    continue;
                }
                let (entry, handle) = start_nested(child_id.clone(), 0, nested_strategy, nested_max, nested_period, &self_tx);
                children.insert(child_id, entry);
                let _ = ack.send(Ok(handle));
            }
            ControlMessage::ChildExited {
                id: child_id,
                generation,
                reason,
            } => {
                let current_generation = children.get(&child_id).map(|e| e.generation);
                if current_generation != Some(generation) {
                    // Stale exit from a child already terminated or
                    // superseded by a restart; ignore.
                    continue;
                }
                match reason {
                    ChildExit::Clean => {
                        children.remove(&child_id);
                    }
                    ChildExit::Failed(reason) => {
                        tracing::warn!(supervisor = %id, child = %child_id, error = %reason, "child failed");
                        match window.record(Instant::now()) {
                            Err((count, elapsed)) => {
                                let fatal = CoreError::TooManyRestarts { count, elapsed };
                                last_fatal = Some(fatal.clone());
                                stop_all(&mut children).await;
                                let _ = fatal_tx.send(fatal);
                                return;
                            }
                            Ok(()) => match strategy {
                                Strategy::OneForOne => {
                                    restart_one(&mut children, &child_id, &self_tx);
                                }
                                Strategy::OneForAll => {
                                    restart_all(&mut children, &self_tx).await;
                                }
                            },
                        }
                    }
                }
            }
            ControlMessage::Terminate { id: child_id, ack } => {
                match children.remove(&child_id) {
                    Some(entry) => {
                        terminate_entry(entry).await;
                        let _ = ack.send(Ok(()));
                    }
                    None => {
                        let _ = ack.send(Err(CoreError::InvalidChildId(child_id)));
                    }
                }
            }
            ControlMessage::Stop { ack } => {
                stop_all(&mut children).await;
                let _ = ack.send(last_fatal.take());
                return;
            }
        }
    }
}

fn start_function(
    id: Identifier,
    generation: u64,
    factory: ChildFactory,
    self_tx: &mpsc::UnboundedSender<ControlMessage>,
) -> ChildEntry {
    let (terminate_tx, terminate_rx) = watch::channel(false);
    let handle = ChildHandle::new(id.clone(), terminate_rx);
    let future = factory(handle);
    let task_tx = self_tx.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        let outcome = AssertUnwindSafe(future).catch_unwind().await;
        let reason = match outcome {
            Ok(Ok(())) => ChildExit::Clean,
            Ok(Err(err)) => ChildExit::Failed(err),
            Err(_) => ChildExit::Failed(CoreError::BehaviourFailed(format!("child {task_id} panicked"))),
        };
        let _ = task_tx.send(ControlMessage::ChildExited {
            id: task_id,
            generation,
            reason,
        });
    });
    ChildEntry {
        generation,
        kind: ChildKind::Function { factory, terminate_tx },
    }
}

fn start_nested(
    id: Identifier,
    generation: u64,
    strategy: Strategy,
    max_restarts: usize,
    period: Duration,
    self_tx: &mpsc::UnboundedSender<ControlMessage>,
) -> (ChildEntry, Supervisor) {
    let (supervisor, fatal_rx) = Supervisor::new(id.clone(), strategy, max_restarts, period);
    let task_tx = self_tx.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        if let Ok(reason) = fatal_rx.await {
            let _ = task_tx.send(ControlMessage::ChildExited {
                id: task_id,
                generation,
                reason: ChildExit::Failed(reason),
            });
        }
    });
    let entry = ChildEntry {
        generation,
        kind: ChildKind::Nested {
            strategy,
            max_restarts,
            period,
            supervisor: supervisor.clone(),
        },
    };
    (entry, supervisor)
}

fn restart_one(children: &mut HashMap<Identifier, ChildEntry>, id: &Identifier, self_tx: &mpsc::UnboundedSender<ControlMessage>) {
    let Some(old) = children.remove(id) else { return };
    let next_generation = old.generation + 1;
    let entry = match old.kind {
        ChildKind::Function { factory, .. } => start_function(id.clone(), next_generation, factory, self_tx),
        ChildKind::Nested {
            strategy,
            max_restarts,
            period,
            ..
        } => {
            tracing::warn!(child = %id, "restarting a nested supervisor recreates it empty; prior children are not replayed");
            start_nested(id.clone(), next_generation, strategy, max_restarts, period, self_tx).0
        }
    };
    children.insert(id.clone(), entry);
}

async fn restart_all(children: &mut HashMap<Identifier, ChildEntry>, self_tx: &mpsc::UnboundedSender<ControlMessage>) {
    let old: Vec<(Identifier, ChildEntry)> = children.drain().collect();
    let mut specs = Vec::with_capacity(old.len());
    for (id, entry) in old {
        specs.push((id, entry.generation + 1, entry.kind));
    }
    for (_, _, kind) in &specs {
        if let ChildKind::Function { terminate_tx, .. } = kind {
            let _ = terminate_tx.send(true);
        }
    }
    for (_, _, kind) in &specs {
        if let ChildKind::Nested { supervisor, .. } = kind {
            let _ = supervisor.stop().await;
        }
    }
    for (id, generation, kind) in specs {
        let entry = match kind {
            ChildKind::Function { factory, .. } => start_function(id.clone(), generation, factory, self_tx),
            ChildKind::Nested {
                strategy,
                max_restarts,
                period,
                ..
            } => {
                tracing::warn!(child = %id, "restarting a nested supervisor recreates it empty; prior children are not replayed");
                start_nested(id.clone(), generation, strategy, max_restarts, period, self_tx).0
            }
        };
        children.insert(id, entry);
    }
}

async fn terminate_entry(entry: ChildEntry) {
    match entry.kind {
        ChildKind::Function { terminate_tx, .. } => {
            let _ = terminate_tx.send(true);
        }
        ChildKind::Nested { supervisor, .. } => {
            let _ = supervisor.stop().await;
        }
    }
}

async fn stop_all(children: &mut HashMap<Identifier, ChildEntry>) {
    for (_, entry) in children.drain() {
        terminate_entry(entry).await;
    }
}
