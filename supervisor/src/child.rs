//! Children: function children and the handle they receive.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;

use cells::{CoreResult, Identifier};

/// The future a function child runs. Boxed since children come from
/// arbitrary closures the caller supplies to [`crate::Supervisor::go`].
pub type ChildFuture = Pin<Box<dyn Future<Output = CoreResult<()>> + Send>>;

/// Builds a function child's future given the handle it should observe for
/// termination. Called once at registration and again on every restart, so
/// it must be cheaply cloneable and side-effect-free until invoked.
pub type ChildFactory = Arc<dyn Fn(ChildHandle) -> ChildFuture + Send + Sync>;

/// What a function child is handed on each run. Clean children select
/// against [`Self::terminated`] (or poll [`Self::is_terminated`]) and wind
/// down cooperatively; the supervisor never force-kills a child that
/// ignores the signal.
#[derive(Clone)]
pub struct ChildHandle {
    id: Identifier,
    terminate: watch::Receiver<bool>,
}

impl ChildHandle {
    pub(crate) fn new(id: Identifier, terminate: watch::Receiver<bool>) -> Self {
        Self { id, terminate }
    }

    /// This child's id.
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Whether the supervisor has asked this child to stop, without
    /// blocking.
    pub fn is_terminated(&self) -> bool {
        *self.terminate.borrow()
    }

    /// Resolve once the supervisor asks this child to stop. Safe to call
    /// repeatedly; returns immediately if the signal already fired.
    pub async fn terminated(&mut self) {
        if self.is_terminated() {
            return;
        }
        // A closed sender (the supervisor's own loop exited) also means the
        // child should wind down; either outcome returns.
        let _ = self.terminate.changed().await;
    }
}
