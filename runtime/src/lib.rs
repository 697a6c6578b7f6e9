#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **runtime** – facade wiring an [`Environment`] and a root [`Supervisor`]
//! into one [`System`].
//!
//! This crate adds no behaviour of its own: it composes `ebus` and
//! `supervisor` the way an application would, the same role
//! `toka-runtime` plays over the deterministic kernel. There is no
//! process-wide singleton; a `System` is an explicit, constructed value.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use cells::{CoreError, Monitor, NoopMonitor};
use ebus::{ConfigSource, Environment};
use supervisor::{Strategy, Supervisor};

/// Configuration for a [`System`].
///
/// Only the root supervisor's restart policy and the environment's name and
/// monitoring collaborator are configurable; everything else about the
/// environment (agents, subscriptions, tickers) is wired up by the caller
/// after construction.
#[derive(Clone)]
pub struct SystemConfig {
    /// Name given to the underlying [`Environment`]; used to build the
    /// `cells/<name>/cell/<type>` metrics scope for every agent it hosts.
    pub name: String,
    /// Monitoring collaborator shared by every agent the environment spawns.
    pub monitor: Arc<dyn Monitor>,
    /// Restart strategy applied by the root supervisor.
    pub strategy: Strategy,
    /// Restart-frequency budget for the root supervisor.
    pub max_restarts: usize,
    /// Window the restart budget above is measured over.
    pub period: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "system".to_string(),
            monitor: Arc::new(NoopMonitor),
            strategy: Strategy::OneForOne,
            max_restarts: 5,
            period: Duration::from_secs(60),
        }
    }
}

impl SystemConfig {
    /// Build a config from a [`ConfigSource`], resolving only the backend
    /// key `ebus` already recognises; the router backend choice has no
    /// further effect today since `Single` is the only one implemented.
    pub fn from_source(name: impl Into<String>, source: &dyn ConfigSource) -> Self {
        let backend = ebus::resolve_backend(source);
        tracing::debug!(?backend, "resolved environment backend");
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A complete, running system: one [`Environment`] plus one root
/// [`Supervisor`]. Register agents on [`System::environment`], register
/// supervised children on [`System::supervisor`].
pub struct System {
    environment: Environment,
    supervisor: Supervisor,
    fatal: oneshot::Receiver<CoreError>,
}

impl System {
    /// Construct a system from `config`. Neither component does any I/O at
    /// construction time, so this never fails.
    pub fn new(config: SystemConfig) -> Self {
        let environment = Environment::with_monitor(config.name.clone(), config.monitor);
        let (supervisor, fatal) = Supervisor::new(
            cells::Identifier::from(format!("{}/supervisor", config.name)),
            config.strategy,
            config.max_restarts,
            config.period,
        );
        tracing::info!(system = %config.name, "system started");
        Self {
            environment,
            supervisor,
            fatal,
        }
    }

    /// The environment agents are registered against.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// The root supervisor function children and nested supervisors are
    /// registered against.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Resolves once the root supervisor's own restart budget is exceeded.
    /// Consumes the system since the underlying one-shot can only be
    /// observed once; clone [`System::supervisor`]'s handle beforehand if
    /// you also need to keep driving it concurrently with this wait.
    pub async fn fatal(self) -> Option<CoreError> {
        self.fatal.await.ok()
    }

    /// Stop every agent, ticker and supervised child. The system is not
    /// usable afterwards.
    pub async fn shutdown(self) {
        self.environment.shutdown().await;
        self.supervisor.stop().await;
        tracing::info!("system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cells::{Behaviour, CoreResult, Emitter, Event, EnvironmentHandle, Failure, Identifier, Payload};
    use ebus::Factory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBehaviour(Arc<AtomicUsize>);

    #[async_trait]
    impl Behaviour for CountingBehaviour {
        async fn init(&mut self, _env: Arc<dyn EnvironmentHandle>, _id: Identifier) -> CoreResult<()> {
            Ok(())
        }
        async fn process(&mut self, _event: Event, _emitter: &Emitter) -> CoreResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn recover(&mut self, _reason: Failure, _event: Event) -> CoreResult<()> {
            Ok(())
        }
        async fn stop(&mut self) {}
    }

    #[tokio::test]
    async fn environment_and_supervisor_both_come_up_ready() {
        let system = System::new(SystemConfig::default());

        let hits = Arc::new(AtomicUsize::new(0));
        let factory_hits = hits.clone();
        let factory: Factory = Arc::new(move || -> Box<dyn Behaviour> {
            Box::new(CountingBehaviour(factory_hits.clone()))
        });
        let id = Identifier::from("system/test/agent");
        system.environment().add_agent(id.clone(), factory).await.unwrap();

        let context = system
            .environment()
            .emit_simple(&id, "ping", Payload::new(()))
            .await
            .unwrap();
        context.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        system.shutdown().await;
    }

    #[tokio::test]
    async fn from_source_resolves_default_backend() {
        let source = ebus::MapConfigSource::default();
        let config = SystemConfig::from_source("from-source", &source);
        assert_eq!(config.name, "from-source");
    }
}
