//! Wires up the `a -> b -> {c, d} -> trace` fan-out tree and emits one event
//! through it, printing how many times each agent saw it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cells::{Behaviour, CoreResult, Emitter, Event, EnvironmentHandle, Failure, Identifier, Payload};
use ebus::Factory;
use runtime::{System, SystemConfig};

#[derive(Clone, Default)]
struct RelayBehaviour {
    name: String,
    counts: Arc<Mutex<HashMap<String, u64>>>,
}

impl RelayBehaviour {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            counts: Arc::default(),
        }
    }

    async fn count(&self, topic: &str) -> u64 {
        self.counts.lock().await.get(topic).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Behaviour for RelayBehaviour {
    async fn init(&mut self, _env: Arc<dyn EnvironmentHandle>, _id: Identifier) -> CoreResult<()> {
        Ok(())
    }

    async fn process(&mut self, event: Event, emitter: &Emitter) -> CoreResult<()> {
        let count = {
            let mut counts = self.counts.lock().await;
            let entry = counts.entry(event.topic().to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        tracing::info!(agent = %self.name, topic = %event.topic(), count, "relayed event");
        emitter.emit(event)
    }

    async fn recover(&mut self, reason: Failure, _event: Event) -> CoreResult<()> {
        tracing::warn!(agent = %self.name, ?reason, "dropping event after failure");
        Ok(())
    }

    async fn stop(&mut self) {}
}

fn factory_for(behaviour: RelayBehaviour) -> Factory {
    Arc::new(move || -> Box<dyn Behaviour> { Box::new(behaviour.clone()) })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let system = System::new(SystemConfig {
        name: "demo".to_string(),
        ..SystemConfig::default()
    });
    let env = system.environment();

    let a = RelayBehaviour::named("a");
    let b = RelayBehaviour::named("b");
    let c = RelayBehaviour::named("c");
    let d = RelayBehaviour::named("d");
    let trace = RelayBehaviour::named("trace");

    let a_id = Identifier::from("demo/a");
    let b_id = Identifier::from("demo/b");
    let c_id = Identifier::from("demo/c");
    let d_id = Identifier::from("demo/d");
    let trace_id = Identifier::from("demo/trace");

    env.add_agent(a_id.clone(), factory_for(a.clone())).await?;
    env.add_agent(b_id.clone(), factory_for(b.clone())).await?;
    env.add_agent(c_id.clone(), factory_for(c.clone())).await?;
    env.add_agent(d_id.clone(), factory_for(d.clone())).await?;
    env.add_agent(trace_id.clone(), factory_for(trace.clone())).await?;

    env.subscribe(&a_id, &[b_id.clone()]).await?;
    env.subscribe(&b_id, &[c_id.clone(), d_id.clone()]).await?;
    env.subscribe(&c_id, &[trace_id.clone()]).await?;
    env.subscribe(&d_id, &[trace_id.clone()]).await?;

    // Subscription changes are queued control messages; give each agent's
    // loop a moment to apply them before the root emission.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let context = env
        .emit_simple(&a_id, "demo.start", Payload::new("hello".to_string()))
        .await?;
    context.wait(Duration::from_secs(2)).await?;

    println!("trace saw demo.start {} time(s)", trace.count("demo.start").await);

    system.shutdown().await;
    Ok(())
}
