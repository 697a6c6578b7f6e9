use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use cells::{
    Behaviour, CoreResult, Emitter, Event, EnvironmentHandle, Failure, Identifier, Payload, PoolConfig,
};
use ebus::{Environment, Factory};

/// Counts events per topic, then forwards each one unchanged to its own
/// subscribers. Used to assemble S1's `a, b, c, d, trace` chain.
#[derive(Clone, Default)]
struct CounterBehaviour {
    counts: Arc<AsyncMutex<HashMap<String, u64>>>,
}

impl CounterBehaviour {
    fn new() -> Self {
        Self::default()
    }

    async fn count(&self, topic: &str) -> u64 {
        self.counts.lock().await.get(topic).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Behaviour for CounterBehaviour {
    async fn init(&mut self, _env: Arc<dyn EnvironmentHandle>, _id: Identifier) -> CoreResult<()> {
        Ok(())
    }

    async fn process(&mut self, event: Event, emitter: &Emitter) -> CoreResult<()> {
        {
            let mut counts = self.counts.lock().await;
            *counts.entry(event.topic().to_string()).or_insert(0) += 1;
        }
        emitter.emit(event)
    }

    async fn recover(&mut self, _reason: Failure, _event: Event) -> CoreResult<()> {
        Ok(())
    }

    async fn stop(&mut self) {}
}

fn factory_for(behaviour: CounterBehaviour) -> Factory {
    Arc::new(move || -> Box<dyn Behaviour> { Box::new(behaviour.clone()) })
}

#[tokio::test]
async fn s1_counter_roll_up_through_a_fan_out_tree() {
    let env = Environment::new("s1");

    let a = CounterBehaviour::new();
    let b = CounterBehaviour::new();
    let c = CounterBehaviour::new();
    let d = CounterBehaviour::new();
    let trace = CounterBehaviour::new();

    let a_id = Identifier::from("s1/a");
    let b_id = Identifier::from("s1/b");
    let c_id = Identifier::from("s1/c");
    let d_id = Identifier::from("s1/d");
    let trace_id = Identifier::from("s1/trace");

    env.add_agent(a_id.clone(), factory_for(a.clone())).await.unwrap();
    env.add_agent(b_id.clone(), factory_for(b.clone())).await.unwrap();
    env.add_agent(c_id.clone(), factory_for(c.clone())).await.unwrap();
    env.add_agent(d_id.clone(), factory_for(d.clone())).await.unwrap();
    env.add_agent(trace_id.clone(), factory_for(trace.clone())).await.unwrap();

    env.subscribe(&a_id, &[b_id.clone()]).await.unwrap();
    env.subscribe(&b_id, &[c_id.clone(), d_id.clone()]).await.unwrap();
    env.subscribe(&c_id, &[trace_id.clone()]).await.unwrap();
    env.subscribe(&d_id, &[trace_id.clone()]).await.unwrap();

    // Subscription changes are queued control messages; give each agent's
    // loop a chance to apply them before the root emission.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let context = env
        .emit_simple(&a_id, "e1", Payload::new("x".to_string()))
        .await
        .unwrap();
    context.wait(Duration::from_secs(2)).await.unwrap();

    assert_eq!(a.count("e1").await, 1);
    assert_eq!(b.count("e1").await, 1);
    assert_eq!(c.count("e1").await, 1);
    assert_eq!(d.count("e1").await, 1);
    assert_eq!(trace.count("e1").await, 2);

    env.shutdown().await;
}

#[tokio::test]
async fn s6_ticker_rate_is_within_tolerance() {
    let env = Environment::new("s6");
    let counter = CounterBehaviour::new();
    let target_id = Identifier::from("s6/counter");
    env.add_agent(target_id.clone(), factory_for(counter.clone()))
        .await
        .unwrap();

    let ticker_id = Identifier::from("s6/ticker");
    env.add_ticker(ticker_id.clone(), target_id.clone(), Duration::from_millis(5))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    env.remove_ticker(&ticker_id).await.unwrap();
    // Let the last couple of in-flight ticks land.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let topic = format!("ticker({ticker_id})");
    let ticks = counter.count(&topic).await;
    assert!((80..=120).contains(&ticks), "expected ~100 ticks, saw {ticks}");

    env.shutdown().await;
}

/// A poolable behaviour that tags each processed event with which inner
/// instance handled it, so the test can tell stateful pools apart from a
/// shared stateless one.
struct PoolCounter {
    stateful: bool,
    hits: Arc<AtomicUsize>,
}

#[async_trait]
impl Behaviour for PoolCounter {
    async fn init(&mut self, _env: Arc<dyn EnvironmentHandle>, _id: Identifier) -> CoreResult<()> {
        Ok(())
    }

    async fn process(&mut self, _event: Event, _emitter: &Emitter) -> CoreResult<()> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recover(&mut self, _reason: Failure, _event: Event) -> CoreResult<()> {
        Ok(())
    }

    async fn stop(&mut self) {}

    fn pool_config(&self) -> Option<PoolConfig> {
        Some(PoolConfig {
            size: 4,
            stateful: self.stateful,
        })
    }
}

#[tokio::test]
async fn s7_stateless_pool_shares_one_counter_across_members() {
    let env = Environment::new("s7-stateless");
    let hits = Arc::new(AtomicUsize::new(0));
    let pool_id = Identifier::from("s7/pool-stateless");

    let factory_hits = hits.clone();
    let factory: Factory = Arc::new(move || -> Box<dyn Behaviour> {
        Box::new(PoolCounter {
            stateful: false,
            hits: factory_hits.clone(),
        })
    });
    env.add_agent(pool_id.clone(), factory).await.unwrap();

    for i in 0..20 {
        env.emit_simple(&pool_id, "work", Payload::new(i)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 20);
    env.shutdown().await;
}

#[tokio::test]
async fn s7_stateful_pool_distributes_events_round_robin() {
    let env = Environment::new("s7-stateful");
    // Each inner instance gets its own counter, shared back to the test via
    // a registry keyed by the order `factory()` is invoked in.
    let per_instance: Arc<AsyncMutex<Vec<Arc<AtomicUsize>>>> = Arc::new(AsyncMutex::new(Vec::new()));
    let registry = per_instance.clone();

    struct TaggedCounter {
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Behaviour for TaggedCounter {
        async fn init(&mut self, _env: Arc<dyn EnvironmentHandle>, _id: Identifier) -> CoreResult<()> {
            Ok(())
        }
        async fn process(&mut self, _event: Event, _emitter: &Emitter) -> CoreResult<()> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn recover(&mut self, _reason: Failure, _event: Event) -> CoreResult<()> {
            Ok(())
        }
        async fn stop(&mut self) {}
        fn pool_config(&self) -> Option<PoolConfig> {
            Some(PoolConfig { size: 4, stateful: true })
        }
    }

    let pool_id = Identifier::from("s7/pool-stateful");
    let factory: Factory = Arc::new(move || -> Box<dyn Behaviour> {
        let hits = Arc::new(AtomicUsize::new(0));
        registry.try_lock().expect("single-threaded registration").push(hits.clone());
        Box::new(TaggedCounter { hits })
    });
    env.add_agent(pool_id.clone(), factory).await.unwrap();

    for i in 0..20 {
        env.emit_simple(&pool_id, "work", Payload::new(i)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let counters = per_instance.lock().await;
    assert_eq!(counters.len(), 4);
    for counter in counters.iter() {
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    env.shutdown().await;
}
