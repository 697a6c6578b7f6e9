//! Background ticker sources: periodic events emitted into the environment
//! on a fixed interval.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use cells::{Event, Identifier, Payload};

use crate::environment::Environment;

/// The event a ticker delivers on each tick, under topic `ticker(<id>)`.
#[derive(Debug, Clone)]
pub struct TickerEvent {
    /// The ticker's own id.
    pub id: Identifier,
    /// Wall-clock time of the tick.
    pub now: DateTime<Utc>,
}

/// A running ticker's stop handle. Dropping it without calling
/// [`Self::stop`] leaves the background task running.
pub(crate) struct TickerHandle {
    stop: Option<oneshot::Sender<()>>,
}

impl TickerHandle {
    /// Stop the ticker. The tick in flight at the moment of stop may or
    /// may not be delivered.
    pub(crate) fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

pub(crate) fn spawn(id: Identifier, target: Identifier, period: Duration, env: Environment) -> TickerHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let topic = format!("ticker({id})");
                    let event = Event::new(topic, Payload::new(TickerEvent { id: id.clone(), now: Utc::now() }));
                    if let Err(err) = env.emit(&target, event).await {
                        tracing::warn!(ticker = %id, target = %target, error = %err, "ticker emit failed");
                    }
                }
                _ = &mut stop_rx => break,
            }
        }
    });
    TickerHandle { stop: Some(stop_tx) }
}
