//! Push-style delivery: drive an [`EventHandler`] from a bus subscription.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinHandle;

use sensornet_domain::event::Event;

use crate::event_bus::Subscription;
use crate::ports::EventHandler;

/// Delivery policy of a dispatch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Attempts per event before giving up on it, at least 1.
    pub max_attempts: u32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

/// Spawn a task that feeds every event of `subscription` to `handler`.
///
/// A handler that errors or panics on one event is retried up to
/// `max_attempts` times, then the event is logged and skipped; the task keeps
/// consuming. The task ends when the bus is closed and the queue is drained.
pub fn spawn<H: EventHandler>(
    mut subscription: Subscription,
    handler: H,
    options: DispatchOptions,
) -> JoinHandle<()> {
    let max_attempts = options.max_attempts.max(1);
    tokio::spawn(async move {
        let name = subscription.name().to_string();
        while let Some(event) = subscription.recv().await {
            deliver(&handler, &event, max_attempts, &name).await;
        }
        tracing::debug!(subscriber = %name, "event handler stopped");
    })
}

async fn deliver<H: EventHandler>(handler: &H, event: &Event, max_attempts: u32, name: &str) {
    for attempt in 1..=max_attempts {
        match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => return,
            Ok(Err(err)) => tracing::warn!(
                subscriber = %name,
                topic = %event.topic,
                sequence = event.sequence,
                attempt,
                error = %err,
                "event handler failed"
            ),
            Err(_) => tracing::error!(
                subscriber = %name,
                topic = %event.topic,
                sequence = event.sequence,
                attempt,
                "event handler panicked"
            ),
        }
    }
    tracing::error!(
        subscriber = %name,
        topic = %event.topic,
        sequence = event.sequence,
        max_attempts,
        "giving up on event"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::ports::EventPublisher;
    use sensornet_domain::error::SensorNetError;
    use sensornet_domain::event::{EventPayload, Topic};
    use sensornet_domain::id::SensorId;
    use sensornet_domain::reading::{Reading, Unit};
    use sensornet_domain::sensor::SensorType;

    fn publish(bus: &EventBus, value: f64) {
        let id: SensorId = "s1".parse().unwrap();
        let reading = Reading::new(
            id.clone(),
            SensorType::Temperature,
            "temperature",
            value,
            Unit::Celsius,
            sensornet_domain::time::now(),
        );
        bus.publish(Topic::readings_from(&id), EventPayload::Reading(reading))
            .unwrap();
    }

    /// Fails (or panics) on chosen sequence numbers, records what it saw.
    #[derive(Default)]
    struct FlakyHandler {
        fail_on: Vec<u64>,
        panic_on: Vec<u64>,
        failures_before_success: u32,
        attempts: AtomicU32,
        handled: Mutex<Vec<u64>>,
    }

    impl EventHandler for FlakyHandler {
        fn handle(
            &self,
            event: &Event,
        ) -> impl std::future::Future<Output = Result<(), SensorNetError>> + Send {
            let sequence = event.sequence;
            async move {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                assert!(!self.panic_on.contains(&sequence), "boom");
                if self.fail_on.contains(&sequence) {
                    return Err(SensorNetError::handler(std::io::Error::other("fail")));
                }
                if attempt <= self.failures_before_success {
                    return Err(SensorNetError::handler(std::io::Error::other("flaky")));
                }
                self.handled.lock().push(sequence);
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn should_deliver_next_event_after_handler_failure() {
        let bus = EventBus::new(16);
        let handler = Arc::new(FlakyHandler {
            fail_on: vec![1],
            ..FlakyHandler::default()
        });
        let task = spawn(
            bus.subscribe("reading.*").unwrap(),
            Arc::clone(&handler),
            DispatchOptions::default(),
        );
        publish(&bus, 1.0);
        publish(&bus, 2.0);
        bus.close();
        task.await.unwrap();
        assert_eq!(*handler.handled.lock(), vec![2]);
    }

    #[tokio::test]
    async fn should_survive_panicking_handler() {
        let bus = EventBus::new(16);
        let handler = Arc::new(FlakyHandler {
            panic_on: vec![1],
            ..FlakyHandler::default()
        });
        let task = spawn(
            bus.subscribe("*").unwrap(),
            Arc::clone(&handler),
            DispatchOptions::default(),
        );
        publish(&bus, 1.0);
        publish(&bus, 2.0);
        bus.close();
        task.await.unwrap();
        assert_eq!(*handler.handled.lock(), vec![2]);
    }

    #[tokio::test]
    async fn should_retry_failed_event_up_to_max_attempts() {
        let bus = EventBus::new(16);
        let handler = Arc::new(FlakyHandler {
            failures_before_success: 2,
            ..FlakyHandler::default()
        });
        let task = spawn(
            bus.subscribe("*").unwrap(),
            Arc::clone(&handler),
            DispatchOptions { max_attempts: 3 },
        );
        publish(&bus, 1.0);
        bus.close();
        task.await.unwrap();
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*handler.handled.lock(), vec![1]);
    }
}
