//! In-process event bus with per-subscriber bounded queues.
//!
//! Each subscription owns a queue of at most `capacity` events. Publishing
//! never waits: when a queue is full its oldest event is discarded and an
//! [`OverflowNotice`] is published on `bus.overflow`. Sequence numbers are
//! assigned per topic while the fan-out runs under the same lock, so every
//! subscriber sees a topic's events in sequence order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use sensornet_domain::error::SensorNetError;
use sensornet_domain::event::{BUS_OVERFLOW, Event, EventPayload, OverflowNotice, Topic, TopicPattern};
use sensornet_domain::id::SubscriptionId;
use sensornet_domain::sensor::SensorType;

use crate::ports::EventPublisher;

/// Queue bound used when none is configured.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Patterns matching every reading exactly once.
///
/// Readings go out on both `reading.<type>` and `reading.<sensor_id>`;
/// consumers that want each reading a single time listen to the per-type
/// topics only.
#[must_use]
pub fn reading_patterns() -> Vec<TopicPattern> {
    SensorType::ALL
        .into_iter()
        .map(|t| TopicPattern::from(&Topic::readings_of(t)))
        .collect()
}

/// Cheaply cloneable handle to one bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    sequencer: Mutex<Sequencer>,
    subscribers: RwLock<Arc<Vec<Arc<Slot>>>>,
}

#[derive(Default)]
struct Sequencer {
    sequences: HashMap<Topic, u64>,
    closed: bool,
}

struct Slot {
    id: SubscriptionId,
    name: String,
    patterns: Vec<TopicPattern>,
    capacity: usize,
    queue: Mutex<SlotQueue>,
    notify: Notify,
}

#[derive(Default)]
struct SlotQueue {
    events: VecDeque<Arc<Event>>,
    dropped: u64,
    closed: bool,
}

impl Slot {
    fn wants(&self, topic: &Topic) -> bool {
        self.patterns.iter().any(|p| p.matches(topic))
    }

    fn push(&self, event: Arc<Event>) -> Option<OverflowNotice> {
        let mut queue = self.queue.lock();
        if queue.closed {
            return None;
        }
        let mut notice = None;
        if queue.events.len() >= self.capacity {
            if let Some(dropped) = queue.events.pop_front() {
                queue.dropped += 1;
                if dropped.topic.as_str() != BUS_OVERFLOW {
                    notice = Some(OverflowNotice {
                        subscription_id: self.id.clone(),
                        subscriber: self.name.clone(),
                        dropped_topic: dropped.topic.clone(),
                        dropped_sequence: dropped.sequence,
                        total_dropped: queue.dropped,
                    });
                }
            }
        }
        queue.events.push_back(event);
        drop(queue);
        self.notify.notify_one();
        notice
    }

    fn close(&self) {
        self.queue.lock().closed = true;
        self.notify.notify_one();
    }
}

impl EventBus {
    /// Create a bus whose subscriber queues hold at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                sequencer: Mutex::new(Sequencer::default()),
                subscribers: RwLock::new(Arc::new(Vec::new())),
            }),
        }
    }

    /// Subscribe to a single pattern such as `reading.*`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed pattern, or
    /// [`SensorNetError::BusClosed`] after [`close`](Self::close).
    pub fn subscribe(&self, pattern: &str) -> Result<Subscription, SensorNetError> {
        let pattern: TopicPattern = pattern.parse()?;
        self.subscribe_to(pattern.to_string(), vec![pattern])
    }

    /// Subscribe to several patterns at once.
    ///
    /// An event matching more than one pattern is delivered once. Events
    /// published before this call are not delivered.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::BusClosed`] after [`close`](Self::close).
    pub fn subscribe_to(
        &self,
        name: impl Into<String>,
        patterns: Vec<TopicPattern>,
    ) -> Result<Subscription, SensorNetError> {
        if self.inner.sequencer.lock().closed {
            return Err(SensorNetError::BusClosed);
        }
        let slot = Arc::new(Slot {
            id: SubscriptionId::generate("sub"),
            name: name.into(),
            patterns,
            capacity: self.inner.capacity,
            queue: Mutex::new(SlotQueue::default()),
            notify: Notify::new(),
        });
        {
            let mut subscribers = self.inner.subscribers.write();
            let mut next = Vec::clone(&subscribers);
            next.push(Arc::clone(&slot));
            *subscribers = Arc::new(next);
        }
        tracing::debug!(subscription_id = %slot.id, subscriber = %slot.name, "subscribed");
        Ok(Subscription {
            slot,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.sequencer.lock().closed
    }

    /// Refuse further publications and wake every subscriber.
    ///
    /// Subscribers still receive what is already queued, then `None`.
    pub fn close(&self) {
        self.inner.sequencer.lock().closed = true;
        for slot in self.inner.subscribers.read().iter() {
            slot.close();
        }
        tracing::info!("event bus closed");
    }

    fn fan_out(
        &self,
        topic: Topic,
        payload: EventPayload,
    ) -> Result<(u64, Vec<OverflowNotice>), SensorNetError> {
        let mut sequencer = self.inner.sequencer.lock();
        if sequencer.closed {
            return Err(SensorNetError::BusClosed);
        }
        let counter = sequencer.sequences.entry(topic.clone()).or_insert(0);
        *counter += 1;
        let sequence = *counter;

        let event = Arc::new(Event {
            topic,
            sequence,
            published_at: sensornet_domain::time::now(),
            payload,
        });
        let subscribers = Arc::clone(&self.inner.subscribers.read());
        let overflows = subscribers
            .iter()
            .filter(|slot| slot.wants(&event.topic))
            .filter_map(|slot| slot.push(Arc::clone(&event)))
            .collect();
        Ok((sequence, overflows))
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, topic: Topic, payload: EventPayload) -> Result<u64, SensorNetError> {
        let (sequence, mut pending) = self.fan_out(topic, payload)?;
        while let Some(notice) = pending.pop() {
            tracing::warn!(
                subscriber = %notice.subscriber,
                dropped_topic = %notice.dropped_topic,
                dropped_sequence = notice.dropped_sequence,
                total_dropped = notice.total_dropped,
                "subscriber queue full, dropped oldest event"
            );
            match self.fan_out(Topic::bus_overflow(), EventPayload::Overflow(notice)) {
                Ok((_, more)) => pending.extend(more),
                Err(_) => break,
            }
        }
        Ok(sequence)
    }
}

impl Inner {
    fn remove(&self, id: &SubscriptionId) {
        let mut subscribers = self.subscribers.write();
        let next: Vec<_> = subscribers
            .iter()
            .filter(|slot| &slot.id != id)
            .cloned()
            .collect();
        *subscribers = Arc::new(next);
    }
}

/// Pull handle on a subscriber queue. Dropping it unsubscribes.
pub struct Subscription {
    slot: Arc<Slot>,
    bus: Weak<Inner>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> &SubscriptionId {
        &self.slot.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Wait for the next event; `None` once the bus is closed and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            let notified = self.slot.notify.notified();
            {
                let mut queue = self.slot.queue.lock();
                if let Some(event) = queue.events.pop_front() {
                    return Some(event);
                }
                if queue.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.slot.queue.lock().events.pop_front()
    }

    /// Events discarded from this subscription's queue so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.slot.queue.lock().dropped
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(&self.slot.id);
            tracing::debug!(subscription_id = %self.slot.id, "unsubscribed");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.slot.id)
            .field("name", &self.slot.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensornet_domain::event::StatusChange;
    use sensornet_domain::id::SensorId;
    use sensornet_domain::reading::{Reading, Unit};
    use sensornet_domain::sensor::SensorState;

    fn sensor_id() -> SensorId {
        "living_room".parse().unwrap()
    }

    fn reading(value: f64) -> EventPayload {
        EventPayload::Reading(Reading::new(
            sensor_id(),
            SensorType::Temperature,
            "temperature",
            value,
            Unit::Celsius,
            sensornet_domain::time::now(),
        ))
    }

    fn status() -> EventPayload {
        EventPayload::Status(StatusChange {
            sensor_id: sensor_id(),
            from: SensorState::Online,
            to: SensorState::Error,
            consecutive_failures: 3,
            reason: None,
            timestamp: sensornet_domain::time::now(),
        })
    }

    fn value_of(event: &Event) -> f64 {
        event.as_reading().unwrap().value
    }

    #[tokio::test]
    async fn should_deliver_event_to_matching_subscriber() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("reading.*").unwrap();

        let seq = bus
            .publish(Topic::readings_from(&sensor_id()), reading(21.0))
            .unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(seq, 1);
        assert_eq!(event.sequence, 1);
        assert_eq!(event.topic.as_str(), "reading.living_room");
        assert!((value_of(&event) - 21.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn should_not_deliver_to_non_matching_subscriber() {
        let bus = EventBus::new(16);
        let mut alerts = bus.subscribe("alert.*").unwrap();
        bus.publish(Topic::status_of(&sensor_id()), status()).unwrap();
        assert!(alerts.try_recv().is_none());
    }

    #[tokio::test]
    async fn should_number_each_topic_independently() {
        let bus = EventBus::new(16);
        let a = Topic::readings_of(SensorType::Temperature);
        let b = Topic::readings_from(&sensor_id());
        assert_eq!(bus.publish(a.clone(), reading(1.0)).unwrap(), 1);
        assert_eq!(bus.publish(b.clone(), reading(1.0)).unwrap(), 1);
        assert_eq!(bus.publish(a, reading(2.0)).unwrap(), 2);
        assert_eq!(bus.publish(b, reading(2.0)).unwrap(), 2);
    }

    #[tokio::test]
    async fn should_deliver_in_publish_order_with_increasing_sequence() {
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe("reading.living_room").unwrap();
        for i in 0..20 {
            bus.publish(Topic::readings_from(&sensor_id()), reading(f64::from(i)))
                .unwrap();
        }
        let mut last = 0;
        for _ in 0..20 {
            let event = sub.recv().await.unwrap();
            assert!(event.sequence > last);
            last = event.sequence;
        }
        assert_eq!(last, 20);
    }

    #[tokio::test]
    async fn should_deliver_once_when_several_patterns_match() {
        let bus = EventBus::new(16);
        let patterns = vec![
            "reading.*".parse().unwrap(),
            TopicPattern::All,
            "reading.living_room".parse().unwrap(),
        ];
        let mut sub = bus.subscribe_to("storage", patterns).unwrap();
        bus.publish(Topic::readings_from(&sensor_id()), reading(1.0))
            .unwrap();
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn should_not_deliver_events_published_before_subscription() {
        let bus = EventBus::new(16);
        bus.publish(Topic::readings_from(&sensor_id()), reading(1.0))
            .unwrap();
        let mut sub = bus.subscribe("*").unwrap();
        bus.publish(Topic::readings_from(&sensor_id()), reading(2.0))
            .unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.sequence, 2);
    }

    #[tokio::test]
    async fn should_drop_oldest_event_and_publish_overflow_when_queue_full() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe("reading.*").unwrap();
        let mut diagnostics = bus.subscribe("bus.overflow").unwrap();

        for i in 1..=3 {
            bus.publish(Topic::readings_from(&sensor_id()), reading(f64::from(i)))
                .unwrap();
        }

        assert_eq!(slow.dropped(), 1);
        assert!((value_of(&slow.recv().await.unwrap()) - 2.0).abs() < f64::EPSILON);
        assert!((value_of(&slow.recv().await.unwrap()) - 3.0).abs() < f64::EPSILON);

        let notice = diagnostics.recv().await.unwrap();
        match &notice.payload {
            EventPayload::Overflow(n) => {
                assert_eq!(&n.subscription_id, slow.id());
                assert_eq!(n.dropped_sequence, 1);
                assert_eq!(n.total_dropped, 1);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn should_not_block_publisher_when_subscriber_never_reads() {
        let bus = EventBus::new(1);
        let _idle = bus.subscribe("*").unwrap();
        for i in 0..1_000 {
            bus.publish(Topic::readings_from(&sensor_id()), reading(f64::from(i)))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn should_unsubscribe_when_subscription_dropped() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe("*").unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn should_drain_queue_then_end_after_close() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("*").unwrap();
        bus.publish(Topic::readings_from(&sensor_id()), reading(1.0))
            .unwrap();
        bus.close();

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        assert!(matches!(
            bus.publish(Topic::readings_from(&sensor_id()), reading(2.0)),
            Err(SensorNetError::BusClosed)
        ));
        assert!(matches!(bus.subscribe("*"), Err(SensorNetError::BusClosed)));
    }

    #[tokio::test]
    async fn should_wake_waiting_subscriber_on_publish() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("status.*").unwrap();
        let waiter = tokio::spawn(async move { sub.recv().await.map(|e| e.sequence) });
        tokio::task::yield_now().await;
        bus.publish(Topic::status_of(&sensor_id()), status()).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn should_deliver_each_reading_once_with_reading_patterns() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_to("engine", reading_patterns()).unwrap();
        bus.publish(Topic::readings_of(SensorType::Temperature), reading(1.0))
            .unwrap();
        bus.publish(Topic::readings_from(&sensor_id()), reading(1.0))
            .unwrap();
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn should_reject_malformed_pattern() {
        let bus = EventBus::new(16);
        assert!(matches!(
            bus.subscribe("reading*"),
            Err(SensorNetError::Validation(_))
        ));
    }
}
