//! Event publisher port — the write side of the event bus.

use sensornet_domain::error::SensorNetError;
use sensornet_domain::event::{EventPayload, Topic};

/// Publishes events without waiting for subscribers.
pub trait EventPublisher: Send + Sync {
    /// Publish `payload` on `topic`, returning the event's sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::BusClosed`] once the bus has been closed.
    fn publish(&self, topic: Topic, payload: EventPayload) -> Result<u64, SensorNetError>;
}

impl<T: EventPublisher> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, topic: Topic, payload: EventPayload) -> Result<u64, SensorNetError> {
        (**self).publish(topic, payload)
    }
}
