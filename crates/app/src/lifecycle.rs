//! Registry mutations that are also announced on the bus.
//!
//! Shared by the poller and the virtual sensor resolver so physical and
//! virtual sensors publish readings and status changes the same way.

use sensornet_domain::error::SensorNetError;
use sensornet_domain::event::{EventPayload, Topic};
use sensornet_domain::id::SensorId;
use sensornet_domain::reading::Reading;
use sensornet_domain::sensor::SensorState;

use crate::ports::EventPublisher;
use crate::registry::SensorRegistry;

/// Apply a lifecycle transition and publish it on `status.<id>`.
///
/// Returns `false` when the sensor is no longer registered. Transitions the
/// lifecycle does not allow are logged and skipped.
pub(crate) fn enter_state(
    registry: &SensorRegistry,
    publisher: &impl EventPublisher,
    id: &SensorId,
    to: SensorState,
    reason: Option<String>,
) -> bool {
    match registry.transition(id, to, reason) {
        Ok(Some(change)) => {
            tracing::info!(
                sensor_id = %id,
                from = %change.from,
                to = %change.to,
                "sensor state changed"
            );
            if let Err(err) = publisher.publish(Topic::status_of(id), EventPayload::Status(change)) {
                tracing::debug!(sensor_id = %id, error = %err, "status change not published");
            }
            true
        }
        Ok(None) => true,
        Err(SensorNetError::NotFound(_)) => false,
        Err(err) => {
            tracing::debug!(sensor_id = %id, error = %err, "transition skipped");
            true
        }
    }
}

/// Record `reading` in the registry and publish it on `reading.<type>` and
/// `reading.<sensor_id>`, atomically with respect to unregistration.
///
/// # Errors
///
/// Returns [`SensorNetError::NotFound`] if the sensor has been unregistered;
/// nothing is published in that case.
pub(crate) fn publish_reading(
    registry: &SensorRegistry,
    publisher: &impl EventPublisher,
    reading: Reading,
) -> Result<(), SensorNetError> {
    registry.record_reading(reading, |reading| {
        for topic in [
            Topic::readings_of(reading.sensor_type),
            Topic::readings_from(&reading.sensor_id),
        ] {
            if let Err(err) = publisher.publish(topic, EventPayload::Reading(reading.clone())) {
                tracing::debug!(sensor_id = %reading.sensor_id, error = %err, "reading not published");
            }
        }
    })
}
