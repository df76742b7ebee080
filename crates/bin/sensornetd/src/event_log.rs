//! Bus subscriber that traces status changes, alerts and overflow notices.

use std::future::Future;

use sensornet_app::ports::EventHandler;
use sensornet_domain::error::SensorNetError;
use sensornet_domain::event::{Event, EventPayload, TopicPattern};

/// Patterns the event log subscribes to.
#[must_use]
pub fn patterns() -> Vec<TopicPattern> {
    ["status.*", "alert.*", "bus.overflow"]
        .into_iter()
        .filter_map(|p| p.parse().ok())
        .collect()
}

/// Writes a trace line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventLog;

impl EventHandler for EventLog {
    fn handle(&self, event: &Event) -> impl Future<Output = Result<(), SensorNetError>> + Send {
        match &event.payload {
            EventPayload::Status(change) => tracing::info!(
                sensor_id = %change.sensor_id,
                from = %change.from,
                to = %change.to,
                reason = change.reason.as_deref().unwrap_or(""),
                "sensor status"
            ),
            EventPayload::Alert(transition) => tracing::info!(
                event = transition.event_name(),
                rule_id = %transition.rule_id,
                sensor_id = %transition.sensor_id,
                value = transition.reading.value,
                "alert"
            ),
            EventPayload::Overflow(notice) => tracing::warn!(
                subscriber = %notice.subscriber,
                dropped_topic = %notice.dropped_topic,
                total_dropped = notice.total_dropped,
                "subscriber lagging"
            ),
            EventPayload::Reading(reading) => tracing::trace!(
                sensor_id = %reading.sensor_id,
                value = reading.value,
                "reading"
            ),
        }
        std::future::ready(Ok(()))
    }
}
