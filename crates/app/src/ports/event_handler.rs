//! Event handler port — push-style bus consumers.

use std::future::Future;

use sensornet_domain::error::SensorNetError;
use sensornet_domain::event::Event;

/// Consumes events delivered by a dispatch task.
///
/// Delivery is at-least-once: a failed event may be handed over again, so
/// implementations must tolerate duplicates.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: &Event) -> impl Future<Output = Result<(), SensorNetError>> + Send;
}

impl<T: EventHandler> EventHandler for std::sync::Arc<T> {
    fn handle(&self, event: &Event) -> impl Future<Output = Result<(), SensorNetError>> + Send {
        (**self).handle(event)
    }
}
