//! Alert action executor that records deliveries in the log.
//!
//! Notification transports (HTTP, mail, SMS gateways) live outside this
//! daemon; each delivery is logged with the payload it would carry.

use std::future::Future;

use sensornet_app::ports::ActionExecutor;
use sensornet_domain::alert::{Action, AlertTransition, Severity};
use sensornet_domain::error::ActionExecutionError;

/// Logs every alert action instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingActionExecutor;

impl ActionExecutor for LoggingActionExecutor {
    fn execute(
        &self,
        action: &Action,
        transition: &AlertTransition,
    ) -> impl Future<Output = Result<(), ActionExecutionError>> + Send {
        match action {
            Action::Log { message } => {
                let message = message.as_deref().unwrap_or("alert triggered");
                if transition.severity == Severity::Info {
                    tracing::info!(
                        rule_id = %transition.rule_id,
                        sensor = %transition.sensor_name,
                        value = transition.reading.value,
                        "{message}"
                    );
                } else {
                    tracing::warn!(
                        rule_id = %transition.rule_id,
                        sensor = %transition.sensor_name,
                        value = transition.reading.value,
                        severity = %transition.severity,
                        "{message}"
                    );
                }
            }
            Action::Webhook { url } => tracing::info!(
                rule_id = %transition.rule_id,
                url = %url,
                payload = %transition.webhook_payload(),
                "webhook delivery"
            ),
            Action::Email { to } | Action::Sms { to } => tracing::info!(
                rule_id = %transition.rule_id,
                channel = action.kind(),
                to = %to,
                sensor = %transition.sensor_name,
                value = transition.reading.value,
                threshold = %transition.threshold,
                "notification delivery"
            ),
            Action::Delay { .. } => {}
        }
        std::future::ready(Ok(()))
    }
}
