//! Alert transition — what is published when an instance changes state.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AlertInstance, AlertRule, AlertState, Comparison, Severity, StateChange};
use crate::event::{ALERT_RESOLVED, ALERT_TRIGGERED, Topic};
use crate::id::{RuleId, SensorId};
use crate::reading::Reading;
use crate::time::Timestamp;

/// Payload of `alert.triggered` and `alert.resolved` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTransition {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub field: String,
    pub severity: Severity,
    pub from: AlertState,
    pub to: AlertState,
    /// The reading that caused the transition.
    pub reading: Reading,
    pub threshold: Comparison,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_condition: Option<Comparison>,
    pub triggered_at: Option<Timestamp>,
    pub timestamp: Timestamp,
}

impl AlertTransition {
    #[must_use]
    pub fn new(
        rule: &AlertRule,
        instance: &AlertInstance,
        change: StateChange,
        reading: &Reading,
        sensor_name: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.display_name().to_string(),
            sensor_id: rule.sensor_id.clone(),
            sensor_name: sensor_name.into(),
            field: rule.field.clone(),
            severity: rule.severity,
            from: change.from,
            to: change.to,
            reading: reading.clone(),
            threshold: rule.condition,
            reset_condition: rule.reset_condition,
            triggered_at: instance.triggered_at,
            timestamp: change.at,
        }
    }

    /// `alert.triggered` or `alert.resolved`.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        if self.to == AlertState::Active {
            ALERT_TRIGGERED
        } else {
            ALERT_RESOLVED
        }
    }

    #[must_use]
    pub fn topic(&self) -> Topic {
        Topic::new(self.event_name())
    }

    /// Notification body in the shape integrations expect.
    #[must_use]
    pub fn webhook_payload(&self) -> serde_json::Value {
        let threshold = match self.threshold.upper {
            Some(upper) => json!([self.threshold.value, upper]),
            None => json!(self.threshold.value),
        };
        json!({
            "event": self.event_name(),
            "timestamp": self.timestamp.to_rfc3339(),
            "data": {
                "rule_id": self.rule_id,
                "rule_name": self.rule_name,
                "severity": self.severity,
                "sensor_id": self.sensor_id,
                "sensor_name": self.sensor_name,
                "reading": {
                    "type": self.reading.measurement,
                    "value": self.reading.value,
                    "unit": self.reading.unit.symbol(),
                    "timestamp": self.reading.timestamp.to_rfc3339(),
                },
                "threshold": {
                    "type": self.threshold.operator,
                    "value": threshold,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Operator;
    use crate::reading::Unit;
    use crate::sensor::SensorType;

    fn triggered() -> AlertTransition {
        let rule = AlertRule::builder()
            .name("Greenhouse too hot")
            .sensor_id("greenhouse".parse().unwrap())
            .field("temperature")
            .condition(Operator::Gt, 25.0)
            .severity(Severity::Critical)
            .build()
            .unwrap();
        let reading = Reading::new(
            rule.sensor_id.clone(),
            SensorType::Temperature,
            "temperature",
            26.5,
            Unit::Celsius,
            crate::time::now(),
        );
        let mut instance = AlertInstance::new(rule.id.clone());
        let change = instance.evaluate(&rule, &reading).unwrap();
        AlertTransition::new(&rule, &instance, change, &reading, "Greenhouse")
    }

    #[test]
    fn should_name_event_after_target_state() {
        let mut transition = triggered();
        assert_eq!(transition.event_name(), "alert.triggered");
        transition.to = AlertState::Resolved;
        assert_eq!(transition.topic().as_str(), "alert.resolved");
    }

    #[test]
    fn should_render_webhook_payload_shape() {
        let transition = triggered();
        let payload = transition.webhook_payload();
        assert_eq!(payload["event"], "alert.triggered");
        assert_eq!(payload["data"]["sensor_id"], "greenhouse");
        assert_eq!(payload["data"]["sensor_name"], "Greenhouse");
        assert_eq!(payload["data"]["severity"], "critical");
        assert_eq!(payload["data"]["reading"]["type"], "temperature");
        assert_eq!(payload["data"]["reading"]["value"], 26.5);
        assert_eq!(payload["data"]["reading"]["unit"], "\u{b0}C");
        assert_eq!(payload["data"]["threshold"]["type"], "gt");
        assert_eq!(payload["data"]["threshold"]["value"], 25.0);
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn should_carry_trigger_time_and_rule_name() {
        let transition = triggered();
        assert_eq!(transition.rule_name, "Greenhouse too hot");
        assert_eq!(transition.triggered_at, Some(transition.timestamp));
        assert_eq!(transition.from, AlertState::Inactive);
    }

    #[test]
    fn should_render_range_threshold_as_bounds() {
        let rule = AlertRule::builder()
            .sensor_id("cellar".parse().unwrap())
            .field("humidity")
            .comparison(crate::alert::Comparison::between(40.0, 60.0))
            .build()
            .unwrap();
        let reading = Reading::new(
            rule.sensor_id.clone(),
            SensorType::Humidity,
            "humidity",
            50.0,
            Unit::Percent,
            crate::time::now(),
        );
        let mut instance = AlertInstance::new(rule.id.clone());
        let change = instance.evaluate(&rule, &reading).unwrap();
        let payload = AlertTransition::new(&rule, &instance, change, &reading, "Cellar").webhook_payload();
        assert_eq!(payload["data"]["threshold"]["type"], "between");
        assert_eq!(payload["data"]["threshold"]["value"], serde_json::json!([40.0, 60.0]));
    }
}
