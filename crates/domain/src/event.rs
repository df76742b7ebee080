//! Event — the envelope carried by the bus, its topics and subscription patterns.
//!
//! Topic names used by the runtime:
//!
//! | Topic                  | Payload              |
//! |------------------------|----------------------|
//! | `reading.<type>`       | [`EventPayload::Reading`] |
//! | `reading.<sensor_id>`  | [`EventPayload::Reading`] |
//! | `status.<sensor_id>`   | [`EventPayload::Status`]  |
//! | `alert.triggered`      | [`EventPayload::Alert`]   |
//! | `alert.resolved`       | [`EventPayload::Alert`]   |
//! | `bus.overflow`         | [`EventPayload::Overflow`] |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::alert::AlertTransition;
use crate::error::ValidationError;
use crate::id::{SensorId, SubscriptionId};
use crate::reading::Reading;
use crate::sensor::{SensorState, SensorType};
use crate::time::Timestamp;

pub const ALERT_TRIGGERED: &str = "alert.triggered";
pub const ALERT_RESOLVED: &str = "alert.resolved";
pub const BUS_OVERFLOW: &str = "bus.overflow";

/// Dotted topic name an event is published on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `reading.<type>`.
    #[must_use]
    pub fn readings_of(sensor_type: SensorType) -> Self {
        Self(format!("reading.{}", sensor_type.as_str()))
    }

    /// `reading.<sensor_id>`.
    #[must_use]
    pub fn readings_from(sensor_id: &SensorId) -> Self {
        Self(format!("reading.{sensor_id}"))
    }

    /// `status.<sensor_id>`.
    #[must_use]
    pub fn status_of(sensor_id: &SensorId) -> Self {
        Self(format!("status.{sensor_id}"))
    }

    #[must_use]
    pub fn bus_overflow() -> Self {
        Self(BUS_OVERFLOW.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a subscription listens to.
///
/// `*` matches every topic, `prefix.*` matches every topic starting with
/// `prefix.`, anything else is an exact topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    All,
    Prefix(String),
    Exact(String),
}

impl TopicPattern {
    #[must_use]
    pub fn matches(&self, topic: &Topic) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => topic.as_str().starts_with(prefix.as_str()),
            Self::Exact(name) => topic.as_str() == name,
        }
    }
}

impl FromStr for TopicPattern {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::All);
        }
        if let Some(prefix) = s.strip_suffix('*') {
            if prefix.ends_with('.') && prefix.len() > 1 && !prefix.contains('*') {
                return Ok(Self::Prefix(prefix.to_string()));
            }
            return Err(ValidationError::InvalidTopicPattern(s.to_string()));
        }
        if s.is_empty() || s.contains('*') {
            return Err(ValidationError::InvalidTopicPattern(s.to_string()));
        }
        Ok(Self::Exact(s.to_string()))
    }
}

impl From<&Topic> for TopicPattern {
    fn from(topic: &Topic) -> Self {
        Self::Exact(topic.as_str().to_string())
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Exact(name) => f.write_str(name),
        }
    }
}

/// A sensor moved between lifecycle states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub sensor_id: SensorId,
    pub from: SensorState,
    pub to: SensorState,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: Timestamp,
}

/// A subscriber's queue was full and its oldest event was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverflowNotice {
    pub subscription_id: SubscriptionId,
    pub subscriber: String,
    pub dropped_topic: Topic,
    pub dropped_sequence: u64,
    /// Events dropped for this subscriber since it subscribed.
    pub total_dropped: u64,
}

/// Content of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Reading(Reading),
    Alert(AlertTransition),
    Status(StatusChange),
    Overflow(OverflowNotice),
}

/// Envelope published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    /// Monotonic per topic, starting at 1.
    pub sequence: u64,
    pub published_at: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    #[must_use]
    pub fn as_reading(&self) -> Option<&Reading> {
        match &self.payload {
            EventPayload::Reading(reading) => Some(reading),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_alert(&self) -> Option<&AlertTransition> {
        match &self.payload {
            EventPayload::Alert(transition) => Some(transition),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_status(&self) -> Option<&StatusChange> {
        match &self.payload {
            EventPayload::Status(change) => Some(change),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Unit;

    #[test]
    fn should_build_reading_topics_for_type_and_id() {
        let id: SensorId = "living_room".parse().unwrap();
        assert_eq!(
            Topic::readings_of(SensorType::DoorWindow).as_str(),
            "reading.door_window"
        );
        assert_eq!(Topic::readings_from(&id).as_str(), "reading.living_room");
        assert_eq!(Topic::status_of(&id).as_str(), "status.living_room");
    }

    #[test]
    fn should_match_prefix_pattern() {
        let pattern: TopicPattern = "reading.*".parse().unwrap();
        assert!(pattern.matches(&Topic::new("reading.temperature")));
        assert!(!pattern.matches(&Topic::new("alert.triggered")));
        assert!(!pattern.matches(&Topic::new("readings")));
    }

    #[test]
    fn should_match_everything_with_star() {
        let pattern: TopicPattern = "*".parse().unwrap();
        assert_eq!(pattern, TopicPattern::All);
        assert!(pattern.matches(&Topic::bus_overflow()));
    }

    #[test]
    fn should_match_exact_topic_only() {
        let pattern: TopicPattern = ALERT_TRIGGERED.parse().unwrap();
        assert!(pattern.matches(&Topic::new(ALERT_TRIGGERED)));
        assert!(!pattern.matches(&Topic::new(ALERT_RESOLVED)));
    }

    #[test]
    fn should_reject_malformed_patterns() {
        for bad in ["", "read*", "*.temperature", "a.*.b", "a.**"] {
            assert!(
                bad.parse::<TopicPattern>().is_err(),
                "`{bad}` should be rejected"
            );
        }
    }

    #[test]
    fn should_display_pattern_as_parsed() {
        let pattern: TopicPattern = "status.*".parse().unwrap();
        assert_eq!(pattern.to_string(), "status.*");
    }

    #[test]
    fn should_expose_reading_payload() {
        let reading = Reading::new(
            "t1".parse().unwrap(),
            SensorType::Temperature,
            "temperature",
            21.0,
            Unit::Celsius,
            crate::time::now(),
        );
        let event = Event {
            topic: Topic::readings_of(SensorType::Temperature),
            sequence: 1,
            published_at: crate::time::now(),
            payload: EventPayload::Reading(reading.clone()),
        };
        assert_eq!(event.as_reading(), Some(&reading));
        assert!(event.as_alert().is_none());
        assert!(event.as_status().is_none());
    }
}
