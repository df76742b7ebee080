//! Alert instance — the live hysteresis state machine of one rule.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AlertRule;
use crate::id::RuleId;
use crate::reading::Reading;
use crate::time::{Timestamp, has_elapsed};

/// Where an alert instance stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Inactive,
    Active,
    Resolved,
}

impl AlertState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition applied by [`AlertInstance::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: AlertState,
    pub to: AlertState,
    pub at: Timestamp,
}

/// Runtime state of one [`AlertRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub rule_id: RuleId,
    pub state: AlertState,
    /// When the instance last became active.
    pub triggered_at: Option<Timestamp>,
    pub last_transition_at: Option<Timestamp>,
    pub last_reading: Option<Reading>,
}

impl AlertInstance {
    #[must_use]
    pub fn new(rule_id: RuleId) -> Self {
        Self {
            rule_id,
            state: AlertState::Inactive,
            triggered_at: None,
            last_transition_at: None,
            last_reading: None,
        }
    }

    /// Feed one reading through the state machine.
    ///
    /// Readings that do not belong to the rule, or that are not newer than
    /// the last evaluated one, leave the instance untouched. Transition
    /// timestamps are taken from the reading.
    pub fn evaluate(&mut self, rule: &AlertRule, reading: &Reading) -> Option<StateChange> {
        if !rule.applies_to(reading) {
            return None;
        }
        if self
            .last_reading
            .as_ref()
            .is_some_and(|last| reading.timestamp <= last.timestamp)
        {
            return None;
        }
        self.last_reading = Some(reading.clone());

        let value = reading.value;
        let next = match self.state {
            AlertState::Inactive => rule.condition.holds(value).then_some(AlertState::Active),
            AlertState::Resolved => (rule.condition.holds(value)
                && self.cooled_down(rule.cooldown(), reading.timestamp))
            .then_some(AlertState::Active),
            AlertState::Active => {
                let resolved = match &rule.reset_condition {
                    Some(reset) => reset.holds(value),
                    None => !rule.condition.holds(value),
                };
                resolved.then_some(AlertState::Resolved)
            }
        }?;

        let change = StateChange {
            from: self.state,
            to: next,
            at: reading.timestamp,
        };
        self.state = next;
        self.last_transition_at = Some(reading.timestamp);
        if next == AlertState::Active {
            self.triggered_at = Some(reading.timestamp);
        }
        Some(change)
    }

    fn cooled_down(&self, cooldown: Duration, at: Timestamp) -> bool {
        self.triggered_at
            .is_none_or(|since| has_elapsed(since, at, cooldown))
    }

    /// Whether the instance should still be reported as current at `now`.
    ///
    /// Active instances always are; resolved ones only within `display_window`.
    #[must_use]
    pub fn is_current(&self, now: Timestamp, display_window: Duration) -> bool {
        match self.state {
            AlertState::Active => true,
            AlertState::Resolved => self
                .last_transition_at
                .is_some_and(|at| !has_elapsed(at, now, display_window)),
            AlertState::Inactive => false,
        }
    }
}
