//! Alerting — comparison → hysteresis → actions.
//!
//! An [`AlertRule`] is immutable configuration: a trigger [`Comparison`] on
//! one sensor field, an optional reset comparison, a [`Severity`] and an
//! ordered list of [`Action`]s. The live hysteresis state for a rule lives
//! in its [`AlertInstance`]; replacing a rule starts a fresh instance.

mod action;
mod comparison;
mod instance;
mod transition;

pub use action::Action;
pub use comparison::{Comparison, Operator};
pub use instance::{AlertInstance, AlertState, StateChange};
pub use transition::AlertTransition;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SensorNetError, ValidationError};
use crate::id::{RuleId, SensorId};
use crate::reading::Reading;

/// Field name that matches whatever measurement the sensor reports.
pub const ANY_FIELD: &str = "value";

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn generated_rule_id() -> RuleId {
    RuleId::generate("rule")
}

fn enabled_by_default() -> bool {
    true
}

/// A condition over one sensor field and the actions to take when it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default = "generated_rule_id")]
    pub id: RuleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub sensor_id: SensorId,
    /// Measurement name, or [`ANY_FIELD`].
    pub field: String,
    #[serde(flatten)]
    pub condition: Comparison,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_condition: Option<Comparison>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Minimum time between two triggers of this rule.
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl AlertRule {
    /// Create a builder for constructing an [`AlertRule`].
    #[must_use]
    pub fn builder() -> AlertRuleBuilder {
        AlertRuleBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::Validation`] when:
    /// - `field` is empty ([`ValidationError::EmptyField`])
    /// - a threshold or tolerance is not a usable number
    /// - the reset condition can hold while the trigger holds
    ///   ([`ValidationError::OverlappingReset`])
    pub fn validate(&self) -> Result<(), SensorNetError> {
        if self.field.trim().is_empty() {
            return Err(ValidationError::EmptyField.into());
        }
        self.condition.validate()?;
        if let Some(reset) = &self.reset_condition {
            reset.validate()?;
            if self.condition.overlaps(reset) {
                return Err(ValidationError::OverlappingReset.into());
            }
        }
        Ok(())
    }

    /// Whether `reading` is an input of this rule.
    #[must_use]
    pub fn applies_to(&self, reading: &Reading) -> bool {
        reading.sensor_id == self.sensor_id
            && (self.field == ANY_FIELD || self.field == reading.measurement)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Name used in logs and notifications.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Step-by-step builder for [`AlertRule`].
#[derive(Debug, Default)]
pub struct AlertRuleBuilder {
    id: Option<RuleId>,
    name: Option<String>,
    sensor_id: Option<SensorId>,
    field: Option<String>,
    condition: Option<Comparison>,
    reset_condition: Option<Comparison>,
    severity: Severity,
    actions: Vec<Action>,
    cooldown_secs: u64,
    enabled: Option<bool>,
}

impl AlertRuleBuilder {
    #[must_use]
    pub fn id(mut self, id: RuleId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn sensor_id(mut self, sensor_id: SensorId) -> Self {
        self.sensor_id = Some(sensor_id);
        self
    }

    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    #[must_use]
    pub fn condition(mut self, operator: Operator, value: f64) -> Self {
        self.condition = Some(Comparison::new(operator, value));
        self
    }

    #[must_use]
    pub fn comparison(mut self, comparison: Comparison) -> Self {
        self.condition = Some(comparison);
        self
    }

    #[must_use]
    pub fn reset(mut self, operator: Operator, value: f64) -> Self {
        self.reset_condition = Some(Comparison::new(operator, value));
        self
    }

    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Consume the builder, validate, and return an [`AlertRule`].
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::Validation`] if the sensor id or trigger
    /// condition is missing, or the rule is invalid.
    pub fn build(self) -> Result<AlertRule, SensorNetError> {
        let rule = AlertRule {
            id: self.id.unwrap_or_else(generated_rule_id),
            name: self.name,
            sensor_id: self.sensor_id.ok_or(ValidationError::EmptyId)?,
            field: self.field.unwrap_or_else(|| ANY_FIELD.to_string()),
            condition: self.condition.ok_or(ValidationError::MissingCondition)?,
            reset_condition: self.reset_condition,
            severity: self.severity,
            actions: self.actions,
            cooldown_secs: self.cooldown_secs,
            enabled: self.enabled.unwrap_or(true),
        };
        rule.validate()?;
        Ok(rule)
    }
}
