//! Sensor — a named source of a typed measurement, physical or virtual.
//!
//! A [`SensorDefinition`] is what configuration supplies (the id is optional).
//! Once registered, the registry owns a [`Sensor`] record and hands out
//! snapshots of it.

mod config;
mod kind;
mod state;

pub use config::{
    ConfigPatch, MAX_CALIBRATION_OFFSET, MAX_UPDATE_INTERVAL_SECS, MIN_UPDATE_INTERVAL_SECS,
    SensorConfig, Thresholds,
};
pub use kind::SensorType;
pub use state::SensorState;

use serde::{Deserialize, Serialize};

use crate::derivation::Derivation;
use crate::error::{SensorNetError, ValidationError};
use crate::id::SensorId;
use crate::reading::Reading;
use crate::time::Timestamp;

/// Sensor as described by configuration, before registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDefinition {
    /// Assigned at registration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SensorId>,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(flatten)]
    pub config: SensorConfig,
    /// Required for (and only allowed on) virtual sensors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<Derivation>,
}

impl SensorDefinition {
    /// Create a builder for constructing a [`SensorDefinition`].
    #[must_use]
    pub fn builder() -> SensorDefinitionBuilder {
        SensorDefinitionBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - the configuration is out of range
    /// - a virtual sensor lacks a derivation, or a physical one carries one
    /// - the derivation is malformed or references the sensor itself
    pub fn validate(&self) -> Result<(), SensorNetError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        self.config.validate(self.sensor_type)?;
        match (&self.derivation, self.sensor_type) {
            (None, SensorType::Virtual) => return Err(ValidationError::MissingDerivation.into()),
            (Some(_), kind) if kind != SensorType::Virtual => {
                return Err(ValidationError::UnexpectedDerivation.into());
            }
            _ => {}
        }
        if let Some(derivation) = &self.derivation {
            derivation.validate()?;
            if let Some(id) = &self.id {
                if derivation.sources().contains(id) {
                    return Err(ValidationError::DerivationCycle { via: id.to_string() }.into());
                }
            }
        }
        Ok(())
    }
}

/// Step-by-step builder for [`SensorDefinition`].
#[derive(Debug, Default)]
pub struct SensorDefinitionBuilder {
    id: Option<SensorId>,
    sensor_type: Option<SensorType>,
    name: Option<String>,
    location: Option<String>,
    config: SensorConfig,
    derivation: Option<Derivation>,
}

impl SensorDefinitionBuilder {
    #[must_use]
    pub fn id(mut self, id: SensorId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn sensor_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = Some(sensor_type);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn update_interval_secs(mut self, secs: u64) -> Self {
        self.config.update_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn calibration_offset(mut self, offset: f64) -> Self {
        self.config.calibration_offset = offset;
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    #[must_use]
    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    /// Attach a derivation; also marks the sensor as [`SensorType::Virtual`].
    #[must_use]
    pub fn derivation(mut self, derivation: Derivation) -> Self {
        self.derivation = Some(derivation);
        self.sensor_type = Some(SensorType::Virtual);
        self
    }

    /// Consume the builder, validate, and return a [`SensorDefinition`].
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::Validation`] if required fields are missing or invalid.
    pub fn build(self) -> Result<SensorDefinition, SensorNetError> {
        let definition = SensorDefinition {
            id: self.id,
            sensor_type: self.sensor_type.unwrap_or(SensorType::Temperature),
            name: self.name.unwrap_or_default(),
            location: self.location,
            config: self.config,
            derivation: self.derivation,
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// A registered sensor, as seen through a registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub sensor_type: SensorType,
    pub name: String,
    pub location: Option<String>,
    pub config: SensorConfig,
    pub derivation: Option<Derivation>,
    pub state: SensorState,
    pub last_reading: Option<Reading>,
    /// Time of the last successful read (or recomputation for virtual sensors).
    pub last_read_at: Option<Timestamp>,
    pub consecutive_failures: u32,
    pub registered_at: Timestamp,
}

impl Sensor {
    /// Materialise a registered sensor from its definition.
    #[must_use]
    pub fn from_definition(id: SensorId, definition: SensorDefinition, at: Timestamp) -> Self {
        Self {
            id,
            sensor_type: definition.sensor_type,
            name: definition.name,
            location: definition.location,
            config: definition.config,
            derivation: definition.derivation,
            state: SensorState::Created,
            last_reading: None,
            last_read_at: None,
            consecutive_failures: 0,
            registered_at: at,
        }
    }

    /// Whether readings are computed rather than polled.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.derivation.is_some()
    }
}

/// Criteria for listing sensors; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFilter {
    #[serde(default)]
    pub sensor_type: Option<SensorType>,
    #[serde(default)]
    pub state: Option<SensorState>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl SensorFilter {
    /// Filter matching every sensor.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = Some(sensor_type);
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: SensorState) -> Self {
        self.state = Some(state);
        self
    }

    /// Whether `sensor` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, sensor: &Sensor) -> bool {
        self.sensor_type.is_none_or(|t| t == sensor.sensor_type)
            && self.state.is_none_or(|s| s == sensor.state)
            && self
                .location
                .as_deref()
                .is_none_or(|loc| sensor.location.as_deref() == Some(loc))
            && self.enabled.is_none_or(|e| e == sensor.config.enabled)
    }
}
