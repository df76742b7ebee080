//! Sensor configuration block and partial updates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SensorType;
use crate::error::ValidationError;

/// Shortest allowed polling interval, in seconds.
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 1;
/// Longest allowed polling interval (one day), in seconds.
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 86_400;
/// Largest absolute calibration offset accepted.
pub const MAX_CALIBRATION_OFFSET: f64 = 1_000.0;

/// Mutable configuration of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Seconds between two read cycles.
    #[serde(rename = "update_interval")]
    pub update_interval_secs: u64,
    /// Added to every raw driver value before a reading is built.
    pub calibration_offset: f64,
    /// Disabled sensors stay registered but are not read.
    pub enabled: bool,
    /// Type-specific warning bounds, advertised to consumers.
    pub thresholds: Thresholds,
}

/// Optional lower/upper bounds expressed in the sensor's unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: MIN_UPDATE_INTERVAL_SECS,
            calibration_offset: 0.0,
            enabled: true,
            thresholds: Thresholds::default(),
        }
    }
}

impl SensorConfig {
    /// Polling interval as a [`Duration`].
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Check every field against the global and type-specific ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate(&self, sensor_type: SensorType) -> Result<(), ValidationError> {
        if !(MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS)
            .contains(&self.update_interval_secs)
        {
            return Err(ValidationError::IntervalOutOfRange {
                value: self.update_interval_secs,
                min: MIN_UPDATE_INTERVAL_SECS,
                max: MAX_UPDATE_INTERVAL_SECS,
            });
        }
        if !self.calibration_offset.is_finite() {
            return Err(ValidationError::NonFinite {
                field: "calibration_offset",
            });
        }
        if self.calibration_offset.abs() > MAX_CALIBRATION_OFFSET {
            return Err(ValidationError::CalibrationOutOfRange {
                value: self.calibration_offset,
                limit: MAX_CALIBRATION_OFFSET,
            });
        }
        self.thresholds.validate(sensor_type)
    }

    /// Produce the configuration that results from applying `patch`.
    ///
    /// The merged result is validated as a whole; `self` is never touched,
    /// so a rejected patch leaves no partial update behind.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the merged configuration is invalid.
    pub fn apply(
        &self,
        patch: &ConfigPatch,
        sensor_type: SensorType,
    ) -> Result<Self, ValidationError> {
        let mut next = self.clone();
        if let Some(interval) = patch.update_interval_secs {
            next.update_interval_secs = interval;
        }
        if let Some(offset) = patch.calibration_offset {
            next.calibration_offset = offset;
        }
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(thresholds) = patch.thresholds {
            next.thresholds = thresholds;
        }
        next.validate(sensor_type)?;
        Ok(next)
    }
}

impl Thresholds {
    fn validate(&self, sensor_type: SensorType) -> Result<(), ValidationError> {
        for value in [self.min, self.max].into_iter().flatten() {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite {
                    field: "thresholds",
                });
            }
            if let Some((min, max)) = sensor_type.valid_range() {
                if value < min || value > max {
                    return Err(ValidationError::ThresholdOutOfRange {
                        sensor_type: sensor_type.as_str(),
                        value,
                        min,
                        max,
                    });
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ValidationError::InvertedThresholds { min, max });
            }
        }
        Ok(())
    }
}

/// Partial update for a [`SensorConfig`]; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, rename = "update_interval")]
    pub update_interval_secs: Option<u64>,
    #[serde(default)]
    pub calibration_offset: Option<f64>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
}

impl ConfigPatch {
    /// Whether applying this patch could change the polling schedule.
    #[must_use]
    pub fn touches_schedule(&self) -> bool {
        self.update_interval_secs.is_some() || self.enabled.is_some()
    }
}
