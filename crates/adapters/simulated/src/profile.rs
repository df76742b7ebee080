//! Value profiles — the range and jitter a simulated sensor walks within.

use serde::{Deserialize, Serialize};

use sensornet_domain::sensor::SensorType;

use crate::SimulationError;

/// Bounds and step size of a simulated signal.
///
/// For binary sensor types `noise` is the probability that the flag flips
/// on a read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub min: f64,
    pub max: f64,
    pub noise: f64,
}

impl Profile {
    #[must_use]
    pub const fn new(min: f64, max: f64, noise: f64) -> Self {
        Self { min, max, noise }
    }

    /// Plausible indoor defaults per sensor type.
    #[must_use]
    pub fn for_type(sensor_type: SensorType) -> Self {
        match sensor_type {
            SensorType::Temperature => Self::new(15.0, 30.0, 0.2),
            SensorType::Humidity => Self::new(30.0, 70.0, 0.5),
            SensorType::Pressure => Self::new(980.0, 1040.0, 0.5),
            SensorType::Light => Self::new(0.0, 1000.0, 20.0),
            SensorType::AirQuality => Self::new(0.0, 150.0, 2.0),
            SensorType::SoilMoisture => Self::new(20.0, 80.0, 0.5),
            SensorType::Motion => Self::new(0.0, 1.0, 0.1),
            SensorType::DoorWindow => Self::new(0.0, 1.0, 0.05),
            SensorType::WaterLeak => Self::new(0.0, 1.0, 0.01),
            SensorType::Virtual => Self::new(0.0, 100.0, 1.0),
        }
    }

    #[must_use]
    pub fn midpoint(&self) -> f64 {
        f64::midpoint(self.min, self.max)
    }

    /// # Errors
    ///
    /// Returns [`SimulationError`] for non-finite or inverted bounds, or a
    /// negative noise.
    pub fn validate(&self, binary: bool) -> Result<(), SimulationError> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min >= self.max {
            return Err(SimulationError::InvalidRange {
                min: self.min,
                max: self.max,
            });
        }
        if !self.noise.is_finite() || self.noise < 0.0 || (binary && self.noise > 1.0) {
            return Err(SimulationError::InvalidNoise(self.noise));
        }
        Ok(())
    }
}
