//! Reading — one immutable timestamped measurement from a sensor.

use serde::{Deserialize, Serialize};

use crate::id::SensorId;
use crate::sensor::SensorType;
use crate::time::Timestamp;

/// Measurement unit attached to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Percent,
    Hectopascal,
    InchesOfMercury,
    Lux,
    /// 0 or 1.
    Boolean,
    /// Air-quality index.
    Aqi,
    GramsPerCubicMetre,
    /// Dimensionless.
    None,
}

const HPA_PER_INHG: f64 = 33.863_886_666_67;

impl Unit {
    /// Short human-readable symbol.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "\u{b0}C",
            Self::Fahrenheit => "\u{b0}F",
            Self::Percent => "%",
            Self::Hectopascal => "hPa",
            Self::InchesOfMercury => "inHg",
            Self::Lux => "lux",
            Self::Boolean => "bool",
            Self::Aqi => "AQI",
            Self::GramsPerCubicMetre => "g/m\u{b3}",
            Self::None => "",
        }
    }

    /// Convert `value` expressed in `self` into `target`.
    ///
    /// Returns `None` when the two units measure different quantities.
    #[must_use]
    pub fn convert(self, value: f64, target: Self) -> Option<f64> {
        match (self, target) {
            (a, b) if a == b => Some(value),
            (Self::Celsius, Self::Fahrenheit) => Some(value * 9.0 / 5.0 + 32.0),
            (Self::Fahrenheit, Self::Celsius) => Some((value - 32.0) * 5.0 / 9.0),
            (Self::Hectopascal, Self::InchesOfMercury) => Some(value / HPA_PER_INHG),
            (Self::InchesOfMercury, Self::Hectopascal) => Some(value * HPA_PER_INHG),
            _ => None,
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Immutable value object produced by a poll cycle or a virtual sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: SensorId,
    pub sensor_type: SensorType,
    /// Field name the value belongs to, e.g. `"temperature"`, `"dew_point"`.
    pub measurement: String,
    pub value: f64,
    pub unit: Unit,
    pub timestamp: Timestamp,
}

impl Reading {
    /// Build a reading.
    #[must_use]
    pub fn new(
        sensor_id: SensorId,
        sensor_type: SensorType,
        measurement: impl Into<String>,
        value: f64,
        unit: Unit,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            sensor_id,
            sensor_type,
            measurement: measurement.into(),
            value,
            unit,
            timestamp,
        }
    }

    /// A copy of this reading expressed in another unit, if convertible.
    #[must_use]
    pub fn converted(&self, unit: Unit) -> Option<Self> {
        let value = self.unit.convert(self.value, unit)?;
        Some(Self {
            value,
            unit,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps
    }

    fn temperature(value: f64) -> Reading {
        Reading::new(
            "temp_1".parse().unwrap(),
            SensorType::Temperature,
            "temperature",
            value,
            Unit::Celsius,
            crate::time::now(),
        )
    }

    #[test]
    fn should_convert_celsius_to_fahrenheit() {
        assert!(approx(
            Unit::Celsius.convert(25.0, Unit::Fahrenheit).unwrap(),
            77.0,
            1e-9
        ));
        assert!(approx(
            Unit::Fahrenheit.convert(77.0, Unit::Celsius).unwrap(),
            25.0,
            1e-9
        ));
    }

    #[test]
    fn should_convert_pressure_units() {
        let inhg = Unit::Hectopascal
            .convert(1013.25, Unit::InchesOfMercury)
            .unwrap();
        assert!(approx(inhg, 29.921, 0.001));
        let hpa = Unit::InchesOfMercury
            .convert(29.92, Unit::Hectopascal)
            .unwrap();
        assert!(approx(hpa, 1013.21, 0.1));
    }

    #[test]
    fn should_refuse_conversion_between_quantities() {
        assert!(Unit::Lux.convert(10.0, Unit::Celsius).is_none());
    }

    #[test]
    fn should_keep_metadata_when_converting_reading() {
        let reading = temperature(20.0);
        let converted = reading.converted(Unit::Fahrenheit).unwrap();
        assert_eq!(converted.sensor_id, reading.sensor_id);
        assert_eq!(converted.timestamp, reading.timestamp);
        assert!(approx(converted.value, 68.0, 1e-9));
    }

    #[test]
    fn should_serialize_unit_as_snake_case() {
        let json = serde_json::to_string(&Unit::InchesOfMercury).unwrap();
        assert_eq!(json, "\"inches_of_mercury\"");
    }
}
