//! Sensor type tag — the closed set of measurement kinds.

use serde::{Deserialize, Serialize};

use crate::reading::Unit;

/// Kind of measurement a sensor provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    Pressure,
    Light,
    Motion,
    DoorWindow,
    AirQuality,
    WaterLeak,
    SoilMoisture,
    /// Derived from other sensors' readings rather than hardware.
    Virtual,
}

impl SensorType {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::Light,
        Self::Motion,
        Self::DoorWindow,
        Self::AirQuality,
        Self::WaterLeak,
        Self::SoilMoisture,
        Self::Virtual,
    ];

    /// Stable snake-case tag, used in topic names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Light => "light",
            Self::Motion => "motion",
            Self::DoorWindow => "door_window",
            Self::AirQuality => "air_quality",
            Self::WaterLeak => "water_leak",
            Self::SoilMoisture => "soil_moisture",
            Self::Virtual => "virtual",
        }
    }

    /// Name of the field a physical sensor of this type reports.
    #[must_use]
    pub fn measurement(self) -> &'static str {
        match self {
            Self::Light => "light_level",
            Self::DoorWindow => "open",
            Self::AirQuality => "aqi",
            Self::WaterLeak => "leak",
            Self::SoilMoisture => "moisture",
            Self::Virtual => "value",
            other => other.as_str(),
        }
    }

    /// Unit a physical sensor of this type reports in.
    #[must_use]
    pub fn default_unit(self) -> Unit {
        match self {
            Self::Temperature => Unit::Celsius,
            Self::Humidity | Self::SoilMoisture => Unit::Percent,
            Self::Pressure => Unit::Hectopascal,
            Self::Light => Unit::Lux,
            Self::Motion | Self::DoorWindow | Self::WaterLeak => Unit::Boolean,
            Self::AirQuality => Unit::Aqi,
            Self::Virtual => Unit::None,
        }
    }

    /// Physically meaningful value range, used to bound configured thresholds.
    ///
    /// Virtual sensors have no intrinsic range.
    #[must_use]
    pub fn valid_range(self) -> Option<(f64, f64)> {
        match self {
            Self::Temperature => Some((-273.15, 1_000.0)),
            Self::Humidity | Self::SoilMoisture => Some((0.0, 100.0)),
            Self::Pressure => Some((0.0, 2_000.0)),
            Self::Light => Some((0.0, 200_000.0)),
            Self::Motion | Self::DoorWindow | Self::WaterLeak => Some((0.0, 1.0)),
            Self::AirQuality => Some((0.0, 500.0)),
            Self::Virtual => None,
        }
    }

    /// Whether readings are 0/1 flags rather than continuous values.
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Motion | Self::DoorWindow | Self::WaterLeak)
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_serialize_as_snake_case_tag() {
        let json = serde_json::to_string(&SensorType::DoorWindow).unwrap();
        assert_eq!(json, "\"door_window\"");
        for kind in SensorType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn should_report_temperature_in_celsius() {
        assert_eq!(SensorType::Temperature.measurement(), "temperature");
        assert_eq!(SensorType::Temperature.default_unit(), Unit::Celsius);
    }

    #[test]
    fn should_bound_humidity_to_percentage() {
        assert_eq!(SensorType::Humidity.valid_range(), Some((0.0, 100.0)));
    }

    #[test]
    fn should_have_no_range_for_virtual_sensors() {
        assert!(SensorType::Virtual.valid_range().is_none());
    }

    #[test]
    fn should_flag_binary_sensor_types() {
        assert!(SensorType::Motion.is_binary());
        assert!(SensorType::WaterLeak.is_binary());
        assert!(!SensorType::Light.is_binary());
    }
}
