//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `sensornet.toml` in the working directory, or the file named by
//! `SENSORNET_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use sensornet_adapter_simulated::SimulationConfig;
use sensornet_app::alert_engine::AlertEngineConfig;
use sensornet_app::dispatch::DispatchOptions;
use sensornet_app::event_bus::DEFAULT_CAPACITY;
use sensornet_app::poller::PollerConfig;
use sensornet_app::runtime::RuntimeConfig;
use sensornet_domain::alert::AlertRule;
use sensornet_domain::sensor::SensorDefinition;

const DEFAULT_PATH: &str = "sensornet.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Runtime tunables.
    pub runtime: RuntimeSection,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Sensors registered at startup.
    pub sensors: Vec<SensorEntry>,
    /// Alert rules added at startup.
    pub rules: Vec<AlertRule>,
}

/// `[runtime]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Per-subscriber queue length.
    pub bus_capacity: usize,
    /// Consecutive failed reads before a sensor enters `error`.
    pub failure_threshold: u32,
    /// Read timeout as a fraction of the update interval.
    pub read_timeout_fraction: Option<f64>,
    pub max_read_timeout_secs: u64,
    pub init_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// How long resolved alerts stay listed.
    pub alert_display_window_secs: u64,
    /// Delivery attempts per event for push-style subscribers.
    pub handler_max_attempts: u32,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// One `[[sensors]]` entry: the sensor record plus how to simulate it.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorEntry {
    #[serde(flatten)]
    pub definition: SensorDefinition,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from `SENSORNET_CONFIG` or `sensornet.toml` (if
    /// present), then apply environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed or invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SENSORNET_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SENSORNET_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let runtime = &self.runtime;
        if runtime.bus_capacity == 0 {
            return Err(ConfigError::Validation("bus_capacity must be non-zero".to_string()));
        }
        if runtime.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "failure_threshold must be non-zero".to_string(),
            ));
        }
        if runtime
            .read_timeout_fraction
            .is_some_and(|f| !(f.is_finite() && f > 0.0 && f <= 1.0))
        {
            return Err(ConfigError::Validation(
                "read_timeout_fraction must be within (0, 1]".to_string(),
            ));
        }
        if runtime.backoff_base_secs > runtime.backoff_cap_secs {
            return Err(ConfigError::Validation(
                "backoff_base_secs must not exceed backoff_cap_secs".to_string(),
            ));
        }
        if runtime.handler_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "handler_max_attempts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl RuntimeSection {
    /// Runtime settings in the shape the runtime expects.
    #[must_use]
    pub fn to_runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            bus_capacity: self.bus_capacity,
            poller: PollerConfig {
                failure_threshold: self.failure_threshold,
                timeout_fraction: self.read_timeout_fraction,
                max_read_timeout: Duration::from_secs(self.max_read_timeout_secs),
                init_timeout: Duration::from_secs(self.init_timeout_secs),
                backoff_base: Duration::from_secs(self.backoff_base_secs),
                backoff_cap: Duration::from_secs(self.backoff_cap_secs),
                shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            },
            alerts: AlertEngineConfig {
                display_window: Duration::from_secs(self.alert_display_window_secs),
            },
            dispatch: DispatchOptions {
                max_attempts: self.handler_max_attempts,
            },
        }
    }
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_CAPACITY,
            failure_threshold: 3,
            read_timeout_fraction: None,
            max_read_timeout_secs: 10,
            init_timeout_secs: 10,
            backoff_base_secs: 1,
            backoff_cap_secs: 60,
            shutdown_timeout_secs: 5,
            alert_display_window_secs: 300,
            handler_max_attempts: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "sensornetd=info,sensornet_app=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensornet_domain::alert::{Action, Operator, Severity};
    use sensornet_domain::derivation::{Derivation, Formula};
    use sensornet_domain::sensor::SensorType;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.runtime.bus_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.runtime.failure_threshold, 3);
        assert!(config.sensors.is_empty());
        assert!(config.rules.is_empty());
    }

    #[test]
    fn should_match_runtime_defaults() {
        let config = RuntimeSection::default().to_runtime_config();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.runtime.shutdown_timeout_secs, 5);
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert!(config.sensors.is_empty());
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = r#"
            [runtime]
            bus_capacity = 64
            failure_threshold = 5
            read_timeout_fraction = 0.5
            alert_display_window_secs = 60

            [logging]
            filter = 'debug'

            [[sensors]]
            id = "living_room_temp"
            type = "temperature"
            name = "Living Room Temperature"
            location = "living room"
            update_interval = 2
            calibration_offset = -0.5

            [sensors.simulation]
            min = 18.0
            max = 26.0
            seed = 7

            [[sensors]]
            id = "living_room_humidity"
            type = "humidity"
            name = "Living Room Humidity"
            update_interval = 3

            [[sensors]]
            id = "living_room_dew_point"
            type = "virtual"
            name = "Dew Point"

            [sensors.derivation]
            kind = "derived"
            formula = "dew_point"
            inputs = { temperature = "living_room_temp", humidity = "living_room_humidity" }

            [[rules]]
            id = "too_hot"
            sensor_id = "living_room_temp"
            field = "temperature"
            operator = "gt"
            value = 25
            reset_condition = { operator = "lt", value = 23.0 }
            severity = "critical"
            cooldown_secs = 60
            actions = [
                { type = "log", message = "cooling on" },
                { type = "delay", seconds = 5 },
                { type = "webhook", url = "https://hooks.example.com/alerts" },
            ]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.runtime.bus_capacity, 64);
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.sensors.len(), 3);

        let temp = &config.sensors[0];
        assert_eq!(temp.definition.sensor_type, SensorType::Temperature);
        assert_eq!(temp.definition.config.update_interval_secs, 2);
        assert!((temp.definition.config.calibration_offset + 0.5).abs() < f64::EPSILON);
        assert_eq!(temp.simulation.seed, Some(7));
        assert_eq!(temp.simulation.min, Some(18.0));

        let dew = &config.sensors[2];
        assert!(matches!(
            dew.definition.derivation,
            Some(Derivation::Derived {
                formula: Formula::DewPoint,
                ..
            })
        ));

        let rule = &config.rules[0];
        assert_eq!(rule.id.as_str(), "too_hot");
        assert_eq!(rule.condition.operator, Operator::Gt);
        assert!((rule.condition.value - 25.0).abs() < f64::EPSILON);
        assert_eq!(rule.reset_condition.map(|r| r.operator), Some(Operator::Lt));
        assert_eq!(rule.severity, Severity::Critical);
        assert_eq!(rule.actions[1], Action::Delay { seconds: 5 });
    }

    #[test]
    fn should_convert_runtime_section() {
        let section = RuntimeSection {
            failure_threshold: 5,
            read_timeout_fraction: Some(0.5),
            alert_display_window_secs: 60,
            handler_max_attempts: 3,
            ..RuntimeSection::default()
        };
        let config = section.to_runtime_config();
        assert_eq!(config.poller.failure_threshold, 5);
        assert_eq!(config.poller.timeout_fraction, Some(0.5));
        assert_eq!(config.alerts.display_window, Duration::from_secs(60));
        assert_eq!(config.dispatch.max_attempts, 3);
    }

    #[test]
    fn should_reject_zero_bus_capacity() {
        let mut config = Config::default();
        config.runtime.bus_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_read_timeout_fraction_above_one() {
        let mut config = Config::default();
        config.runtime.read_timeout_fraction = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_backoff_base_above_cap() {
        let mut config = Config::default();
        config.runtime.backoff_base_secs = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_report_parse_error_for_unknown_sensor_type() {
        let toml = r#"
            [[sensors]]
            type = "barometer"
            name = "x"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn should_parse_range_rule() {
        let toml = r#"
            [[rules]]
            id = "comfort"
            sensor_id = "living_room_temp"
            field = "temperature"
            operator = "between"
            value = 18.0
            upper = 24.0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let rule = &config.rules[0];
        assert_eq!(rule.condition.operator, Operator::Between);
        assert_eq!(rule.condition.upper, Some(24.0));
        assert!(rule.validate().is_ok());
    }
}
