//! Common error types used across the workspace.
//!
//! Each failure family is a typed error; [`SensorNetError`] aggregates them
//! via `#[from]` so callers can propagate with `?` and still match on the
//! specific cause.

use std::time::Duration;

/// Top-level error for every fallible sensornet operation.
#[derive(Debug, thiserror::Error)]
pub enum SensorNetError {
    /// Bad configuration or patch, rejected before any state change.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// Unknown sensor or rule id.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// Registration conflict.
    #[error("duplicate id")]
    DuplicateId(#[from] DuplicateIdError),

    /// Transient driver failure during a read cycle.
    #[error("sensor read failed")]
    SensorRead(#[from] SensorReadError),

    /// Driver failed to initialise.
    #[error("sensor initialization failed")]
    SensorInit(#[from] SensorInitError),

    /// An alert action failed.
    #[error("alert action failed")]
    ActionExecution(#[from] ActionExecutionError),

    /// The event bus has been closed; nothing more can be published.
    #[error("event bus is closed")]
    BusClosed,

    /// A bus subscriber failed while handling an event.
    #[error("event handler failed")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Domain invariant violations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("id must not be empty")]
    EmptyId,

    #[error("update interval {value}s is outside {min}..={max}s")]
    IntervalOutOfRange { value: u64, min: u64, max: u64 },

    #[error("calibration offset {value} is outside -{limit}..={limit}")]
    CalibrationOutOfRange { value: f64, limit: f64 },

    #[error("threshold {value} is outside the valid range {min}..={max} for {sensor_type}")]
    ThresholdOutOfRange {
        sensor_type: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("threshold minimum {min} is greater than maximum {max}")]
    InvertedThresholds { min: f64, max: f64 },

    #[error("value for `{field}` must be a finite number")]
    NonFinite { field: &'static str },

    #[error("tolerance must be a non-negative finite number")]
    InvalidTolerance,

    #[error("`between` requires an `upper` bound")]
    MissingUpperBound,

    #[error("`upper` is only valid with the `between` operator")]
    UnexpectedUpperBound,

    #[error("range lower bound {low} is greater than upper bound {high}")]
    InvertedRange { low: f64, high: f64 },

    #[error("alert field must not be empty")]
    EmptyField,

    #[error("alert rule requires a trigger condition")]
    MissingCondition,

    #[error("reset condition overlaps the trigger condition")]
    OverlappingReset,

    #[error("virtual sensors require a derivation")]
    MissingDerivation,

    #[error("only virtual sensors may carry a derivation")]
    UnexpectedDerivation,

    #[error("physical sensors require a driver")]
    MissingDriver,

    #[error("derivation must reference at least one source sensor")]
    NoSources,

    #[error("formula `{formula}` is missing input `{input}`")]
    MissingFormulaInput {
        formula: &'static str,
        input: &'static str,
    },

    #[error("virtual sensor would depend on itself through `{via}`")]
    DerivationCycle { via: String },

    #[error("sensor lifecycle cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid topic pattern `{0}`")]
    InvalidTopicPattern(String),

    #[error("id `{0}` is reserved for a sensor type topic")]
    ReservedId(String),
}

/// A lookup by id found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} `{id}` not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A supplied id is already in use, or was used before and retired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} `{id}` already exists")]
pub struct DuplicateIdError {
    pub entity: &'static str,
    pub id: String,
}

/// Reasons a single read cycle failed.
#[derive(Debug, thiserror::Error)]
pub enum SensorReadError {
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("driver returned a non-finite value")]
    NonFinite,

    #[error("driver failure")]
    Driver(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Reasons a driver could not be initialised.
#[derive(Debug, thiserror::Error)]
pub enum SensorInitError {
    #[error("initialization timed out after {0:?}")]
    Timeout(Duration),

    #[error("driver failure")]
    Driver(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// An alert action could not be carried out.
#[derive(Debug, thiserror::Error)]
#[error("action `{action}` failed")]
pub struct ActionExecutionError {
    pub action: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl SensorNetError {
    /// Wrap an arbitrary subscriber failure.
    pub fn handler(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Handler(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_validation_error_into_top_level_error() {
        let err: SensorNetError = ValidationError::EmptyName.into();
        assert!(matches!(
            err,
            SensorNetError::Validation(ValidationError::EmptyName)
        ));
    }

    #[test]
    fn should_display_not_found_with_entity_and_id() {
        let err = NotFoundError {
            entity: "Sensor",
            id: "temperature_1".to_string(),
        };
        assert_eq!(err.to_string(), "Sensor `temperature_1` not found");
    }

    #[test]
    fn should_display_interval_range() {
        let err = ValidationError::IntervalOutOfRange {
            value: 0,
            min: 1,
            max: 86_400,
        };
        assert_eq!(err.to_string(), "update interval 0s is outside 1..=86400s");
    }

    #[test]
    fn should_keep_source_of_action_failure() {
        let err = ActionExecutionError {
            action: "webhook".to_string(),
            source: Box::new(std::io::Error::other("connection refused")),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection refused");
    }
}
