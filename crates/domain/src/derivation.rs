//! Derivation — how a virtual sensor computes its value from other sensors.
//!
//! Two kinds exist: an [`AggregateFunction`] reduces the latest readings of
//! a set of sources, and a [`Formula`] combines named inputs (e.g. dew point
//! from `temperature` and `humidity`). Both fail closed: if any source has
//! never reported, nothing is computed.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::SensorId;
use crate::reading::{Reading, Unit};

/// Derivation attached to a virtual sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    /// Numeric reduction over the latest readings of `sources`.
    Aggregate {
        function: AggregateFunction,
        sources: Vec<SensorId>,
    },
    /// Named formula over named inputs.
    Derived {
        formula: Formula,
        /// Input name (e.g. `"temperature"`) → source sensor.
        inputs: BTreeMap<String, SensorId>,
    },
}

/// Reduction used by [`Derivation::Aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Average,
    Min,
    Max,
    Sum,
}

/// Formula used by [`Derivation::Derived`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    /// Magnus approximation, °C.
    DewPoint,
    /// Rothfusz regression, °C in and out.
    HeatIndex,
    /// Water vapour density, g/m³.
    AbsoluteHumidity,
}

/// Value computed by a derivation, ready to be wrapped in a [`Reading`].
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub measurement: &'static str,
    pub value: f64,
    pub unit: Unit,
}

impl AggregateFunction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
        }
    }

    /// Reduce `values`; `None` when empty.
    #[must_use]
    pub fn reduce(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let value = match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Average => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Sum => values.iter().sum(),
        };
        Some(value)
    }
}

const MAGNUS_B: f64 = 17.62;
const MAGNUS_C: f64 = 243.12;

impl Formula {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DewPoint => "dew_point",
            Self::HeatIndex => "heat_index",
            Self::AbsoluteHumidity => "absolute_humidity",
        }
    }

    /// Names of the inputs the formula needs.
    #[must_use]
    pub fn required_inputs(self) -> &'static [&'static str] {
        match self {
            Self::DewPoint | Self::HeatIndex | Self::AbsoluteHumidity => {
                &["temperature", "humidity"]
            }
        }
    }

    /// Unit of the computed value.
    #[must_use]
    pub fn unit(self) -> Unit {
        match self {
            Self::DewPoint | Self::HeatIndex => Unit::Celsius,
            Self::AbsoluteHumidity => Unit::GramsPerCubicMetre,
        }
    }

    /// Evaluate with every required input present in `inputs`.
    ///
    /// Temperatures are expected in °C and humidity in %.
    #[must_use]
    pub fn evaluate(self, inputs: &HashMap<&str, f64>) -> Option<f64> {
        let t = *inputs.get("temperature")?;
        let rh = *inputs.get("humidity")?;
        if rh <= 0.0 {
            return None;
        }
        let value = match self {
            Self::DewPoint => {
                let gamma = (rh / 100.0).ln() + MAGNUS_B * t / (MAGNUS_C + t);
                MAGNUS_C * gamma / (MAGNUS_B - gamma)
            }
            Self::HeatIndex => heat_index_celsius(t, rh),
            Self::AbsoluteHumidity => {
                let saturation = 6.112 * (MAGNUS_B * t / (MAGNUS_C + t)).exp();
                saturation * rh * 2.1674 / (273.15 + t)
            }
        };
        value.is_finite().then_some(value)
    }
}

fn heat_index_celsius(t: f64, rh: f64) -> f64 {
    let f = t * 9.0 / 5.0 + 32.0;
    let simple = 0.5 * (f + 61.0 + (f - 68.0) * 1.2 + rh * 0.094);
    let hi = if (simple + f) / 2.0 < 80.0 {
        simple
    } else {
        -42.379 + 2.049_015_23 * f + 10.143_331_27 * rh
            - 0.224_755_41 * f * rh
            - 0.006_837_83 * f * f
            - 0.054_817_17 * rh * rh
            + 0.001_228_74 * f * f * rh
            + 0.000_852_82 * f * rh * rh
            - 0.000_001_99 * f * f * rh * rh
    };
    (hi - 32.0) * 5.0 / 9.0
}

impl Derivation {
    /// Every source sensor, in declaration order, without duplicates.
    #[must_use]
    pub fn sources(&self) -> Vec<SensorId> {
        let mut out: Vec<SensorId> = Vec::new();
        let iter: Box<dyn Iterator<Item = &SensorId>> = match self {
            Self::Aggregate { sources, .. } => Box::new(sources.iter()),
            Self::Derived { inputs, .. } => Box::new(inputs.values()),
        };
        for id in iter {
            if !out.contains(id) {
                out.push(id.clone());
            }
        }
        out
    }

    /// Check structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NoSources`] for an empty aggregate and
    /// [`ValidationError::MissingFormulaInput`] when a formula input is unmapped.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Aggregate { sources, .. } => {
                if sources.is_empty() {
                    return Err(ValidationError::NoSources);
                }
            }
            Self::Derived { formula, inputs } => {
                for input in formula.required_inputs() {
                    if !inputs.contains_key(*input) {
                        return Err(ValidationError::MissingFormulaInput {
                            formula: formula.as_str(),
                            input: *input,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Compute from the latest known reading of each source.
    ///
    /// Returns `None` if any source has never reported (fail closed) or the
    /// result is not a finite number.
    #[must_use]
    pub fn compute(&self, latest: &HashMap<SensorId, Reading>) -> Option<Derived> {
        match self {
            Self::Aggregate { function, sources } => {
                let readings = sources
                    .iter()
                    .map(|id| latest.get(id))
                    .collect::<Option<Vec<_>>>()?;
                let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
                let value = function.reduce(&values)?;
                Some(Derived {
                    measurement: function.as_str(),
                    value,
                    unit: readings.first().map_or(Unit::None, |r| r.unit),
                })
            }
            Self::Derived { formula, inputs } => {
                let mut values = HashMap::with_capacity(inputs.len());
                for (name, id) in inputs {
                    let reading = latest.get(id)?;
                    let value = if name == "temperature" {
                        reading.unit.convert(reading.value, Unit::Celsius)?
                    } else {
                        reading.value
                    };
                    values.insert(name.as_str(), value);
                }
                Some(Derived {
                    measurement: formula.as_str(),
                    value: formula.evaluate(&values)?,
                    unit: formula.unit(),
                })
            }
        }
    }
}
