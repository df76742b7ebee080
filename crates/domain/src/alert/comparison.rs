//! Comparison — an operator applied to a reading value and a fixed threshold
//! (or an inclusive range for `between`).

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Comparison operator of a trigger or reset condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    /// `value <= reading <= upper`.
    Between,
}

impl Operator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Between => "between",
        }
    }

    fn is_lower_bound(self) -> bool {
        matches!(self, Self::Gt | Self::Gte)
    }

    fn is_upper_bound(self) -> bool {
        matches!(self, Self::Lt | Self::Lte)
    }

    fn is_inclusive(self) -> bool {
        matches!(self, Self::Gte | Self::Lte)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `value <operator> threshold`, with an absolute tolerance for `eq`/`neq`.
///
/// For `between`, `value` is the lower and `upper` the upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub operator: Operator,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    /// Absolute buffer used by `eq`/`neq`; ignored by ordering operators.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tolerance: f64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

impl Comparison {
    /// Comparison without tolerance.
    #[must_use]
    pub fn new(operator: Operator, value: f64) -> Self {
        Self {
            operator,
            value,
            upper: None,
            tolerance: 0.0,
        }
    }

    /// Inclusive range `low..=high`.
    #[must_use]
    pub fn between(low: f64, high: f64) -> Self {
        Self {
            operator: Operator::Between,
            value: low,
            upper: Some(high),
            tolerance: 0.0,
        }
    }

    /// Bounds of the region where the comparison holds, for ordering and
    /// range operators.
    fn bounds(&self) -> Option<(f64, f64)> {
        match self.operator {
            Operator::Gt | Operator::Gte => Some((self.value, f64::INFINITY)),
            Operator::Lt | Operator::Lte => Some((f64::NEG_INFINITY, self.value)),
            Operator::Between => self.upper.map(|upper| (self.value, upper)),
            Operator::Eq | Operator::Neq => None,
        }
    }

    /// Whether `reading` satisfies the comparison.
    #[must_use]
    pub fn holds(&self, reading: f64) -> bool {
        match self.operator {
            Operator::Gt => reading > self.value,
            Operator::Lt => reading < self.value,
            Operator::Gte => reading >= self.value,
            Operator::Lte => reading <= self.value,
            Operator::Eq => (reading - self.value).abs() <= self.tolerance,
            Operator::Neq => (reading - self.value).abs() > self.tolerance,
            Operator::Between => self
                .upper
                .is_some_and(|upper| (self.value..=upper).contains(&reading)),
        }
    }

    /// Check that the threshold and tolerance are usable numbers.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NonFinite`], [`ValidationError::InvalidTolerance`],
    /// or, for a malformed range, [`ValidationError::MissingUpperBound`],
    /// [`ValidationError::UnexpectedUpperBound`] or [`ValidationError::InvertedRange`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.value.is_finite() {
            return Err(ValidationError::NonFinite { field: "value" });
        }
        match (self.operator, self.upper) {
            (Operator::Between, None) => return Err(ValidationError::MissingUpperBound),
            (Operator::Between, Some(upper)) if !upper.is_finite() => {
                return Err(ValidationError::NonFinite { field: "upper" });
            }
            (Operator::Between, Some(upper)) if upper < self.value => {
                return Err(ValidationError::InvertedRange {
                    low: self.value,
                    high: upper,
                });
            }
            (Operator::Between, Some(_)) | (_, None) => {}
            (_, Some(_)) => return Err(ValidationError::UnexpectedUpperBound),
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ValidationError::InvalidTolerance);
        }
        Ok(())
    }

    /// Whether some value satisfies both `self` and `other`.
    ///
    /// Used to reject reset conditions that would hold while the trigger
    /// still holds, which would resolve an alert on the very reading that
    /// keeps it firing.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let (a, b) = (self.operator, other.operator);
        if a == Operator::Eq {
            return other.holds(self.value);
        }
        if b == Operator::Eq {
            return self.holds(other.value);
        }
        if a == Operator::Neq || b == Operator::Neq {
            return true;
        }
        if a == Operator::Between || b == Operator::Between {
            let (Some((lo_a, hi_a)), Some((lo_b, hi_b))) = (self.bounds(), other.bounds()) else {
                return true;
            };
            return match lo_a.max(lo_b).partial_cmp(&hi_a.min(hi_b)) {
                Some(std::cmp::Ordering::Less) => true,
                Some(std::cmp::Ordering::Equal) => {
                    let edge = lo_a.max(lo_b);
                    self.holds(edge) && other.holds(edge)
                }
                _ => false,
            };
        }
        if a.is_lower_bound() && b.is_upper_bound() {
            return other.value > self.value
                || (other.value >= self.value && a.is_inclusive() && b.is_inclusive());
        }
        if a.is_upper_bound() && b.is_lower_bound() {
            return other.value < self.value
                || (other.value <= self.value && a.is_inclusive() && b.is_inclusive());
        }
        true
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.operator, self.upper) {
            (Operator::Between, Some(upper)) => write!(f, "between {} and {upper}", self.value),
            _ => write!(f, "{} {}", self.operator, self.value),
        }
    }
}
