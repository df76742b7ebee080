//! Typed identifier newtypes.
//!
//! Identifiers are opaque strings so that ids supplied by configuration
//! (`"living_room_temp"`) and generated ids (`"temperature_1a2b3c4d"`) share
//! one representation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh identifier `<prefix>_<8 hex chars>`.
            #[must_use]
            pub fn generate(prefix: &str) -> Self {
                let uuid = uuid::Uuid::new_v4().simple().to_string();
                Self(format!("{prefix}_{}", &uuid[..8]))
            }

            /// Borrow the textual form.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::try_from(s.to_string())
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                if value.trim().is_empty() {
                    return Err(ValidationError::EmptyId);
                }
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for a [`Sensor`](crate::sensor::Sensor).
    SensorId
);

define_id!(
    /// Unique identifier for an [`AlertRule`](crate::alert::AlertRule).
    RuleId
);

define_id!(
    /// Unique identifier for a bus subscription.
    SubscriptionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_generate_unique_ids_when_called_twice() {
        let a = SensorId::generate("temperature");
        let b = SensorId::generate("temperature");
        assert_ne!(a, b);
    }

    #[test]
    fn should_prefix_generated_ids() {
        let id = SensorId::generate("humidity");
        assert!(id.as_str().starts_with("humidity_"));
        assert_eq!(id.as_str().len(), "humidity_".len() + 8);
    }

    #[test]
    fn should_roundtrip_through_display_and_from_str() {
        let id = RuleId::generate("rule");
        let parsed: RuleId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn should_reject_blank_id() {
        assert_eq!(SensorId::from_str("  "), Err(ValidationError::EmptyId));
    }

    #[test]
    fn should_reject_blank_id_when_deserializing() {
        let result: Result<SensorId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn should_serialize_as_plain_string() {
        let id: SensorId = "living_room".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"living_room\"");
    }
}
