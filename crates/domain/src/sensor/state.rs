//! Sensor lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle of a registered sensor.
///
/// ```text
/// created → initializing → online ⇄ offline / error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorState {
    #[default]
    Created,
    Initializing,
    Online,
    Offline,
    Error,
}

impl SensorState {
    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// Staying in the same state is never a transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SensorState::{Created, Error, Initializing, Offline, Online};
        matches!(
            (self, next),
            (Created, Initializing)
                | (Initializing, Online | Offline | Error)
                | (Online, Offline | Error)
                | (Offline, Initializing | Online)
                | (Error, Online | Initializing | Offline)
        )
    }

    /// Whether the sensor is currently producing readings.
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl std::fmt::Display for SensorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Initializing => f.write_str("initializing"),
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
            Self::Error => f.write_str("error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_created() {
        assert_eq!(SensorState::default(), SensorState::Created);
    }

    #[test]
    fn should_allow_happy_path() {
        assert!(SensorState::Created.can_transition_to(SensorState::Initializing));
        assert!(SensorState::Initializing.can_transition_to(SensorState::Online));
        assert!(SensorState::Online.can_transition_to(SensorState::Error));
        assert!(SensorState::Error.can_transition_to(SensorState::Online));
    }

    #[test]
    fn should_allow_init_retry_from_offline() {
        assert!(SensorState::Initializing.can_transition_to(SensorState::Offline));
        assert!(SensorState::Offline.can_transition_to(SensorState::Initializing));
    }

    #[test]
    fn should_reject_skipping_initialization() {
        assert!(!SensorState::Created.can_transition_to(SensorState::Online));
    }

    #[test]
    fn should_reject_self_transition() {
        assert!(!SensorState::Online.can_transition_to(SensorState::Online));
    }

    #[test]
    fn should_display_lowercase_variant_name() {
        assert_eq!(SensorState::Initializing.to_string(), "initializing");
        let json = serde_json::to_string(&SensorState::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
    }
}
