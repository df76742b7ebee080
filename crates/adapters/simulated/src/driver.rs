//! Simulated sensor driver.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use sensornet_app::ports::SensorDriver;
use sensornet_domain::error::{SensorInitError, SensorReadError};
use sensornet_domain::sensor::SensorType;

use crate::SimulationError;
use crate::profile::Profile;

/// Random walk drift added on every read, on top of the profile noise.
const DRIFT: f64 = 0.1;

/// `simulation` block of a sensor's configuration. Unset bounds fall back
/// to [`Profile::for_type`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub noise: Option<f64>,
    /// Fixed seed for reproducible sequences.
    pub seed: Option<u64>,
    /// Number of initialisation attempts that fail before one succeeds.
    pub init_failures: u32,
    /// Chance, in `0.0..=1.0`, that a read fails.
    pub failure_probability: f64,
}

/// A failure injected by the simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulatedFault {
    #[error("simulated initialization failure ({remaining} left)")]
    Init { remaining: u32 },

    #[error("simulated read failure")]
    Read,
}

struct Walk {
    rng: StdRng,
    value: f64,
    init_failures: u32,
}

/// Driver producing a bounded random walk for one sensor.
pub struct SimulatedDriver {
    binary: bool,
    profile: Profile,
    failure_probability: f64,
    walk: Mutex<Walk>,
}

impl SimulatedDriver {
    /// Driver with the default profile of `sensor_type`.
    #[must_use]
    pub fn for_type(sensor_type: SensorType) -> Self {
        let profile = Profile::for_type(sensor_type);
        Self::build(sensor_type, profile, &SimulationConfig::default())
    }

    /// # Errors
    ///
    /// Returns [`SimulationError`] if the resulting profile or the failure
    /// probability is invalid.
    pub fn new(sensor_type: SensorType, config: &SimulationConfig) -> Result<Self, SimulationError> {
        let defaults = Profile::for_type(sensor_type);
        let profile = Profile::new(
            config.min.unwrap_or(defaults.min),
            config.max.unwrap_or(defaults.max),
            config.noise.unwrap_or(defaults.noise),
        );
        profile.validate(sensor_type.is_binary())?;
        if !(0.0..=1.0).contains(&config.failure_probability) {
            return Err(SimulationError::InvalidProbability(config.failure_probability));
        }
        Ok(Self::build(sensor_type, profile, config))
    }

    fn build(sensor_type: SensorType, profile: Profile, config: &SimulationConfig) -> Self {
        let binary = sensor_type.is_binary();
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            binary,
            profile,
            failure_probability: config.failure_probability,
            walk: Mutex::new(Walk {
                rng,
                value: if binary { profile.min } else { profile.midpoint() },
                init_failures: config.init_failures,
            }),
        }
    }

    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile
    }

    fn step(&self, walk: &mut Walk) -> f64 {
        if self.binary {
            if walk.rng.random_bool(self.profile.noise) {
                walk.value = if walk.value > 0.5 { 0.0 } else { 1.0 };
            }
            return walk.value;
        }
        let noise = walk.rng.random_range(-self.profile.noise..=self.profile.noise);
        let drift = walk.rng.random_range(-DRIFT..=DRIFT);
        walk.value = (walk.value + noise + drift).clamp(self.profile.min, self.profile.max);
        walk.value
    }
}

#[async_trait]
impl SensorDriver for SimulatedDriver {
    async fn initialize(&self) -> Result<(), SensorInitError> {
        let mut walk = self.walk.lock();
        if walk.init_failures > 0 {
            walk.init_failures -= 1;
            tracing::debug!(remaining = walk.init_failures, "injecting initialization failure");
            return Err(SensorInitError::Driver(Box::new(SimulatedFault::Init {
                remaining: walk.init_failures,
            })));
        }
        Ok(())
    }

    async fn read(&self) -> Result<f64, SensorReadError> {
        let mut walk = self.walk.lock();
        if self.failure_probability > 0.0 && walk.rng.random_bool(self.failure_probability) {
            return Err(SensorReadError::Driver(Box::new(SimulatedFault::Read)));
        }
        Ok(self.step(&mut walk))
    }
}
