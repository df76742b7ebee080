//! # sensornet-adapter-simulated
//!
//! Simulated physical sensors for demos and tests.
//!
//! ## Behaviour
//!
//! | Sensor types | Signal |
//! |--------------|--------|
//! | continuous (temperature, humidity, …) | bounded random walk from the range midpoint, `U(-noise, noise) + U(-0.1, 0.1)` per read |
//! | binary (motion, door/window, water leak) | 0/1 flag that flips with probability `noise` per read |
//!
//! A [`SimulationConfig`] can pin a seed and inject initialisation or read
//! failures.
//!
//! ## Dependency rule
//!
//! Depends on `sensornet-app` (port traits) and `sensornet-domain` only.

mod driver;
mod profile;

pub use driver::{SimulatedDriver, SimulatedFault, SimulationConfig};
pub use profile::Profile;

/// Invalid simulation settings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("simulation range {min}..{max} is empty or not finite")]
    InvalidRange { min: f64, max: f64 },

    #[error("simulation noise {0} is out of range")]
    InvalidNoise(f64),

    #[error("failure probability {0} is outside 0..=1")]
    InvalidProbability(f64),
}
