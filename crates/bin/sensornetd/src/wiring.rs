//! Startup registration of configured sensors and rules.

use std::sync::Arc;

use sensornet_adapter_simulated::{SimulatedDriver, SimulationError};
use sensornet_app::ports::{ActionExecutor, SensorDriver};
use sensornet_app::runtime::SensorRuntime;
use sensornet_domain::alert::AlertRule;
use sensornet_domain::error::SensorNetError;

use crate::config::SensorEntry;

/// A configured sensor or rule could not be installed.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("sensor `{name}` could not be simulated")]
    Simulation {
        name: String,
        #[source]
        source: SimulationError,
    },

    #[error("sensor `{name}` could not be registered")]
    Sensor {
        name: String,
        #[source]
        source: SensorNetError,
    },

    #[error("alert rule `{id}` could not be added")]
    Rule {
        id: String,
        #[source]
        source: SensorNetError,
    },
}

/// Counts of what was installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Installed {
    pub physical: usize,
    pub virtual_sensors: usize,
    pub rules: usize,
}

/// Register every sensor (physical ones backed by a simulated driver), then
/// add every rule. Stops at the first failure.
///
/// # Errors
///
/// Returns a [`StartupError`] naming the sensor or rule that was rejected.
pub fn install<X: ActionExecutor + 'static>(
    runtime: &SensorRuntime<X>,
    sensors: Vec<SensorEntry>,
    rules: Vec<AlertRule>,
) -> Result<Installed, StartupError> {
    let mut installed = Installed::default();
    for entry in sensors {
        let name = entry.definition.name.clone();
        let is_virtual = entry.definition.derivation.is_some();
        let driver: Option<Arc<dyn SensorDriver>> = if is_virtual {
            None
        } else {
            let driver = SimulatedDriver::new(entry.definition.sensor_type, &entry.simulation)
                .map_err(|source| StartupError::Simulation {
                    name: name.clone(),
                    source,
                })?;
            Some(Arc::new(driver))
        };
        let id = runtime
            .register_sensor(entry.definition, driver)
            .map_err(|source| StartupError::Sensor {
                name: name.clone(),
                source,
            })?;
        tracing::info!(sensor_id = %id, name = %name, virtual_sensor = is_virtual, "sensor registered");
        if is_virtual {
            installed.virtual_sensors += 1;
        } else {
            installed.physical += 1;
        }
    }
    for rule in rules {
        let id = rule.id.to_string();
        runtime
            .add_rule(rule)
            .map_err(|source| StartupError::Rule { id, source })?;
        installed.rules += 1;
    }
    Ok(installed)
}
