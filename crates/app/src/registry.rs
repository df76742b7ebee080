//! Sensor registry — the single mutable source of truth for sensors.
//!
//! Every mutation happens under one write lock, so an observer never sees
//! a half-applied config patch or lifecycle change. Callers only ever get
//! snapshots (clones) back.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use sensornet_domain::error::{DuplicateIdError, NotFoundError, SensorNetError, ValidationError};
use sensornet_domain::event::StatusChange;
use sensornet_domain::id::SensorId;
use sensornet_domain::reading::Reading;
use sensornet_domain::sensor::{
    ConfigPatch, Sensor, SensorDefinition, SensorFilter, SensorState, SensorType,
};

/// Notification sent to registry watchers after a mutation is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    Registered(SensorId),
    Unregistered(SensorId),
    ConfigUpdated { id: SensorId, reschedule: bool },
}

#[derive(Default)]
struct State {
    sensors: HashMap<SensorId, Sensor>,
    /// Ids that were registered once; never handed out again.
    retired: HashSet<SensorId>,
}

/// Owns every registered [`Sensor`].
#[derive(Default)]
pub struct SensorRegistry {
    state: RwLock<State>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<RegistryChange>>>,
}

fn not_found(id: &SensorId) -> NotFoundError {
    NotFoundError {
        entity: "Sensor",
        id: id.to_string(),
    }
}

impl SensorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sensor and return its id, generating one when absent.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::Validation`] if the definition is invalid or the
    ///   id collides with a sensor type topic name
    /// - [`SensorNetError::DuplicateId`] if the id is, or ever was, in use
    pub fn register(&self, definition: SensorDefinition) -> Result<SensorId, SensorNetError> {
        definition.validate()?;
        let sensor_type = definition.sensor_type;
        if let Some(id) = &definition.id {
            if SensorType::ALL.iter().any(|t| t.as_str() == id.as_str()) {
                return Err(ValidationError::ReservedId(id.to_string()).into());
            }
        }

        let id = {
            let mut state = self.state.write();
            let id = match &definition.id {
                Some(id) => {
                    if state.sensors.contains_key(id) || state.retired.contains(id) {
                        return Err(DuplicateIdError {
                            entity: "Sensor",
                            id: id.to_string(),
                        }
                        .into());
                    }
                    id.clone()
                }
                None => loop {
                    let candidate = SensorId::generate(sensor_type.as_str());
                    if !state.sensors.contains_key(&candidate)
                        && !state.retired.contains(&candidate)
                    {
                        break candidate;
                    }
                },
            };
            let sensor =
                Sensor::from_definition(id.clone(), definition, sensornet_domain::time::now());
            state.sensors.insert(id.clone(), sensor);
            id
        };

        tracing::info!(sensor_id = %id, sensor_type = %sensor_type, "sensor registered");
        self.notify(&RegistryChange::Registered(id.clone()));
        Ok(id)
    }

    /// Remove a sensor; its id is retired for good.
    ///
    /// Once this returns, [`record_reading`](Self::record_reading) refuses
    /// the id, so no reading of the sensor can be published afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if the sensor is unknown.
    pub fn unregister(&self, id: &SensorId) -> Result<Sensor, SensorNetError> {
        let sensor = {
            let mut state = self.state.write();
            let sensor = state.sensors.remove(id).ok_or_else(|| not_found(id))?;
            state.retired.insert(id.clone());
            sensor
        };
        tracing::info!(sensor_id = %id, "sensor unregistered");
        self.notify(&RegistryChange::Unregistered(id.clone()));
        Ok(sensor)
    }

    /// Snapshot of one sensor.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if the sensor is unknown.
    pub fn get(&self, id: &SensorId) -> Result<Sensor, SensorNetError> {
        self.state
            .read()
            .sensors
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id).into())
    }

    /// Snapshots of every sensor matching `filter`, ordered by id.
    #[must_use]
    pub fn list(&self, filter: &SensorFilter) -> Vec<Sensor> {
        let mut sensors: Vec<Sensor> = self
            .state
            .read()
            .sensors
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sensors.sort_by(|a, b| a.id.cmp(&b.id));
        sensors
    }

    #[must_use]
    pub fn contains(&self, id: &SensorId) -> bool {
        self.state.read().sensors.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().sensors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate and apply a configuration patch atomically.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::NotFound`] if the sensor is unknown
    /// - [`SensorNetError::Validation`] if the patched config is out of range;
    ///   the stored config is left untouched
    pub fn update_config(
        &self,
        id: &SensorId,
        patch: &ConfigPatch,
    ) -> Result<Sensor, SensorNetError> {
        let snapshot = {
            let mut state = self.state.write();
            let sensor = state.sensors.get_mut(id).ok_or_else(|| not_found(id))?;
            sensor.config = sensor.config.apply(patch, sensor.sensor_type)?;
            sensor.clone()
        };
        tracing::info!(sensor_id = %id, "sensor configuration updated");
        self.notify(&RegistryChange::ConfigUpdated {
            id: id.clone(),
            reschedule: patch.touches_schedule(),
        });
        Ok(snapshot)
    }

    /// Move a sensor to another lifecycle state.
    ///
    /// Returns `None` when the sensor already is in `to`.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::NotFound`] if the sensor is unknown
    /// - [`ValidationError::InvalidTransition`] for a transition the
    ///   lifecycle does not allow
    pub fn transition(
        &self,
        id: &SensorId,
        to: SensorState,
        reason: Option<String>,
    ) -> Result<Option<StatusChange>, SensorNetError> {
        let mut state = self.state.write();
        let sensor = state.sensors.get_mut(id).ok_or_else(|| not_found(id))?;
        let from = sensor.state;
        if from == to {
            return Ok(None);
        }
        if !from.can_transition_to(to) {
            return Err(ValidationError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        sensor.state = to;
        Ok(Some(StatusChange {
            sensor_id: id.clone(),
            from,
            to,
            consecutive_failures: sensor.consecutive_failures,
            reason,
            timestamp: sensornet_domain::time::now(),
        }))
    }

    /// Count one more failed read and return the new consecutive count.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if the sensor is unknown.
    pub fn record_failure(&self, id: &SensorId) -> Result<u32, SensorNetError> {
        let mut state = self.state.write();
        let sensor = state.sensors.get_mut(id).ok_or_else(|| not_found(id))?;
        sensor.consecutive_failures = sensor.consecutive_failures.saturating_add(1);
        Ok(sensor.consecutive_failures)
    }

    /// Store `reading` as the sensor's latest and run `publish` while the
    /// registry still holds the sensor.
    ///
    /// Resets the consecutive failure counter.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] (and does not call `publish`)
    /// if the sensor has been unregistered.
    pub fn record_reading<T>(
        &self,
        reading: Reading,
        publish: impl FnOnce(&Reading) -> T,
    ) -> Result<T, SensorNetError> {
        let mut state = self.state.write();
        let sensor = state
            .sensors
            .get_mut(&reading.sensor_id)
            .ok_or_else(|| not_found(&reading.sensor_id))?;
        sensor.last_read_at = Some(reading.timestamp);
        sensor.consecutive_failures = 0;
        let out = publish(&reading);
        sensor.last_reading = Some(reading);
        Ok(out)
    }

    /// Receive every subsequent [`RegistryChange`].
    pub fn watch(&self) -> mpsc::UnboundedReceiver<RegistryChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().push(tx);
        rx
    }

    fn notify(&self, change: &RegistryChange) {
        self.watchers
            .lock()
            .retain(|tx| tx.send(change.clone()).is_ok());
    }
}
