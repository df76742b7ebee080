//! Virtual sensor resolver — recomputes derived sensors from source readings.
//!
//! The resolver keeps the latest reading of every sensor some virtual sensor
//! depends on. Each incoming source reading recomputes the dependents and
//! publishes their readings through the same registry + bus path the poller
//! uses, so downstream consumers cannot tell the two apart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use sensornet_domain::derivation::Derivation;
use sensornet_domain::error::{NotFoundError, SensorNetError, ValidationError};
use sensornet_domain::id::SensorId;
use sensornet_domain::reading::Reading;
use sensornet_domain::sensor::{SensorState, SensorType};

use crate::event_bus::Subscription;
use crate::lifecycle::{enter_state, publish_reading};
use crate::ports::EventPublisher;
use crate::registry::SensorRegistry;

#[derive(Default)]
struct State {
    derivations: HashMap<SensorId, Derivation>,
    /// Source id → virtual sensors computed from it, in tracking order.
    dependents: HashMap<SensorId, Vec<SensorId>>,
    latest: HashMap<SensorId, Reading>,
}

impl State {
    /// Whether `target` is reachable from `from` through derivations.
    fn depends_on(&self, from: &SensorId, target: &SensorId) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if &id == target {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(derivation) = self.derivations.get(&id) {
                stack.extend(derivation.sources());
            }
        }
        false
    }

    fn check_cycle(&self, id: &SensorId, sources: &[SensorId]) -> Result<(), ValidationError> {
        match sources.iter().find(|s| self.depends_on(s, id)) {
            Some(via) => Err(ValidationError::DerivationCycle {
                via: via.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Owns derivation state for every virtual sensor.
pub struct VirtualSensorResolver<P> {
    registry: Arc<SensorRegistry>,
    publisher: P,
    state: Mutex<State>,
}

impl<P> VirtualSensorResolver<P>
where
    P: EventPublisher + 'static,
{
    #[must_use]
    pub fn new(registry: Arc<SensorRegistry>, publisher: P) -> Self {
        Self {
            registry,
            publisher,
            state: Mutex::new(State::default()),
        }
    }

    /// Start computing a registered virtual sensor.
    ///
    /// The sensor moves to `initializing` and stays there until every source
    /// has reported at least once.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::NotFound`] if the registry does not know the sensor
    /// - [`ValidationError::MissingDerivation`] if it is not a virtual sensor
    /// - [`ValidationError::DerivationCycle`] if a source depends, directly or
    ///   through other virtual sensors, on this sensor
    pub fn track(&self, id: &SensorId) -> Result<(), SensorNetError> {
        let sensor = self.registry.get(id)?;
        let derivation = sensor
            .derivation
            .ok_or(ValidationError::MissingDerivation)?;
        let sources = derivation.sources();
        {
            let mut state = self.state.lock();
            state.check_cycle(id, &sources)?;
            for source in &sources {
                state
                    .dependents
                    .entry(source.clone())
                    .or_default()
                    .push(id.clone());
            }
            state.derivations.insert(id.clone(), derivation);
        }
        tracing::info!(sensor_id = %id, sources = sources.len(), "virtual sensor tracked");
        enter_state(
            &self.registry,
            &self.publisher,
            id,
            SensorState::Initializing,
            Some("waiting for sources".to_string()),
        );
        Ok(())
    }

    /// Whether `derivation` could be tracked for `id` without closing a cycle.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DerivationCycle`] naming the offending source.
    pub fn check(&self, id: &SensorId, derivation: &Derivation) -> Result<(), ValidationError> {
        self.state.lock().check_cycle(id, &derivation.sources())
    }

    /// Stop computing a virtual sensor.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if the sensor is not tracked.
    pub fn untrack(&self, id: &SensorId) -> Result<(), SensorNetError> {
        let mut state = self.state.lock();
        let derivation = state.derivations.remove(id).ok_or_else(|| NotFoundError {
            entity: "VirtualSensor",
            id: id.to_string(),
        })?;
        for source in derivation.sources() {
            if let Some(dependents) = state.dependents.get_mut(&source) {
                dependents.retain(|d| d != id);
                if dependents.is_empty() {
                    state.dependents.remove(&source);
                    state.latest.remove(&source);
                }
            }
        }
        tracing::info!(sensor_id = %id, "virtual sensor untracked");
        Ok(())
    }

    #[must_use]
    pub fn is_tracked(&self, id: &SensorId) -> bool {
        self.state.lock().derivations.contains_key(id)
    }

    /// Feed one reading; recompute and publish every dependent virtual sensor.
    ///
    /// Returns the readings that were published.
    pub fn handle_reading(&self, reading: &Reading) -> Vec<Reading> {
        let work: Vec<(SensorId, Derivation, HashMap<SensorId, Reading>)> = {
            let mut state = self.state.lock();
            let Some(dependents) = state.dependents.get(&reading.sensor_id).cloned() else {
                return Vec::new();
            };
            if state
                .latest
                .get(&reading.sensor_id)
                .is_some_and(|last| last.timestamp > reading.timestamp)
            {
                return Vec::new();
            }
            state
                .latest
                .insert(reading.sensor_id.clone(), reading.clone());
            dependents
                .into_iter()
                .filter_map(|id| {
                    let derivation = state.derivations.get(&id)?.clone();
                    let inputs = derivation
                        .sources()
                        .into_iter()
                        .filter_map(|s| state.latest.get(&s).map(|r| (s, r.clone())))
                        .collect();
                    Some((id, derivation, inputs))
                })
                .collect()
        };

        let mut published = Vec::new();
        for (id, derivation, inputs) in work {
            let Some(derived) = derivation.compute(&inputs) else {
                tracing::trace!(sensor_id = %id, "virtual sensor waiting for sources");
                continue;
            };
            let output = Reading::new(
                id.clone(),
                SensorType::Virtual,
                derived.measurement,
                derived.value,
                derived.unit,
                sensornet_domain::time::now(),
            );
            if publish_reading(&self.registry, &self.publisher, output.clone()).is_err() {
                continue;
            }
            enter_state(&self.registry, &self.publisher, &id, SensorState::Online, None);
            tracing::debug!(sensor_id = %id, value = output.value, "virtual sensor recomputed");
            published.push(output);
        }
        published
    }

    /// Consume reading events from `subscription` until the bus closes.
    pub fn spawn(self: &Arc<Self>, mut subscription: Subscription) -> JoinHandle<()> {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let Some(reading) = event.as_reading() {
                    resolver.handle_reading(reading);
                }
            }
            tracing::debug!("virtual sensor resolver stopped");
        })
    }
}
