//! Alert engine — evaluates rules against readings and runs their actions.
//!
//! Each rule owns exactly one [`AlertInstance`]. A reading is fed to every
//! enabled rule of its sensor; state changes are computed under the engine
//! lock, then, with the lock released, the triggered rules run their actions
//! (in list order, each failure isolated) and the transition is published on
//! `alert.triggered` or `alert.resolved`.
//!
//! When fed from the bus ([`AlertEngine::spawn`]) every rule gets its own lane
//! task: transitions of one rule are applied in order, while the consumer
//! moves on to the next reading without waiting for any action.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use sensornet_domain::alert::{Action, AlertInstance, AlertRule, AlertState, AlertTransition, StateChange};
use sensornet_domain::error::{DuplicateIdError, NotFoundError, SensorNetError};
use sensornet_domain::event::EventPayload;
use sensornet_domain::id::{RuleId, SensorId};
use sensornet_domain::reading::Reading;

use crate::event_bus::Subscription;
use crate::ports::{ActionExecutor, EventPublisher};
use crate::registry::SensorRegistry;

/// Engine-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertEngineConfig {
    /// How long a resolved instance is still listed as current.
    pub display_window: Duration,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            display_window: Duration::from_secs(300),
        }
    }
}

struct Entry {
    rule: Arc<AlertRule>,
    instance: AlertInstance,
}

#[derive(Default)]
struct State {
    rules: BTreeMap<RuleId, Entry>,
    by_sensor: HashMap<SensorId, Vec<RuleId>>,
}

impl State {
    fn index(&mut self, rule: &AlertRule) {
        self.by_sensor
            .entry(rule.sensor_id.clone())
            .or_default()
            .push(rule.id.clone());
    }

    fn unindex(&mut self, rule: &AlertRule) {
        if let Some(ids) = self.by_sensor.get_mut(&rule.sensor_id) {
            ids.retain(|id| id != &rule.id);
            if ids.is_empty() {
                self.by_sensor.remove(&rule.sensor_id);
            }
        }
    }
}

type Pending = (Arc<AlertRule>, AlertTransition);

/// Per-rule ordered queues used by the bus consumer.
struct Lanes {
    senders: HashMap<RuleId, mpsc::UnboundedSender<Pending>>,
    tasks: JoinSet<()>,
}

impl Lanes {
    fn new() -> Self {
        Self {
            senders: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    fn send<X, P>(&mut self, engine: &Arc<AlertEngine<X, P>>, pending: Pending)
    where
        X: ActionExecutor + 'static,
        P: EventPublisher + 'static,
    {
        let id = pending.0.id.clone();
        let sender = self.senders.entry(id).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<Pending>();
            let engine = Arc::clone(engine);
            self.tasks.spawn(async move {
                while let Some((rule, transition)) = rx.recv().await {
                    engine.apply(&rule, &transition).await;
                }
            });
            tx
        });
        if let Err(mpsc::error::SendError((rule, _))) = sender.send(pending) {
            tracing::error!(rule_id = %rule.id, "alert lane closed, transition dropped");
        }
    }

    /// Close lanes of rules that no longer exist; they finish their backlog.
    fn prune<X, P>(&mut self, engine: &AlertEngine<X, P>) {
        let state = engine.state.lock();
        if self.senders.len() > state.rules.len() {
            self.senders.retain(|id, _| state.rules.contains_key(id));
        }
        drop(state);
        while self.tasks.try_join_next().is_some() {}
    }

    async fn close(mut self) {
        self.senders.clear();
        while self.tasks.join_next().await.is_some() {}
    }
}

fn rule_not_found(id: &RuleId) -> NotFoundError {
    NotFoundError {
        entity: "AlertRule",
        id: id.to_string(),
    }
}

/// Owns alert rules and their instances.
pub struct AlertEngine<X, P> {
    registry: Arc<SensorRegistry>,
    executor: X,
    publisher: P,
    config: AlertEngineConfig,
    state: Mutex<State>,
}

impl<X, P> AlertEngine<X, P>
where
    X: ActionExecutor + 'static,
    P: EventPublisher + 'static,
{
    #[must_use]
    pub fn new(
        registry: Arc<SensorRegistry>,
        executor: X,
        publisher: P,
        config: AlertEngineConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            publisher,
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Add a rule with a fresh, inactive instance.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::Validation`] if the rule is invalid
    /// - [`SensorNetError::DuplicateId`] if a rule with the same id exists
    pub fn add_rule(&self, rule: AlertRule) -> Result<RuleId, SensorNetError> {
        rule.validate()?;
        let id = rule.id.clone();
        let mut state = self.state.lock();
        if state.rules.contains_key(&id) {
            return Err(DuplicateIdError {
                entity: "AlertRule",
                id: id.to_string(),
            }
            .into());
        }
        state.index(&rule);
        state.rules.insert(
            id.clone(),
            Entry {
                instance: AlertInstance::new(id.clone()),
                rule: Arc::new(rule),
            },
        );
        tracing::info!(rule_id = %id, "alert rule added");
        Ok(id)
    }

    /// Swap a rule for a new version. The instance starts over as inactive
    /// and the new conditions apply from the next reading.
    ///
    /// Returns the previous version.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::Validation`] if the rule is invalid
    /// - [`SensorNetError::NotFound`] if no rule has this id
    pub fn replace_rule(&self, rule: AlertRule) -> Result<AlertRule, SensorNetError> {
        rule.validate()?;
        let id = rule.id.clone();
        let mut state = self.state.lock();
        let previous = state.rules.remove(&id).ok_or_else(|| rule_not_found(&id))?;
        state.unindex(&previous.rule);
        state.index(&rule);
        state.rules.insert(
            id.clone(),
            Entry {
                instance: AlertInstance::new(id.clone()),
                rule: Arc::new(rule),
            },
        );
        tracing::info!(rule_id = %id, was = %previous.instance.state, "alert rule replaced");
        Ok(Arc::unwrap_or_clone(previous.rule))
    }

    /// Remove a rule and its instance.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if no rule has this id.
    pub fn remove_rule(&self, id: &RuleId) -> Result<AlertRule, SensorNetError> {
        let mut state = self.state.lock();
        let entry = state.rules.remove(id).ok_or_else(|| rule_not_found(id))?;
        state.unindex(&entry.rule);
        tracing::info!(rule_id = %id, "alert rule removed");
        Ok(Arc::unwrap_or_clone(entry.rule))
    }

    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if no rule has this id.
    pub fn get_rule(&self, id: &RuleId) -> Result<AlertRule, SensorNetError> {
        self.state
            .lock()
            .rules
            .get(id)
            .map(|e| AlertRule::clone(&e.rule))
            .ok_or_else(|| rule_not_found(id).into())
    }

    /// Every rule, ordered by id.
    #[must_use]
    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.state
            .lock()
            .rules
            .values()
            .map(|e| AlertRule::clone(&e.rule))
            .collect()
    }

    /// Snapshot of one rule's instance.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if no rule has this id.
    pub fn instance(&self, id: &RuleId) -> Result<AlertInstance, SensorNetError> {
        self.state
            .lock()
            .rules
            .get(id)
            .map(|e| e.instance.clone())
            .ok_or_else(|| rule_not_found(id).into())
    }

    /// Active instances, plus resolved ones still inside the display window.
    #[must_use]
    pub fn list_active_instances(&self) -> Vec<AlertInstance> {
        let now = sensornet_domain::time::now();
        self.state
            .lock()
            .rules
            .values()
            .filter(|e| e.instance.is_current(now, self.config.display_window))
            .map(|e| e.instance.clone())
            .collect()
    }

    /// Number of instances currently `active`.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .rules
            .values()
            .filter(|e| e.instance.state == AlertState::Active)
            .count()
    }

    /// Evaluate every enabled rule of the reading's sensor, then apply the
    /// resulting transitions.
    ///
    /// Triggered rules run their actions concurrently with each other; the
    /// returned transitions have all been published.
    pub async fn process_reading(&self, reading: &Reading) -> Vec<AlertTransition> {
        let pending = self.evaluate(reading).into_iter().map(|(rule, transition)| async move {
            self.apply(&rule, &transition).await;
            transition
        });
        join_all(pending).await
    }

    /// Commit the state changes a reading causes, without running any action.
    fn evaluate(&self, reading: &Reading) -> Vec<Pending> {
        let changes: Vec<(Arc<AlertRule>, AlertInstance, StateChange)> = {
            let mut state = self.state.lock();
            let ids = state
                .by_sensor
                .get(&reading.sensor_id)
                .cloned()
                .unwrap_or_default();
            ids.iter()
                .filter_map(|id| {
                    let entry = state.rules.get_mut(id)?;
                    if !entry.rule.enabled {
                        return None;
                    }
                    let change = entry.instance.evaluate(&entry.rule, reading)?;
                    Some((Arc::clone(&entry.rule), entry.instance.clone(), change))
                })
                .collect()
        };
        if changes.is_empty() {
            return Vec::new();
        }

        let sensor_name = self
            .registry
            .get(&reading.sensor_id)
            .map_or_else(|_| reading.sensor_id.to_string(), |s| s.name);

        changes
            .into_iter()
            .map(|(rule, instance, change)| {
                let transition = AlertTransition::new(&rule, &instance, change, reading, sensor_name.clone());
                (rule, transition)
            })
            .collect()
    }

    async fn apply(&self, rule: &AlertRule, transition: &AlertTransition) {
        if transition.to == AlertState::Active {
            tracing::warn!(
                rule_id = %rule.id,
                rule = rule.display_name(),
                sensor_id = %transition.sensor_id,
                value = transition.reading.value,
                threshold = %transition.threshold,
                severity = %rule.severity,
                "alert triggered"
            );
            self.run_actions(rule, transition).await;
        } else {
            tracing::info!(
                rule_id = %rule.id,
                sensor_id = %transition.sensor_id,
                value = transition.reading.value,
                "alert resolved"
            );
        }
        if let Err(err) = self
            .publisher
            .publish(transition.topic(), EventPayload::Alert(transition.clone()))
        {
            tracing::debug!(rule_id = %rule.id, error = %err, "alert transition not published");
        }
    }

    /// Run actions in order; returns how many failed.
    async fn run_actions(&self, rule: &AlertRule, transition: &AlertTransition) -> usize {
        let mut failures = 0;
        for action in &rule.actions {
            if let Action::Delay { seconds } = action {
                tokio::time::sleep(Duration::from_secs(*seconds)).await;
                continue;
            }
            match AssertUnwindSafe(self.executor.execute(action, transition))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {
                    tracing::debug!(rule_id = %rule.id, action = %action, "alert action executed");
                }
                Ok(Err(err)) => {
                    failures += 1;
                    tracing::warn!(
                        rule_id = %rule.id,
                        action = %action,
                        error = %err,
                        cause = %err.source,
                        "alert action failed"
                    );
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!(rule_id = %rule.id, action = %action, "alert action panicked");
                }
            }
        }
        failures
    }

    /// Evaluate every reading delivered to `subscription` until the bus closes.
    ///
    /// Actions run on per-rule lanes, so a slow or delayed action list never
    /// holds back the evaluation of later readings.
    pub fn spawn(self: &Arc<Self>, mut subscription: Subscription) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut lanes = Lanes::new();
            while let Some(event) = subscription.recv().await {
                if let Some(reading) = event.as_reading() {
                    for pending in engine.evaluate(reading) {
                        lanes.send(&engine, pending);
                    }
                    lanes.prune(&engine);
                }
            }
            lanes.close().await;
            tracing::debug!("alert engine stopped");
        })
    }
}
