//! Sensor runtime — wires registry, bus, poller, alert engine and virtual
//! sensor resolver into one handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use sensornet_domain::alert::{AlertInstance, AlertRule};
use sensornet_domain::error::{SensorNetError, ValidationError};
use sensornet_domain::event::TopicPattern;
use sensornet_domain::id::{RuleId, SensorId};
use sensornet_domain::sensor::{ConfigPatch, Sensor, SensorDefinition, SensorFilter, SensorState};

use crate::alert_engine::{AlertEngine, AlertEngineConfig};
use crate::dispatch::{self, DispatchOptions};
use crate::event_bus::{DEFAULT_CAPACITY, EventBus, Subscription, reading_patterns};
use crate::poller::{Poller, PollerConfig};
use crate::ports::{ActionExecutor, EventHandler, SensorDriver};
use crate::registry::SensorRegistry;
use crate::virtual_resolver::VirtualSensorResolver;

/// Tunables of every runtime component.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub bus_capacity: usize,
    pub poller: PollerConfig,
    pub alerts: AlertEngineConfig,
    pub dispatch: DispatchOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_CAPACITY,
            poller: PollerConfig::default(),
            alerts: AlertEngineConfig::default(),
            dispatch: DispatchOptions::default(),
        }
    }
}

/// Point-in-time health summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStatus {
    pub sensors_by_state: HashMap<SensorState, usize>,
    pub active_alerts: usize,
    pub subscribers: usize,
    pub poll_workers: usize,
}

impl RuntimeStatus {
    /// Number of sensors currently in `state`.
    #[must_use]
    pub fn sensors_in(&self, state: SensorState) -> usize {
        self.sensors_by_state.get(&state).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_sensors(&self) -> usize {
        self.sensors_by_state.values().sum()
    }
}

/// The running sensor network.
pub struct SensorRuntime<X> {
    registry: Arc<SensorRegistry>,
    bus: EventBus,
    poller: Arc<Poller<EventBus>>,
    engine: Arc<AlertEngine<X, EventBus>>,
    resolver: Arc<VirtualSensorResolver<EventBus>>,
    dispatch: DispatchOptions,
    shutdown_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<X> SensorRuntime<X>
where
    X: ActionExecutor + 'static,
{
    /// Build every component and spawn the background consumers.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal bus subscriptions cannot be created.
    pub fn start(config: RuntimeConfig, executor: X) -> Result<Self, SensorNetError> {
        let registry = Arc::new(SensorRegistry::new());
        let bus = EventBus::new(config.bus_capacity);
        let shutdown_timeout = config.poller.shutdown_timeout;

        let poller = Arc::new(Poller::new(
            Arc::clone(&registry),
            bus.clone(),
            config.poller,
        ));
        let engine = Arc::new(AlertEngine::new(
            Arc::clone(&registry),
            executor,
            bus.clone(),
            config.alerts,
        ));
        let resolver = Arc::new(VirtualSensorResolver::new(
            Arc::clone(&registry),
            bus.clone(),
        ));

        let tasks = vec![
            poller.supervise(),
            resolver.spawn(bus.subscribe_to("virtual-sensors", reading_patterns())?),
            engine.spawn(bus.subscribe_to("alert-engine", reading_patterns())?),
        ];
        tracing::info!(bus_capacity = config.bus_capacity, "sensor runtime started");

        Ok(Self {
            registry,
            bus,
            poller,
            engine,
            resolver,
            dispatch: config.dispatch,
            shutdown_timeout,
            tasks: Mutex::new(tasks),
        })
    }

    /// Register a sensor and start producing its readings.
    ///
    /// Physical sensors are polled through `driver`; virtual sensors are
    /// computed from their derivation sources and take no driver.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::Validation`] for an invalid definition, a physical
    ///   sensor without driver, or a derivation cycle
    /// - [`SensorNetError::DuplicateId`] if the id is, or was, in use
    pub fn register_sensor(
        &self,
        definition: SensorDefinition,
        driver: Option<Arc<dyn SensorDriver>>,
    ) -> Result<SensorId, SensorNetError> {
        if let Some(derivation) = &definition.derivation {
            if let Some(id) = &definition.id {
                self.resolver.check(id, derivation)?;
            }
            if driver.is_some() {
                tracing::warn!("driver supplied for a virtual sensor is ignored");
            }
            let id = self.registry.register(definition)?;
            if let Err(err) = self.resolver.track(&id) {
                self.registry.unregister(&id)?;
                return Err(err);
            }
            return Ok(id);
        }

        let driver = driver.ok_or(ValidationError::MissingDriver)?;
        let id = self.registry.register(definition)?;
        if let Err(err) = self.poller.start(&id, driver) {
            self.registry.unregister(&id)?;
            return Err(err);
        }
        Ok(id)
    }

    /// Remove a sensor. Its worker stops scheduling reads; virtual sensors
    /// stop being recomputed.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if the sensor is unknown.
    pub fn unregister_sensor(&self, id: &SensorId) -> Result<Sensor, SensorNetError> {
        let sensor = self.registry.unregister(id)?;
        if self.resolver.is_tracked(id) {
            self.resolver.untrack(id)?;
        } else {
            self.poller.stop(id);
        }
        Ok(sensor)
    }

    /// Apply a configuration patch; interval and enable changes take effect
    /// at the next scheduling decision.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::NotFound`] if the sensor is unknown
    /// - [`SensorNetError::Validation`] if the result is out of range
    pub fn update_sensor_config(
        &self,
        id: &SensorId,
        patch: &ConfigPatch,
    ) -> Result<Sensor, SensorNetError> {
        self.registry.update_config(id, patch)
    }

    /// # Errors
    ///
    /// Returns [`SensorNetError::NotFound`] if the sensor is unknown.
    pub fn get_sensor(&self, id: &SensorId) -> Result<Sensor, SensorNetError> {
        self.registry.get(id)
    }

    #[must_use]
    pub fn list_sensors(&self, filter: &SensorFilter) -> Vec<Sensor> {
        self.registry.list(filter)
    }

    /// # Errors
    ///
    /// See [`AlertEngine::add_rule`].
    pub fn add_rule(&self, rule: AlertRule) -> Result<RuleId, SensorNetError> {
        self.engine.add_rule(rule)
    }

    /// # Errors
    ///
    /// See [`AlertEngine::replace_rule`].
    pub fn replace_rule(&self, rule: AlertRule) -> Result<AlertRule, SensorNetError> {
        self.engine.replace_rule(rule)
    }

    /// # Errors
    ///
    /// See [`AlertEngine::remove_rule`].
    pub fn remove_rule(&self, id: &RuleId) -> Result<AlertRule, SensorNetError> {
        self.engine.remove_rule(id)
    }

    /// # Errors
    ///
    /// See [`AlertEngine::get_rule`].
    pub fn get_rule(&self, id: &RuleId) -> Result<AlertRule, SensorNetError> {
        self.engine.get_rule(id)
    }

    #[must_use]
    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.engine.list_rules()
    }

    #[must_use]
    pub fn list_active_alerts(&self) -> Vec<AlertInstance> {
        self.engine.list_active_instances()
    }

    /// Pull-style subscription to one topic pattern (`"*"`, `"reading.*"`, …).
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::Validation`] for a malformed pattern
    /// - [`SensorNetError::BusClosed`] after shutdown
    pub fn subscribe(&self, pattern: &str) -> Result<Subscription, SensorNetError> {
        self.bus.subscribe(pattern)
    }

    /// Pull-style subscription to several patterns, each event delivered once.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::BusClosed`] after shutdown.
    pub fn subscribe_to(
        &self,
        name: &str,
        patterns: Vec<TopicPattern>,
    ) -> Result<Subscription, SensorNetError> {
        self.bus.subscribe_to(name, patterns)
    }

    /// Push-style subscription: `handler` is driven by a dispatch task until
    /// shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`SensorNetError::BusClosed`] after shutdown.
    pub fn add_handler<H: EventHandler>(
        &self,
        name: &str,
        patterns: Vec<TopicPattern>,
        handler: H,
    ) -> Result<(), SensorNetError> {
        let subscription = self.bus.subscribe_to(name, patterns)?;
        let task = dispatch::spawn(subscription, handler, self.dispatch);
        self.tasks.lock().push(task);
        tracing::debug!(subscriber = name, "event handler added");
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> RuntimeStatus {
        let mut sensors_by_state = HashMap::new();
        for sensor in self.registry.list(&SensorFilter::all()) {
            *sensors_by_state.entry(sensor.state).or_default() += 1;
        }
        RuntimeStatus {
            sensors_by_state,
            active_alerts: self.engine.active_count(),
            subscribers: self.bus.subscriber_count(),
            poll_workers: self.poller.active_workers(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Stop polling, close the bus and let consumers drain what is queued.
    ///
    /// Each phase is bounded by the poller's shutdown timeout; consumers still
    /// running after it are aborted.
    pub async fn shutdown(&self) {
        tracing::info!("sensor runtime shutting down");
        self.poller.shutdown().await;
        self.bus.close();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.shutdown_timeout, join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!(consumers = aborts.len(), "bus consumers did not drain in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        tracing::info!("sensor runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use sensornet_domain::alert::{Action, AlertTransition, Operator};
    use sensornet_domain::derivation::{AggregateFunction, Derivation};
    use sensornet_domain::error::{ActionExecutionError, SensorInitError, SensorReadError};
    use sensornet_domain::event::Event;
    use sensornet_domain::sensor::SensorType;

    struct FixedDriver(f64);

    #[async_trait]
    impl SensorDriver for FixedDriver {
        async fn initialize(&self) -> Result<(), SensorInitError> {
            Ok(())
        }

        async fn read(&self) -> Result<f64, SensorReadError> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    impl ActionExecutor for CountingExecutor {
        fn execute(
            &self,
            _action: &Action,
            _transition: &AlertTransition,
        ) -> impl Future<Output = Result<(), ActionExecutionError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        seen: AtomicUsize,
    }

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &Event) -> impl Future<Output = Result<(), SensorNetError>> + Send {
            self.seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }
    }

    type Runtime = SensorRuntime<Arc<CountingExecutor>>;

    fn start() -> (Runtime, Arc<CountingExecutor>) {
        let executor = Arc::new(CountingExecutor::default());
        let runtime = SensorRuntime::start(RuntimeConfig::default(), Arc::clone(&executor)).unwrap();
        (runtime, executor)
    }

    fn temperature(id: &str) -> SensorDefinition {
        SensorDefinition::builder()
            .id(id.parse().unwrap())
            .sensor_type(SensorType::Temperature)
            .name(id)
            .update_interval_secs(10)
            .build()
            .unwrap()
    }

    fn average_of(id: &str, sources: &[&str]) -> SensorDefinition {
        SensorDefinition::builder()
            .id(id.parse().unwrap())
            .name(id)
            .derivation(Derivation::Aggregate {
                function: AggregateFunction::Average,
                sources: sources.iter().map(|s| s.parse().unwrap()).collect(),
            })
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn should_trigger_alert_from_polled_reading() {
        let (runtime, executor) = start();
        let mut alerts = runtime.subscribe("alert.*").unwrap();
        runtime
            .add_rule(
                AlertRule::builder()
                    .id("hot".parse().unwrap())
                    .sensor_id("greenhouse".parse().unwrap())
                    .field("temperature")
                    .condition(Operator::Gt, 25.0)
                    .action(Action::Log { message: None })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        runtime
            .register_sensor(temperature("greenhouse"), Some(Arc::new(FixedDriver(30.0))))
            .unwrap();

        let event = alerts.recv().await.unwrap();
        assert_eq!(event.topic.as_str(), "alert.triggered");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.status().active_alerts, 1);
        assert_eq!(runtime.list_active_alerts().len(), 1);
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_physical_sensor_without_driver() {
        let (runtime, _) = start();
        let result = runtime.register_sensor(temperature("greenhouse"), None);
        assert!(matches!(
            result,
            Err(SensorNetError::Validation(ValidationError::MissingDriver))
        ));
        assert!(runtime.list_sensors(&SensorFilter::all()).is_empty());
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_compute_virtual_sensor_from_polled_sources() {
        let (runtime, _) = start();
        let mut virtual_readings = runtime.subscribe("reading.avg").unwrap();
        runtime
            .register_sensor(average_of("avg", &["a", "b"]), None)
            .unwrap();
        runtime
            .register_sensor(temperature("a"), Some(Arc::new(FixedDriver(30.0))))
            .unwrap();
        runtime
            .register_sensor(temperature("b"), Some(Arc::new(FixedDriver(24.0))))
            .unwrap();

        let event = virtual_readings.recv().await.unwrap();
        let reading = event.as_reading().unwrap();
        assert_eq!(reading.sensor_type, SensorType::Virtual);
        assert!((reading.value - 27.0).abs() < 1e-9);
        assert_eq!(
            runtime.get_sensor(&"avg".parse().unwrap()).unwrap().state,
            SensorState::Online
        );
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_derivation_cycle_without_registering() {
        let (runtime, _) = start();
        runtime.register_sensor(average_of("x", &["y"]), None).unwrap();
        let result = runtime.register_sensor(average_of("y", &["x"]), None);
        assert!(matches!(
            result,
            Err(SensorNetError::Validation(ValidationError::DerivationCycle { .. }))
        ));
        assert!(runtime.get_sensor(&"y".parse().unwrap()).is_err());
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_worker_when_sensor_unregistered() {
        let (runtime, _) = start();
        let id = runtime
            .register_sensor(temperature("greenhouse"), Some(Arc::new(FixedDriver(20.0))))
            .unwrap();
        assert_eq!(runtime.status().poll_workers, 1);

        let removed = runtime.unregister_sensor(&id).unwrap();
        assert_eq!(removed.id, id);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runtime.status().poll_workers, 0);
        assert!(matches!(
            runtime.unregister_sensor(&id),
            Err(SensorNetError::NotFound(_))
        ));
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_sensor_counts_per_state() {
        let (runtime, _) = start();
        let mut status = runtime.subscribe("status.greenhouse").unwrap();
        runtime
            .register_sensor(temperature("greenhouse"), Some(Arc::new(FixedDriver(20.0))))
            .unwrap();
        runtime.register_sensor(average_of("avg", &["greenhouse", "missing"]), None).unwrap();

        while let Some(event) = status.recv().await {
            if event.as_status().is_some_and(|s| s.to == SensorState::Online) {
                break;
            }
        }
        let snapshot = runtime.status();
        assert_eq!(snapshot.total_sensors(), 2);
        assert_eq!(snapshot.sensors_in(SensorState::Online), 1);
        assert_eq!(snapshot.sensors_in(SensorState::Initializing), 1);
        assert_eq!(snapshot.active_alerts, 0);
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_drive_handlers_and_close_bus_on_shutdown() {
        let (runtime, _) = start();
        let handler = Arc::new(CountingHandler::default());
        runtime
            .add_handler("counter", vec![TopicPattern::All], Arc::clone(&handler))
            .unwrap();
        let mut readings = runtime.subscribe("reading.greenhouse").unwrap();
        runtime
            .register_sensor(temperature("greenhouse"), Some(Arc::new(FixedDriver(20.0))))
            .unwrap();
        readings.recv().await.unwrap();

        runtime.shutdown().await;
        assert!(handler.seen.load(Ordering::SeqCst) > 0);
        assert!(matches!(
            runtime.subscribe("*"),
            Err(SensorNetError::BusClosed)
        ));
        assert!(runtime.bus().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn should_apply_config_update_through_runtime() {
        let (runtime, _) = start();
        let id = runtime
            .register_sensor(temperature("greenhouse"), Some(Arc::new(FixedDriver(20.0))))
            .unwrap();
        let updated = runtime
            .update_sensor_config(
                &id,
                &ConfigPatch {
                    update_interval_secs: Some(60),
                    ..ConfigPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.config.update_interval_secs, 60);
        assert!(matches!(
            runtime.update_sensor_config(
                &id,
                &ConfigPatch {
                    update_interval_secs: Some(0),
                    ..ConfigPatch::default()
                },
            ),
            Err(SensorNetError::Validation(_))
        ));
        runtime.shutdown().await;
    }
}
