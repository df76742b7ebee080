//! Poller — one cancellable worker task per physical sensor.
//!
//! A worker first drives its sensor through initialisation, retrying with
//! exponential backoff while the sensor sits `offline`. Once `online` it
//! reads on the sensor's own interval, with a per-read timeout. After
//! `failure_threshold` consecutive failures the sensor moves to `error` and
//! further attempts are spaced with backoff until a read succeeds again.
//!
//! Workers never touch sensor state directly: everything goes through the
//! [`SensorRegistry`], and a worker exits as soon as the registry no longer
//! knows its sensor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sensornet_domain::error::{DuplicateIdError, SensorNetError, SensorReadError};
use sensornet_domain::id::SensorId;
use sensornet_domain::reading::Reading;
use sensornet_domain::sensor::{Sensor, SensorState};

use crate::lifecycle::{enter_state, publish_reading};
use crate::ports::{EventPublisher, SensorDriver};
use crate::registry::{RegistryChange, SensorRegistry};

/// Scheduling and failure policy shared by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Consecutive failed reads before a sensor is put in `error`.
    pub failure_threshold: u32,
    /// Read timeout as a fraction of the interval; `None` uses the full interval.
    pub timeout_fraction: Option<f64>,
    /// Upper bound on any read timeout.
    pub max_read_timeout: Duration,
    pub init_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// How long [`Poller::shutdown`] waits for in-flight reads.
    pub shutdown_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            timeout_fraction: None,
            max_read_timeout: Duration::from_secs(10),
            init_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PollerConfig {
    /// Timeout for one read of a sensor polled every `interval`.
    #[must_use]
    pub fn read_timeout(&self, interval: Duration) -> Duration {
        let base = match self.timeout_fraction {
            Some(fraction) if fraction.is_finite() && fraction > 0.0 => {
                interval.mul_f64(fraction.min(1.0))
            }
            _ => interval,
        };
        base.min(self.max_read_timeout)
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1 << exponent)
            .min(self.backoff_cap)
    }
}

struct Worker {
    cancel: CancellationToken,
    reschedule: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Owns the per-sensor worker tasks.
pub struct Poller<P> {
    registry: Arc<SensorRegistry>,
    publisher: P,
    config: PollerConfig,
    cancel: CancellationToken,
    workers: Mutex<HashMap<SensorId, Worker>>,
}

impl<P> Poller<P>
where
    P: EventPublisher + Clone + 'static,
{
    #[must_use]
    pub fn new(registry: Arc<SensorRegistry>, publisher: P, config: PollerConfig) -> Self {
        Self {
            registry,
            publisher,
            config,
            cancel: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Start polling a registered sensor through `driver`.
    ///
    /// # Errors
    ///
    /// - [`SensorNetError::NotFound`] if the registry does not know the sensor
    /// - [`SensorNetError::DuplicateId`] if a worker already runs for it
    pub fn start(&self, id: &SensorId, driver: Arc<dyn SensorDriver>) -> Result<(), SensorNetError> {
        self.registry.get(id)?;
        let mut workers = self.workers.lock();
        if workers.get(id).is_some_and(|w| !w.handle.is_finished()) {
            return Err(DuplicateIdError {
                entity: "Worker",
                id: id.to_string(),
            }
            .into());
        }
        let cancel = self.cancel.child_token();
        let reschedule = Arc::new(Notify::new());
        let context = WorkerContext {
            id: id.clone(),
            registry: Arc::clone(&self.registry),
            publisher: self.publisher.clone(),
            driver,
            config: self.config.clone(),
            cancel: cancel.clone(),
            reschedule: Arc::clone(&reschedule),
        };
        let handle = tokio::spawn(context.run());
        workers.insert(
            id.clone(),
            Worker {
                cancel,
                reschedule,
                handle,
            },
        );
        tracing::debug!(sensor_id = %id, "poll worker started");
        Ok(())
    }

    /// Stop scheduling a sensor. An in-flight read may still finish but its
    /// result is discarded. Returns whether a worker was running.
    pub fn stop(&self, id: &SensorId) -> bool {
        let Some(worker) = self.workers.lock().remove(id) else {
            return false;
        };
        worker.cancel.cancel();
        tracing::debug!(sensor_id = %id, "poll worker cancelled");
        true
    }

    /// Wake a worker so it picks up a changed interval or enable flag now.
    pub fn reschedule(&self, id: &SensorId) {
        if let Some(worker) = self.workers.lock().get(id) {
            worker.reschedule.notify_one();
        }
    }

    /// Number of workers whose task is still running.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.workers
            .lock()
            .values()
            .filter(|w| !w.handle.is_finished())
            .count()
    }

    /// Follow registry changes: stop workers of unregistered sensors and
    /// reschedule on interval changes. Ends with [`shutdown`](Self::shutdown).
    pub fn supervise(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.registry.watch();
        let poller = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    change = changes.recv() => match change {
                        Some(RegistryChange::Unregistered(id)) => {
                            poller.stop(&id);
                        }
                        Some(RegistryChange::ConfigUpdated { id, reschedule: true }) => {
                            poller.reschedule(&id);
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        })
    }

    /// Cancel every worker and wait, up to the shutdown timeout, for their
    /// in-flight reads to settle. Stragglers are aborted.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers: Vec<Worker> = self.workers.lock().drain().map(|(_, w)| w).collect();
        let aborts: Vec<_> = workers.iter().map(|w| w.handle.abort_handle()).collect();
        let count = workers.len();
        let handles = workers.into_iter().map(|w| w.handle);
        if tokio::time::timeout(self.config.shutdown_timeout, join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!(
                workers = count,
                timeout_ms = u64::try_from(self.config.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                "poll workers did not settle in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
        tracing::info!(workers = count, "poller stopped");
    }
}

enum Cycle {
    Published,
    Failed(u32),
    Stop,
}

struct WorkerContext<P> {
    id: SensorId,
    registry: Arc<SensorRegistry>,
    publisher: P,
    driver: Arc<dyn SensorDriver>,
    config: PollerConfig,
    cancel: CancellationToken,
    reschedule: Arc<Notify>,
}

impl<P: EventPublisher> WorkerContext<P> {
    async fn run(self) {
        if self.initialize().await {
            self.poll_loop().await;
        }
        self.driver.shutdown().await;
        tracing::debug!(sensor_id = %self.id, "poll worker stopped");
    }

    /// Returns `false` if the worker should stop instead of polling.
    async fn initialize(&self) -> bool {
        let mut attempt = 0;
        loop {
            if !self.enter(SensorState::Initializing, None) {
                return false;
            }
            let outcome = tokio::time::timeout(self.config.init_timeout, self.driver.initialize())
                .await
                .map_err(|_| format!("initialization timed out after {:?}", self.config.init_timeout))
                .and_then(|r| r.map_err(|e| error_chain(&e)));
            match outcome {
                Ok(()) => {
                    tracing::info!(sensor_id = %self.id, "sensor initialized");
                    return self.enter(SensorState::Online, None);
                }
                Err(reason) => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        sensor_id = %self.id,
                        attempt,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %reason,
                        "sensor initialization failed"
                    );
                    if !self.enter(SensorState::Offline, Some(reason)) {
                        return false;
                    }
                    if !self.sleep_until(Instant::now() + delay).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn poll_loop(&self) {
        let mut last_read: Option<Instant> = None;
        let mut next = Instant::now();
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = self.reschedule.notified() => {
                    let Ok(sensor) = self.registry.get(&self.id) else {
                        return;
                    };
                    let interval = sensor.config.update_interval();
                    next = last_read.map_or_else(Instant::now, |at| {
                        self.next_attempt(at, interval, sensor.consecutive_failures)
                    });
                    continue;
                }
                () = tokio::time::sleep_until(next) => {}
            }

            let Ok(sensor) = self.registry.get(&self.id) else {
                return;
            };
            let interval = sensor.config.update_interval();
            let started = Instant::now();
            if !sensor.config.enabled {
                next = started + interval;
                continue;
            }
            last_read = Some(started);
            next = match self.poll_once(&sensor, interval).await {
                Cycle::Published => started + interval,
                Cycle::Failed(failures) => self.next_attempt(started, interval, failures),
                Cycle::Stop => return,
            };
        }
    }

    /// Next read after one started at `started`: the interval, or backoff
    /// once `failures` has put the sensor in `error`.
    fn next_attempt(&self, started: Instant, interval: Duration, failures: u32) -> Instant {
        if failures >= self.config.failure_threshold {
            let attempt = failures - self.config.failure_threshold + 1;
            started + self.config.backoff(attempt).max(interval)
        } else {
            started + interval
        }
    }

    async fn poll_once(&self, sensor: &Sensor, interval: Duration) -> Cycle {
        let timeout = self.config.read_timeout(interval);
        let result = match tokio::time::timeout(timeout, self.driver.read()).await {
            Ok(Ok(raw)) if raw.is_finite() => Ok(raw),
            Ok(Ok(_)) => Err(SensorReadError::NonFinite),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SensorReadError::Timeout(timeout)),
        };
        if self.cancel.is_cancelled() {
            return Cycle::Stop;
        }

        match result {
            Ok(raw) => {
                let sensor_type = sensor.sensor_type;
                let reading = Reading::new(
                    self.id.clone(),
                    sensor_type,
                    sensor_type.measurement(),
                    raw + sensor.config.calibration_offset,
                    sensor_type.default_unit(),
                    sensornet_domain::time::now(),
                );
                let recorded = publish_reading(&self.registry, &self.publisher, reading);
                if recorded.is_err() {
                    return Cycle::Stop;
                }
                if sensor.state != SensorState::Online {
                    tracing::info!(sensor_id = %self.id, from = %sensor.state, "sensor recovered");
                    if !self.enter(SensorState::Online, Some("read succeeded".to_string())) {
                        return Cycle::Stop;
                    }
                }
                Cycle::Published
            }
            Err(err) => {
                let Ok(failures) = self.registry.record_failure(&self.id) else {
                    return Cycle::Stop;
                };
                let reason = error_chain(&err);
                tracing::warn!(sensor_id = %self.id, failures, error = %reason, "sensor read failed");
                if failures >= self.config.failure_threshold
                    && !self.enter(SensorState::Error, Some(reason))
                {
                    return Cycle::Stop;
                }
                Cycle::Failed(failures)
            }
        }
    }

    fn enter(&self, to: SensorState, reason: Option<String>) -> bool {
        enter_state(&self.registry, &self.publisher, &self.id, to, reason)
    }

    async fn sleep_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep_until(deadline) => true,
        }
    }
}

/// Render an error with its sources, `outer: inner: root`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
