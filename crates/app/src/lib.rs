//! # sensornet-app
//!
//! Runtime layer — the sensor network's moving parts and **port definitions**.
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement:
//!   - `SensorDriver` — initialise and read one physical sensor
//!   - `ActionExecutor` — carry out webhook/email/sms/log alert actions
//!   - `EventPublisher` — publish payloads on a topic
//!   - `EventHandler` — push-style bus subscriber
//! - Provide the runtime components:
//!   - `SensorRegistry` — authoritative sensor store and lifecycle
//!   - `EventBus` — in-process topic bus with bounded per-subscriber queues
//!   - `Poller` — one cancellable worker per physical sensor
//!   - `AlertEngine` — rule evaluation with hysteresis, actions, alert events
//!   - `VirtualSensorResolver` — derived readings from source readings
//!   - `SensorRuntime` — wires all of the above
//!
//! ## Dependency rule
//! Depends on `sensornet-domain` only (plus tokio for tasks, timers and
//! channels). Never imports adapter crates. Adapters depend on *this* crate,
//! not the reverse.

pub mod alert_engine;
pub mod dispatch;
pub mod event_bus;
mod lifecycle;
pub mod poller;
pub mod ports;
pub mod registry;
pub mod runtime;
pub mod virtual_resolver;
