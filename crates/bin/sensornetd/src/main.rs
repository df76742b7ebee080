//! # sensornetd — sensornet daemon
//!
//! Composition root that wires the runtime together and keeps it running.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialise `tracing` with the configured filter
//! - Start the sensor runtime with a logging action executor
//! - Register configured sensors (simulated drivers) and alert rules
//! - Handle graceful shutdown on Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod actions;
mod config;
mod event_log;
mod wiring;

use sensornet_app::runtime::SensorRuntime;
use tracing_subscriber::EnvFilter;

use crate::actions::LoggingActionExecutor;
use crate::config::Config;
use crate::event_log::EventLog;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    let runtime = SensorRuntime::start(config.runtime.to_runtime_config(), LoggingActionExecutor)?;
    runtime.add_handler("event-log", event_log::patterns(), EventLog)?;

    let installed = match wiring::install(&runtime, config.sensors, config.rules) {
        Ok(installed) => installed,
        Err(err) => {
            runtime.shutdown().await;
            return Err(err.into());
        }
    };
    tracing::info!(
        physical = installed.physical,
        virtual_sensors = installed.virtual_sensors,
        rules = installed.rules,
        "sensornetd running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    let status = runtime.status();
    tracing::info!(
        sensors = status.total_sensors(),
        active_alerts = status.active_alerts,
        "shutdown requested"
    );
    runtime.shutdown().await;
    Ok(())
}
