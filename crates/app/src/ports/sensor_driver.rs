//! Sensor driver port — hardware (or simulated) access for physical sensors.

use async_trait::async_trait;

use sensornet_domain::error::{SensorInitError, SensorReadError};

/// Reads raw values from one physical sensor.
///
/// Object-safe so that drivers of different kinds can be scheduled side by
/// side as `Arc<dyn SensorDriver>`. The poller applies timeouts and the
/// calibration offset; drivers only talk to the device.
#[async_trait]
pub trait SensorDriver: Send + Sync {
    /// Prepare the device. Called once before the first read and again
    /// after every failed initialisation, with backoff.
    async fn initialize(&self) -> Result<(), SensorInitError>;

    /// Take one raw measurement, in the sensor type's default unit.
    async fn read(&self) -> Result<f64, SensorReadError>;

    /// Release the device. Called when the sensor's worker stops.
    async fn shutdown(&self) {}
}
