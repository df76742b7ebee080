//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the runtime and the outside world.
//! They are defined here (in `app`) so that both the runtime and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod action_executor;
pub mod event_handler;
pub mod event_publisher;
pub mod sensor_driver;

pub use action_executor::ActionExecutor;
pub use event_handler::EventHandler;
pub use event_publisher::EventPublisher;
pub use sensor_driver::SensorDriver;
