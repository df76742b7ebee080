//! # sensornet-domain
//!
//! Pure domain model for the sensornet monitoring runtime.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Sensors** (typed measurement sources, their configuration and lifecycle)
//! - Define **Readings** (immutable timestamped measurements) and units
//! - Define **Events** (topic envelopes carried by the bus) and topic patterns
//! - Define **Alert rules** (comparison → hysteresis → actions) and the
//!   per-rule **alert instance** state machine
//! - Define **Derivations** for virtual sensors (aggregates and formulas)
//! - Contain all invariant enforcement and domain logic
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod alert;
pub mod derivation;
pub mod event;
pub mod reading;
pub mod sensor;
