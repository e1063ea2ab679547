//! ---
//! zl_section: "04-simulation"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Simulation crate exports."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
//! Synthetic telemetry used when no live controller is attached.

pub mod generator;

pub use generator::{SimulatedMetricsGenerator, MIN_MOTOR_SPEED, PRECHARGE_TICKS};
