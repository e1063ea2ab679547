//! ---
//! zl_section: "02-telemetry-model"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Telemetry data model exports."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
//! Data model shared by the decoder, the simulator, and the link manager.
//!
//! Everything in this crate is plain data. Snapshots are values: producers
//! build a [`MetricsDelta`] and the publisher merges it into the current
//! [`MetricsSnapshot`].

pub mod delta;
pub mod device;
pub mod error_code;
pub mod snapshot;
pub mod state;

pub use delta::MetricsDelta;
pub use device::DeviceDescriptor;
pub use error_code::ErrorCode;
pub use snapshot::{ControllerStatus, MetricsSnapshot, UnitInterval};
pub use state::ConnectionState;
