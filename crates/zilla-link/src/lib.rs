//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Telemetry link manager exports."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
//! The telemetry link: connection state machine, read loop, latest-value
//! publisher, simulated fallback and command writer.
//!
//! Most callers construct a [`LinkManager`] with a [`TransportProvider`] and
//! observe it through the `subscribe_*` channels.

pub mod command;
pub mod connection;
pub mod error;
pub mod manager;
pub mod publisher;
pub mod reconnect;
pub mod simulation;
pub mod transport;

pub use command::CommandWriter;
pub use connection::{ConnectionManager, ConnectionSettings};
pub use error::{CommandError, ConnectionError, LinkError, Result};
pub use manager::{LinkManager, LinkManagerBuilder};
pub use publisher::{producer_for, MetricsPublisher, MetricsSink, SourceKind};
pub use reconnect::{spawn_supervisor, ReconnectPolicy};
pub use simulation::spawn_simulation;
pub use transport::{
    BoxedReader, BoxedWriter, Endpoint, EndpointProvider, TransportProvider, TransportStreams,
};
