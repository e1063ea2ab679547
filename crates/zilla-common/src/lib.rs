//! ---
//! zl_section: "01-core-functionality"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Shared configuration and logging primitives."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
//! Shared primitives for the Zilla link workspace: configuration loading and
//! tracing initialisation.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CommandConfig, DecoderConfig, DeviceConfig, LinkConfig, LoadedAppConfig,
    LoggingConfig, MetricsConfig, ReconnectConfig, SimulationConfig, SnapshotRetention,
    SourcePolicy, DEFAULT_BAUD_RATE,
};
pub use logging::{init_tracing, LogFormat};
