//! ---
//! zl_section: "01-core-functionality"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "TOML configuration model, discovery and validation."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_read_chunk_size() -> usize {
    1024
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_frame_len() -> usize {
    256
}

fn default_terminator() -> String {
    "\r\n".to_owned()
}

fn default_command_max_len() -> usize {
    128
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Line speed for serial endpoints without an explicit `baud_rate`.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9899))
}

/// Primary configuration object for the link daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub devices: IndexMap<String, DeviceConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "ZILLA_CONFIG";
    pub const DEFAULT_CANDIDATES: [&'static str; 2] =
        ["configs/zilla.toml", "configs/zilla.example.toml"];

    /// Resolve the configuration file: `explicit`, then `ZILLA_CONFIG`, then
    /// the first existing candidate. Falls back to defaults when none exist.
    pub fn load_with_source<P: AsRef<Path>>(
        explicit: Option<&Path>,
        candidates: &[P],
    ) -> Result<LoadedAppConfig> {
        if let Some(path) = explicit {
            return Self::loaded_from(path.to_path_buf());
        }

        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                return Self::loaded_from(PathBuf::from(env_path));
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                return Self::loaded_from(candidate.as_ref().to_path_buf());
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found, using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn loaded_from(path: PathBuf) -> Result<LoadedAppConfig> {
        let config = Self::from_path(&path)?;
        Ok(LoadedAppConfig {
            config,
            source: Some(path),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Look up a configured device.
    pub fn device(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.get(id)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.link.poll_interval.is_zero() {
            bail!("link.poll_interval must be greater than zero");
        }
        if self.link.read_chunk_size == 0 {
            bail!("link.read_chunk_size must be greater than zero");
        }
        if self.link.connect_timeout.is_zero() {
            bail!("link.connect_timeout must be greater than zero");
        }
        if self.decoder.max_frame_len == 0 {
            bail!("decoder.max_frame_len must be greater than zero");
        }
        if self.command.max_len == 0 {
            bail!("command.max_len must be greater than zero");
        }
        if self.command.terminator.is_empty() {
            bail!("command.terminator must not be empty");
        }
        if self.command.write_timeout.is_zero() {
            bail!("command.write_timeout must be greater than zero");
        }
        if self.simulation.tick_interval.is_zero() {
            bail!("simulation.tick_interval must be greater than zero");
        }
        self.reconnect.validate()?;
        for (id, device) in &self.devices {
            device.validate(id)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Which producer may write the published snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SourcePolicy {
    /// Decoded telemetry only.
    Live,
    /// Simulator only; live deltas are ignored.
    Simulated,
    /// Simulator whenever no session is connected.
    #[default]
    LiveWithFallback,
}

/// What happens to the snapshot when a session ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotRetention {
    #[default]
    Retain,
    Reset,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Read loop liveness poll.
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub snapshot_retention: SnapshotRetention,
    #[serde(default)]
    pub source: SourcePolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            read_chunk_size: default_read_chunk_size(),
            connect_timeout: default_connect_timeout(),
            snapshot_retention: SnapshotRetention::default(),
            source: SourcePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "default_terminator")]
    pub terminator: String,
    #[serde(default = "default_command_max_len")]
    pub max_len: usize,
    /// Upper bound on writing and flushing one command.
    #[serde(default = "default_write_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub write_timeout: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            terminator: default_terminator(),
            max_len: default_command_max_len(),
            write_timeout: default_write_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fixed seed for reproducible runs. Entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_tick_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick_interval: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            tick_interval: default_tick_interval(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_attempts == 0 {
            bail!("reconnect.max_attempts must be greater than zero when enabled");
        }
        if self.base_delay > self.max_delay {
            bail!("reconnect.base_delay must not exceed reconnect.max_delay");
        }
        Ok(())
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// A known controller link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub display_name: Option<String>,
    /// `tcp://host:port`, `file://<capture>` or a path to a serial node.
    pub endpoint: String,
    /// Line speed when `endpoint` is a serial node. Ignored otherwise.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl DeviceConfig {
    fn validate(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            bail!("device identifiers must not be empty");
        }
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            bail!("device '{id}' has an empty endpoint");
        }
        if let Some(address) = endpoint.strip_prefix("tcp://") {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("device '{id}' endpoint '{endpoint}' is missing a port"))?;
            if host.is_empty() {
                bail!("device '{id}' endpoint '{endpoint}' is missing a host");
            }
            port.parse::<u16>().map_err(|_| {
                anyhow!("device '{id}' endpoint '{endpoint}' has an invalid port")
            })?;
        } else if let Some(path) = endpoint.strip_prefix("file://") {
            if path.trim().is_empty() {
                bail!("device '{id}' endpoint '{endpoint}' is missing a path");
            }
        } else if endpoint.contains("://") {
            bail!("device '{id}' endpoint '{endpoint}' uses an unsupported scheme");
        } else if self.baud_rate == 0 {
            bail!("device '{id}' baud_rate must be greater than zero");
        }
        Ok(())
    }
}
