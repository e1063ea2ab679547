//! ---
//! zl_section: "01-core-functionality"
//! zl_subsection: "binary"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Binary entrypoint for the zillad link daemon and tools."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use zilla_codec::{DecodeEvent, StreamDecoder};
use zilla_common::{init_tracing, AppConfig};
use zilla_link::{EndpointProvider, LinkManager};
use zilla_metrics::{new_registry, spawn_http_server, LinkMetrics};
use zilla_sim::SimulatedMetricsGenerator;
use zilla_telemetry::{ConnectionState, MetricsSnapshot};

#[derive(Debug, Parser)]
#[command(author, version, about = "Zilla controller telemetry link", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Connect to a device and stream snapshots as JSON lines")]
    Run {
        #[arg(long, help = "Device identifier from the [devices] table")]
        device: String,
    },
    #[command(about = "List configured devices")]
    Devices,
    #[command(about = "Print simulated snapshots as JSON lines")]
    Simulate {
        #[arg(long, default_value_t = 10)]
        ticks: u64,
        #[arg(long, help = "Seed overriding simulation.seed")]
        seed: Option<u64>,
    },
    #[command(about = "Connect, send one command and disconnect")]
    Send {
        #[arg(long)]
        device: String,
        command: String,
    },
    #[command(about = "Decode a captured byte stream")]
    Decode { file: PathBuf },
}

/// Snapshot plus the derived values, as printed on stdout.
#[derive(Serialize)]
struct SnapshotLine<'a> {
    #[serde(flatten)]
    snapshot: &'a MetricsSnapshot,
    power_output: f32,
    motor_efficiency: Option<f32>,
}

impl<'a> SnapshotLine<'a> {
    fn new(snapshot: &'a MetricsSnapshot) -> Self {
        Self {
            snapshot,
            power_output: snapshot.power_output(),
            motor_efficiency: snapshot.motor_efficiency(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = AppConfig::load_with_source(cli.config.as_deref(), &AppConfig::DEFAULT_CANDIDATES)?;
    let config = loaded.config;
    config.validate()?;
    init_tracing("zillad", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found, using defaults"),
    }

    match cli.command {
        Commands::Run { device } => run(config, &device).await,
        Commands::Devices => list_devices(&config),
        Commands::Simulate { ticks, seed } => simulate(&config, ticks, seed),
        Commands::Send { device, command } => send(config, &device, &command).await,
        Commands::Decode { file } => decode(&config, &file),
    }
}

fn provider(config: &AppConfig) -> Result<Arc<EndpointProvider>> {
    let provider = EndpointProvider::from_config(&config.devices)
        .context("invalid device endpoint in configuration")?;
    Ok(Arc::new(provider))
}

async fn run(config: AppConfig, device: &str) -> Result<()> {
    let registry = new_registry();
    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry.clone(), config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let link = LinkManager::builder(config.clone(), provider(&config)?)
        .metrics(LinkMetrics::new(registry)?)
        .build();
    link.start();
    let mut snapshots = link.subscribe_metrics();
    let mut errors = link.subscribe_errors();
    link.connect(device).await?;

    let stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("ctrl-c received; shutting down");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let line = serde_json::to_string(&SnapshotLine::new(&snapshot))?;
                writeln!(stdout.lock(), "{line}")?;
            }
            changed = errors.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(message) = errors.borrow_and_update().clone() {
                    warn!(%message, state = %link.state(), "link error");
                }
            }
        }
    }

    link.stop().await;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn list_devices(config: &AppConfig) -> Result<()> {
    let provider = provider(config)?;
    let mut stdout = std::io::stdout().lock();
    for (id, device) in &config.devices {
        let name = device.display_name.as_deref().unwrap_or(id);
        let endpoint = provider
            .endpoint(id)
            .map(|endpoint| endpoint.to_string())
            .unwrap_or_default();
        writeln!(stdout, "{id}\t{name}\t{endpoint}")?;
    }
    Ok(())
}

fn simulate(config: &AppConfig, ticks: u64, seed: Option<u64>) -> Result<()> {
    let mut generator = match seed.or(config.simulation.seed) {
        Some(seed) => SimulatedMetricsGenerator::new(seed),
        None => SimulatedMetricsGenerator::from_entropy(),
    };
    let mut snapshot = MetricsSnapshot::default();
    let mut stdout = std::io::stdout().lock();
    for _ in 0..ticks {
        generator.tick().apply_to(&mut snapshot);
        snapshot.timestamp = Utc::now();
        writeln!(stdout, "{}", serde_json::to_string(&SnapshotLine::new(&snapshot))?)?;
    }
    Ok(())
}

async fn send(config: AppConfig, device: &str, command: &str) -> Result<()> {
    let deadline = config.link.connect_timeout;
    let link = LinkManager::new(config.clone(), provider(&config)?);
    let mut states = link.subscribe_state();
    link.connect(device).await?;

    let outcome = tokio::time::timeout(deadline, async {
        loop {
            match *states.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Error => return Err(()),
                _ => {}
            }
            if states.changed().await.is_err() {
                return Err(());
            }
        }
    })
    .await;

    let result = match outcome {
        Ok(Ok(())) => link
            .try_send_command(command)
            .await
            .with_context(|| format!("sending {command:?} to {device}")),
        Ok(Err(())) => Err(anyhow!(
            "connect to {device} failed: {}",
            link.last_error().unwrap_or_else(|| "unknown error".into())
        )),
        Err(_) => Err(anyhow!("connect to {device} timed out after {deadline:?}")),
    };
    link.disconnect().await;
    result?;
    info!(%device, %command, "command sent");
    Ok(())
}

fn decode(config: &AppConfig, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("unable to read {}", file.display()))?;
    let mut decoder = StreamDecoder::new(config.decoder.max_frame_len);
    let mut stdout = std::io::stdout().lock();
    for chunk in bytes.chunks(config.link.read_chunk_size) {
        for event in decoder.feed(chunk) {
            match event {
                DecodeEvent::Delta(delta) => {
                    writeln!(stdout, "{}", serde_json::to_string(&delta)?)?;
                }
                DecodeEvent::Discarded(reason) => {
                    writeln!(stdout, "# discarded: {reason}")?;
                }
            }
        }
    }
    if decoder.pending() > 0 {
        writeln!(stdout, "# {} trailing bytes without terminator", decoder.pending())?;
    }
    writeln!(stdout, "# stats: {}", serde_json::to_string(&decoder.stats())?)?;
    Ok(())
}
