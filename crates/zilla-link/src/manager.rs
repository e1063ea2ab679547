//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Explicitly constructed link manager facade."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zilla_codec::{CommandEncoder, DecoderStats};
use zilla_common::{AppConfig, ReconnectConfig, SimulationConfig, SourcePolicy};
use zilla_metrics::LinkMetrics;
use zilla_sim::SimulatedMetricsGenerator;
use zilla_telemetry::{ConnectionState, DeviceDescriptor, MetricsSnapshot};

use crate::command::CommandWriter;
use crate::connection::{ConnectionManager, ConnectionSettings};
use crate::error::{CommandError, LinkError};
use crate::publisher::MetricsPublisher;
use crate::reconnect::{spawn_supervisor, ReconnectPolicy};
use crate::simulation::spawn_simulation;
use crate::transport::TransportProvider;

/// Builder for [`LinkManager`].
pub struct LinkManagerBuilder {
    config: AppConfig,
    provider: Arc<dyn TransportProvider>,
    metrics: Option<LinkMetrics>,
    generator: Option<SimulatedMetricsGenerator>,
}

impl LinkManagerBuilder {
    /// Record link metrics into `metrics`.
    pub fn metrics(mut self, metrics: LinkMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Use a specific generator instead of one seeded from configuration.
    pub fn generator(mut self, generator: SimulatedMetricsGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn build(self) -> LinkManager {
        let publisher = Arc::new(MetricsPublisher::default());
        let connection = ConnectionManager::new(
            self.provider,
            publisher.clone(),
            ConnectionSettings::from_config(&self.config),
            self.metrics,
        );
        let encoder = CommandEncoder::new(
            self.config.command.terminator.clone(),
            self.config.command.max_len,
        );
        let commands = CommandWriter::new(&connection, encoder);
        let generator = self.generator.unwrap_or_else(|| match self.config.simulation.seed {
            Some(seed) => SimulatedMetricsGenerator::new(seed),
            None => SimulatedMetricsGenerator::from_entropy(),
        });
        let (shutdown, _) = broadcast::channel(4);

        LinkManager {
            source: self.config.link.source,
            simulation: self.config.simulation,
            reconnect: self.config.reconnect,
            connection,
            publisher,
            commands,
            generator: Mutex::new(Some(generator)),
            simulation_task: Mutex::new(None),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }
}

/// Owns the connection manager, publisher, command writer and background tasks.
///
/// Created explicitly and driven through [`LinkManager::start`] and
/// [`LinkManager::stop`].
pub struct LinkManager {
    source: SourcePolicy,
    simulation: SimulationConfig,
    reconnect: ReconnectConfig,
    connection: ConnectionManager,
    publisher: Arc<MetricsPublisher>,
    commands: CommandWriter,
    /// Parked here while the simulation driver is not running.
    generator: Mutex<Option<SimulatedMetricsGenerator>>,
    simulation_task: Mutex<Option<JoinHandle<SimulatedMetricsGenerator>>>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LinkManager {
    pub fn builder(config: AppConfig, provider: Arc<dyn TransportProvider>) -> LinkManagerBuilder {
        LinkManagerBuilder {
            config,
            provider,
            metrics: None,
            generator: None,
        }
    }

    pub fn new(config: AppConfig, provider: Arc<dyn TransportProvider>) -> Self {
        Self::builder(config, provider).build()
    }

    /// Spawn the simulation driver and reconnect supervisor as configured.
    /// Calling it again while running is a no-op. A stopped manager can be
    /// started again.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        let mut simulation = self.simulation_task.lock();
        if !tasks.is_empty() || simulation.is_some() {
            debug!("link manager already started");
            return;
        }

        if self.source != SourcePolicy::Live {
            if let Some(generator) = self.generator.lock().take() {
                *simulation = Some(spawn_simulation(
                    generator,
                    self.publisher.clone(),
                    self.simulation.tick_interval,
                    self.shutdown.subscribe(),
                ));
            }
        }
        if self.reconnect.enabled {
            tasks.push(spawn_supervisor(
                self.connection.clone(),
                ReconnectPolicy::from(&self.reconnect),
                self.shutdown.subscribe(),
            ));
        }
        info!(
            source = ?self.source,
            reconnect = self.reconnect.enabled,
            tasks = tasks.len() + usize::from(simulation.is_some()),
            "link manager started"
        );
    }

    /// Disconnect and join every background task.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        let simulation = self.simulation_task.lock().take();
        if let Some(task) = simulation {
            match task.await {
                Ok(generator) => *self.generator.lock() = Some(generator),
                Err(err) => warn!(error = %err, "simulation driver ended abnormally"),
            }
        }
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        self.connection.disconnect().await;
        info!("link manager stopped");
    }

    pub async fn connect(&self, device_id: &str) -> Result<(), LinkError> {
        self.connection.connect(device_id).await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub async fn send_command(&self, command: &str) -> bool {
        self.commands.send(command).await
    }

    pub async fn try_send_command(&self, command: &str) -> Result<(), CommandError> {
        self.commands.try_send(command).await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        self.publisher.subscribe()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.connection.subscribe_errors()
    }

    pub fn current_metrics(&self) -> MetricsSnapshot {
        self.publisher.current()
    }

    pub fn last_error(&self) -> Option<String> {
        self.connection.last_error()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.connection.decoder_stats()
    }

    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.connection.provider().devices()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}
