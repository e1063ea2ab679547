//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Background task feeding simulated ticks into a metrics sink."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use zilla_sim::SimulatedMetricsGenerator;

use crate::publisher::{MetricsSink, SourceKind};

/// Drive a [`SimulatedMetricsGenerator`] on a fixed interval until shutdown.
///
/// Ticks go through the same [`MetricsSink`] as decoded frames and are dropped
/// by the sink whenever the simulator is not the active producer. The task
/// hands the generator back when it ends so a later run continues its walk.
pub fn spawn_simulation(
    mut generator: SimulatedMetricsGenerator,
    sink: Arc<dyn MetricsSink>,
    tick_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<SimulatedMetricsGenerator> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = tick_interval.as_millis() as u64,
            "simulation driver started"
        );
        let mut accepted = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    let delta = generator.tick();
                    if sink.push(SourceKind::Simulated, &delta) {
                        accepted += 1;
                    }
                }
            }
        }
        debug!(ticks = generator.ticks(), accepted, "simulation driver stopped");
        generator
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::MetricsPublisher;
    use zilla_telemetry::ControllerStatus;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drives_publisher_until_shutdown() {
        let publisher = Arc::new(MetricsPublisher::new(Some(SourceKind::Simulated)));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_simulation(
            SimulatedMetricsGenerator::new(11),
            publisher.clone(),
            Duration::from_millis(5),
            shutdown_rx,
        );

        let mut rx = publisher.subscribe();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|snapshot| snapshot.controller_status == ControllerStatus::Running),
        )
        .await
        .expect("simulator reaches running")
        .unwrap();

        shutdown_tx.send(()).unwrap();
        let generator = handle.await.unwrap();
        assert!(generator.ticks() > 0);
        assert!(publisher.current().motor_speed >= zilla_sim::MIN_MOTOR_SPEED);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inactive_simulator_does_not_write() {
        let publisher = Arc::new(MetricsPublisher::new(Some(SourceKind::Live)));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_simulation(
            SimulatedMetricsGenerator::new(5),
            publisher.clone(),
            Duration::from_millis(2),
            shutdown_rx,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(publisher.current().controller_status, ControllerStatus::Unknown);
    }
}
