//! ---
//! zl_section: "06-observability"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Metrics collection and export utilities."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;
    let addr = listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> Response {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            buffer,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address, with the real port when `:0` was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Counters and gauges for one telemetry link.
#[derive(Clone, Debug)]
pub struct LinkMetrics {
    registry: SharedRegistry,
    frames: IntCounterVec,
    bytes_received: IntCounter,
    connect_attempts: IntCounterVec,
    commands: IntCounterVec,
    connection_state: IntGauge,
}

impl LinkMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let frames = IntCounterVec::new(
            Opts::new(
                "zilla_link_frames_total",
                "Frames processed by the stream decoder, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(frames.clone()))?;

        let bytes_received = IntCounter::with_opts(Opts::new(
            "zilla_link_bytes_received_total",
            "Raw bytes read from the controller link",
        ))?;
        registry.register(Box::new(bytes_received.clone()))?;

        let connect_attempts = IntCounterVec::new(
            Opts::new(
                "zilla_link_connect_attempts_total",
                "Connect attempts, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(connect_attempts.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new("zilla_link_commands_total", "Outbound commands, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        let connection_state = IntGauge::with_opts(Opts::new(
            "zilla_link_connection_state",
            "0 disconnected, 1 connecting, 2 connected, 3 error",
        ))?;
        registry.register(Box::new(connection_state.clone()))?;

        Ok(Self {
            registry,
            frames,
            bytes_received,
            connect_attempts,
            commands,
            connection_state,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// `outcome` is one of `decoded`, `malformed`, `oversized`.
    pub fn add_frames(&self, outcome: &str, count: u64) {
        if count > 0 {
            self.frames.with_label_values(&[outcome]).inc_by(count);
        }
    }

    pub fn add_bytes(&self, count: u64) {
        self.bytes_received.inc_by(count);
    }

    pub fn record_connect(&self, outcome: &str) {
        self.connect_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn record_command(&self, outcome: &str) {
        self.commands.with_label_values(&[outcome]).inc();
    }

    pub fn set_connection_state(&self, value: i64) {
        self.connection_state.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn link_metrics_register_once_per_registry() {
        let registry = new_registry();
        let metrics = LinkMetrics::new(registry.clone()).unwrap();
        metrics.add_frames("decoded", 3);
        metrics.add_frames("malformed", 0);
        metrics.add_bytes(42);
        metrics.record_connect("connected");
        metrics.set_connection_state(2);

        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"zilla_link_frames_total".to_owned()));
        assert!(names.contains(&"zilla_link_connection_state".to_owned()));
        assert!(LinkMetrics::new(registry).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serves_metrics_over_http() {
        let registry = new_registry();
        let metrics = LinkMetrics::new(registry.clone()).unwrap();
        metrics.add_bytes(7);

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let mut stream = tokio::net::TcpStream::connect(server.addr()).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response
            .to_ascii_lowercase()
            .contains("content-type: text/plain; version=0.0.4"));
        assert!(response.contains("zilla_link_bytes_received_total 7"));
        server.shutdown().await.unwrap();
    }
}
