//! ---
//! zl_section: "15-testing-qa-runbook"
//! zl_subsection: "integration-tests"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "End-to-end link tests over real TCP and file endpoints."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use zilla_codec::encode_frame;
use zilla_common::{AppConfig, DeviceConfig, SourcePolicy, DEFAULT_BAUD_RATE};
use zilla_link::{Endpoint, EndpointProvider, LinkManager};
use zilla_metrics::{new_registry, spawn_http_server, LinkMetrics};
use zilla_telemetry::{ConnectionState, ControllerStatus, ErrorCode, MetricsDelta};

const WAIT: Duration = Duration::from_secs(5);

#[allow(clippy::field_reassign_with_default)]
fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.link.poll_interval = Duration::from_millis(10);
    config.link.source = SourcePolicy::Live;
    config
}

async fn wait_for(
    link: &LinkManager,
    mut check: impl FnMut(&LinkManager) -> bool,
) -> bool {
    tokio::time::timeout(WAIT, async {
        while !check(link) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_controller_session_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let provider = EndpointProvider::new().with_device(
        "bench",
        "Bench controller",
        Endpoint::Tcp(addr.to_string()),
    );

    let registry = new_registry();
    let link = LinkManager::builder(config(), Arc::new(provider))
        .metrics(LinkMetrics::new(registry.clone()).unwrap())
        .build();
    link.start();
    link.connect("bench").await.unwrap();
    let (socket, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = socket.into_split();

    let mut states = link.subscribe_state();
    assert!(
        tokio::time::timeout(WAIT, states.wait_for(|state| state.is_connected()))
            .await
            .is_ok()
    );

    let delta = MetricsDelta {
        battery_voltage: Some(121.5),
        motor_speed: Some(1800),
        controller_status: Some(ControllerStatus::Running),
        error_codes: Some([ErrorCode::from_code(4)].into_iter().collect()),
        ..MetricsDelta::default()
    };
    write_half
        .write_all(encode_frame(&delta, true).as_bytes())
        .await
        .unwrap();
    write_half.write_all(b"garbage line\n").await.unwrap();
    assert!(wait_for(&link, |link| link.decoder_stats().frames_malformed == 1).await);

    let snapshot = link.current_metrics();
    assert_eq!(snapshot.battery_voltage, 121.5);
    assert_eq!(snapshot.motor_speed, 1800);
    assert_eq!(snapshot.controller_status, ControllerStatus::Running);
    assert!(snapshot.has_faults());

    assert!(link.send_command("VALET ON").await);
    let mut lines = BufReader::new(read_half).lines();
    let received = tokio::time::timeout(WAIT, lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.as_deref(), Some("VALET ON"));

    let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
    assert_ne!(server.addr().port(), 0);
    server.shutdown().await.unwrap();

    drop(write_half);
    drop(lines);
    assert!(
        tokio::time::timeout(WAIT, states.wait_for(|state| *state == ConnectionState::Error))
            .await
            .is_ok()
    );
    assert!(link.last_error().unwrap().starts_with("Connection lost"));
    link.stop().await;
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_tcp_endpoint_reports_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config();
    config.devices.insert(
        "gone".into(),
        DeviceConfig {
            display_name: None,
            endpoint: format!("tcp://{addr}"),
            baud_rate: DEFAULT_BAUD_RATE,
        },
    );
    let provider = EndpointProvider::from_config(&config.devices).unwrap();
    let link = LinkManager::new(config, Arc::new(provider));
    assert_eq!(link.devices()[0].display_name, "gone");

    let mut states = link.subscribe_state();
    link.connect("gone").await.unwrap();
    assert!(
        tokio::time::timeout(WAIT, states.wait_for(|state| *state == ConnectionState::Error))
            .await
            .is_ok()
    );
    assert!(link.last_error().unwrap().starts_with("Connection failed"));
    assert!(!link.send_command("RESET").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn captured_file_replays_through_file_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("capture.log");
    std::fs::write(&capture, "BV=99.5,ST=1\nMV=98.0,MA=12\n").unwrap();

    let provider =
        EndpointProvider::new().with_device("replay", "Replay", Endpoint::File(capture));
    let link = LinkManager::new(config(), Arc::new(provider));
    link.connect("replay").await.unwrap();

    assert!(wait_for(&link, |link| link.decoder_stats().frames_decoded == 2).await);
    let snapshot = link.current_metrics();
    assert_eq!(snapshot.battery_voltage, 99.5);
    assert_eq!(snapshot.controller_status, ControllerStatus::Precharge);
    assert_eq!(snapshot.motor_current, 12.0);

    // end of file ends the session
    let mut states = link.subscribe_state();
    assert!(
        tokio::time::timeout(WAIT, states.wait_for(|state| *state == ConnectionState::Error))
            .await
            .is_ok()
    );
    link.disconnect().await;
}
