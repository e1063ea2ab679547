//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "tests"
//! zl_type: "source"
//! zl_scope: "test"
//! zl_description: "Connection state machine and session lifecycle scenarios."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use zilla_common::{AppConfig, SourcePolicy};
use zilla_link::{CommandError, ConnectionError, LinkError, LinkManager};
use zilla_telemetry::{ConnectionState, ControllerStatus};
use zilla_testharness::{wait_for_state, wait_until, FakeTransportProvider, OpenBehavior};

const DEVICE: &str = "AA:BB";
const WAIT: Duration = Duration::from_secs(3);

#[allow(clippy::field_reassign_with_default)]
fn live_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.link.poll_interval = Duration::from_millis(10);
    config.link.connect_timeout = Duration::from_secs(2);
    config.link.source = SourcePolicy::Live;
    config
}

fn manager(provider: &FakeTransportProvider, config: AppConfig) -> LinkManager {
    LinkManager::new(config, Arc::new(provider.clone()))
}

async fn connected(provider: &FakeTransportProvider, link: &LinkManager) {
    let mut states = link.subscribe_state();
    link.connect(DEVICE).await.unwrap();
    assert!(wait_for_state(&mut states, ConnectionState::Connected, WAIT).await);
    assert!(provider.last_session().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_connect_goes_through_connecting() {
    let provider = FakeTransportProvider::single(DEVICE);
    provider.set_behavior(OpenBehavior::Gated);
    let link = manager(&provider, live_config());
    let mut states = link.subscribe_state();

    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
    link.connect(DEVICE).await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connecting);

    provider.release_gate();
    assert!(wait_for_state(&mut states, ConnectionState::Connected, WAIT).await);
    assert_eq!(link.connection().device().map(|d| d.id), Some(DEVICE.to_owned()));
    assert_eq!(link.last_error(), None);
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_while_connecting_is_busy() {
    let provider = FakeTransportProvider::single(DEVICE);
    provider.set_behavior(OpenBehavior::Gated);
    let link = manager(&provider, live_config());

    link.connect(DEVICE).await.unwrap();
    let mut states = link.subscribe_state();
    assert_eq!(link.connect(DEVICE).await, Err(LinkError::Busy));
    assert_eq!(link.connect("other").await, Err(LinkError::Busy));
    assert_eq!(link.state(), ConnectionState::Connecting);
    assert!(!states.has_changed().unwrap());

    provider.release_gate();
    assert!(wait_for_state(&mut states, ConnectionState::Connected, WAIT).await);
    assert_eq!(provider.opens(), 1);
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnecting_to_the_same_device_is_a_no_op() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    connected(&provider, &link).await;

    let mut states = link.subscribe_state();
    link.connect(DEVICE).await.unwrap();
    assert!(!states.has_changed().unwrap());
    assert_eq!(link.state(), ConnectionState::Connected);
    assert_eq!(provider.opens(), 1);
    assert!(!provider.last_session().unwrap().is_shut_down());
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_open_ends_in_error_and_releases_busy() {
    let provider = FakeTransportProvider::single(DEVICE);
    provider.set_behavior(OpenBehavior::Fail(ConnectionError::TransportOpenFailed(
        "radio off".into(),
    )));
    let link = manager(&provider, live_config());
    let mut states = link.subscribe_state();

    link.connect(DEVICE).await.unwrap();
    assert!(wait_for_state(&mut states, ConnectionState::Error, WAIT).await);
    let message = link.last_error().expect("error message published");
    assert!(message.contains("radio off"), "{message}");
    assert_eq!(provider.live_handles(), 0);
    assert!(!link.connection().is_busy());

    provider.set_behavior(OpenBehavior::Succeed);
    link.connect(DEVICE).await.unwrap();
    assert!(wait_for_state(&mut states, ConnectionState::Connected, WAIT).await);
    assert_eq!(link.last_error(), None);
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_device_is_unavailable() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    let mut states = link.subscribe_state();

    link.connect("CC:DD").await.unwrap();
    assert!(wait_for_state(&mut states, ConnectionState::Error, WAIT).await);
    assert!(link.last_error().unwrap().contains("CC:DD"));
    assert_eq!(provider.opens(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hanging_open_times_out() {
    let provider = FakeTransportProvider::single(DEVICE);
    provider.set_behavior(OpenBehavior::Hang);
    let mut config = live_config();
    config.link.connect_timeout = Duration::from_millis(50);
    let link = manager(&provider, config);
    let mut states = link.subscribe_state();

    link.connect(DEVICE).await.unwrap();
    assert!(wait_for_state(&mut states, ConnectionState::Error, WAIT).await);
    assert!(link.last_error().unwrap().contains("timed out"));
    assert_eq!(provider.live_handles(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_cancels_a_hanging_attempt() {
    let provider = FakeTransportProvider::single(DEVICE);
    provider.set_behavior(OpenBehavior::Hang);
    let link = manager(&provider, live_config());

    link.connect(DEVICE).await.unwrap();
    assert!(wait_until(WAIT, || provider.live_handles() == 1).await);
    link.disconnect().await;

    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(provider.live_handles(), 0);
    assert!(!link.connection().is_busy());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_open_success_never_reaches_connected() {
    let provider = FakeTransportProvider::single(DEVICE);
    provider.set_behavior(OpenBehavior::Gated);
    let link = manager(&provider, live_config());
    let mut states = link.subscribe_state();

    link.connect(DEVICE).await.unwrap();
    link.disconnect().await;
    let _ = states.borrow_and_update();
    provider.release_gate();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert!(!states.has_changed().unwrap());
    assert_eq!(provider.live_handles(), 0);
    assert!(provider.last_session().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_from_connected_closes_transport() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    connected(&provider, &link).await;
    assert_eq!(provider.live_handles(), 2);

    link.disconnect().await;
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(provider.live_handles(), 0);
    assert!(provider.last_session().unwrap().is_shut_down());

    // idempotent from Disconnected
    link.disconnect().await;
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_frames_keep_session_and_snapshot() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    connected(&provider, &link).await;
    let session = provider.last_session().unwrap();

    session.feed("BV=120.5,RPM=2100,ST=RUNNING\n");
    assert!(wait_until(WAIT, || link.current_metrics().motor_speed == 2100).await);
    let before = link.current_metrics();

    for _ in 0..10 {
        session.feed("RPM=fast,BV=??\n");
    }
    assert!(wait_until(WAIT, || link.decoder_stats().frames_malformed == 10).await);

    assert_eq!(link.state(), ConnectionState::Connected);
    assert_eq!(link.current_metrics(), before);
    assert_eq!(link.decoder_stats().frames_decoded, 1);
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frames_split_across_reads_are_reassembled() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    connected(&provider, &link).await;
    let session = provider.last_session().unwrap();

    session.feed("MV=118");
    session.feed(".5,MA=4");
    session.feed("0,ST=2\r\n");
    assert!(wait_until(WAIT, || link.decoder_stats().frames_decoded == 1).await);

    let snapshot = link.current_metrics();
    assert_eq!(snapshot.motor_voltage, 118.5);
    assert_eq!(snapshot.motor_current, 40.0);
    assert_eq!(snapshot.controller_status, ControllerStatus::Running);
    assert_eq!(snapshot.power_output(), 118.5 * 40.0 / 1000.0);
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_failure_ends_in_error_with_cause() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    connected(&provider, &link).await;
    let mut states = link.subscribe_state();

    provider.last_session().unwrap().fail_read("radio dropped");
    assert!(wait_for_state(&mut states, ConnectionState::Error, WAIT).await);

    let message = link.last_error().unwrap();
    assert!(message.contains("radio dropped"), "{message}");
    assert_eq!(provider.live_handles(), 0);
    assert!(provider.last_session().unwrap().is_shut_down());

    link.disconnect().await;
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_close_is_a_session_loss() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    connected(&provider, &link).await;
    let mut states = link.subscribe_state();

    provider.last_session().unwrap().close_remote();
    assert!(wait_for_state(&mut states, ConnectionState::Error, WAIT).await);
    assert!(link.last_error().unwrap().contains("end of stream"));
    assert_eq!(provider.live_handles(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_requires_a_session() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());

    assert!(!link.send_command("RESET").await);
    assert_eq!(
        link.try_send_command("RESET").await,
        Err(CommandError::NotConnected)
    );
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_writes_terminated_command() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    connected(&provider, &link).await;

    assert!(link.send_command("VALET ON").await);
    assert!(link.send_command("RESET\n").await);
    assert_eq!(
        provider.last_session().unwrap().written(),
        b"VALET ON\r\nRESET\r\n"
    );
    assert!(matches!(
        link.try_send_command("A\u{7}B").await,
        Err(CommandError::InvalidCommand(_))
    ));
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_failure_reports_but_keeps_session() {
    let provider = FakeTransportProvider::single(DEVICE);
    let link = manager(&provider, live_config());
    connected(&provider, &link).await;
    let session = provider.last_session().unwrap();

    session.set_fail_writes(true);
    assert!(!link.send_command("RESET").await);
    assert!(link.last_error().unwrap().contains("injected write failure"));
    assert_eq!(link.state(), ConnectionState::Connected);

    session.set_fail_writes(false);
    assert!(link.send_command("RESET").await);
    session.feed("RPM=900\n");
    assert!(wait_until(WAIT, || link.current_metrics().motor_speed == 900).await);
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_write_times_out_and_keeps_session() {
    let provider = FakeTransportProvider::single(DEVICE);
    let mut config = live_config();
    config.command.write_timeout = Duration::from_millis(100);
    let link = manager(&provider, config);
    connected(&provider, &link).await;
    let session = provider.last_session().unwrap();

    session.set_stall_writes(true);
    assert_eq!(
        link.try_send_command("RESET").await,
        Err(CommandError::TimedOut(Duration::from_millis(100)))
    );
    assert!(link.last_error().unwrap().contains("timed out"));
    assert_eq!(link.state(), ConnectionState::Connected);

    session.set_stall_writes(false);
    assert!(link.send_command("RESET").await);
    assert_eq!(session.written(), b"RESET\r\n");
    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_interrupts_a_stalled_write() {
    let provider = FakeTransportProvider::single(DEVICE);
    let mut config = live_config();
    config.command.write_timeout = Duration::from_secs(30);
    let link = Arc::new(manager(&provider, config));
    connected(&provider, &link).await;
    provider.last_session().unwrap().set_stall_writes(true);

    let sender = {
        let link = link.clone();
        tokio::spawn(async move { link.try_send_command("RESET").await })
    };
    // let the write take the transport lock
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(WAIT, link.disconnect())
        .await
        .expect("disconnect completes while a write is stalled");
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(sender.await.unwrap(), Err(CommandError::NotConnected));
    assert_eq!(provider.live_handles(), 0);
    assert!(provider.last_session().unwrap().is_shut_down());
    assert_eq!(link.last_error(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_is_accepted_only_after_outcome_is_published() {
    let provider = FakeTransportProvider::single(DEVICE);
    provider.set_behavior(OpenBehavior::Gated);
    let link = Arc::new(manager(&provider, live_config()));
    link.connect(DEVICE).await.unwrap();

    let contender = {
        let link = link.clone();
        tokio::spawn(async move {
            loop {
                match link.connect("other").await {
                    Ok(()) => return,
                    Err(LinkError::Busy) => tokio::task::yield_now().await,
                    Err(err) => panic!("unexpected connect error: {err}"),
                }
            }
        })
    };
    provider.release_gate();

    tokio::time::timeout(WAIT, contender)
        .await
        .expect("contender is eventually accepted")
        .unwrap();

    let mut states = link.subscribe_state();
    assert!(wait_for_state(&mut states, ConnectionState::Error, WAIT).await);
    assert_eq!(provider.opens(), 1);
    // the first session reached Connected and was closed by the second connect
    assert!(provider.last_session().unwrap().is_shut_down());
    assert_eq!(provider.live_handles(), 0);
    link.stop().await;
}
