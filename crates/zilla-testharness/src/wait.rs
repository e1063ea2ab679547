//! ---
//! zl_section: "11-simulation"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Bounded waits for asynchronous assertions."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use zilla_telemetry::ConnectionState;

/// Wait until the state stream shows `target`. False on timeout.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    target: ConnectionState,
    timeout: Duration,
) -> bool {
    matches!(
        tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await,
        Ok(Ok(_))
    )
}

/// Poll `condition` every few milliseconds until it holds. False on timeout.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
