//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Bounded reconnect with exponential backoff after session loss."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zilla_common::ReconnectConfig;
use zilla_telemetry::ConnectionState;

use crate::connection::ConnectionManager;

/// Retry budget and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`. Attempts are 1-indexed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay, config.max_delay)
    }
}

/// Watch the state stream and reconnect after an established session ends in
/// `Error`.
///
/// Failed attempts inside the retry window are retried until the budget is
/// spent. `Connected` resets the budget; `Disconnected` (an explicit
/// disconnect) cancels any pending retry.
pub fn spawn_supervisor(
    connection: ConnectionManager,
    policy: ReconnectPolicy,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut states = connection.subscribe_state();
        let mut established = false;
        let mut attempts = 0u32;
        let mut pending: Option<ConnectionState> = Some(*states.borrow_and_update());

        loop {
            let state = match pending.take() {
                Some(state) => state,
                None => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        changed = states.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let state = *states.borrow_and_update();
                            state
                        }
                    }
                }
            };

            match state {
                ConnectionState::Connected => {
                    established = true;
                    attempts = 0;
                }
                ConnectionState::Disconnected => {
                    established = false;
                    attempts = 0;
                }
                ConnectionState::Connecting => {}
                ConnectionState::Error => {
                    if !established {
                        continue;
                    }
                    let Some(device_id) = connection.last_device_id() else {
                        continue;
                    };
                    if attempts >= policy.max_attempts {
                        warn!(device = %device_id, attempts, "reconnect budget exhausted");
                        established = false;
                        continue;
                    }
                    attempts += 1;
                    let delay = policy.delay_for(attempts);
                    info!(
                        device = %device_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "scheduling reconnect"
                    );

                    tokio::select! {
                        _ = shutdown.recv() => break,
                        changed = states.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            // the caller acted during the backoff
                            pending = Some(*states.borrow_and_update());
                            continue;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }

                    if let Err(err) = connection.connect(&device_id).await {
                        warn!(device = %device_id, error = %err, "reconnect attempt rejected");
                    }
                    pending = Some(*states.borrow_and_update());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let policy = ReconnectPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn policy_from_config_is_sane() {
        let config = ReconnectConfig {
            enabled: true,
            max_attempts: 0,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(1),
        };
        let policy = ReconnectPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }
}
