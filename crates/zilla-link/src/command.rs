//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Outbound command writer sharing the session transport."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use zilla_codec::CommandEncoder;

use crate::connection::{ConnectionManager, Shared};
use crate::error::CommandError;

/// Encodes commands and writes them through the active session.
///
/// A failed write is reported to the caller and on the error stream, but it
/// does not end the session. Only the read loop declares the link dead.
/// A write is bounded by the configured deadline and gives up as soon as the
/// session starts closing.
#[derive(Clone)]
pub struct CommandWriter {
    shared: Arc<Shared>,
    encoder: CommandEncoder,
}

impl CommandWriter {
    pub fn new(connection: &ConnectionManager, encoder: CommandEncoder) -> Self {
        Self {
            shared: connection.shared.clone(),
            encoder,
        }
    }

    /// Send `command`, returning whether it was written and flushed.
    pub async fn send(&self, command: &str) -> bool {
        self.try_send(command).await.is_ok()
    }

    pub async fn try_send(&self, command: &str) -> Result<(), CommandError> {
        let result = self.write(command).await;
        if let Some(metrics) = &self.shared.metrics {
            match &result {
                Ok(()) => metrics.record_command("sent"),
                Err(err) => metrics.record_command(err.outcome()),
            }
        }
        result
    }

    async fn write(&self, command: &str) -> Result<(), CommandError> {
        let mut handle = {
            let slot = self.shared.slot.lock();
            slot.session.as_ref().map(|session| session.write_handle())
        }
        .ok_or(CommandError::NotConnected)?;

        let bytes = self.encoder.encode(command)?;
        if handle.is_closed() {
            return Err(CommandError::NotConnected);
        }

        let deadline = self.shared.settings.write_timeout;
        let writer = handle.writer.clone();
        let transfer = async {
            let mut guard = writer.lock().await;
            let Some(transport) = guard.as_mut() else {
                return Err(CommandError::NotConnected);
            };
            let written = match transport.write_all(&bytes).await {
                Ok(()) => transport.flush().await,
                Err(err) => Err(err),
            };
            written.map_err(|err| CommandError::WriteFailed(err.to_string()))
        };

        let written = tokio::select! {
            written = tokio::time::timeout(deadline, transfer) => {
                written.unwrap_or(Err(CommandError::TimedOut(deadline)))
            }
            _ = handle.closed() => Err(CommandError::NotConnected),
        };

        match written {
            Ok(()) => {
                debug!(command = %command.trim_end(), bytes = bytes.len(), "command sent");
                Ok(())
            }
            Err(CommandError::NotConnected) => {
                debug!("session closed before the command was written");
                Err(CommandError::NotConnected)
            }
            Err(err) => {
                warn!(error = %err, "command write failed");
                let detail = match &err {
                    CommandError::WriteFailed(cause) => cause.clone(),
                    other => other.to_string(),
                };
                self.shared
                    .set_error(Some(format!("Command write failed: {detail}")));
                Err(err)
            }
        }
    }
}
