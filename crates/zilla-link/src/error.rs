//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Link error taxonomy."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::io;
use std::time::Duration;

use zilla_codec::EncodeError;

/// Shared result type for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Failures while establishing a session. Each one ends the attempt in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The identifier is unknown to the transport provider.
    #[error("device {0} is unavailable")]
    DeviceUnavailable(String),
    /// The provider could not open the transport.
    #[error("failed to open transport: {0}")]
    TransportOpenFailed(String),
    /// The host refused access to the transport.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Resolve and open did not finish within the connect deadline.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

impl ConnectionError {
    /// Classify an I/O failure raised while opening `target`.
    pub fn from_io(target: &str, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => {
                ConnectionError::PermissionDenied(format!("{target}: {err}"))
            }
            _ => ConnectionError::TransportOpenFailed(format!("{target}: {err}")),
        }
    }

    /// Label used for the connect-attempt counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            ConnectionError::DeviceUnavailable(_) => "device_unavailable",
            ConnectionError::TransportOpenFailed(_) => "open_failed",
            ConnectionError::PermissionDenied(_) => "permission_denied",
            ConnectionError::Timeout(_) => "timeout",
        }
    }
}

/// Failures of a single `send`. Never changes the connection state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// No session is active.
    #[error("not connected")]
    NotConnected,
    /// The transport rejected the write or flush.
    #[error("write failed: {0}")]
    WriteFailed(String),
    /// The write or flush did not finish before the deadline.
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
    /// The command was rejected before reaching the transport.
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] EncodeError),
}

impl CommandError {
    /// Label used for the command counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            CommandError::NotConnected => "not_connected",
            CommandError::WriteFailed(_) => "write_failed",
            CommandError::TimedOut(_) => "timed_out",
            CommandError::InvalidCommand(_) => "invalid",
        }
    }
}

/// Errors returned by the link manager surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// A connect attempt is already in flight. State is unchanged.
    #[error("a connect attempt is already in flight")]
    Busy,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Command(#[from] CommandError),
}
