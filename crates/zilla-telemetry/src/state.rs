//! ---
//! zl_section: "02-telemetry-model"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Connection state machine values."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Link connection state. Exactly one value is current at any time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no attempt in flight.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A session is open and the read loop is running.
    Connected,
    /// The last attempt or session failed; see the error stream for details.
    Error,
}

impl ConnectionState {
    /// Whether a session is currently established.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Numeric encoding used by the state gauge.
    pub fn gauge_value(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Error => 3,
        }
    }
}
