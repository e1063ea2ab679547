//! ---
//! zl_section: "02-telemetry-model"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Controller fault codes and their lookup table."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::EnumIter;

/// Fault code reported by the controller.
///
/// Codes arrive as integers on the wire. [`ErrorCode::from_code`] never fails:
/// anything not in [`ERROR_TABLE`] maps to [`ErrorCode::UnknownError`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No fault.
    None,
    /// Overcurrent fault.
    Overcurrent,
    /// Overvoltage fault.
    Overvoltage,
    /// Undervoltage fault.
    Undervoltage,
    /// Overtemperature fault.
    Overtemperature,
    /// Stalled rotor.
    Stall,
    /// Precharge failure.
    PrechargeFailure,
    /// Contactor failure.
    ContactorFailure,
    /// Hall throttle failure.
    HallThrottleFailure,
    /// Watchdog reset.
    WatchdogReset,
    /// Sentinel for codes outside the table.
    UnknownError,
}

/// Stable integer code and description for every variant.
pub const ERROR_TABLE: &[(ErrorCode, u16, &str)] = &[
    (ErrorCode::None, 0, "No Error"),
    (ErrorCode::Overcurrent, 1, "Overcurrent Fault"),
    (ErrorCode::Overvoltage, 2, "Overvoltage Fault"),
    (ErrorCode::Undervoltage, 3, "Undervoltage Fault"),
    (ErrorCode::Overtemperature, 4, "Overtemperature Fault"),
    (ErrorCode::Stall, 5, "Stalled Rotor"),
    (ErrorCode::PrechargeFailure, 6, "Precharge Failure"),
    (ErrorCode::ContactorFailure, 7, "Contactor Failure"),
    (ErrorCode::HallThrottleFailure, 8, "Hall Throttle Failure"),
    (ErrorCode::WatchdogReset, 9, "Watchdog Reset"),
    (ErrorCode::UnknownError, 99, "Unknown Error"),
];

impl ErrorCode {
    /// Look up a wire code. Unknown codes yield [`ErrorCode::UnknownError`].
    pub fn from_code(code: u16) -> Self {
        ERROR_TABLE
            .iter()
            .find(|(_, value, _)| *value == code)
            .map(|(variant, _, _)| *variant)
            .unwrap_or(ErrorCode::UnknownError)
    }

    /// Integer code as reported by the controller.
    pub fn code(self) -> u16 {
        self.entry().1
    }

    /// Human readable description.
    pub fn description(self) -> &'static str {
        self.entry().2
    }

    /// Whether this code represents an actual fault.
    pub fn is_fault(self) -> bool {
        !matches!(self, ErrorCode::None)
    }

    fn entry(self) -> &'static (ErrorCode, u16, &'static str) {
        ERROR_TABLE
            .iter()
            .find(|(variant, _, _)| *variant == self)
            .unwrap_or(&ERROR_TABLE[ERROR_TABLE.len() - 1])
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:02} {}", self.code(), self.description())
    }
}
