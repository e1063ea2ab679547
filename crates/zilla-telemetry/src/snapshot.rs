//! ---
//! zl_section: "02-telemetry-model"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Latest-value telemetry snapshot and derived metrics."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error_code::ErrorCode;

/// A value clamped to `[0, 1]`. NaN is treated as `0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct UnitInterval(f32);

impl UnitInterval {
    /// Clamp `value` into the unit interval.
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    /// The clamped value.
    pub fn get(self) -> f32 {
        self.0
    }
}

impl From<f32> for UnitInterval {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl From<UnitInterval> for f32 {
    fn from(value: UnitInterval) -> Self {
        value.0
    }
}

/// Operating status reported by the controller.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ControllerStatus {
    /// Idle, contactor open.
    Standby,
    /// Precharging the capacitor bank.
    Precharge,
    /// Driving the motor.
    Running,
    /// Latched fault.
    Fault,
    /// No status received yet.
    #[default]
    Unknown,
}

impl ControllerStatus {
    /// Map the numeric status used by the controller (`0..=3`).
    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ControllerStatus::Standby),
            1 => Some(ControllerStatus::Precharge),
            2 => Some(ControllerStatus::Running),
            3 => Some(ControllerStatus::Fault),
            _ => None,
        }
    }
}

/// The single current telemetry record.
///
/// `power_output` and `motor_efficiency` are derived on demand and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was last written.
    pub timestamp: DateTime<Utc>,
    /// Pack voltage (V).
    pub battery_voltage: f32,
    /// Pack current (A).
    pub battery_current: f32,
    /// Motor terminal voltage (V).
    pub motor_voltage: f32,
    /// Motor current (A).
    pub motor_current: f32,
    /// Motor speed (rpm).
    pub motor_speed: i32,
    /// Controller status.
    pub controller_status: ControllerStatus,
    /// Throttle position.
    pub accelerator_position: UnitInterval,
    /// Precharge relay engaged.
    pub precharge_status: bool,
    /// Reverse selected.
    pub reverse_mode: bool,
    /// Valet (limited power) mode.
    pub valet_mode: bool,
    /// Active fault codes.
    pub error_codes: BTreeSet<ErrorCode>,
    /// Low battery warning.
    pub battery_low: bool,
    /// Voltage drop across the main contactor (V).
    pub main_contactor_drop: f32,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::default(),
            battery_voltage: 0.0,
            battery_current: 0.0,
            motor_voltage: 0.0,
            motor_current: 0.0,
            motor_speed: 0,
            controller_status: ControllerStatus::Unknown,
            accelerator_position: UnitInterval::default(),
            precharge_status: false,
            reverse_mode: false,
            valet_mode: false,
            error_codes: BTreeSet::new(),
            battery_low: false,
            main_contactor_drop: 0.0,
        }
    }
}

impl MetricsSnapshot {
    /// Motor output power in kW.
    pub fn power_output(&self) -> f32 {
        self.motor_voltage * self.motor_current / 1000.0
    }

    /// Motor-side over battery-side power in percent.
    ///
    /// `None` unless both currents are strictly positive.
    pub fn motor_efficiency(&self) -> Option<f32> {
        if self.battery_current <= 0.0 || self.motor_current <= 0.0 {
            return None;
        }
        Some(
            (self.motor_voltage * self.motor_current)
                / (self.battery_voltage * self.battery_current)
                * 100.0,
        )
    }

    /// Whether any real fault is latched.
    pub fn has_faults(&self) -> bool {
        self.error_codes.iter().any(|code| code.is_fault())
    }
}
