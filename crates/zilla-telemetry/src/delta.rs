//! ---
//! zl_section: "02-telemetry-model"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Partial telemetry updates merged into the current snapshot."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error_code::ErrorCode;
use crate::snapshot::{ControllerStatus, MetricsSnapshot, UnitInterval};

/// A full or partial update. `None` fields leave the snapshot untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_current: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor_current: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor_speed: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_status: Option<ControllerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_position: Option<UnitInterval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precharge_status: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valet_mode: Option<bool>,
    /// Replaces the whole fault set when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_codes: Option<BTreeSet<ErrorCode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_low: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_contactor_drop: Option<f32>,
}

impl MetricsDelta {
    /// A delta that overwrites every field with the values from `snapshot`.
    pub fn full(snapshot: &MetricsSnapshot) -> Self {
        Self {
            battery_voltage: Some(snapshot.battery_voltage),
            battery_current: Some(snapshot.battery_current),
            motor_voltage: Some(snapshot.motor_voltage),
            motor_current: Some(snapshot.motor_current),
            motor_speed: Some(snapshot.motor_speed),
            controller_status: Some(snapshot.controller_status),
            accelerator_position: Some(snapshot.accelerator_position),
            precharge_status: Some(snapshot.precharge_status),
            reverse_mode: Some(snapshot.reverse_mode),
            valet_mode: Some(snapshot.valet_mode),
            error_codes: Some(snapshot.error_codes.clone()),
            battery_low: Some(snapshot.battery_low),
            main_contactor_drop: Some(snapshot.main_contactor_drop),
        }
    }

    /// Number of fields carried by this delta.
    pub fn field_count(&self) -> usize {
        [
            self.battery_voltage.is_some(),
            self.battery_current.is_some(),
            self.motor_voltage.is_some(),
            self.motor_current.is_some(),
            self.motor_speed.is_some(),
            self.controller_status.is_some(),
            self.accelerator_position.is_some(),
            self.precharge_status.is_some(),
            self.reverse_mode.is_some(),
            self.valet_mode.is_some(),
            self.error_codes.is_some(),
            self.battery_low.is_some(),
            self.main_contactor_drop.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    /// True when the delta carries no field.
    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }

    /// Merge into `snapshot`. The timestamp is left to the caller.
    pub fn apply_to(&self, snapshot: &mut MetricsSnapshot) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut snapshot.battery_voltage, &self.battery_voltage);
        set(&mut snapshot.battery_current, &self.battery_current);
        set(&mut snapshot.motor_voltage, &self.motor_voltage);
        set(&mut snapshot.motor_current, &self.motor_current);
        set(&mut snapshot.motor_speed, &self.motor_speed);
        set(&mut snapshot.controller_status, &self.controller_status);
        set(&mut snapshot.accelerator_position, &self.accelerator_position);
        set(&mut snapshot.precharge_status, &self.precharge_status);
        set(&mut snapshot.reverse_mode, &self.reverse_mode);
        set(&mut snapshot.valet_mode, &self.valet_mode);
        set(&mut snapshot.error_codes, &self.error_codes);
        set(&mut snapshot.battery_low, &self.battery_low);
        set(&mut snapshot.main_contactor_drop, &self.main_contactor_drop);
    }
}
