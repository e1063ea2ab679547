//! ---
//! zl_section: "04-simulation"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Bounded random walk around nominal operating points."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use rand::prelude::*;
use rand_distr::Uniform;
use zilla_telemetry::{ControllerStatus, MetricsDelta, UnitInterval};

const BATTERY_VOLTAGE: f32 = 120.0;
const BATTERY_CURRENT: f32 = 50.0;
const MOTOR_VOLTAGE: f32 = 118.0;
const MOTOR_CURRENT: f32 = 40.0;
const MOTOR_SPEED: i32 = 2000;

/// Lowest speed the walk can reach.
pub const MIN_MOTOR_SPEED: i32 = MOTOR_SPEED - 500;
/// Ticks spent in precharge before reporting `Running`.
pub const PRECHARGE_TICKS: u64 = 5;

/// Offset from a nominal value, clamped to asymmetric bounds.
#[derive(Debug, Clone, Copy)]
struct Walk {
    offset: f32,
    low: f32,
    high: f32,
}

impl Walk {
    fn new(low: f32, high: f32) -> Self {
        Self {
            offset: 0.0,
            low,
            high,
        }
    }

    fn step(&mut self, delta: f32) -> f32 {
        self.offset = (self.offset + delta).clamp(self.low, self.high);
        self.offset
    }
}

/// Produces one plausible delta per tick.
///
/// The same seed always yields the same sequence.
#[derive(Debug)]
pub struct SimulatedMetricsGenerator {
    rng: StdRng,
    volts: Uniform<f32>,
    amps: Uniform<f32>,
    rpm: Uniform<i32>,
    pedal: Uniform<f32>,
    battery_voltage: Walk,
    battery_current: Walk,
    motor_voltage: Walk,
    motor_current: Walk,
    motor_speed: i32,
    accelerator: f32,
    ticks: u64,
}

impl SimulatedMetricsGenerator {
    pub fn new(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Unseeded generator for interactive use.
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            volts: Uniform::new_inclusive(-0.2, 0.2),
            amps: Uniform::new_inclusive(-1.0, 1.0),
            rpm: Uniform::new_inclusive(-10, 10),
            pedal: Uniform::new_inclusive(-0.01, 0.01),
            battery_voltage: Walk::new(-10.0, 10.0),
            battery_current: Walk::new(-30.0, 100.0),
            motor_voltage: Walk::new(-10.0, 10.0),
            motor_current: Walk::new(-20.0, 80.0),
            motor_speed: 0,
            accelerator: 0.0,
            ticks: 0,
        }
    }

    /// Number of ticks produced so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Status reported for the current tick count.
    pub fn status(&self) -> ControllerStatus {
        match self.ticks {
            0 => ControllerStatus::Standby,
            n if n <= PRECHARGE_TICKS => ControllerStatus::Precharge,
            _ => ControllerStatus::Running,
        }
    }

    /// Advance the walk and return a full delta.
    pub fn tick(&mut self) -> MetricsDelta {
        let rng = &mut self.rng;
        let battery_voltage = BATTERY_VOLTAGE + self.battery_voltage.step(self.volts.sample(rng));
        let battery_current = BATTERY_CURRENT + self.battery_current.step(self.amps.sample(rng));
        let motor_voltage = MOTOR_VOLTAGE + self.motor_voltage.step(self.volts.sample(rng));
        let motor_current = MOTOR_CURRENT + self.motor_current.step(self.amps.sample(rng));
        self.motor_speed = (self.motor_speed + self.rpm.sample(rng)).clamp(-500, 2000);
        self.accelerator = (self.accelerator + self.pedal.sample(rng)).clamp(0.0, 1.0);

        let status = self.status();
        self.ticks += 1;

        MetricsDelta {
            battery_voltage: Some(battery_voltage),
            battery_current: Some(battery_current),
            motor_voltage: Some(motor_voltage),
            motor_current: Some(motor_current),
            motor_speed: Some(MOTOR_SPEED + self.motor_speed),
            controller_status: Some(status),
            accelerator_position: Some(UnitInterval::new(self.accelerator)),
            precharge_status: Some(status != ControllerStatus::Standby),
            reverse_mode: Some(false),
            valet_mode: Some(false),
            error_codes: Some(Default::default()),
            battery_low: Some(battery_voltage < BATTERY_VOLTAGE - 8.0),
            main_contactor_drop: Some((battery_voltage - motor_voltage).max(0.0)),
        }
    }
}

impl Default for SimulatedMetricsGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}
