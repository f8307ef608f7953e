//! Simulated thrust stand.
//!
//! The ESC, load cell and power monitor share one [`Bench`] so the load cell
//! sees the throttle the ESC was last given and the virtual time the session
//! is advancing.

use std::cell::Cell;
use std::ops::Add;
use std::rc::Rc;
use std::time::Duration;

use rig_core::ports::{Actuator, LoadCellPort, PowerPort, RAW_READ_FAILED, clamp_normalized};
use rig_core::telemetry::TelemetryInstant;

/// Virtual milliseconds since the emulator started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(u64);

impl SimInstant {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for SimInstant {
    type Output = SimInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        SimInstant(self.0.saturating_add(millis))
    }
}

/// State shared by the simulated peripherals.
#[derive(Debug, Default)]
pub struct Bench {
    now: Cell<SimInstant>,
    throttle: Cell<f32>,
}

impl Bench {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn now(&self) -> SimInstant {
        self.now.get()
    }

    pub fn set_now(&self, now: SimInstant) {
        self.now.set(now);
    }

    pub fn throttle(&self) -> f32 {
        self.throttle.get()
    }
}

pub struct SimEsc {
    bench: Rc<Bench>,
}

impl SimEsc {
    pub fn new(bench: Rc<Bench>) -> Self {
        Self { bench }
    }
}

impl Actuator for SimEsc {
    fn set_normalized(&mut self, value: f32) {
        self.bench.throttle.set(clamp_normalized(value));
    }

    fn last_commanded(&self) -> f32 {
        self.bench.throttle.get()
    }
}

/// HX711 conversion period at 80 SPS.
pub const LOAD_CELL_PERIOD: Duration = Duration::from_millis(12);

/// Raw offset the unloaded cell reports; captured as tare at boot.
pub const LOAD_CELL_OFFSET: i32 = 8_400;

/// Raw counts of thrust at full throttle.
pub const LOAD_CELL_FULL_SCALE: f32 = 120_000.0;

/// HX711-like load cell: thrust grows with the square of the throttle and a
/// fresh conversion becomes ready every [`LOAD_CELL_PERIOD`].
pub struct SimLoadCell {
    bench: Rc<Bench>,
    period: Duration,
    fail_every: u32,
    reads: u32,
    last_conversion: Option<SimInstant>,
}

impl SimLoadCell {
    pub fn new(bench: Rc<Bench>) -> Self {
        Self {
            bench,
            period: LOAD_CELL_PERIOD,
            fail_every: 0,
            reads: 0,
            last_conversion: None,
        }
    }

    /// Makes every `n`th read fail as if DT never went low. Zero disables.
    #[must_use]
    pub fn with_failures(mut self, n: u32) -> Self {
        self.fail_every = n;
        self
    }

    pub fn reads(&self) -> u32 {
        self.reads
    }

    #[allow(clippy::cast_possible_truncation)]
    fn conversion(&self) -> i32 {
        let throttle = self.bench.throttle();
        LOAD_CELL_OFFSET + (throttle * throttle * LOAD_CELL_FULL_SCALE) as i32
    }
}

impl LoadCellPort for SimLoadCell {
    fn is_ready(&mut self) -> bool {
        let now = self.bench.now();
        self.last_conversion
            .is_none_or(|last| now.saturating_duration_since(last) >= self.period)
    }

    fn read_raw(&mut self) -> i32 {
        self.reads = self.reads.wrapping_add(1);
        self.last_conversion = Some(self.bench.now());
        if self.fail_every != 0 && self.reads % self.fail_every == 0 {
            return RAW_READ_FAILED;
        }
        self.conversion()
    }
}

/// Nominal pack voltage with the motor stopped.
pub const PACK_VOLTAGE_V: f32 = 12.6;
const SAG_AT_FULL_THROTTLE_V: f32 = 1.1;
const IDLE_CURRENT_MA: f32 = 150.0;
const CURRENT_AT_FULL_THROTTLE_MA: f32 = 18_000.0;

/// INA260 stand-in: voltage sags and current rises with throttle.
pub struct SimPowerMonitor {
    bench: Rc<Bench>,
}

impl SimPowerMonitor {
    pub fn new(bench: Rc<Bench>) -> Self {
        Self { bench }
    }
}

impl PowerPort for SimPowerMonitor {
    fn read_voltage(&mut self) -> f32 {
        PACK_VOLTAGE_V - SAG_AT_FULL_THROTTLE_V * self.bench.throttle()
    }

    fn read_current(&mut self) -> f32 {
        IDLE_CURRENT_MA + CURRENT_AT_FULL_THROTTLE_MA * self.bench.throttle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thrust_grows_with_throttle_squared() {
        let bench = Bench::new();
        let mut esc = SimEsc::new(Rc::clone(&bench));
        let mut cell = SimLoadCell::new(Rc::clone(&bench));

        assert_eq!(cell.read_raw(), LOAD_CELL_OFFSET);

        esc.set_normalized(0.5);
        assert_eq!(cell.read_raw(), LOAD_CELL_OFFSET + 30_000);

        esc.set_normalized(3.0);
        assert_eq!(esc.last_commanded(), 1.0);
        assert_eq!(cell.read_raw(), LOAD_CELL_OFFSET + 120_000);
    }

    #[test]
    fn conversions_follow_the_ready_cadence() {
        let bench = Bench::new();
        let mut cell = SimLoadCell::new(Rc::clone(&bench));

        assert!(cell.is_ready());
        cell.read_raw();
        assert!(!cell.is_ready());

        bench.set_now(SimInstant::from_millis(11));
        assert!(!cell.is_ready());
        bench.set_now(SimInstant::from_millis(12));
        assert!(cell.is_ready());
    }

    #[test]
    fn injected_failures_read_as_sentinel() {
        let bench = Bench::new();
        let mut cell = SimLoadCell::new(bench).with_failures(3);

        let reads: Vec<i32> = (0..6).map(|_| cell.read_raw()).collect();
        assert_eq!(reads[2], RAW_READ_FAILED);
        assert_eq!(reads[5], RAW_READ_FAILED);
        assert_eq!(reads[0], LOAD_CELL_OFFSET);
        assert_eq!(cell.reads(), 6);
    }

    #[test]
    fn power_sags_under_load() {
        let bench = Bench::new();
        let mut esc = SimEsc::new(Rc::clone(&bench));
        let mut power = SimPowerMonitor::new(bench);

        assert!((power.read_voltage() - PACK_VOLTAGE_V).abs() < 1e-4);
        esc.set_normalized(1.0);
        assert!((power.read_voltage() - 11.5).abs() < 1e-4);
        assert!((power.read_current() - 18_150.0).abs() < 1e-2);
    }

    #[test]
    fn instant_arithmetic_saturates() {
        let early = SimInstant::from_millis(5);
        let late = early + Duration::from_millis(20);
        assert_eq!(late.as_millis(), 25);
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }
}
