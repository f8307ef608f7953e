//! Shared status surface for the console.
//!
//! Firmware and emulator both produce a [`StatusSnapshot`] (the firmware from
//! status atomics, the emulator straight from the sampling loop) so the
//! `status` command renders identically on every front-end through
//! [`StatusFormatter`].

use core::fmt;
use core::time::Duration;

use crate::sampling::{TestId, TestOutcome, TestSummary};

/// Progress of the running test.
#[derive(Clone, Debug, PartialEq)]
pub struct RunningTest {
    pub test_id: TestId,
    pub step: usize,
    pub steps: usize,
    pub value: f32,
    pub remaining: Option<Duration>,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TestStatus {
    Idle,
    Running(RunningTest),
}

/// Most recent sensor readings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorStatus {
    pub load_cell: f32,
    pub load_cell_valid: bool,
    pub ready_percent: u8,
    pub bus_voltage_v: f32,
    pub bus_current_ma: f32,
}

impl SensorStatus {
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            load_cell: 0.0,
            load_cell_valid: false,
            ready_percent: 0,
            bus_voltage_v: 0.0,
            bus_current_ma: 0.0,
        }
    }
}

/// Buffer and uplink counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferStatus {
    pub len: usize,
    pub capacity: usize,
    pub dropped: u32,
    pub batches_uploaded: u32,
    pub batches_failed: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub test: TestStatus,
    pub buffer: BufferStatus,
    pub sensors: SensorStatus,
    pub commanded: f32,
    pub tare: i32,
    pub last_summary: Option<TestSummary>,
}

/// Helper that renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the test line (e.g. `test running id=run-1 step=2/3 speed=0.50 remaining=+0.4s`).
    pub fn write_test_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        match &self.snapshot.test {
            TestStatus::Running(run) => {
                write!(
                    writer,
                    "test running id={} step={}/{} speed={:.2} remaining=",
                    run.test_id,
                    run.step.saturating_add(1).min(run.steps),
                    run.steps,
                    run.value
                )?;
                write_duration(writer, run.remaining)?;
                writer.write_str(" elapsed=")?;
                write_duration(writer, Some(run.elapsed))
            }
            TestStatus::Idle => {
                writer.write_str("test idle")?;
                match &self.snapshot.last_summary {
                    Some(summary) => {
                        write!(
                            writer,
                            " last={} {} steps={} duration=",
                            summary.test_id,
                            outcome_label(summary.outcome),
                            summary.steps_run
                        )?;
                        write_duration(writer, Some(summary.duration))
                    }
                    None => Ok(()),
                }
            }
        }
    }

    /// Writes the buffer line (e.g. `buffer 12/200 dropped=0 uploaded=3 failed=0`).
    pub fn write_buffer_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let buffer = &self.snapshot.buffer;
        write!(
            writer,
            "buffer {}/{} dropped={} uploaded={} failed={}",
            buffer.len, buffer.capacity, buffer.dropped, buffer.batches_uploaded, buffer.batches_failed
        )
    }

    /// Writes the sensors line (e.g. `sensors load=532 ready=87% bus=12.34V/1520mA throttle=0.50 tare=-1024`).
    pub fn write_sensors_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let sensors = &self.snapshot.sensors;
        writer.write_str("sensors load=")?;
        if sensors.load_cell_valid {
            write!(writer, "{:.0}", sensors.load_cell)?;
        } else {
            writer.write_str("n/a")?;
        }
        write!(
            writer,
            " ready={}% bus={:.2}V/{:.0}mA throttle={:.2} tare={}",
            sensors.ready_percent,
            sensors.bus_voltage_v,
            sensors.bus_current_ma,
            self.snapshot.commanded,
            self.snapshot.tare
        )
    }
}

const fn outcome_label(outcome: TestOutcome) -> &'static str {
    match outcome {
        TestOutcome::Completed => "completed",
        TestOutcome::Aborted => "aborted",
    }
}

pub(crate) fn write_duration<W: fmt::Write>(
    writer: &mut W,
    duration: Option<Duration>,
) -> fmt::Result {
    match duration {
        None => writer.write_str("n/a"),
        Some(value) if value >= Duration::from_secs(1) => {
            let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
            let seconds = millis / 1_000;
            let tenths = (millis % 1_000) / 100;
            write!(writer, "+{seconds}.{tenths}s")
        }
        Some(value) => write!(writer, "+{}ms", value.as_millis()),
    }
}
