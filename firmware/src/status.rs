//! Shared status storage for the firmware target.
//!
//! The rig task publishes the sampling loop's [`StatusSnapshot`] into
//! lightweight atomics once per tick so the console can rebuild it without
//! touching the loop. Test identifiers are not stored here: the console is
//! the only source of start requests and supplies them when rebuilding.

use core::time::Duration;

use portable_atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, Ordering};
use rig_core::buffer::SAMPLE_BUFFER_CAPACITY;
use rig_core::repl::status::{
    BufferStatus, RunningTest, SensorStatus, StatusSnapshot, TestStatus,
};
use rig_core::sampling::{TestId, TestOutcome, TestSummary};

const OUTCOME_NONE: u8 = 0;
const OUTCOME_COMPLETED: u8 = 1;
const OUTCOME_ABORTED: u8 = 2;

/// Sentinel for "no remaining time" (no step active).
const REMAINING_UNKNOWN: u32 = u32::MAX;

/// Lock-free mirror of the rig's status, shared by the rig and console tasks.
pub struct StatusBoard {
    test_active: AtomicBool,
    /// Set by the console when it queues a start, cleared once the rig task handles it.
    start_pending: AtomicBool,
    step: AtomicU8,
    steps: AtomicU8,
    step_value_bits: AtomicU32,
    remaining_ms: AtomicU32,
    elapsed_ms: AtomicU32,

    buffer_len: AtomicU32,
    buffer_dropped: AtomicU32,
    batches_uploaded: AtomicU32,
    batches_failed: AtomicU32,

    load_cell_bits: AtomicU32,
    load_cell_valid: AtomicBool,
    ready_percent: AtomicU8,
    bus_voltage_bits: AtomicU32,
    bus_current_bits: AtomicU32,
    commanded_bits: AtomicU32,
    tare: AtomicI32,

    summary_outcome: AtomicU8,
    summary_steps: AtomicU8,
    summary_duration_ms: AtomicU32,
    summary_samples: AtomicU32,
    summary_dropped: AtomicU32,
    summary_uploaded: AtomicU32,
    summary_failed: AtomicU32,
}

fn store_f32(slot: &AtomicU32, value: f32) {
    slot.store(value.to_bits(), Ordering::Relaxed);
}

fn load_f32(slot: &AtomicU32) -> f32 {
    f32::from_bits(slot.load(Ordering::Relaxed))
}

fn saturating_u8(value: usize) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn millis_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

fn millis(raw: u32) -> Duration {
    Duration::from_millis(u64::from(raw))
}

impl StatusBoard {
    pub const fn new() -> Self {
        Self {
            test_active: AtomicBool::new(false),
            start_pending: AtomicBool::new(false),
            step: AtomicU8::new(0),
            steps: AtomicU8::new(0),
            step_value_bits: AtomicU32::new(0),
            remaining_ms: AtomicU32::new(REMAINING_UNKNOWN),
            elapsed_ms: AtomicU32::new(0),
            buffer_len: AtomicU32::new(0),
            buffer_dropped: AtomicU32::new(0),
            batches_uploaded: AtomicU32::new(0),
            batches_failed: AtomicU32::new(0),
            load_cell_bits: AtomicU32::new(0),
            load_cell_valid: AtomicBool::new(false),
            ready_percent: AtomicU8::new(0),
            bus_voltage_bits: AtomicU32::new(0),
            bus_current_bits: AtomicU32::new(0),
            commanded_bits: AtomicU32::new(0),
            tare: AtomicI32::new(0),
            summary_outcome: AtomicU8::new(OUTCOME_NONE),
            summary_steps: AtomicU8::new(0),
            summary_duration_ms: AtomicU32::new(0),
            summary_samples: AtomicU32::new(0),
            summary_dropped: AtomicU32::new(0),
            summary_uploaded: AtomicU32::new(0),
            summary_failed: AtomicU32::new(0),
        }
    }

    /// Returns `true` while a test runs or a start request is still queued.
    pub fn test_active(&self) -> bool {
        self.test_active.load(Ordering::Relaxed) || self.start_pending.load(Ordering::Relaxed)
    }

    pub fn mark_start_pending(&self) {
        self.start_pending.store(true, Ordering::Relaxed);
    }

    pub fn clear_start_pending(&self) {
        self.start_pending.store(false, Ordering::Relaxed);
    }

    pub fn record_tare(&self, tare: i32) {
        self.tare.store(tare, Ordering::Relaxed);
    }

    /// Publishes the sampling loop's view of the rig.
    pub fn record_snapshot(&self, snapshot: &StatusSnapshot) {
        match &snapshot.test {
            TestStatus::Running(run) => {
                self.step.store(saturating_u8(run.step), Ordering::Relaxed);
                self.steps.store(saturating_u8(run.steps), Ordering::Relaxed);
                store_f32(&self.step_value_bits, run.value);
                self.remaining_ms.store(
                    run.remaining.map_or(REMAINING_UNKNOWN, millis_u32),
                    Ordering::Relaxed,
                );
                self.elapsed_ms
                    .store(millis_u32(run.elapsed), Ordering::Relaxed);
                self.test_active.store(true, Ordering::Relaxed);
            }
            TestStatus::Idle => self.test_active.store(false, Ordering::Relaxed),
        }

        let buffer = &snapshot.buffer;
        self.buffer_len
            .store(saturating_u32(buffer.len), Ordering::Relaxed);
        self.buffer_dropped.store(buffer.dropped, Ordering::Relaxed);
        self.batches_uploaded
            .store(buffer.batches_uploaded, Ordering::Relaxed);
        self.batches_failed
            .store(buffer.batches_failed, Ordering::Relaxed);

        let sensors = &snapshot.sensors;
        store_f32(&self.load_cell_bits, sensors.load_cell);
        self.load_cell_valid
            .store(sensors.load_cell_valid, Ordering::Relaxed);
        self.ready_percent
            .store(sensors.ready_percent, Ordering::Relaxed);
        store_f32(&self.bus_voltage_bits, sensors.bus_voltage_v);
        store_f32(&self.bus_current_bits, sensors.bus_current_ma);
        store_f32(&self.commanded_bits, snapshot.commanded);
        self.tare.store(snapshot.tare, Ordering::Relaxed);

        if let Some(summary) = &snapshot.last_summary {
            self.record_summary(summary);
        }
    }

    fn record_summary(&self, summary: &TestSummary) {
        let outcome = match summary.outcome {
            TestOutcome::Completed => OUTCOME_COMPLETED,
            TestOutcome::Aborted => OUTCOME_ABORTED,
        };
        self.summary_steps
            .store(saturating_u8(summary.steps_run), Ordering::Relaxed);
        self.summary_duration_ms
            .store(millis_u32(summary.duration), Ordering::Relaxed);
        self.summary_samples
            .store(summary.samples, Ordering::Relaxed);
        self.summary_dropped
            .store(summary.dropped, Ordering::Relaxed);
        self.summary_uploaded
            .store(summary.batches_uploaded, Ordering::Relaxed);
        self.summary_failed
            .store(summary.batches_failed, Ordering::Relaxed);
        self.summary_outcome.store(outcome, Ordering::Relaxed);
    }

    fn last_summary(&self, test_id: Option<&TestId>) -> Option<TestSummary> {
        let outcome = match self.summary_outcome.load(Ordering::Relaxed) {
            OUTCOME_COMPLETED => TestOutcome::Completed,
            OUTCOME_ABORTED => TestOutcome::Aborted,
            _ => return None,
        };

        Some(TestSummary {
            test_id: test_id.cloned().unwrap_or_default(),
            outcome,
            steps_run: usize::from(self.summary_steps.load(Ordering::Relaxed)),
            duration: millis(self.summary_duration_ms.load(Ordering::Relaxed)),
            samples: self.summary_samples.load(Ordering::Relaxed),
            dropped: self.summary_dropped.load(Ordering::Relaxed),
            batches_uploaded: self.summary_uploaded.load(Ordering::Relaxed),
            batches_failed: self.summary_failed.load(Ordering::Relaxed),
        })
    }

    /// Rebuilds a [`StatusSnapshot`] from the stored metrics.
    ///
    /// `test_id` names the running (or most recently started) test.
    pub fn snapshot(&self, test_id: Option<&TestId>) -> StatusSnapshot {
        let test = if self.test_active.load(Ordering::Relaxed) {
            let remaining = match self.remaining_ms.load(Ordering::Relaxed) {
                REMAINING_UNKNOWN => None,
                raw => Some(millis(raw)),
            };
            TestStatus::Running(RunningTest {
                test_id: test_id.cloned().unwrap_or_default(),
                step: usize::from(self.step.load(Ordering::Relaxed)),
                steps: usize::from(self.steps.load(Ordering::Relaxed)),
                value: load_f32(&self.step_value_bits),
                remaining,
                elapsed: millis(self.elapsed_ms.load(Ordering::Relaxed)),
            })
        } else {
            TestStatus::Idle
        };

        StatusSnapshot {
            test,
            buffer: BufferStatus {
                len: self.buffer_len.load(Ordering::Relaxed) as usize,
                capacity: SAMPLE_BUFFER_CAPACITY,
                dropped: self.buffer_dropped.load(Ordering::Relaxed),
                batches_uploaded: self.batches_uploaded.load(Ordering::Relaxed),
                batches_failed: self.batches_failed.load(Ordering::Relaxed),
            },
            sensors: SensorStatus {
                load_cell: load_f32(&self.load_cell_bits),
                load_cell_valid: self.load_cell_valid.load(Ordering::Relaxed),
                ready_percent: self.ready_percent.load(Ordering::Relaxed),
                bus_voltage_v: load_f32(&self.bus_voltage_bits),
                bus_current_ma: load_f32(&self.bus_current_bits),
            },
            commanded: load_f32(&self.commanded_bits),
            tare: self.tare.load(Ordering::Relaxed),
            last_summary: self.last_summary(test_id),
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
