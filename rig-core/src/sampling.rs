//! Per-tick test orchestration.
//!
//! [`SamplingLoop`] owns the hardware ports and, while a [`TestSession`] is
//! present, turns every scheduler tick into one [`SensorSnapshot`], advances the
//! ramp and flushes the buffer to the [`Uploader`] on a fixed interval. The
//! session is the only mutable test state; "a test is running" is simply
//! `session.is_some()`.
//!
//! Within one tick the snapshot is always captured before the ramp advances, so
//! the commanded value tagged on a snapshot is the one that was held for the
//! preceding dwell window.

use core::fmt;
use core::time::Duration;

use heapless::String;

use crate::buffer::{PushOutcome, SAMPLE_BUFFER_CAPACITY, SampleBuffer, SensorSnapshot};
use crate::debounce::{DebounceConfig, LoadCellDebounce, LoadCellReading, ReadyStats};
use crate::ports::{Actuator, LoadCellPort, PowerPort, RAW_READ_FAILED, Uploader};
use crate::ramp::{RampSequencer, SetpointRamp, StepEvent};
use crate::repl::status::{
    BufferStatus, RunningTest, SensorStatus, StatusSnapshot, TestStatus,
};
use crate::telemetry::{TelemetryEventKind, TelemetryInstant, TelemetryRecorder};

/// Interval between periodic buffer flushes.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(2_000);
/// Maximum length of a test identifier in bytes.
pub const MAX_TEST_ID_LEN: usize = 32;

pub type TestId = String<MAX_TEST_ID_LEN>;

/// Tunables for the sampling loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RigConfig {
    pub flush_interval: Duration,
    pub debounce: DebounceConfig,
}

impl RigConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flush_interval: FLUSH_INTERVAL,
            debounce: DebounceConfig::new(),
        }
    }

    #[must_use]
    pub const fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    #[must_use]
    pub const fn with_debounce(mut self, debounce: DebounceConfig) -> Self {
        self.debounce = debounce;
        self
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A validated request to run one ramp.
#[derive(Clone, Debug, PartialEq)]
pub struct TestPlan {
    pub test_id: TestId,
    pub ramp: SetpointRamp,
}

impl TestPlan {
    #[must_use]
    pub const fn new(test_id: TestId, ramp: SetpointRamp) -> Self {
        Self { test_id, ramp }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestOutcome {
    Completed,
    Aborted,
}

/// Summary of a finished test run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestSummary {
    pub test_id: TestId,
    pub outcome: TestOutcome,
    pub steps_run: usize,
    pub duration: Duration,
    pub samples: u32,
    pub dropped: u32,
    pub batches_uploaded: u32,
    pub batches_failed: u32,
}

/// What happened to a drained batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    Uploaded { count: usize },
    /// The uploader reported an error; the batch was discarded.
    Failed { count: usize },
    /// No test id was set; the batch was discarded without uploading.
    Skipped { count: usize },
}

impl FlushOutcome {
    #[must_use]
    pub const fn count(&self) -> usize {
        match self {
            FlushOutcome::Uploaded { count }
            | FlushOutcome::Failed { count }
            | FlushOutcome::Skipped { count } => *count,
        }
    }
}

/// Observable result of one [`SamplingLoop::on_tick`].
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport<TInstant> {
    pub snapshot: SensorSnapshot<TInstant>,
    pub push: PushOutcome,
    pub step: Option<StepEvent>,
    pub flush: Option<FlushOutcome>,
    pub finished: Option<TestSummary>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartError {
    AlreadyActive,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::AlreadyActive => f.write_str("a test is already running"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortError {
    NotActive,
}

impl fmt::Display for AbortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortError::NotActive => f.write_str("no test is running"),
        }
    }
}

/// State of the single active test.
pub struct TestSession<TInstant, const N: usize = SAMPLE_BUFFER_CAPACITY> {
    test_id: TestId,
    sequencer: RampSequencer<TInstant>,
    buffer: SampleBuffer<TInstant, N>,
    started_at: TInstant,
    last_flush_at: TInstant,
    steps_run: usize,
    samples: u32,
    batches_uploaded: u32,
    batches_failed: u32,
    drop_reported: bool,
}

impl<TInstant, const N: usize> TestSession<TInstant, N>
where
    TInstant: TelemetryInstant,
{
    fn new(test_id: TestId, now: TInstant) -> Self {
        Self {
            test_id,
            sequencer: RampSequencer::new(),
            buffer: SampleBuffer::new(),
            started_at: now,
            last_flush_at: now,
            steps_run: 0,
            samples: 0,
            batches_uploaded: 0,
            batches_failed: 0,
            drop_reported: false,
        }
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn sequencer(&self) -> &RampSequencer<TInstant> {
        &self.sequencer
    }

    pub fn buffer(&self) -> &SampleBuffer<TInstant, N> {
        &self.buffer
    }

    pub fn started_at(&self) -> TInstant {
        self.started_at
    }

    fn flush<U, const T: usize>(
        &mut self,
        uploader: &mut U,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant, T>,
    ) -> FlushOutcome
    where
        U: Uploader<TInstant>,
    {
        let count = self.buffer.len();
        let dropped = self.buffer.dropped();

        let outcome = if self.test_id.is_empty() {
            telemetry.record_batch(TelemetryEventKind::BatchSkipped, count, dropped, now);
            FlushOutcome::Skipped { count }
        } else if uploader.upload(&self.test_id, self.buffer.as_slice()).is_ok() {
            self.batches_uploaded = self.batches_uploaded.saturating_add(1);
            telemetry.record_batch(TelemetryEventKind::BatchUploaded, count, dropped, now);
            FlushOutcome::Uploaded { count }
        } else {
            self.batches_failed = self.batches_failed.saturating_add(1);
            telemetry.record_batch(TelemetryEventKind::UploadFailed, count, dropped, now);
            FlushOutcome::Failed { count }
        };

        self.buffer.clear();
        self.drop_reported = false;
        outcome
    }

    fn summarize(self, outcome: TestOutcome, now: TInstant) -> TestSummary {
        TestSummary {
            duration: now.saturating_duration_since(self.started_at),
            dropped: self.buffer.dropped(),
            test_id: self.test_id,
            outcome,
            steps_run: self.steps_run,
            samples: self.samples,
            batches_uploaded: self.batches_uploaded,
            batches_failed: self.batches_failed,
        }
    }
}

/// Lifetime upload counters across all tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadTotals {
    pub uploaded: u32,
    pub failed: u32,
}

/// Sampling loop owning the rig ports.
pub struct SamplingLoop<TInstant, A, L, P, U, const N: usize = SAMPLE_BUFFER_CAPACITY> {
    actuator: A,
    load_cell: L,
    power: P,
    uploader: U,
    config: RigConfig,
    debounce: LoadCellDebounce<TInstant>,
    tare: i32,
    session: Option<TestSession<TInstant, N>>,
    last_summary: Option<TestSummary>,
    last_sensors: SensorStatus,
    totals: UploadTotals,
}

impl<TInstant, A, L, P, U, const N: usize> SamplingLoop<TInstant, A, L, P, U, N>
where
    TInstant: TelemetryInstant,
    A: Actuator,
    L: LoadCellPort,
    P: PowerPort,
    U: Uploader<TInstant>,
{
    pub fn new(actuator: A, load_cell: L, power: P, uploader: U, config: RigConfig) -> Self {
        Self {
            actuator,
            load_cell,
            power,
            uploader,
            config,
            debounce: LoadCellDebounce::new(config.debounce),
            tare: 0,
            session: None,
            last_summary: None,
            last_sensors: SensorStatus::unknown(),
            totals: UploadTotals::default(),
        }
    }

    /// Reads the load cell once and keeps it as the zero offset.
    ///
    /// A failed read leaves the tare at zero. Returns the tare in effect.
    pub fn capture_tare(&mut self) -> i32 {
        let raw = self.load_cell.read_raw();
        if raw != RAW_READ_FAILED {
            self.tare = raw;
        }
        self.tare
    }

    /// Begins a test. The first setpoint is commanded immediately.
    pub fn start<const T: usize>(
        &mut self,
        plan: TestPlan,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant, T>,
    ) -> Result<(), StartError> {
        if self.session.is_some() {
            return Err(StartError::AlreadyActive);
        }

        let steps = plan.ramp.len();
        let mut session = TestSession::new(plan.test_id, now);
        session.sequencer.start(plan.ramp, now, &mut self.actuator);
        telemetry.record_test(TelemetryEventKind::TestStarted, steps, None, now);
        self.session = Some(session);
        Ok(())
    }

    /// Runs one sampling tick. Returns `None` while no test is running.
    pub fn on_tick<const T: usize>(
        &mut self,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant, T>,
    ) -> Option<TickReport<TInstant>> {
        let session = self.session.as_mut()?;

        let commanded = self.actuator.last_commanded();
        let reading = self.debounce.read(&mut self.load_cell, now);
        let load_cell = tare_corrected(reading, self.tare);
        let bus_voltage_v = self.power.read_voltage();
        let bus_current_ma = self.power.read_current();

        let snapshot = SensorSnapshot {
            timestamp: now,
            load_cell,
            load_cell_valid: reading.valid,
            bus_voltage_v,
            bus_current_ma,
            commanded,
        };
        self.last_sensors = SensorStatus {
            load_cell,
            load_cell_valid: reading.valid,
            ready_percent: self.debounce.stats().ready_percent(),
            bus_voltage_v,
            bus_current_ma,
        };

        let push = session.buffer.push(snapshot);
        match push {
            PushOutcome::Stored { .. } => session.samples = session.samples.saturating_add(1),
            PushOutcome::Dropped { total_dropped } => {
                if !session.drop_reported {
                    session.drop_reported = true;
                    telemetry.record_batch(
                        TelemetryEventKind::SnapshotDropped,
                        session.buffer.len(),
                        total_dropped,
                        now,
                    );
                }
            }
        }

        let step = session.sequencer.tick(now, &mut self.actuator);
        if let Some(StepEvent::Advanced { index, value }) = step {
            session.steps_run = index + 1;
            telemetry.record_step(index, value, now);
        }

        let mut flush = None;
        if now.saturating_duration_since(session.last_flush_at) >= self.config.flush_interval {
            session.last_flush_at = now;
            if !session.buffer.is_empty() {
                flush = Some(session.flush(&mut self.uploader, now, telemetry));
            }
        }

        let completed = step.is_some_and(|event| event.is_completed());
        if completed && !session.buffer.is_empty() {
            flush = Some(session.flush(&mut self.uploader, now, telemetry));
        }
        if let Some(outcome) = flush {
            self.totals.record(outcome);
        }

        let finished = if completed {
            self.finish(TestOutcome::Completed, now, telemetry)
        } else {
            None
        };

        Some(TickReport {
            snapshot,
            push,
            step,
            flush,
            finished,
        })
    }

    /// Cancels the running test: drives the actuator to zero and flushes what is buffered.
    pub fn abort<const T: usize>(
        &mut self,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant, T>,
    ) -> Result<(TestSummary, Option<FlushOutcome>), AbortError> {
        let session = self.session.as_mut().ok_or(AbortError::NotActive)?;

        if !session.sequencer.cancel(&mut self.actuator) {
            self.actuator.set_normalized(0.0);
        }

        let flush = if session.buffer.is_empty() {
            None
        } else {
            let outcome = session.flush(&mut self.uploader, now, telemetry);
            self.totals.record(outcome);
            Some(outcome)
        };

        let summary = self
            .finish(TestOutcome::Aborted, now, telemetry)
            .ok_or(AbortError::NotActive)?;
        Ok((summary, flush))
    }

    fn finish<const T: usize>(
        &mut self,
        outcome: TestOutcome,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant, T>,
    ) -> Option<TestSummary> {
        let session = self.session.take()?;
        let event = match outcome {
            TestOutcome::Completed => TelemetryEventKind::TestCompleted,
            TestOutcome::Aborted => TelemetryEventKind::TestAborted,
        };
        telemetry.record_test(event, session.steps_run, Some(session.started_at), now);

        let summary = session.summarize(outcome, now);
        self.last_summary = Some(summary.clone());
        Some(summary)
    }

    /// Samples the power monitor outside of a test (idle display refresh).
    pub fn sample_power(&mut self) -> (f32, f32) {
        let voltage = self.power.read_voltage();
        let current = self.power.read_current();
        self.last_sensors.bus_voltage_v = voltage;
        self.last_sensors.bus_current_ma = current;
        (voltage, current)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&TestSession<TInstant, N>> {
        self.session.as_ref()
    }

    pub fn last_summary(&self) -> Option<&TestSummary> {
        self.last_summary.as_ref()
    }

    pub fn tare(&self) -> i32 {
        self.tare
    }

    pub fn totals(&self) -> UploadTotals {
        self.totals
    }

    pub fn ready_stats(&self) -> ReadyStats {
        self.debounce.stats()
    }

    pub fn reset_ready_stats(&mut self) {
        self.debounce.reset_stats();
    }

    pub fn config(&self) -> RigConfig {
        self.config
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn load_cell_mut(&mut self) -> &mut L {
        &mut self.load_cell
    }

    pub fn uploader_mut(&mut self) -> &mut U {
        &mut self.uploader
    }

    /// Builds a point-in-time view for the console and display.
    pub fn status(&self, now: TInstant) -> StatusSnapshot {
        let test = match &self.session {
            Some(session) => TestStatus::Running(RunningTest {
                test_id: session.test_id.clone(),
                step: session.sequencer.step_index().unwrap_or(0),
                steps: session.sequencer.step_count(),
                value: session.sequencer.current_value().unwrap_or(0.0),
                remaining: session.sequencer.remaining(now),
                elapsed: now.saturating_duration_since(session.started_at),
            }),
            None => TestStatus::Idle,
        };

        let (len, dropped) = match &self.session {
            Some(session) => (session.buffer.len(), session.buffer.dropped()),
            None => (0, self.last_summary.as_ref().map_or(0, |summary| summary.dropped)),
        };

        let mut sensors = self.last_sensors;
        sensors.ready_percent = self.debounce.stats().ready_percent();

        StatusSnapshot {
            test,
            buffer: BufferStatus {
                len,
                capacity: N,
                dropped,
                batches_uploaded: self.totals.uploaded,
                batches_failed: self.totals.failed,
            },
            sensors,
            commanded: self.actuator.last_commanded(),
            tare: self.tare,
            last_summary: self.last_summary.clone(),
        }
    }
}

impl UploadTotals {
    fn record(&mut self, outcome: FlushOutcome) {
        match outcome {
            FlushOutcome::Uploaded { .. } => self.uploaded = self.uploaded.saturating_add(1),
            FlushOutcome::Failed { .. } => self.failed = self.failed.saturating_add(1),
            FlushOutcome::Skipped { .. } => {}
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn tare_corrected(reading: LoadCellReading, tare: i32) -> f32 {
    if reading.valid {
        reading.value - tare as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NoopUploader;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct MockInstant(u64);

    impl TelemetryInstant for MockInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(earlier.0))
        }
    }

    #[derive(Default)]
    struct Throttle(f32);

    impl Actuator for Throttle {
        fn set_normalized(&mut self, value: f32) {
            self.0 = value;
        }

        fn last_commanded(&self) -> f32 {
            self.0
        }
    }

    struct FixedCell(i32);

    impl LoadCellPort for FixedCell {
        fn is_ready(&mut self) -> bool {
            true
        }

        fn read_raw(&mut self) -> i32 {
            self.0
        }
    }

    struct Bus;

    impl PowerPort for Bus {
        fn read_voltage(&mut self) -> f32 {
            12.0
        }

        fn read_current(&mut self) -> f32 {
            250.0
        }
    }

    fn plan(id: &str, setpoints: &[f32], dwell_ms: u64) -> TestPlan {
        let mut test_id = TestId::new();
        test_id.push_str(id).unwrap();
        TestPlan::new(
            test_id,
            SetpointRamp::new(setpoints, Duration::from_millis(dwell_ms)).unwrap(),
        )
    }

    #[test]
    fn tare_is_subtracted_from_valid_readings() {
        let mut rig: SamplingLoop<MockInstant, _, _, _, _, 8> = SamplingLoop::new(
            Throttle::default(),
            FixedCell(1_000),
            Bus,
            NoopUploader,
            RigConfig::default(),
        );
        assert_eq!(rig.capture_tare(), 1_000);
        rig.load_cell_mut().0 = 1_250;

        let mut telemetry: TelemetryRecorder<MockInstant, 16> = TelemetryRecorder::new();
        rig.start(plan("tare", &[0.5], 100), MockInstant(0), &mut telemetry)
            .unwrap();
        let report = rig.on_tick(MockInstant(0), &mut telemetry).unwrap();

        assert_eq!(report.snapshot.load_cell, 250.0);
        assert!(report.snapshot.load_cell_valid);
        assert_eq!(report.snapshot.commanded, 0.5);
    }

    #[test]
    fn failed_tare_read_keeps_zero_offset() {
        let mut rig: SamplingLoop<MockInstant, _, _, _, _, 8> = SamplingLoop::new(
            Throttle::default(),
            FixedCell(RAW_READ_FAILED),
            Bus,
            NoopUploader,
            RigConfig::default(),
        );
        assert_eq!(rig.capture_tare(), 0);
    }

    #[test]
    fn second_start_is_rejected() {
        let mut rig: SamplingLoop<MockInstant, _, _, _, _, 8> = SamplingLoop::new(
            Throttle::default(),
            FixedCell(5),
            Bus,
            NoopUploader,
            RigConfig::default(),
        );
        let mut telemetry: TelemetryRecorder<MockInstant, 16> = TelemetryRecorder::new();
        rig.start(plan("a", &[0.1], 100), MockInstant(0), &mut telemetry)
            .unwrap();
        assert_eq!(
            rig.start(plan("b", &[0.9], 100), MockInstant(1), &mut telemetry),
            Err(StartError::AlreadyActive)
        );
        assert_eq!(rig.session().unwrap().test_id(), "a");
    }

    #[test]
    fn idle_tick_does_nothing() {
        let mut rig: SamplingLoop<MockInstant, _, _, _, _, 8> = SamplingLoop::new(
            Throttle::default(),
            FixedCell(5),
            Bus,
            NoopUploader,
            RigConfig::default(),
        );
        let mut telemetry: TelemetryRecorder<MockInstant, 16> = TelemetryRecorder::new();
        assert!(rig.on_tick(MockInstant(10), &mut telemetry).is_none());
        assert!(telemetry.is_empty());
        assert_eq!(
            rig.abort(MockInstant(10), &mut telemetry),
            Err(AbortError::NotActive)
        );
    }

    #[test]
    fn status_reports_running_step() {
        let mut rig: SamplingLoop<MockInstant, _, _, _, _, 8> = SamplingLoop::new(
            Throttle::default(),
            FixedCell(5),
            Bus,
            NoopUploader,
            RigConfig::default(),
        );
        let mut telemetry: TelemetryRecorder<MockInstant, 16> = TelemetryRecorder::new();
        rig.start(plan("s", &[0.2, 0.4], 1_000), MockInstant(0), &mut telemetry)
            .unwrap();
        let _ = rig.on_tick(MockInstant(0), &mut telemetry);
        let _ = rig.on_tick(MockInstant(1_000), &mut telemetry);

        let status = rig.status(MockInstant(1_300));
        match status.test {
            TestStatus::Running(run) => {
                assert_eq!(run.step, 1);
                assert_eq!(run.steps, 2);
                assert_eq!(run.value, 0.4);
                assert_eq!(run.remaining, Some(Duration::from_millis(700)));
            }
            TestStatus::Idle => panic!("expected running test"),
        }
        assert_eq!(status.buffer.len, 2);
        assert_eq!(status.buffer.capacity, 8);
        assert_eq!(status.sensors.bus_voltage_v, 12.0);
    }
}
