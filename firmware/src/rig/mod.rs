//! Rig runtime glue binding `rig-core` to Embassy.
//!
//! The sampling loop itself lives in `rig-core`; this module supplies the
//! firmware instant, the request and uplink queues shared between tasks, and
//! [`RigRuntime`], which advances the loop once per scheduler tick and mirrors
//! its observations into logs, status storage and the display panel.

mod log;

use core::cell::RefCell;
use core::ops::Add;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use embassy_time::Instant;
use heapless::Vec;
use rig_core::buffer::{SAMPLE_BUFFER_CAPACITY, SensorSnapshot};
use rig_core::control::RigRequest;
use rig_core::display::DisplayPanel;
use rig_core::ports::{Actuator, LoadCellPort, PowerPort, Uploader};
use rig_core::sampling::{
    AbortError, RigConfig, SamplingLoop, StartError, TestId, TickReport,
};
use rig_core::telemetry::{EventId, LogRing, LogThrottle, TelemetryInstant, TelemetryRecorder};

use crate::status::StatusBoard;

/// Scheduler tick driving the sampling loop.
pub const TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Interval between idle bus-voltage samples for the display.
pub const IDLE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between load-cell ready statistics log lines.
pub const READY_STATS_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum spacing of "buffer full" log lines.
pub const BUFFER_FULL_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Depth of the console → rig request queue.
pub const REQUEST_QUEUE_DEPTH: usize = 4;

/// Batches that may wait for the CDC1 uplink at once.
pub const UPLINK_QUEUE_DEPTH: usize = 2;

#[cfg(target_os = "none")]
pub type RigMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub type RigMutex = NoopRawMutex;

/// Monotonic instant used by the firmware build of the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[cfg(target_os = "none")]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(Instant::from_millis(millis))
    }

    pub fn as_millis(self) -> u64 {
        self.0.as_millis()
    }

    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0
            .checked_duration_since(earlier.0)
            .map_or(Duration::ZERO, |elapsed| {
                Duration::from_micros(elapsed.as_micros())
            })
    }
}

impl Add<Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0 + embassy_time::Duration::from_micros(micros))
    }
}

pub type FirmwareRequest = RigRequest<FirmwareInstant>;

pub type RequestQueue = Channel<RigMutex, FirmwareRequest, REQUEST_QUEUE_DEPTH>;
pub type RequestSender<'a> = Sender<'a, RigMutex, FirmwareRequest, REQUEST_QUEUE_DEPTH>;
pub type RequestReceiver<'a> = Receiver<'a, RigMutex, FirmwareRequest, REQUEST_QUEUE_DEPTH>;

/// One flushed batch waiting for the uplink.
#[derive(Clone, Debug)]
pub struct UplinkBatch {
    pub test_id: TestId,
    pub snapshots: Vec<SensorSnapshot<FirmwareInstant>, SAMPLE_BUFFER_CAPACITY>,
}

pub type UplinkQueue = Channel<RigMutex, UplinkBatch, UPLINK_QUEUE_DEPTH>;
pub type UplinkSender<'a> = Sender<'a, RigMutex, UplinkBatch, UPLINK_QUEUE_DEPTH>;
pub type UplinkReceiver<'a> = Receiver<'a, RigMutex, UplinkBatch, UPLINK_QUEUE_DEPTH>;

/// Console log ring shared between the rig and console tasks.
pub type SharedLogRing = Mutex<RigMutex, RefCell<LogRing>>;

/// Reasons a batch could not be handed to the uplink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UplinkError {
    QueueFull,
    BatchTooLarge,
    TestIdTooLong,
}

/// [`Uploader`] that hands batches to the CDC1 uplink without blocking.
pub struct ChannelUploader<'a> {
    sender: UplinkSender<'a>,
}

impl<'a> ChannelUploader<'a> {
    pub fn new(sender: UplinkSender<'a>) -> Self {
        Self { sender }
    }
}

impl Uploader<FirmwareInstant> for ChannelUploader<'_> {
    type Error = UplinkError;

    fn upload(
        &mut self,
        test_id: &str,
        batch: &[SensorSnapshot<FirmwareInstant>],
    ) -> Result<(), Self::Error> {
        let test_id = TestId::try_from(test_id).map_err(|_| UplinkError::TestIdTooLong)?;
        let snapshots = Vec::from_slice(batch).map_err(|_| UplinkError::BatchTooLarge)?;

        match self.sender.try_send(UplinkBatch { test_id, snapshots }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(UplinkError::QueueFull),
        }
    }
}

/// Owns the sampling loop on the firmware side.
pub struct RigRuntime<'a, A, L, P> {
    sampling: SamplingLoop<FirmwareInstant, A, L, P, ChannelUploader<'a>>,
    telemetry: TelemetryRecorder<FirmwareInstant>,
    panel: DisplayPanel,
    logs: &'a SharedLogRing,
    status: &'a StatusBoard,
    buffer_full: LogThrottle<FirmwareInstant>,
    mirrored_through: EventId,
    last_idle_sample: Option<FirmwareInstant>,
    last_ready_log: Option<FirmwareInstant>,
}

impl<'a, A, L, P> RigRuntime<'a, A, L, P>
where
    A: Actuator,
    L: LoadCellPort,
    P: PowerPort,
{
    pub fn new(
        actuator: A,
        load_cell: L,
        power: P,
        uploader: ChannelUploader<'a>,
        logs: &'a SharedLogRing,
        status: &'a StatusBoard,
        config: RigConfig,
    ) -> Self {
        Self {
            sampling: SamplingLoop::new(actuator, load_cell, power, uploader, config),
            telemetry: TelemetryRecorder::new(),
            panel: DisplayPanel::new(),
            logs,
            status,
            buffer_full: LogThrottle::new(BUFFER_FULL_LOG_INTERVAL),
            mirrored_through: 0,
            last_idle_sample: None,
            last_ready_log: None,
        }
    }

    /// Captures the load-cell tare. Call once after the drivers are initialised.
    pub fn boot(&mut self, now: FirmwareInstant) -> i32 {
        let tare = self.sampling.capture_tare();
        self.status.record_tare(tare);
        log::tare_captured(self.logs, tare, now);
        tare
    }

    /// Applies a queued console request at the rig task's `now`.
    ///
    /// The console's request stamp is ignored so time spent in the queue does
    /// not shorten the first step or the first flush window.
    pub fn handle_request(&mut self, request: FirmwareRequest, now: FirmwareInstant) {
        match request {
            RigRequest::Start { plan, .. } => {
                let dwell = plan.ramp.dwell();
                match self.sampling.start(plan, now, &mut self.telemetry) {
                    Ok(()) => self.panel.show_test_started(dwell),
                    Err(StartError::AlreadyActive) => {
                        log::request_rejected(self.logs, "start", "test already running", now);
                    }
                }
                self.status.clear_start_pending();
            }
            RigRequest::Abort { .. } => match self.sampling.abort(now, &mut self.telemetry) {
                Ok((summary, _flush)) => self.panel.show_finished(summary.outcome),
                Err(AbortError::NotActive) => {
                    log::request_rejected(self.logs, "abort", "no test running", now);
                }
            },
        }
        self.mirror_telemetry();
        self.publish(now);
    }

    /// Runs one scheduler tick.
    pub fn tick(&mut self, now: FirmwareInstant) -> Option<TickReport<FirmwareInstant>> {
        let report = self.sampling.on_tick(now, &mut self.telemetry);

        match &report {
            Some(report) => self.observe(report, now),
            None => self.idle(now),
        }

        self.log_ready_stats(now);
        self.mirror_telemetry();
        self.publish(now);
        report
    }

    pub fn panel(&self) -> &DisplayPanel {
        &self.panel
    }

    pub fn sampling(&self) -> &SamplingLoop<FirmwareInstant, A, L, P, ChannelUploader<'a>> {
        &self.sampling
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<FirmwareInstant> {
        &self.telemetry
    }

    fn observe(&mut self, report: &TickReport<FirmwareInstant>, now: FirmwareInstant) {
        self.panel.apply(report);

        if report.push.is_dropped() && self.buffer_full.should_emit(now) {
            log::buffer_full(self.logs, SAMPLE_BUFFER_CAPACITY, now);
        }
    }

    fn idle(&mut self, now: FirmwareInstant) {
        let due = self
            .last_idle_sample
            .is_none_or(|last| now.saturating_duration_since(last) >= IDLE_SAMPLE_INTERVAL);
        if due {
            self.last_idle_sample = Some(now);
            let (voltage, _current) = self.sampling.sample_power();
            self.panel.show_voltage(voltage);
        }
    }

    fn log_ready_stats(&mut self, now: FirmwareInstant) {
        let Some(last) = self.last_ready_log else {
            self.last_ready_log = Some(now);
            return;
        };
        if now.saturating_duration_since(last) < READY_STATS_INTERVAL {
            return;
        }

        self.last_ready_log = Some(now);
        let stats = self.sampling.ready_stats();
        if stats.checks() > 0 {
            log::ready_stats(self.logs, stats.ready_percent(), stats.checks(), now);
        }
        self.sampling.reset_ready_stats();
    }

    fn mirror_telemetry(&mut self) {
        let cursor = self.mirrored_through;
        for record in self.telemetry.oldest_first().filter(|record| record.id >= cursor) {
            log::telemetry(self.logs, record);
        }
        self.mirrored_through = self.telemetry.next_event_id();
    }

    fn publish(&self, now: FirmwareInstant) {
        self.status.record_snapshot(&self.sampling.status(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_core::control::validate_plan;
    use rig_core::sampling::FlushOutcome;

    #[derive(Default)]
    struct StubEsc {
        last: f32,
    }

    impl Actuator for StubEsc {
        fn set_normalized(&mut self, value: f32) {
            self.last = value;
        }

        fn last_commanded(&self) -> f32 {
            self.last
        }
    }

    struct StubCell;

    impl LoadCellPort for StubCell {
        fn is_ready(&mut self) -> bool {
            true
        }

        fn read_raw(&mut self) -> i32 {
            1_250
        }
    }

    struct StubPower;

    impl PowerPort for StubPower {
        fn read_voltage(&mut self) -> f32 {
            12.5
        }

        fn read_current(&mut self) -> f32 {
            800.0
        }
    }

    fn ms(value: u64) -> FirmwareInstant {
        FirmwareInstant::from_millis(value)
    }

    #[test]
    fn instant_adds_core_durations() {
        let later = ms(10) + Duration::from_millis(5);
        assert_eq!(later.as_millis(), 15);
        assert_eq!(later.saturating_duration_since(ms(10)), Duration::from_millis(5));
        assert_eq!(ms(10).saturating_duration_since(later), Duration::ZERO);
    }

    #[test]
    fn full_uplink_queue_fails_the_upload() {
        let queue = UplinkQueue::new();
        let mut uploader = ChannelUploader::new(queue.sender());
        let snapshot = SensorSnapshot {
            timestamp: ms(0),
            load_cell: 0.0,
            load_cell_valid: true,
            bus_voltage_v: 12.0,
            bus_current_ma: 0.0,
            commanded: 0.0,
        };

        for _ in 0..UPLINK_QUEUE_DEPTH {
            assert_eq!(uploader.upload("run", &[snapshot]), Ok(()));
        }
        assert_eq!(
            uploader.upload("run", &[snapshot]),
            Err(UplinkError::QueueFull)
        );

        let batch = queue.try_receive().expect("queued batch");
        assert_eq!(batch.test_id.as_str(), "run");
        assert_eq!(batch.snapshots.len(), 1);
    }

    #[test]
    fn queued_start_begins_when_the_rig_task_handles_it() {
        let queue = UplinkQueue::new();
        let logs = SharedLogRing::new(RefCell::new(LogRing::new()));
        let board = StatusBoard::new();
        let mut runtime = RigRuntime::new(
            StubEsc::default(),
            StubCell,
            StubPower,
            ChannelUploader::new(queue.sender()),
            &logs,
            &board,
            RigConfig::default(),
        );
        runtime.boot(ms(0));

        let plan = validate_plan("late", &[0.3, 0.6], Duration::from_millis(100)).expect("plan");
        runtime.handle_request(
            RigRequest::Start {
                plan,
                requested_at: ms(10),
            },
            ms(90),
        );

        let session = runtime.sampling().session().expect("session active");
        assert_eq!(session.started_at(), ms(90));

        runtime.tick(ms(90));
        runtime.tick(ms(150));
        assert_eq!(runtime.sampling().actuator().last_commanded(), 0.3);
        runtime.tick(ms(190));
        assert_eq!(runtime.sampling().actuator().last_commanded(), 0.6);
    }

    #[test]
    fn runtime_runs_a_ramp_and_queues_batches() {
        let queue = UplinkQueue::new();
        let logs = SharedLogRing::new(RefCell::new(LogRing::new()));
        let board = StatusBoard::new();
        let mut runtime = RigRuntime::new(
            StubEsc::default(),
            StubCell,
            StubPower,
            ChannelUploader::new(queue.sender()),
            &logs,
            &board,
            RigConfig::default(),
        );

        assert_eq!(runtime.boot(ms(0)), 1_250);

        let plan = validate_plan("bench", &[0.5], Duration::from_millis(20)).expect("plan");
        runtime.handle_request(
            RigRequest::Start {
                plan,
                requested_at: ms(0),
            },
            ms(0),
        );
        assert_eq!(runtime.panel().header(), "Starting Test 0.0s/step");
        assert!(board.test_active());

        let mut finished = None;
        for t in 0..=25 {
            match runtime.tick(ms(t)) {
                Some(report) if report.finished.is_some() => {
                    finished = Some(report);
                    break;
                }
                _ => {}
            }
        }

        let report = finished.expect("ramp completes");
        assert!(matches!(report.flush, Some(FlushOutcome::Uploaded { .. })));
        assert_eq!(runtime.panel().header(), "Test Complete");
        assert!(!runtime.sampling().is_active());
        assert!(!board.test_active());

        let batch = queue.try_receive().expect("final batch");
        assert_eq!(batch.test_id.as_str(), "bench");
        assert!(batch.snapshots.iter().all(|s| s.load_cell == 0.0));

        let mirrored = logs.lock(|ring| ring.borrow().len());
        assert!(mirrored >= 3);
    }
}
