//! Telemetry event catalog and payload structures shared by firmware and host targets.
//!
//! The sampling loop records what happened during a test run (step changes,
//! dropped snapshots, flush results) into a fixed-size ring so the console and
//! display collaborators can observe the run without influencing it. Event
//! kinds encode to compact numeric codes so firmware status storage can carry
//! the most recent event in a single atomic.

#![cfg_attr(not(test), allow(dead_code))]

use core::{convert::TryFrom, fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

mod log_ring;
mod throttle;

pub use log_ring::{LOG_LINE_WIDTH, LOG_RING_LINES, LogLine, LogRing};
pub use throttle::LogThrottle;

/// Monotonic identifier assigned to each recorded event.
pub type EventId = u32;

/// Discriminated telemetry events emitted by the sampling loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    TestStarted,
    StepAdvanced,
    TestCompleted,
    TestAborted,
    SnapshotDropped,
    BatchUploaded,
    UploadFailed,
    BatchSkipped,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::TestStarted => f.write_str("test-started"),
            TelemetryEventKind::StepAdvanced => f.write_str("step-advanced"),
            TelemetryEventKind::TestCompleted => f.write_str("test-completed"),
            TelemetryEventKind::TestAborted => f.write_str("test-aborted"),
            TelemetryEventKind::SnapshotDropped => f.write_str("snapshot-dropped"),
            TelemetryEventKind::BatchUploaded => f.write_str("batch-uploaded"),
            TelemetryEventKind::UploadFailed => f.write_str("upload-failed"),
            TelemetryEventKind::BatchSkipped => f.write_str("batch-skipped"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const TEST_STARTED_CODE: u16 = 0x0001;
    const STEP_ADVANCED_CODE: u16 = 0x0002;
    const TEST_COMPLETED_CODE: u16 = 0x0003;
    const TEST_ABORTED_CODE: u16 = 0x0004;
    const SNAPSHOT_DROPPED_CODE: u16 = 0x0010;
    const BATCH_UPLOADED_CODE: u16 = 0x0020;
    const UPLOAD_FAILED_CODE: u16 = 0x0021;
    const BATCH_SKIPPED_CODE: u16 = 0x0022;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::TestStarted => Self::TEST_STARTED_CODE,
            TelemetryEventKind::StepAdvanced => Self::STEP_ADVANCED_CODE,
            TelemetryEventKind::TestCompleted => Self::TEST_COMPLETED_CODE,
            TelemetryEventKind::TestAborted => Self::TEST_ABORTED_CODE,
            TelemetryEventKind::SnapshotDropped => Self::SNAPSHOT_DROPPED_CODE,
            TelemetryEventKind::BatchUploaded => Self::BATCH_UPLOADED_CODE,
            TelemetryEventKind::UploadFailed => Self::UPLOAD_FAILED_CODE,
            TelemetryEventKind::BatchSkipped => Self::BATCH_SKIPPED_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant into a telemetry event, falling back to [`Custom`].
    ///
    /// [`Custom`]: TelemetryEventKind::Custom
    #[must_use]
    pub const fn from_raw(code: u16) -> Self {
        match code {
            Self::TEST_STARTED_CODE => TelemetryEventKind::TestStarted,
            Self::STEP_ADVANCED_CODE => TelemetryEventKind::StepAdvanced,
            Self::TEST_COMPLETED_CODE => TelemetryEventKind::TestCompleted,
            Self::TEST_ABORTED_CODE => TelemetryEventKind::TestAborted,
            Self::SNAPSHOT_DROPPED_CODE => TelemetryEventKind::SnapshotDropped,
            Self::BATCH_UPLOADED_CODE => TelemetryEventKind::BatchUploaded,
            Self::UPLOAD_FAILED_CODE => TelemetryEventKind::UploadFailed,
            Self::BATCH_SKIPPED_CODE => TelemetryEventKind::BatchSkipped,
            other => TelemetryEventKind::Custom(other),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Ramp step that became active.
    Step(StepTelemetry),
    /// Flush or drop bookkeeping for the sample buffer.
    Batch(BatchTelemetry),
    /// Summary attached to test start/end events.
    Test(TestTelemetry),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Ramp step payload. Values are stored in thousandths so the payload stays `Eq`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StepTelemetry {
    pub index: u8,
    pub value_permille: u16,
}

impl StepTelemetry {
    #[must_use]
    pub fn new(index: usize, value: f32) -> Self {
        Self {
            index: truncate_count(index),
            value_permille: permille(value),
        }
    }

    /// Returns the step value as a normalized fraction.
    #[must_use]
    pub fn value(self) -> f32 {
        f32::from(self.value_permille) / 1000.0
    }
}

/// Sample buffer payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BatchTelemetry {
    pub count: u16,
    pub dropped: u32,
}

impl BatchTelemetry {
    #[must_use]
    pub fn new(count: usize, dropped: u32) -> Self {
        Self {
            count: u16::try_from(count).unwrap_or(u16::MAX),
            dropped,
        }
    }
}

/// Test lifecycle payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TestTelemetry {
    pub steps: u8,
    pub duration: Option<Duration>,
}

impl TestTelemetry {
    #[must_use]
    pub fn new(steps: usize, duration: Option<Duration>) -> Self {
        Self {
            steps: truncate_count(steps),
            duration,
        }
    }
}

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Trait implemented by monotonic instant wrappers used throughout the core.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Returns the identifier that the next recorded event will receive.
    pub fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }

    /// Records the activation of a ramp step.
    pub fn record_step(&mut self, index: usize, value: f32, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::StepAdvanced,
            TelemetryPayload::Step(StepTelemetry::new(index, value)),
            timestamp,
        )
    }

    /// Records a flush or drop event for the sample buffer.
    pub fn record_batch(
        &mut self,
        event: TelemetryEventKind,
        count: usize,
        dropped: u32,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            event,
            TelemetryPayload::Batch(BatchTelemetry::new(count, dropped)),
            timestamp,
        )
    }

    /// Records a test lifecycle event, capturing elapsed time since `started_at`.
    pub fn record_test(
        &mut self,
        event: TelemetryEventKind,
        steps: usize,
        started_at: Option<TInstant>,
        timestamp: TInstant,
    ) -> EventId {
        let duration = started_at.map(|start| timestamp.saturating_duration_since(start));
        self.record(
            event,
            TelemetryPayload::Test(TestTelemetry::new(steps, duration)),
            timestamp,
        )
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_count(count: usize) -> u8 {
    match u8::try_from(count) {
        Ok(value) => value,
        Err(_) => u8::MAX,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn permille(value: f32) -> u16 {
    let clamped = if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    };
    (clamped * 1000.0 + 0.5) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct MillisInstant(u64);

    impl TelemetryInstant for MillisInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn event_codes_round_trip() {
        let events = [
            TelemetryEventKind::TestStarted,
            TelemetryEventKind::StepAdvanced,
            TelemetryEventKind::TestCompleted,
            TelemetryEventKind::TestAborted,
            TelemetryEventKind::SnapshotDropped,
            TelemetryEventKind::BatchUploaded,
            TelemetryEventKind::UploadFailed,
            TelemetryEventKind::BatchSkipped,
        ];

        for event in events {
            assert_eq!(TelemetryEventKind::from_raw(event.to_raw()), event);
        }
    }

    #[test]
    fn unknown_code_decodes_as_custom() {
        assert_eq!(
            TelemetryEventKind::from_raw(0x0BAD),
            TelemetryEventKind::Custom(0x0BAD)
        );
    }

    #[test]
    fn recorder_assigns_incrementing_ids() {
        let mut recorder: TelemetryRecorder<MillisInstant, 4> = TelemetryRecorder::new();
        assert!(recorder.is_empty());

        let first = recorder.record_step(0, 0.25, MillisInstant(10));
        let second = recorder.record_step(1, 0.5, MillisInstant(20));
        assert_eq!(first, 0);
        assert_eq!(second, 1);

        let latest = recorder.latest().copied().unwrap();
        assert_eq!(latest.event, TelemetryEventKind::StepAdvanced);
        match latest.details {
            TelemetryPayload::Step(step) => {
                assert_eq!(step.index, 1);
                assert_eq!(step.value_permille, 500);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn ring_keeps_most_recent_records() {
        let mut recorder: TelemetryRecorder<MillisInstant, 2> = TelemetryRecorder::new();
        for index in 0..5 {
            recorder.record_step(index, 0.0, MillisInstant(index as u64));
        }

        assert_eq!(recorder.len(), 2);
        let ids: heapless::Vec<EventId, 2> =
            recorder.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[3, 4]);
    }

    #[test]
    fn test_events_capture_duration() {
        let mut recorder: TelemetryRecorder<MillisInstant> = TelemetryRecorder::new();
        recorder.record_test(
            TelemetryEventKind::TestCompleted,
            3,
            Some(MillisInstant(1_000)),
            MillisInstant(4_250),
        );

        match recorder.latest().unwrap().details {
            TelemetryPayload::Test(summary) => {
                assert_eq!(summary.steps, 3);
                assert_eq!(summary.duration, Some(Duration::from_millis(3_250)));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn step_values_are_clamped_to_permille() {
        assert_eq!(StepTelemetry::new(0, 1.5).value_permille, 1000);
        assert_eq!(StepTelemetry::new(0, -0.2).value_permille, 0);
        assert_eq!(StepTelemetry::new(0, f32::NAN).value_permille, 0);
        assert!((StepTelemetry::new(0, 0.333).value() - 0.333).abs() < 1e-6);
    }
}
