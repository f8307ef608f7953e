use core::time::Duration;

use heapless::Vec as HeaplessVec;
use rig_core::buffer::{PushOutcome, SensorSnapshot};
use rig_core::ports::{Actuator, LoadCellPort, PowerPort, Uploader};
use rig_core::ramp::{SetpointRamp, StepEvent};
use rig_core::sampling::{
    FlushOutcome, RigConfig, SamplingLoop, TestId, TestOutcome, TestPlan,
};
use rig_core::telemetry::{TelemetryEventKind, TelemetryInstant, TelemetryRecorder};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct MockInstant(u64);

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

#[derive(Default)]
struct RecordingActuator {
    commands: HeaplessVec<f32, 32>,
}

impl Actuator for RecordingActuator {
    fn set_normalized(&mut self, value: f32) {
        self.commands.push(value).expect("command log overflow");
    }

    fn last_commanded(&self) -> f32 {
        self.commands.last().copied().unwrap_or(0.0)
    }
}

struct SteadyCell(i32);

impl LoadCellPort for SteadyCell {
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
        12.5
    }

    fn read_current(&mut self) -> f32 {
        800.0
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Batch {
    test_id: TestId,
    count: usize,
    commanded: HeaplessVec<f32, 16>,
}

#[derive(Default)]
struct RecordingUploader {
    fail: bool,
    batches: HeaplessVec<Batch, 8>,
}

impl Uploader<MockInstant> for RecordingUploader {
    type Error = ();

    fn upload(
        &mut self,
        test_id: &str,
        batch: &[SensorSnapshot<MockInstant>],
    ) -> Result<(), Self::Error> {
        assert!(!batch.is_empty(), "empty batch uploaded");
        let mut id = TestId::new();
        id.push_str(test_id).unwrap();
        let commanded = batch
            .iter()
            .take(16)
            .map(|snapshot| snapshot.commanded)
            .collect();
        self.batches
            .push(Batch {
                test_id: id,
                count: batch.len(),
                commanded,
            })
            .expect("too many batches");
        if self.fail { Err(()) } else { Ok(()) }
    }
}

type Rig<const N: usize> =
    SamplingLoop<MockInstant, RecordingActuator, SteadyCell, Bus, RecordingUploader, N>;

fn rig<const N: usize>(config: RigConfig) -> Rig<N> {
    SamplingLoop::new(
        RecordingActuator::default(),
        SteadyCell(1_000),
        Bus,
        RecordingUploader::default(),
        config,
    )
}

fn plan(id: &str, values: &[f32], dwell_ms: u64) -> TestPlan {
    let mut test_id = TestId::new();
    test_id.push_str(id).unwrap();
    TestPlan::new(
        test_id,
        SetpointRamp::new(values, Duration::from_millis(dwell_ms)).unwrap(),
    )
}

fn count_events<const T: usize>(
    telemetry: &TelemetryRecorder<MockInstant, T>,
    kind: TelemetryEventKind,
) -> usize {
    telemetry
        .oldest_first()
        .filter(|record| record.event == kind)
        .count()
}

#[test]
fn buffer_never_exceeds_capacity_and_counts_drops() {
    let config = RigConfig::default().with_flush_interval(Duration::from_secs(60));
    let mut rig = rig::<8>(config);
    let mut telemetry: TelemetryRecorder<MockInstant, 32> = TelemetryRecorder::new();
    rig.start(plan("drops", &[0.4], 30_000), MockInstant(0), &mut telemetry)
        .unwrap();

    let attempts = 20u64;
    let mut drops_seen = 0;
    for t in 0..attempts {
        let report = rig.on_tick(MockInstant(t), &mut telemetry).unwrap();
        if report.push.is_dropped() {
            drops_seen += 1;
        }
    }

    let session = rig.session().unwrap();
    assert_eq!(session.buffer().len(), 8);
    assert_eq!(session.buffer().dropped(), 12);
    assert_eq!(drops_seen, 12);
    assert_eq!(count_events(&telemetry, TelemetryEventKind::SnapshotDropped), 1);
}

#[test]
fn flush_fires_once_per_interval() {
    let mut rig = rig::<8>(RigConfig::default());
    let mut telemetry: TelemetryRecorder<MockInstant, 32> = TelemetryRecorder::new();
    rig.start(plan("interval", &[0.6], 60_000), MockInstant(0), &mut telemetry)
        .unwrap();

    let mut flushes = HeaplessVec::<(u64, FlushOutcome), 8>::new();
    for t in (0..=5_000).step_by(500) {
        let report = rig.on_tick(MockInstant(t), &mut telemetry).unwrap();
        if let Some(flush) = report.flush {
            flushes.push((t, flush)).unwrap();
        }
    }

    assert_eq!(
        flushes.as_slice(),
        &[
            (2_000, FlushOutcome::Uploaded { count: 5 }),
            (4_000, FlushOutcome::Uploaded { count: 4 }),
        ]
    );
    let uploader = rig.uploader_mut();
    assert_eq!(uploader.batches.len(), 2);
    assert!(uploader.batches.iter().all(|batch| batch.test_id.as_str() == "interval"));
    assert_eq!(rig.totals().uploaded, 2);
}

#[test]
fn empty_buffer_is_never_uploaded() {
    let mut rig = rig::<0>(RigConfig::default());
    let mut telemetry: TelemetryRecorder<MockInstant, 32> = TelemetryRecorder::new();
    rig.start(plan("nothing", &[0.1], 3_000), MockInstant(0), &mut telemetry)
        .unwrap();

    let mut t = 0;
    while rig.is_active() {
        let report = rig.on_tick(MockInstant(t), &mut telemetry).unwrap();
        assert_eq!(report.flush, None);
        t += 100;
    }

    assert!(rig.uploader_mut().batches.is_empty());
    assert_eq!(rig.last_summary().unwrap().outcome, TestOutcome::Completed);
}

#[test]
fn failed_upload_discards_batch_without_retry() {
    let mut rig = rig::<16>(RigConfig::default());
    rig.uploader_mut().fail = true;
    let mut telemetry: TelemetryRecorder<MockInstant, 32> = TelemetryRecorder::new();
    rig.start(plan("offline", &[0.5], 10_000), MockInstant(0), &mut telemetry)
        .unwrap();

    let mut outcomes = HeaplessVec::<FlushOutcome, 4>::new();
    for t in (0..=4_000).step_by(1_000) {
        let report = rig.on_tick(MockInstant(t), &mut telemetry).unwrap();
        if let Some(flush) = report.flush {
            outcomes.push(flush).unwrap();
        }
        if t == 2_000 {
            assert!(rig.session().unwrap().buffer().is_empty());
        }
    }

    assert_eq!(
        outcomes.as_slice(),
        &[
            FlushOutcome::Failed { count: 3 },
            FlushOutcome::Failed { count: 2 },
        ]
    );
    let counts: HeaplessVec<usize, 4> = rig
        .uploader_mut()
        .batches
        .iter()
        .map(|batch| batch.count)
        .collect();
    assert_eq!(counts.as_slice(), &[3, 2]);
    assert_eq!(rig.totals().failed, 2);
    assert_eq!(count_events(&telemetry, TelemetryEventKind::UploadFailed), 2);
}

#[test]
fn completion_flushes_remaining_samples_and_goes_idle() {
    let mut rig = rig::<16>(RigConfig::default());
    let mut telemetry: TelemetryRecorder<MockInstant, 32> = TelemetryRecorder::new();
    rig.start(plan("short", &[0.2], 300), MockInstant(0), &mut telemetry)
        .unwrap();

    let mut last = None;
    for t in (0..=300).step_by(100) {
        last = rig.on_tick(MockInstant(t), &mut telemetry);
    }

    let report = last.unwrap();
    assert_eq!(report.step, Some(StepEvent::Completed));
    assert_eq!(report.flush, Some(FlushOutcome::Uploaded { count: 4 }));
    let summary = report.finished.unwrap();
    assert_eq!(summary.outcome, TestOutcome::Completed);
    assert_eq!(summary.steps_run, 1);
    assert_eq!(summary.samples, 4);
    assert_eq!(summary.duration, Duration::from_millis(300));

    assert!(!rig.is_active());
    assert!(rig.on_tick(MockInstant(400), &mut telemetry).is_none());
    assert_eq!(
        telemetry.latest().map(|record| record.event),
        Some(TelemetryEventKind::TestCompleted)
    );
}

#[test]
fn abort_zeroes_throttle_and_flushes() {
    let mut rig = rig::<16>(RigConfig::default());
    let mut telemetry: TelemetryRecorder<MockInstant, 32> = TelemetryRecorder::new();
    rig.start(plan("runaway", &[0.9, 1.0], 5_000), MockInstant(0), &mut telemetry)
        .unwrap();

    for t in [0, 10, 20] {
        let _ = rig.on_tick(MockInstant(t), &mut telemetry);
    }

    let (summary, flush) = rig.abort(MockInstant(25), &mut telemetry).unwrap();
    assert_eq!(summary.outcome, TestOutcome::Aborted);
    assert_eq!(summary.test_id.as_str(), "runaway");
    assert_eq!(flush, Some(FlushOutcome::Uploaded { count: 3 }));
    assert_eq!(rig.actuator().last_commanded(), 0.0);
    assert!(!rig.is_active());
    assert_eq!(count_events(&telemetry, TelemetryEventKind::TestAborted), 1);

    rig.start(plan("next", &[0.1], 100), MockInstant(30), &mut telemetry)
        .expect("rig accepts a new test after abort");
}

#[test]
fn batches_without_test_id_are_skipped() {
    let mut rig = rig::<16>(RigConfig::default());
    let mut telemetry: TelemetryRecorder<MockInstant, 32> = TelemetryRecorder::new();
    let anonymous = TestPlan::new(
        TestId::new(),
        SetpointRamp::new(&[0.3], Duration::from_millis(100)).unwrap(),
    );
    rig.start(anonymous, MockInstant(0), &mut telemetry).unwrap();

    let _ = rig.on_tick(MockInstant(0), &mut telemetry);
    let report = rig.on_tick(MockInstant(100), &mut telemetry).unwrap();

    assert_eq!(report.flush, Some(FlushOutcome::Skipped { count: 2 }));
    assert!(rig.uploader_mut().batches.is_empty());
    assert_eq!(count_events(&telemetry, TelemetryEventKind::BatchSkipped), 1);
}

#[test]
fn reference_scenario_tags_snapshots_before_advancing() {
    let mut rig = rig::<32>(RigConfig::default());
    let mut telemetry: TelemetryRecorder<MockInstant, 32> = TelemetryRecorder::new();
    assert_eq!(rig.capture_tare(), 1_000);
    rig.start(plan("e2e", &[0.0, 0.5, 1.0], 1_000), MockInstant(0), &mut telemetry)
        .unwrap();

    let mut tagged = HeaplessVec::<f32, 8>::new();
    let mut advanced = 0;
    let mut completed = 0;
    for t in [0, 999, 1_001, 1_999, 2_001, 2_999, 3_001] {
        let report = rig.on_tick(MockInstant(t), &mut telemetry).unwrap();
        assert!(matches!(report.push, PushOutcome::Stored { .. }));
        assert_eq!(report.snapshot.load_cell, 0.0);
        assert!(report.snapshot.load_cell_valid);
        tagged.push(report.snapshot.commanded).unwrap();
        match report.step {
            Some(StepEvent::Advanced { .. }) => advanced += 1,
            Some(StepEvent::Completed) => completed += 1,
            _ => {}
        }
    }

    assert_eq!(rig.actuator().commands.as_slice(), &[0.0, 0.5, 1.0, 0.0]);
    assert_eq!(tagged.as_slice(), &[0.0, 0.0, 0.0, 0.5, 0.5, 1.0, 1.0]);
    assert_eq!(advanced, 3);
    assert_eq!(completed, 1);

    let counts: HeaplessVec<usize, 4> = rig
        .uploader_mut()
        .batches
        .iter()
        .map(|batch| batch.count)
        .collect();
    assert_eq!(counts.as_slice(), &[5, 2]);
    assert_eq!(count_events(&telemetry, TelemetryEventKind::StepAdvanced), 3);
}
