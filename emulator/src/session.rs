use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use rig_core::control::{RigControl, RigRequest, SubmitError, TriggerRejection, validate_plan};
use rig_core::display::DisplayPanel;
use rig_core::ramp::StepEvent;
use rig_core::repl::commands::{CommandExecutor, CommandOutcome};
use rig_core::repl::status::{StatusFormatter, StatusSnapshot};
use rig_core::sampling::{FlushOutcome, RigConfig, SamplingLoop, TickReport};
use rig_core::telemetry::{
    EventId, LogRing, LogThrottle, TelemetryInstant, TelemetryPayload, TelemetryRecorder,
};
use serde::Deserialize;
use serde_json::json;

use crate::collector::{CollectorRequest, CollectorUploader};
use crate::sim::{Bench, SimEsc, SimInstant, SimLoadCell, SimPowerMonitor};

/// Virtual time advanced per sampling tick.
pub const TICK: Duration = Duration::from_millis(1);

const IDLE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const BUFFER_FULL_LOG_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_LOG_LINES: usize = 20;

/// Every this many load-cell reads fails in the `overflow` profile.
const OVERFLOW_PROFILE_FAIL_EVERY: u32 = 7;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Ramp,
    Abort,
    Overflow,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Ramp => "transcripts/emulator-ramp.log",
            TranscriptProfile::Abort => "transcripts/emulator-abort.log",
            TranscriptProfile::Overflow => "transcripts/emulator-overflow.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Ramp => "Motor test rig emulator ramp transcript",
            TranscriptProfile::Abort => "Motor test rig emulator abort transcript",
            TranscriptProfile::Overflow => "Motor test rig emulator overflow transcript",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("ramp") {
            Ok(Self::Ramp)
        } else if tag.eq_ignore_ascii_case("abort") {
            Ok(Self::Abort)
        } else if tag.eq_ignore_ascii_case("overflow") {
            Ok(Self::Overflow)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    pub profile: TranscriptProfile,
    pub fail_uploads: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            profile: TranscriptProfile::Ramp,
            fail_uploads: false,
        }
    }
}

type HostLoop = SamplingLoop<SimInstant, SimEsc, SimLoadCell, SimPowerMonitor, CollectorUploader>;

/// [`RigControl`] with direct access to the sampling loop; requests apply
/// immediately instead of crossing a queue.
pub struct HostRig {
    sampling: HostLoop,
    telemetry: TelemetryRecorder<SimInstant>,
    panel: DisplayPanel,
    bench: Rc<Bench>,
    last_idle_sample: Option<SimInstant>,
}

impl HostRig {
    pub fn new(options: SessionOptions) -> Self {
        let bench = Bench::new();
        let mut load_cell = SimLoadCell::new(Rc::clone(&bench));
        if options.profile == TranscriptProfile::Overflow {
            load_cell = load_cell.with_failures(OVERFLOW_PROFILE_FAIL_EVERY);
        }
        let mut uploader = CollectorUploader::new();
        uploader.set_fail_uploads(options.fail_uploads);

        Self {
            sampling: SamplingLoop::new(
                SimEsc::new(Rc::clone(&bench)),
                load_cell,
                SimPowerMonitor::new(Rc::clone(&bench)),
                uploader,
                RigConfig::default(),
            ),
            telemetry: TelemetryRecorder::new(),
            panel: DisplayPanel::new(),
            bench,
            last_idle_sample: None,
        }
    }

    pub fn capture_tare(&mut self) -> i32 {
        self.sampling.capture_tare()
    }

    /// Runs one tick at `now`, updating the panel.
    pub fn tick(&mut self, now: SimInstant) -> Option<TickReport<SimInstant>> {
        self.bench.set_now(now);
        let report = self.sampling.on_tick(now, &mut self.telemetry);
        match &report {
            Some(report) => self.panel.apply(report),
            None => {
                let due = self
                    .last_idle_sample
                    .is_none_or(|last| now.saturating_duration_since(last) >= IDLE_SAMPLE_INTERVAL);
                if due {
                    self.last_idle_sample = Some(now);
                    let (voltage_v, _) = self.sampling.sample_power();
                    self.panel.show_voltage(voltage_v);
                }
            }
        }
        report
    }

    pub fn panel(&self) -> &DisplayPanel {
        &self.panel
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<SimInstant> {
        &self.telemetry
    }

    pub fn sampling(&self) -> &HostLoop {
        &self.sampling
    }

    pub fn collector(&mut self) -> &mut CollectorUploader {
        self.sampling.uploader_mut()
    }
}

impl RigControl for HostRig {
    type Instant = SimInstant;

    fn test_active(&self) -> bool {
        self.sampling.is_active()
    }

    fn submit(&mut self, request: RigRequest<SimInstant>) -> Result<(), SubmitError> {
        self.bench.set_now(match &request {
            RigRequest::Start { requested_at, .. } | RigRequest::Abort { requested_at } => {
                *requested_at
            }
        });

        match request {
            RigRequest::Start { plan, requested_at } => {
                let dwell = plan.ramp.dwell();
                self.sampling
                    .start(plan, requested_at, &mut self.telemetry)
                    .map_err(|_| TriggerRejection::TestActive)?;
                self.panel.show_test_started(dwell);
            }
            RigRequest::Abort { requested_at } => {
                let (summary, _flush) = self
                    .sampling
                    .abort(requested_at, &mut self.telemetry)
                    .map_err(|_| TriggerRejection::NoActiveTest)?;
                self.panel.show_finished(summary.outcome);
            }
        }
        Ok(())
    }

    fn status(&mut self, now: SimInstant) -> Option<StatusSnapshot> {
        Some(self.sampling.status(now))
    }
}

/// Body of the HTTP-shaped `/motor/control` request.
#[derive(Debug, Deserialize)]
pub struct MotorControlRequest {
    pub test_id: String,
    pub speeds: Vec<f32>,
    pub ramp_delay: u64,
}

/// Status code and JSON body answered to a `post`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl HttpReply {
    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }
}

pub struct Session {
    executor: CommandExecutor<HostRig>,
    clock: SimInstant,
    transcript: TranscriptLogger,
    logs: LogRing,
    mirrored_through: EventId,
    buffer_full: LogThrottle<SimInstant>,
}

impl Session {
    /// Opens a session that records its transcript under the profile's log path.
    pub fn new(options: SessionOptions) -> io::Result<Self> {
        let transcript = TranscriptLogger::create(options.profile)?;
        Ok(Self::with_transcript(options, transcript))
    }

    /// Opens a session whose transcript is discarded.
    pub fn detached(options: SessionOptions) -> Self {
        Self::with_transcript(options, TranscriptLogger::from_writer(Box::new(io::sink())))
    }

    fn with_transcript(options: SessionOptions, transcript: TranscriptLogger) -> Self {
        let mut rig = HostRig::new(options);
        let tare = rig.capture_tare();
        let mut logs = LogRing::new();
        logs.push_fmt(format_args!("hx711: tare captured raw={tare} t=0ms"));

        Self {
            executor: CommandExecutor::new(rig),
            clock: SimInstant::default(),
            transcript,
            logs,
            mirrored_through: 0,
            buffer_full: LogThrottle::new(BUFFER_FULL_LOG_INTERVAL),
        }
    }

    pub fn now(&self) -> SimInstant {
        self.clock
    }

    pub fn rig(&self) -> &HostRig {
        self.executor.control()
    }

    pub fn rig_mut(&mut self) -> &mut HostRig {
        self.executor.control_mut()
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.transcript
            .append_line(self.clock, TranscriptRole::Host, trimmed)?;

        let (keyword, rest) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(keyword, rest)| (keyword, rest.trim()));

        let lines = if keyword.eq_ignore_ascii_case("advance") {
            match parse_duration(rest) {
                Some(duration) => self.advance(duration),
                None => vec![format!("error: expected a duration like 250ms or 2s, got `{rest}`")],
            }
        } else if keyword.eq_ignore_ascii_case("post") {
            let reply = self.post(rest);
            vec![format!("HTTP {} {}", reply.status, reply.body)]
        } else if keyword.eq_ignore_ascii_case("display") {
            self.rig()
                .panel()
                .lines()
                .iter()
                .map(|line| format!("| {line:<24} |"))
                .collect()
        } else if keyword.eq_ignore_ascii_case("uploads") {
            self.uploads()
        } else if keyword.eq_ignore_ascii_case("help") && rest.is_empty() {
            let mut lines = self.execute(trimmed);
            lines.push("emulator: advance <duration>, post <json>, display, uploads".to_string());
            lines
        } else {
            self.execute(trimmed)
        };

        self.mirror_telemetry();
        for line in &lines {
            self.transcript
                .append_line(self.clock, TranscriptRole::Emulator, line)?;
        }
        Ok(lines)
    }

    /// Handles a JSON start request the way the rig's HTTP endpoint does.
    pub fn post(&mut self, body: &str) -> HttpReply {
        if body.is_empty() {
            return HttpReply::error(400, "No data received");
        }

        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(_) => return HttpReply::error(400, "Invalid JSON"),
        };
        let Ok(request) = serde_json::from_value::<MotorControlRequest>(value) else {
            return HttpReply::error(400, "Missing or invalid required fields");
        };

        let now = self.clock;
        let rig = self.executor.control_mut();
        if rig.test_active() {
            return HttpReply::error(409, TriggerRejection::TestActive.reason());
        }

        let plan = match validate_plan(
            &request.test_id,
            &request.speeds,
            Duration::from_millis(request.ramp_delay),
        ) {
            Ok(plan) => plan,
            Err(rejection) => return HttpReply::error(rejection.status_code(), rejection.reason()),
        };

        match rig.submit(RigRequest::Start {
            plan,
            requested_at: now,
        }) {
            Ok(()) => HttpReply {
                status: 200,
                body: json!({ "status": "Test started" }),
            },
            Err(SubmitError::Rejected(rejection)) => {
                HttpReply::error(rejection.status_code(), rejection.reason())
            }
            Err(SubmitError::QueueFull) => HttpReply::error(503, "Rig busy"),
        }
    }

    /// Steps the sampling loop in [`TICK`] increments.
    pub fn advance(&mut self, duration: Duration) -> Vec<String> {
        let ticks = duration.as_millis();
        let mut lines = Vec::new();

        for _ in 0..ticks {
            self.clock = self.clock + TICK;
            let now = self.clock;
            let Some(report) = self.executor.control_mut().tick(now) else {
                continue;
            };
            self.describe(&report, &mut lines);
            self.mirror_telemetry();
        }

        lines.push(format!("t={}ms", self.clock.as_millis()));
        lines
    }

    fn describe(&mut self, report: &TickReport<SimInstant>, lines: &mut Vec<String>) {
        let t = report.snapshot.timestamp.as_millis();
        if let Some(StepEvent::Advanced { index, value }) = report.step {
            lines.push(format!("t={t}ms step {} -> {value:.2}", index + 1));
        }
        if report.push.is_dropped() && self.buffer_full.should_emit(report.snapshot.timestamp) {
            let line = format!("rig: buffer full, waiting to send t={t}ms");
            self.logs.push(&line);
        }
        if let Some(flush) = report.flush {
            let text = match flush {
                FlushOutcome::Uploaded { count } => format!("uploaded {count} samples"),
                FlushOutcome::Failed { count } => format!("upload failed, {count} samples lost"),
                FlushOutcome::Skipped { count } => format!("discarded {count} samples"),
            };
            lines.push(format!("t={t}ms {text}"));
        }
        if let Some(summary) = &report.finished {
            lines.push(format!(
                "t={t}ms test {} complete: {} steps, {} samples, {} dropped",
                summary.test_id, summary.steps_run, summary.samples, summary.dropped
            ));
        }
    }

    fn execute(&mut self, line: &str) -> Vec<String> {
        let now = self.clock;
        match self.executor.execute(line, now) {
            Ok(CommandOutcome::Started(ack)) => vec![format!(
                "ok started id={} steps={} dwell={}ms",
                ack.test_id,
                ack.steps,
                ack.dwell.as_millis()
            )],
            Ok(CommandOutcome::AbortRequested { .. }) => vec!["ok abort requested".to_string()],
            Ok(CommandOutcome::Status(snapshot)) => render_status(&snapshot),
            Ok(CommandOutcome::Log { count }) => self
                .logs
                .tail(count.unwrap_or(DEFAULT_LOG_LINES))
                .map(str::to_string)
                .collect(),
            Ok(CommandOutcome::Help(text)) => vec![text.to_string()],
            Err(error) => vec![format!("error: {error}")],
        }
    }

    fn uploads(&mut self) -> Vec<String> {
        let requests: &[CollectorRequest] = self.rig_mut().collector().requests();
        if requests.is_empty() {
            return vec!["no uploads yet".to_string()];
        }
        requests.iter().map(ToString::to_string).collect()
    }

    fn mirror_telemetry(&mut self) {
        let cursor = self.mirrored_through;
        let telemetry = self.executor.control().telemetry();
        for record in telemetry.oldest_first().filter(|record| record.id >= cursor) {
            let t = record.timestamp.as_millis();
            let event = record.event;
            match record.details {
                TelemetryPayload::Step(step) => self.logs.push_fmt(format_args!(
                    "rig: {event} index={} value={:.3} t={t}ms",
                    step.index,
                    step.value()
                )),
                TelemetryPayload::Batch(batch) => self.logs.push_fmt(format_args!(
                    "uplink: {event} count={} dropped={} t={t}ms",
                    batch.count, batch.dropped
                )),
                TelemetryPayload::Test(test) => {
                    let duration = test.duration.map_or(0, |duration| duration.as_millis());
                    self.logs.push_fmt(format_args!(
                        "rig: {event} steps={} duration={duration}ms t={t}ms",
                        test.steps
                    ));
                }
                TelemetryPayload::None => self.logs.push_fmt(format_args!("rig: {event} t={t}ms")),
            }
        }
        self.mirrored_through = telemetry.next_event_id();
    }
}

fn render_status(snapshot: &StatusSnapshot) -> Vec<String> {
    let formatter = StatusFormatter::new(snapshot);
    let mut lines = vec![String::new(), String::new(), String::new()];
    let _ = formatter.write_test_line(&mut lines[0]);
    let _ = formatter.write_buffer_line(&mut lines[1]);
    let _ = formatter.write_sensors_line(&mut lines[2]);
    lines
}

/// Parses `250ms`, `2s` or a bare number of milliseconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Some(millis) = text.strip_suffix("ms") {
        millis.parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = text.strip_suffix('s') {
        secs.parse().ok().map(Duration::from_secs)
    } else {
        text.parse().ok().map(Duration::from_millis)
    }
}

struct TranscriptLogger {
    writer: Box<dyn Write>,
}

impl TranscriptLogger {
    fn create(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self::from_writer(Box::new(BufWriter::new(file)));
        logger.write_header(profile)?;
        Ok(logger)
    }

    fn from_writer(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(self.writer, "# Timestamps are virtual milliseconds since boot")?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, now: SimInstant, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>7} ms] {} {}",
            now.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
