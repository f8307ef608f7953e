//! Three-line status panel mirroring the rig's OLED.
//!
//! The panel is a passive observer: front-ends feed it [`TickReport`]s and idle
//! voltage readings and render the resulting lines however they like.

use core::fmt::{self, Write};
use core::time::Duration;

use heapless::String;

use crate::ramp::StepEvent;
use crate::sampling::{FlushOutcome, TestOutcome, TickReport};

/// Characters per panel line.
pub const PANEL_WIDTH: usize = 24;

pub type PanelLine = String<PANEL_WIDTH>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayPanel {
    header: PanelLine,
    step: PanelLine,
    status: PanelLine,
}

impl DisplayPanel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shows the ramp header when a test starts.
    pub fn show_test_started(&mut self, dwell: Duration) {
        let millis = u64::try_from(dwell.as_millis()).unwrap_or(u64::MAX);
        set_line(
            &mut self.header,
            format_args!("Starting Test {}.{}s/step", millis / 1_000, (millis % 1_000) / 100),
        );
        self.step.clear();
        self.status.clear();
    }

    /// Updates the idle voltage line.
    pub fn show_voltage(&mut self, voltage_v: f32) {
        set_line(&mut self.status, format_args!("Voltage: {voltage_v:.2}"));
    }

    /// Applies one tick's worth of observations.
    pub fn apply<TInstant>(&mut self, report: &TickReport<TInstant>) {
        match report.step {
            Some(StepEvent::Advanced { value, .. }) => {
                set_line(&mut self.step, format_args!("Speed: {value:.2}"));
            }
            Some(StepEvent::InProgress { value, remaining }) => {
                set_line(
                    &mut self.step,
                    format_args!("Speed: {value:.2} T:{}", remaining.as_millis()),
                );
            }
            Some(StepEvent::Completed) | None => {}
        }

        if let Some(flush) = report.flush {
            let text = match flush {
                FlushOutcome::Uploaded { .. } => "Buffer send success",
                FlushOutcome::Failed { .. } => "Buffer send error",
                FlushOutcome::Skipped { .. } => "Buffer discarded",
            };
            set_line(&mut self.status, format_args!("{text}"));
        }

        if let Some(summary) = &report.finished {
            self.show_finished(summary.outcome);
        }
    }

    pub fn show_finished(&mut self, outcome: TestOutcome) {
        let text = match outcome {
            TestOutcome::Completed => "Test Complete",
            TestOutcome::Aborted => "Test Aborted",
        };
        set_line(&mut self.header, format_args!("{text}"));
        self.step.clear();
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn step_line(&self) -> &str {
        &self.step
    }

    pub fn status_line(&self) -> &str {
        &self.status
    }

    /// Iterates over the three lines, top to bottom.
    pub fn lines(&self) -> [&str; 3] {
        [self.header.as_str(), self.step.as_str(), self.status.as_str()]
    }
}

fn set_line(line: &mut PanelLine, args: fmt::Arguments<'_>) {
    line.clear();
    let mut writer = Clipped(line);
    let _ = writer.write_fmt(args);
}

struct Clipped<'a>(&'a mut PanelLine);

impl Write for Clipped<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if self.0.push(ch).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PushOutcome, SensorSnapshot};
    use crate::sampling::{TestId, TestSummary};

    fn report(step: Option<StepEvent>, flush: Option<FlushOutcome>) -> TickReport<u32> {
        TickReport {
            snapshot: SensorSnapshot {
                timestamp: 0,
                load_cell: 0.0,
                load_cell_valid: true,
                bus_voltage_v: 12.0,
                bus_current_ma: 0.0,
                commanded: 0.0,
            },
            push: PushOutcome::Stored { len: 1 },
            step,
            flush,
            finished: None,
        }
    }

    #[test]
    fn header_shows_dwell_per_step() {
        let mut panel = DisplayPanel::new();
        panel.show_test_started(Duration::from_millis(1_500));
        assert_eq!(panel.header(), "Starting Test 1.5s/step");
    }

    #[test]
    fn step_line_tracks_remaining_time() {
        let mut panel = DisplayPanel::new();
        panel.apply(&report(
            Some(StepEvent::InProgress {
                value: 0.5,
                remaining: Duration::from_millis(532),
            }),
            None,
        ));
        assert_eq!(panel.step_line(), "Speed: 0.50 T:532");

        panel.apply(&report(None, Some(FlushOutcome::Failed { count: 3 })));
        assert_eq!(panel.status_line(), "Buffer send error");
    }

    #[test]
    fn finished_test_replaces_header() {
        let mut panel = DisplayPanel::new();
        panel.show_test_started(Duration::from_secs(1));

        let mut finished = report(Some(StepEvent::Completed), None);
        finished.finished = Some(TestSummary {
            test_id: TestId::new(),
            outcome: TestOutcome::Aborted,
            steps_run: 1,
            duration: Duration::from_millis(400),
            samples: 400,
            dropped: 0,
            batches_uploaded: 0,
            batches_failed: 0,
        });
        panel.apply(&finished);

        assert_eq!(panel.lines(), ["Test Aborted", "", ""]);
    }

    #[test]
    fn voltage_line_uses_two_decimals() {
        let mut panel = DisplayPanel::new();
        panel.show_voltage(11.5);
        assert_eq!(panel.status_line(), "Voltage: 11.50");
    }
}
