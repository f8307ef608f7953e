//! Test trigger validation and the control seam shared by front-ends.
//!
//! Start requests arrive from the console, the emulator's HTTP-shaped `post`
//! command, or any other trigger. They are validated here, before anything
//! reaches the sampling loop, and rejected with an HTTP-style status code.

use core::fmt;
use core::time::Duration;

use crate::ramp::{MAX_SETPOINTS, SetpointRamp};
use crate::repl::status::StatusSnapshot;
use crate::sampling::{MAX_TEST_ID_LEN, TestId, TestPlan};

/// Reasons a trigger request is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerRejection {
    /// A test is already running.
    TestActive,
    /// Abort requested with no test running.
    NoActiveTest,
    MissingTestId,
    TestIdTooLong { len: usize },
    TooManySetpoints { supplied: usize },
    /// Dwell must be non-zero.
    InvalidDwell,
    /// The request queue towards the rig task is full.
    QueueFull,
}

impl TriggerRejection {
    /// HTTP-style status code for the rejection.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            TriggerRejection::TestActive | TriggerRejection::NoActiveTest => 409,
            TriggerRejection::MissingTestId
            | TriggerRejection::TestIdTooLong { .. }
            | TriggerRejection::TooManySetpoints { .. }
            | TriggerRejection::InvalidDwell => 400,
            TriggerRejection::QueueFull => 503,
        }
    }

    /// Short reason phrase.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            TriggerRejection::TestActive => "Test already running",
            TriggerRejection::NoActiveTest => "No test running",
            TriggerRejection::MissingTestId => "Missing test_id",
            TriggerRejection::TestIdTooLong { .. } => "test_id too long",
            TriggerRejection::TooManySetpoints { .. } => "Too many speeds",
            TriggerRejection::InvalidDwell => "ramp_delay must be positive",
            TriggerRejection::QueueFull => "Rig busy",
        }
    }
}

impl fmt::Display for TriggerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status_code(), self.reason())?;
        match self {
            TriggerRejection::TestIdTooLong { len } => {
                write!(f, " ({len} > {MAX_TEST_ID_LEN})")
            }
            TriggerRejection::TooManySetpoints { supplied } => {
                write!(f, " ({supplied} > {MAX_SETPOINTS})")
            }
            _ => Ok(()),
        }
    }
}

/// Validates a start request into a [`TestPlan`].
///
/// An empty setpoint list is accepted; it runs as a zero-length ramp.
pub fn validate_plan(
    test_id: &str,
    setpoints: &[f32],
    dwell: Duration,
) -> Result<TestPlan, TriggerRejection> {
    let trimmed = test_id.trim();
    if trimmed.is_empty() {
        return Err(TriggerRejection::MissingTestId);
    }

    let mut id = TestId::new();
    id.push_str(trimmed)
        .map_err(|_| TriggerRejection::TestIdTooLong { len: trimmed.len() })?;

    if dwell.is_zero() {
        return Err(TriggerRejection::InvalidDwell);
    }

    let ramp = SetpointRamp::new(setpoints, dwell).map_err(|_| {
        TriggerRejection::TooManySetpoints {
            supplied: setpoints.len(),
        }
    })?;

    Ok(TestPlan::new(id, ramp))
}

/// Requests forwarded to the task that owns the sampling loop.
#[derive(Clone, Debug, PartialEq)]
pub enum RigRequest<TInstant> {
    Start { plan: TestPlan, requested_at: TInstant },
    Abort { requested_at: TInstant },
}

/// Failure to hand a request to the rig.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitError {
    QueueFull,
    Rejected(TriggerRejection),
}

impl From<TriggerRejection> for SubmitError {
    fn from(value: TriggerRejection) -> Self {
        SubmitError::Rejected(value)
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::QueueFull => f.write_str("request queue full"),
            SubmitError::Rejected(rejection) => rejection.fmt(f),
        }
    }
}

/// Control seam implemented by the firmware (channel + status atomics) and the
/// emulator (direct access to the loop).
pub trait RigControl {
    type Instant: Copy;

    /// Returns `true` while a test is running (or a start is pending).
    fn test_active(&self) -> bool;

    /// Hands a request to the rig.
    fn submit(&mut self, request: RigRequest<Self::Instant>) -> Result<(), SubmitError>;

    /// Current status, when the front-end can provide one.
    fn status(&mut self, now: Self::Instant) -> Option<StatusSnapshot>;
}
