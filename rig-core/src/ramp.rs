//! Time-indexed throttle ramp.
//!
//! A [`SetpointRamp`] is an ordered list of normalized throttle values held for a
//! uniform dwell each. [`RampSequencer`] owns the ramp for the lifetime of a test
//! and advances through it from wall-clock time supplied by the caller, driving an
//! [`Actuator`] at every step boundary.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::ports::{Actuator, clamp_normalized};
use crate::telemetry::TelemetryInstant;

/// Maximum number of setpoints accepted in a single ramp.
pub const MAX_SETPOINTS: usize = 32;

pub type Setpoints = Vec<f32, MAX_SETPOINTS>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RampError {
    TooManySetpoints { supplied: usize },
}

impl fmt::Display for RampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RampError::TooManySetpoints { supplied } => write!(
                f,
                "ramp has {supplied} setpoints (max {MAX_SETPOINTS})"
            ),
        }
    }
}

/// Ordered setpoints plus the dwell applied between consecutive steps.
///
/// Values are stored as supplied; clamping happens when they reach the actuator.
#[derive(Clone, Debug, PartialEq)]
pub struct SetpointRamp {
    setpoints: Setpoints,
    dwell: Duration,
}

impl SetpointRamp {
    pub fn new(setpoints: &[f32], dwell: Duration) -> Result<Self, RampError> {
        let setpoints = Vec::from_slice(setpoints).map_err(|_| RampError::TooManySetpoints {
            supplied: setpoints.len(),
        })?;
        Ok(Self { setpoints, dwell })
    }

    #[must_use]
    pub fn setpoints(&self) -> &[f32] {
        &self.setpoints
    }

    #[must_use]
    pub const fn dwell(&self) -> Duration {
        self.dwell
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    /// Wall-clock time the ramp needs to run to completion.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.dwell
            .saturating_mul(u32::try_from(self.setpoints.len()).unwrap_or(u32::MAX))
    }
}

/// Outcome of a single [`RampSequencer::tick`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepEvent {
    /// Current step still dwelling.
    InProgress { value: f32, remaining: Duration },
    /// A new step became active and was commanded.
    Advanced { index: usize, value: f32 },
    /// The ramp ran past its last step; the actuator was driven to zero.
    Completed,
}

impl StepEvent {
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, StepEvent::Completed)
    }
}

#[derive(Clone, Copy, Debug)]
struct RampCursor<TInstant> {
    index: usize,
    step_started_at: TInstant,
    announced: bool,
}

/// Drives an actuator through a [`SetpointRamp`].
pub struct RampSequencer<TInstant> {
    ramp: Option<SetpointRamp>,
    cursor: Option<RampCursor<TInstant>>,
}

impl<TInstant> RampSequencer<TInstant>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ramp: None,
            cursor: None,
        }
    }

    /// Starts a new ramp at `now`.
    ///
    /// Does nothing while a ramp is active; callers reject concurrent starts
    /// before reaching the sequencer. The first setpoint is commanded immediately.
    pub fn start<A: Actuator>(&mut self, ramp: SetpointRamp, now: TInstant, actuator: &mut A) {
        if self.is_active() {
            return;
        }

        if let Some(first) = ramp.setpoints().first() {
            actuator.set_normalized(clamp_normalized(*first));
        }

        self.cursor = Some(RampCursor {
            index: 0,
            step_started_at: now,
            announced: false,
        });
        self.ramp = Some(ramp);
    }

    /// Advances the ramp according to `now`. Returns `None` while idle.
    ///
    /// The first tick after [`start`](Self::start) reports step 0 as
    /// [`StepEvent::Advanced`] without re-commanding it. When that tick
    /// already lies past the first dwell, the announcement is skipped and the
    /// ramp advances instead.
    pub fn tick<A: Actuator>(&mut self, now: TInstant, actuator: &mut A) -> Option<StepEvent> {
        let ramp = self.ramp.as_ref()?;
        let cursor = self.cursor.as_mut()?;
        let elapsed = now.saturating_duration_since(cursor.step_started_at);

        if !cursor.announced {
            cursor.announced = true;
            match ramp.setpoints().first() {
                Some(first) if elapsed < ramp.dwell() => {
                    return Some(StepEvent::Advanced {
                        index: 0,
                        value: clamp_normalized(*first),
                    });
                }
                Some(_) => {}
                None => {
                    actuator.set_normalized(0.0);
                    self.finish();
                    return Some(StepEvent::Completed);
                }
            }
        }

        if elapsed < ramp.dwell() {
            let value = ramp
                .setpoints()
                .get(cursor.index)
                .copied()
                .map_or(0.0, clamp_normalized);
            return Some(StepEvent::InProgress {
                value,
                remaining: ramp.dwell().saturating_sub(elapsed),
            });
        }

        cursor.index += 1;
        if let Some(next) = ramp.setpoints().get(cursor.index) {
            let value = clamp_normalized(*next);
            cursor.step_started_at = now;
            actuator.set_normalized(value);
            return Some(StepEvent::Advanced {
                index: cursor.index,
                value,
            });
        }

        actuator.set_normalized(0.0);
        self.finish();
        Some(StepEvent::Completed)
    }

    /// Stops an active ramp and drives the actuator to zero.
    ///
    /// Returns `false` when nothing was running.
    pub fn cancel<A: Actuator>(&mut self, actuator: &mut A) -> bool {
        if !self.is_active() {
            return false;
        }
        actuator.set_normalized(0.0);
        self.finish();
        true
    }

    fn finish(&mut self) {
        self.ramp = None;
        self.cursor = None;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ramp.is_some()
    }

    /// Index of the current step, if a ramp is active.
    #[must_use]
    pub fn step_index(&self) -> Option<usize> {
        self.cursor.map(|cursor| cursor.index)
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.ramp.as_ref().map_or(0, SetpointRamp::len)
    }

    /// Clamped value of the current step.
    #[must_use]
    pub fn current_value(&self) -> Option<f32> {
        let ramp = self.ramp.as_ref()?;
        let cursor = self.cursor?;
        ramp.setpoints()
            .get(cursor.index)
            .copied()
            .map(clamp_normalized)
    }

    /// Dwell left on the current step at `now`.
    #[must_use]
    pub fn remaining(&self, now: TInstant) -> Option<Duration> {
        let ramp = self.ramp.as_ref()?;
        let cursor = self.cursor?;
        let elapsed = now.saturating_duration_since(cursor.step_started_at);
        Some(ramp.dwell().saturating_sub(elapsed))
    }

    #[must_use]
    pub fn dwell(&self) -> Option<Duration> {
        self.ramp.as_ref().map(SetpointRamp::dwell)
    }
}

impl<TInstant> Default for RampSequencer<TInstant>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
