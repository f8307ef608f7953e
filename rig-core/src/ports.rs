//! Hardware ports consumed by the sampling loop.
//!
//! Each collaborator (ESC, HX711 load cell, INA260 power monitor, uplink) is
//! expressed as a small trait so the firmware can bind real drivers while the
//! emulator and tests bind simulated ones.

use crate::buffer::SensorSnapshot;

/// Raw value reported by a load cell driver when the read failed or timed out.
pub const RAW_READ_FAILED: i32 = 0;

/// Clamps a throttle command into `[0.0, 1.0]`; `NaN` maps to `0.0`.
#[must_use]
pub fn clamp_normalized(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Throttle output driven with a normalized command.
pub trait Actuator {
    /// Commands the actuator. Implementations clamp into `[0.0, 1.0]`.
    fn set_normalized(&mut self, value: f32);

    /// Returns the most recently commanded (clamped) value.
    fn last_commanded(&self) -> f32;
}

/// Raw load cell source.
pub trait LoadCellPort {
    /// Returns `true` when a conversion is ready to be clocked out.
    fn is_ready(&mut self) -> bool;

    /// Reads one raw sample. [`RAW_READ_FAILED`] signals a timeout or failure.
    fn read_raw(&mut self) -> i32;
}

/// Bus power monitor.
pub trait PowerPort {
    /// Bus voltage in volts.
    fn read_voltage(&mut self) -> f32;

    /// Bus current in milliamps.
    fn read_current(&mut self) -> f32;
}

/// Destination for flushed sample batches.
pub trait Uploader<TInstant: Copy> {
    type Error;

    /// Delivers one batch for `test_id`. Called with a non-empty id only.
    fn upload(
        &mut self,
        test_id: &str,
        batch: &[SensorSnapshot<TInstant>],
    ) -> Result<(), Self::Error>;
}

/// Uploader that accepts and discards every batch.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopUploader;

impl<TInstant: Copy> Uploader<TInstant> for NoopUploader {
    type Error = core::convert::Infallible;

    fn upload(
        &mut self,
        _test_id: &str,
        _batch: &[SensorSnapshot<TInstant>],
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Standard RC pulse range in microseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseRange {
    pub min_us: u16,
    pub max_us: u16,
}

impl PulseRange {
    /// Offset above the minimum pulse used to wake the ESC while arming.
    pub const ARMING_NUDGE_US: u16 = 50;

    #[must_use]
    pub const fn new(min_us: u16, max_us: u16) -> Self {
        Self { min_us, max_us }
    }

    /// Maps a normalized command onto the pulse range, truncating fractional microseconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn pulse_for(&self, value: f32) -> u16 {
        let span = f32::from(self.max_us.saturating_sub(self.min_us));
        let offset = (clamp_normalized(value) * span) as u16;
        self.min_us.saturating_add(offset)
    }

    /// Pulse widths written (each held about one second) to arm the ESC.
    #[must_use]
    pub const fn arming_sequence(&self) -> [u16; 3] {
        [
            self.min_us,
            self.min_us.saturating_add(Self::ARMING_NUDGE_US),
            self.min_us,
        ]
    }
}

impl Default for PulseRange {
    fn default() -> Self {
        Self::new(1000, 2000)
    }
}

/// Output stage able to emit a pulse of the given width.
pub trait PulseOutput {
    fn set_pulse_width_us(&mut self, width_us: u16);
}

/// [`Actuator`] that drives an ESC through a [`PulseOutput`].
pub struct PulseActuator<O> {
    output: O,
    range: PulseRange,
    commanded: f32,
}

impl<O: PulseOutput> PulseActuator<O> {
    pub fn new(output: O, range: PulseRange) -> Self {
        Self {
            output,
            range,
            commanded: 0.0,
        }
    }

    /// Replays the arming pulses; the caller holds each one for the ESC's arming period.
    pub fn arm_step(&mut self, step: usize) {
        if let Some(width) = self.range.arming_sequence().get(step) {
            self.output.set_pulse_width_us(*width);
        }
    }

    pub fn range(&self) -> PulseRange {
        self.range
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

impl<O: PulseOutput> Actuator for PulseActuator<O> {
    fn set_normalized(&mut self, value: f32) {
        let value = clamp_normalized(value);
        self.commanded = value;
        self.output.set_pulse_width_us(self.range.pulse_for(value));
    }

    fn last_commanded(&self) -> f32 {
        self.commanded
    }
}
