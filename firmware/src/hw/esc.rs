//! ESC pulse output on a 50 Hz PWM channel.

use embedded_hal::pwm::SetDutyCycle;
use rig_core::ports::PulseOutput;

/// ESC frame rate.
pub const ESC_FRAME_HZ: u32 = 50;

/// Frame period at [`ESC_FRAME_HZ`].
pub const ESC_PERIOD_US: u32 = 1_000_000 / ESC_FRAME_HZ;

pub struct EscOutput<P> {
    pwm: P,
    last_width_us: u16,
    write_errors: u32,
}

impl<P: SetDutyCycle> EscOutput<P> {
    /// Wraps a channel already configured for [`ESC_FRAME_HZ`].
    pub fn new(pwm: P) -> Self {
        Self {
            pwm,
            last_width_us: 0,
            write_errors: 0,
        }
    }

    pub fn last_width_us(&self) -> u16 {
        self.last_width_us
    }

    pub fn write_errors(&self) -> u32 {
        self.write_errors
    }

    fn duty_for(&self, width_us: u16) -> u16 {
        let max = u32::from(self.pwm.max_duty_cycle());
        let width = u32::from(width_us).min(ESC_PERIOD_US);
        u16::try_from(width * max / ESC_PERIOD_US).unwrap_or(u16::MAX)
    }
}

impl<P: SetDutyCycle> PulseOutput for EscOutput<P> {
    fn set_pulse_width_us(&mut self, width_us: u16) {
        let duty = self.duty_for(width_us);
        if self.pwm.set_duty_cycle(duty).is_ok() {
            self.last_width_us = width_us;
        } else {
            self.write_errors = self.write_errors.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal::pwm::ErrorType;
    use rig_core::ports::{Actuator, PulseActuator, PulseRange};

    use super::*;

    struct RecordingPwm {
        max: u16,
        duty: u16,
    }

    impl ErrorType for RecordingPwm {
        type Error = core::convert::Infallible;
    }

    impl SetDutyCycle for RecordingPwm {
        fn max_duty_cycle(&self) -> u16 {
            self.max
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty = duty;
            Ok(())
        }
    }

    #[test]
    fn maps_pulse_width_onto_duty() {
        let mut esc = EscOutput::new(RecordingPwm {
            max: 20_000,
            duty: 0,
        });
        esc.set_pulse_width_us(1_500);
        assert_eq!(esc.pwm.duty, 1_500);

        let mut coarse = EscOutput::new(RecordingPwm { max: 1_000, duty: 0 });
        coarse.set_pulse_width_us(2_000);
        assert_eq!(coarse.pwm.duty, 100);
    }

    #[test]
    fn actuator_drives_esc_through_pulse_range() {
        let esc = EscOutput::new(RecordingPwm {
            max: 20_000,
            duty: 0,
        });
        let mut actuator = PulseActuator::new(esc, PulseRange::default());

        actuator.set_normalized(0.25);
        assert_eq!(actuator.output_mut().last_width_us(), 1_250);

        actuator.arm_step(1);
        assert_eq!(actuator.output_mut().last_width_us(), 1_050);
    }
}
