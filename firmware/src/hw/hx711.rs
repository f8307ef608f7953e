//! Bit-banged HX711 load-cell amplifier.
//!
//! DT low signals a finished conversion. A read clocks 24 bits MSB first and
//! one more pulse to keep channel A at gain 128 for the next conversion.

use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use rig_core::ports::{LoadCellPort, RAW_READ_FAILED};

/// Longest wait for DT low before a read gives up.
pub const HX711_READY_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Clock pulses issued at reset.
pub const HX711_RESET_PULSES: u8 = 30;

const READY_POLL_US: u32 = 10;
const DATA_BITS: u8 = 24;
/// Extra pulses after the data bits; one selects channel A, gain 128.
const GAIN_PULSES: u8 = 1;
const CLOCK_HALF_PERIOD_US: u32 = 1;

pub struct Hx711<Dt, Sck, D> {
    dt: Dt,
    sck: Sck,
    delay: D,
    timeouts: u32,
    pin_errors: u32,
}

impl<Dt, Sck, D> Hx711<Dt, Sck, D>
where
    Dt: InputPin,
    Sck: OutputPin,
    D: DelayNs,
{
    pub fn new(dt: Dt, sck: Sck, delay: D) -> Self {
        Self {
            dt,
            sck,
            delay,
            timeouts: 0,
            pin_errors: 0,
        }
    }

    /// Clocks the reset pulse train and leaves SCK low.
    pub fn reset(&mut self) {
        for _ in 0..HX711_RESET_PULSES {
            if self.pulse().is_err() {
                self.pin_errors = self.pin_errors.saturating_add(1);
            }
        }
        if self.sck.set_low().is_err() {
            self.pin_errors = self.pin_errors.saturating_add(1);
        }
    }

    /// Reads that gave up waiting for DT low.
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub fn pin_errors(&self) -> u32 {
        self.pin_errors
    }

    fn wait_ready(&mut self) -> bool {
        let timeout_us = u32::try_from(HX711_READY_TIMEOUT.as_micros()).unwrap_or(u32::MAX);
        let mut waited_us = 0;
        loop {
            if self.dt.is_low().unwrap_or(false) {
                return true;
            }
            if waited_us >= timeout_us {
                return false;
            }
            self.delay.delay_us(READY_POLL_US);
            waited_us += READY_POLL_US;
        }
    }

    fn pulse(&mut self) -> Result<(), PinFault> {
        self.sck.set_high().map_err(|_| PinFault)?;
        self.delay.delay_us(CLOCK_HALF_PERIOD_US);
        self.sck.set_low().map_err(|_| PinFault)?;
        self.delay.delay_us(CLOCK_HALF_PERIOD_US);
        Ok(())
    }

    fn shift_in(&mut self) -> Result<i32, PinFault> {
        let mut raw: u32 = 0;
        for _ in 0..DATA_BITS {
            self.pulse()?;
            let bit = self.dt.is_high().map_err(|_| PinFault)?;
            raw = (raw << 1) | u32::from(bit);
        }
        for _ in 0..GAIN_PULSES {
            self.pulse()?;
        }
        Ok(sign_extend_24(raw))
    }
}

impl<Dt, Sck, D> LoadCellPort for Hx711<Dt, Sck, D>
where
    Dt: InputPin,
    Sck: OutputPin,
    D: DelayNs,
{
    fn is_ready(&mut self) -> bool {
        self.dt.is_low().unwrap_or(false)
    }

    fn read_raw(&mut self) -> i32 {
        if !self.wait_ready() {
            self.timeouts = self.timeouts.saturating_add(1);
            return RAW_READ_FAILED;
        }

        match self.shift_in() {
            Ok(value) => value,
            Err(PinFault) => {
                self.pin_errors = self.pin_errors.saturating_add(1);
                RAW_READ_FAILED
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PinFault;

#[allow(clippy::cast_possible_wrap)]
const fn sign_extend_24(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use embedded_hal::digital::ErrorType;

    use super::*;

    #[derive(Default)]
    struct Line {
        word: u32,
        polls_until_ready: u32,
        rising_edges: usize,
        sck_high: bool,
    }

    #[derive(Clone)]
    struct DtPin(Rc<RefCell<Line>>);

    #[derive(Clone)]
    struct SckPin(Rc<RefCell<Line>>);

    #[derive(Default)]
    struct CountingDelay {
        total_us: u64,
    }

    impl ErrorType for DtPin {
        type Error = core::convert::Infallible;
    }

    impl InputPin for DtPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            self.is_low().map(|low| !low)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            let mut line = self.0.borrow_mut();
            if line.rising_edges == 0 {
                if line.polls_until_ready == 0 {
                    return Ok(true);
                }
                line.polls_until_ready -= 1;
                return Ok(false);
            }
            let shift = DATA_BITS as usize - line.rising_edges.min(DATA_BITS as usize);
            Ok((line.word >> shift) & 1 == 0)
        }
    }

    impl ErrorType for SckPin {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for SckPin {
        fn set_high(&mut self) -> Result<(), Self::Error> {
            let mut line = self.0.borrow_mut();
            if !line.sck_high {
                line.rising_edges += 1;
            }
            line.sck_high = true;
            Ok(())
        }

        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.borrow_mut().sck_high = false;
            Ok(())
        }
    }

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_us += u64::from(ns / 1_000);
        }
    }

    fn driver(word: u32, polls_until_ready: u32) -> (Hx711<DtPin, SckPin, CountingDelay>, Rc<RefCell<Line>>) {
        let line = Rc::new(RefCell::new(Line {
            word,
            polls_until_ready,
            ..Line::default()
        }));
        let hx = Hx711::new(
            DtPin(line.clone()),
            SckPin(line.clone()),
            CountingDelay::default(),
        );
        (hx, line)
    }

    #[test]
    fn reads_positive_word_and_selects_gain() {
        let (mut hx, line) = driver(0x00_1234, 3);
        assert_eq!(hx.read_raw(), 0x1234);
        assert_eq!(line.borrow().rising_edges, 25);
        assert_eq!(hx.timeouts(), 0);
    }

    #[test]
    fn sign_extends_negative_readings() {
        let (mut hx, _) = driver(0xFF_FFFF, 0);
        assert_eq!(hx.read_raw(), -1);

        let (mut hx, _) = driver(0x80_0000, 0);
        assert_eq!(hx.read_raw(), -8_388_608);
    }

    #[test]
    fn gives_up_after_ready_timeout() {
        let (mut hx, line) = driver(0x00_0042, u32::MAX);
        assert_eq!(hx.read_raw(), RAW_READ_FAILED);
        assert_eq!(hx.timeouts(), 1);
        assert_eq!(line.borrow().rising_edges, 0);
        assert_eq!(hx.delay.total_us, 1_000_000);
    }

    #[test]
    fn reset_clocks_thirty_pulses() {
        let (mut hx, line) = driver(0, 0);
        hx.reset();
        assert_eq!(line.borrow().rising_edges, usize::from(HX711_RESET_PULSES));
        assert!(!line.borrow().sck_high);
    }
}
