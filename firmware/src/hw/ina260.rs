//! INA260 bus power monitor over I²C.

use embedded_hal::i2c::I2c;
use rig_core::ports::PowerPort;

/// Default 7-bit address (A0/A1 tied to GND).
pub const INA260_ADDRESS: u8 = 0x40;

const CURRENT_REGISTER: u8 = 0x01;
const BUS_VOLTAGE_REGISTER: u8 = 0x02;

/// Current LSB in milliamps.
const CURRENT_LSB_MA: f32 = 1.25;
/// Bus voltage LSB in volts.
const VOLTAGE_LSB_V: f32 = 0.001_25;

pub struct Ina260<I> {
    i2c: I,
    address: u8,
    bus_errors: u32,
}

impl<I: I2c> Ina260<I> {
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, INA260_ADDRESS)
    }

    pub fn with_address(i2c: I, address: u8) -> Self {
        Self {
            i2c,
            address,
            bus_errors: 0,
        }
    }

    /// Failed register reads since construction.
    pub fn bus_errors(&self) -> u32 {
        self.bus_errors
    }

    fn read_register(&mut self, register: u8) -> Option<u16> {
        let mut bytes = [0u8; 2];
        if self
            .i2c
            .write_read(self.address, &[register], &mut bytes)
            .is_err()
        {
            self.bus_errors = self.bus_errors.saturating_add(1);
            return None;
        }
        Some(u16::from_be_bytes(bytes))
    }
}

impl<I: I2c> PowerPort for Ina260<I> {
    fn read_voltage(&mut self) -> f32 {
        self.read_register(BUS_VOLTAGE_REGISTER)
            .map_or(0.0, |raw| f32::from(raw) * VOLTAGE_LSB_V)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn read_current(&mut self) -> f32 {
        self.read_register(CURRENT_REGISTER)
            .map_or(0.0, |raw| f32::from(raw as i16) * CURRENT_LSB_MA)
    }
}
