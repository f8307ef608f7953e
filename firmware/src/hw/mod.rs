//! Peripheral drivers behind the `rig-core` ports.
//!
//! Each driver is generic over `embedded-hal` 1.0 traits so the same code runs
//! against Embassy's STM32 HAL on target and against mocks in host tests.

pub mod esc;
pub mod hx711;
pub mod ina260;

pub use esc::EscOutput;
pub use hx711::Hx711;
pub use ina260::Ina260;
