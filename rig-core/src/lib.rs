#![no_std]

// Shared logic for the motor-test rig.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and expressing every peripheral as a port trait.

pub mod buffer;
pub mod control;
pub mod debounce;
pub mod display;
pub mod ports;
pub mod ramp;
pub mod repl;
pub mod sampling;
pub mod telemetry;
