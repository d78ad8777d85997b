//! # Wheel DAC Bridge Library
//!
//! Drive an RC transmitter's steering and throttle with a racing wheel.
//!
//! Wheel and pedal events from evdev are auto-calibrated, shaped and turned
//! into two smoothed 12-bit codes, which are written at a fixed rate to a
//! pair of MCP4725 DACs on an I2C bus.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod telemetry;
