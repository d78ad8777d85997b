//! # Controller Module
//!
//! Racing wheel input handling.
//!
//! This module handles:
//! - Wheel detection and connection via evdev
//! - Classifying axis and pedal events, and learning new bindings
//! - Auto-calibration, deadzones and exponential curves
//! - Pedal modes and duration-based acceleration curves

pub mod calibration;
pub mod curve;
pub mod mapper;
pub mod pedals;
pub mod source;
pub mod wheel;
