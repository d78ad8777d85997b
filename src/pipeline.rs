//! # Per-tick Transform
//!
//! Turns the current calibration and pedal state into the two DAC codes.
//!
//! ```text
//! steering: normalize -> deadzone -> expo
//! throttle: pedal mode (ramp / dual axes / split axis)
//!      |
//!      v
//! invert -> + trim -> clamp [-1, 1]      (processed pair)
//!      |
//!      v
//! swap_controls -> moving average -> to_code(clamp)
//! ```

use std::time::Instant;

use serde::Serialize;

use crate::config::{Config, ControlConfig, ShapingConfig};
use crate::controller::calibration::{Axis, CalibrationTracker, Shaper};
use crate::controller::pedals::{Pedal, PedalStateMachine};
use crate::output::dac::{to_code, DAC_CODE_CENTER};
use crate::output::filter::OutputFilter;

/// Steering and throttle values, always in channel order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OutputPair {
    pub steering: f64,
    pub throttle: f64,
}

/// DAC codes by output channel (after any swap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodePair {
    pub steering: u16,
    pub throttle: u16,
}

impl Default for CodePair {
    fn default() -> Self {
        Self {
            steering: DAC_CODE_CENTER,
            throttle: DAC_CODE_CENTER,
        }
    }
}

/// Everything one tick produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickOutput {
    pub processed: OutputPair,
    pub smoothed: OutputPair,
    pub codes: CodePair,
}

/// Applies inversion, then trim, then clamps to the unit range.
#[must_use]
pub fn finish_channel(value: f64, invert: bool, trim: f64) -> f64 {
    let value = if invert { -value } else { value };
    (value + trim).clamp(-1.0, 1.0)
}

/// State carried between ticks: calibration, pedals and smoothing.
#[derive(Debug, Clone)]
pub struct Pipeline {
    tracker: CalibrationTracker,
    pedals: PedalStateMachine,
    filter: OutputFilter,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            tracker: CalibrationTracker::new(),
            pedals: PedalStateMachine::new(config.pedals.pedal_mode),
            filter: OutputFilter::new(
                config.control.steering_filter_len,
                config.control.throttle_filter_len,
            ),
        }
    }

    pub fn tracker(&self) -> &CalibrationTracker {
        &self.tracker
    }

    pub fn pedals(&self) -> &PedalStateMachine {
        &self.pedals
    }

    pub fn observe(&mut self, axis: Axis, raw: i32) {
        self.tracker.observe(axis, raw);
    }

    /// Returns `true` if the pedal changed state.
    pub fn set_button(&mut self, pedal: Pedal, pressed: bool) -> bool {
        self.pedals.set_button(pedal, pressed)
    }

    /// Forgets all axis bounds and empties both smoothing windows.
    pub fn reset_calibration(&mut self) {
        self.tracker.reset_all();
        self.filter.reset();
    }

    /// Rebuilds the smoothing windows when their lengths changed.
    pub fn resize_filters(&mut self, control: &ControlConfig) {
        if self.filter.steering.len() != control.steering_filter_len
            || self.filter.throttle.len() != control.throttle_filter_len
        {
            self.filter = OutputFilter::new(control.steering_filter_len, control.throttle_filter_len);
        }
    }

    /// Processed pair for this tick, before swap and smoothing.
    pub fn processed(&mut self, now: Instant, config: &Config) -> OutputPair {
        let shaping: &ShapingConfig = &config.shaping;
        let shaper = Shaper::new(shaping.deadzone, shaping.expo);

        let steering = shaper.apply(self.tracker.normalized_or(Axis::Steering, 0.0));
        let throttle = self.pedals.throttle(now, &self.tracker, &config.pedals, shaping);

        OutputPair {
            steering: finish_channel(steering, shaping.invert_steering, shaping.steering_trim),
            throttle: finish_channel(throttle, shaping.invert_throttle, shaping.throttle_trim),
        }
    }

    /// Runs the full transform for one tick.
    pub fn tick(&mut self, now: Instant, config: &Config) -> TickOutput {
        let processed = self.processed(now, config);

        let (steering, throttle) = if config.shaping.swap_controls {
            (processed.throttle, processed.steering)
        } else {
            (processed.steering, processed.throttle)
        };

        let (steering, throttle) = self.filter.push(steering, throttle);
        let clamp = config.shaping.clamp;

        TickOutput {
            processed,
            smoothed: OutputPair { steering, throttle },
            codes: CodePair {
                steering: to_code(steering, clamp),
                throttle: to_code(throttle, clamp),
            },
        }
    }
}
