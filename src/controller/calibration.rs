//! # Calibration Module
//!
//! Auto-calibration, normalization, deadzones and exponential curves.
//!
//! ## Auto-calibration
//!
//! The true travel of a wheel or pedal is unknown at startup and drifts with
//! wear, so every logical axis tracks the smallest and largest raw value seen
//! so far. Bounds start at an inverted sentinel pair (`min = i32::MAX`,
//! `max = i32::MIN`) so the first sample widens both, and they only ever
//! widen until an explicit reset. Until both ends of travel have been visited
//! the normalized value is inaccurate.
//!
//! ## Deadzone
//!
//! Values within the deadzone are mapped to center (0.0), while values outside
//! are scaled to use the full range.
//!
//! ## Exponential Curves
//!
//! The formula used is: `output = (1 - expo) * input + expo * input³`
//!
//! - `expo = 0.0`: Linear response
//! - `expo = 0.25`: Mild curve (default)
//! - `expo = 1.0`: Pure cubic
//!
//! ## Usage
//!
//! ```
//! use wheel_dac_bridge::controller::calibration::{Axis, CalibrationTracker, Shaper};
//!
//! let mut tracker = CalibrationTracker::new();
//! tracker.observe(Axis::Steering, 0);
//! tracker.observe(Axis::Steering, 65535);
//! tracker.observe(Axis::Steering, 49151);
//!
//! let x = tracker.normalized(Axis::Steering);
//! assert!((x - 0.5).abs() < 0.001);
//!
//! let shaper = Shaper::new(0.02, 0.25);
//! assert_eq!(shaper.apply(0.01), 0.0);
//! ```

use serde::Serialize;
use std::fmt;

/// Logical input axis, independent of the evdev code that feeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Wheel rotation.
    Steering,
    /// Single throttle axis (binding, and `split_axis` input while the combined axis is silent).
    Throttle,
    /// One bidirectional pedal axis (`split_axis` mode).
    CombinedAxis,
    /// Analog forward pedal (`axes` mode).
    Forward,
    /// Analog reverse pedal (`axes` mode).
    Reverse,
}

impl Axis {
    /// All axes, in storage order.
    pub const ALL: [Axis; 5] = [
        Axis::Steering,
        Axis::Throttle,
        Axis::CombinedAxis,
        Axis::Forward,
        Axis::Reverse,
    ];

    fn index(self) -> usize {
        match self {
            Axis::Steering => 0,
            Axis::Throttle => 1,
            Axis::CombinedAxis => 2,
            Axis::Forward => 3,
            Axis::Reverse => 4,
        }
    }

    /// Configuration name of the axis.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Axis::Steering => "steering",
            Axis::Throttle => "throttle",
            Axis::CombinedAxis => "combined_axis",
            Axis::Forward => "forward",
            Axis::Reverse => "reverse",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Running bounds and last value of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AxisBounds {
    /// Smallest raw value seen (sentinel `i32::MAX` until the first sample).
    pub min_seen: i32,
    /// Largest raw value seen (sentinel `i32::MIN` until the first sample).
    pub max_seen: i32,
    /// Last raw value received.
    pub last: i32,
}

impl Default for AxisBounds {
    fn default() -> Self {
        Self {
            min_seen: i32::MAX,
            max_seen: i32::MIN,
            last: 0,
        }
    }
}

impl AxisBounds {
    /// Widens the bounds to include `raw` and records it as the last value.
    pub fn observe(&mut self, raw: i32) {
        self.min_seen = self.min_seen.min(raw);
        self.max_seen = self.max_seen.max(raw);
        self.last = raw;
    }

    /// True once at least one sample has arrived.
    #[must_use]
    pub fn has_samples(&self) -> bool {
        self.min_seen <= self.max_seen
    }

    /// Last value normalized against the current bounds.
    #[must_use]
    pub fn normalized(&self) -> f64 {
        normalize(self.last, self.min_seen, self.max_seen)
    }
}

/// Auto-calibration state for every logical axis.
///
/// Lives for one device connection; only [`reset`](Self::reset) and
/// [`reset_all`](Self::reset_all) narrow the bounds.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTracker {
    axes: [AxisBounds; 5],
}

impl CalibrationTracker {
    /// Creates a tracker with every axis at the sentinel bounds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a raw sample for `axis`, widening its bounds.
    pub fn observe(&mut self, axis: Axis, raw: i32) {
        self.axes[axis.index()].observe(raw);
    }

    /// Restores the sentinel bounds of one axis.
    pub fn reset(&mut self, axis: Axis) {
        self.axes[axis.index()] = AxisBounds::default();
    }

    /// Restores the sentinel bounds of every axis.
    pub fn reset_all(&mut self) {
        self.axes = Default::default();
    }

    /// Current bounds of `axis`.
    #[must_use]
    pub fn bounds(&self, axis: Axis) -> AxisBounds {
        self.axes[axis.index()]
    }

    /// Last value of `axis` mapped to -1.0..=1.0.
    #[must_use]
    pub fn normalized(&self, axis: Axis) -> f64 {
        self.axes[axis.index()].normalized()
    }

    /// Like [`normalized`](Self::normalized), but `rest` until the axis has
    /// reported at least once.
    #[must_use]
    pub fn normalized_or(&self, axis: Axis, rest: f64) -> f64 {
        let bounds = self.axes[axis.index()];
        if bounds.has_samples() {
            bounds.normalized()
        } else {
            rest
        }
    }
}

/// Maps a raw sample to -1.0..=1.0 using calibration bounds.
///
/// The span is floored at 1, so a single distinct sample (`min == max`)
/// deterministically yields -1.0. Arithmetic is done in `i64` so the
/// sentinel bounds cannot overflow.
///
/// ```
/// use wheel_dac_bridge::controller::calibration::normalize;
///
/// assert_eq!(normalize(0, 0, 1000), -1.0);
/// assert_eq!(normalize(500, 0, 1000), 0.0);
/// assert_eq!(normalize(1000, 0, 1000), 1.0);
/// assert_eq!(normalize(42, 42, 42), -1.0);
/// ```
#[must_use]
pub fn normalize(raw: i32, min_seen: i32, max_seen: i32) -> f64 {
    let span = (i64::from(max_seen) - i64::from(min_seen)).max(1);
    let offset = i64::from(raw) - i64::from(min_seen);
    let x = 2.0 * offset as f64 / span as f64 - 1.0;
    x.clamp(-1.0, 1.0)
}

/// Removes a center band and rescales the remaining travel.
///
/// `|x| <= dz` maps to 0.0; outside, `sign(x) * (|x| - dz) / (1 - dz)`, so
/// full deflection is preserved. `dz` must be in 0.0..1.0 (validated at
/// config load).
#[must_use]
pub fn apply_deadzone(x: f64, dz: f64) -> f64 {
    if x.abs() <= dz {
        0.0
    } else {
        ((x.abs() - dz) / (1.0 - dz)).copysign(x)
    }
}

/// Blends linear and cubic response: `(1 - k) * x + k * x³`.
#[must_use]
pub fn apply_expo(x: f64, k: f64) -> f64 {
    if k <= 0.0 {
        x
    } else {
        (1.0 - k) * x + k * x * x * x
    }
}

/// Applies deadzone and exponential curve to a normalized input.
///
/// Input and output are in the range -1.0 to 1.0, where 0.0 is center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shaper {
    deadzone: f64,
    expo: f64,
}

impl Default for Shaper {
    fn default() -> Self {
        Self::linear()
    }
}

impl Shaper {
    /// Creates a shaper with the given deadzone (0.0..1.0) and expo (0.0..=1.0).
    #[must_use]
    pub fn new(deadzone: f64, expo: f64) -> Self {
        Self { deadzone, expo }
    }

    /// Creates a linear shaper (no deadzone, no expo).
    #[must_use]
    pub fn linear() -> Self {
        Self {
            deadzone: 0.0,
            expo: 0.0,
        }
    }

    /// Returns the configured deadzone value.
    #[must_use]
    pub fn deadzone(&self) -> f64 {
        self.deadzone
    }

    /// Returns the configured expo value.
    #[must_use]
    pub fn expo(&self) -> f64 {
        self.expo
    }

    /// Deadzone first, then expo.
    #[must_use]
    pub fn apply(&self, input: f64) -> f64 {
        apply_expo(apply_deadzone(input, self.deadzone), self.expo)
    }
}
