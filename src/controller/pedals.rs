//! # Pedal State Machine
//!
//! Derives the throttle value from the pedal inputs, once per control tick.
//!
//! ## Modes
//!
//! | Mode | Inputs | Throttle |
//! |------|--------|----------|
//! | `buttons` | Two digital switches | Timed ramp through an [`AccelerationCurve`](super::curve::AccelerationCurve) |
//! | `axes` | Two analog pedals | `forward - reverse`, each shaped independently |
//! | `split_axis` | One bidirectional axis | Normalized axis, center is neutral; the throttle axis stands in while the combined axis is silent |
//!
//! The mode is fixed for a session. Throttle is recomputed from scratch every
//! tick; the only state carried between ticks is the press-start timestamp of
//! each button.
//!
//! ## Button ramp
//!
//! The first tick that sees a pedal held (and the other one released) records
//! the press-start time. While held:
//!
//! ```text
//! progress = min(1, held_for / throttle_ramp_duration)
//! throttle = ±curve(progress)
//! ```
//!
//! Releasing, or holding both pedals at once, forces 0.0 on that same tick and
//! clears both timestamps.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::calibration::{apply_expo, Axis, CalibrationTracker, Shaper};
use crate::config::{PedalConfig, ShapingConfig};

/// How throttle is derived from the pedals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PedalMode {
    Buttons,
    Axes,
    SplitAxis,
}

/// Pedal role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pedal {
    Forward,
    Reverse,
}

/// Digital pedal state.
///
/// Invariant: `press_start` is `None` whenever the button is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState {
    pressed: bool,
    press_start: Option<Instant>,
}

impl ButtonState {
    /// Returns whether the pedal is currently held.
    #[must_use]
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// When the current hold started, if the ramp has begun.
    #[must_use]
    pub fn press_start(&self) -> Option<Instant> {
        self.press_start
    }

    fn set_pressed(&mut self, pressed: bool) {
        self.pressed = pressed;
        if !pressed {
            self.press_start = None;
        }
    }

    /// Records `now` as the press start unless one is already recorded.
    fn start_if_needed(&mut self, now: Instant) -> Instant {
        *self.press_start.get_or_insert(now)
    }

    fn clear_start(&mut self) {
        self.press_start = None;
    }
}

/// Owns the pedal button states and produces throttle per tick.
#[derive(Debug, Clone)]
pub struct PedalStateMachine {
    mode: PedalMode,
    forward: ButtonState,
    reverse: ButtonState,
}

impl PedalStateMachine {
    /// Creates a state machine for one session in `mode`.
    #[must_use]
    pub fn new(mode: PedalMode) -> Self {
        Self {
            mode,
            forward: ButtonState::default(),
            reverse: ButtonState::default(),
        }
    }

    /// Session pedal mode.
    #[must_use]
    pub fn mode(&self) -> PedalMode {
        self.mode
    }

    /// State of one pedal button.
    #[must_use]
    pub fn button(&self, pedal: Pedal) -> ButtonState {
        match pedal {
            Pedal::Forward => self.forward,
            Pedal::Reverse => self.reverse,
        }
    }

    /// Applies a button event. Returns `true` if the state changed.
    ///
    /// Repeated events with the same value are no-ops.
    pub fn set_button(&mut self, pedal: Pedal, pressed: bool) -> bool {
        let state = match pedal {
            Pedal::Forward => &mut self.forward,
            Pedal::Reverse => &mut self.reverse,
        };
        let changed = state.is_pressed() != pressed;
        state.set_pressed(pressed);
        changed
    }

    /// Releases both pedals and clears their timestamps.
    pub fn reset(&mut self) {
        self.forward = ButtonState::default();
        self.reverse = ButtonState::default();
    }

    /// Throttle for this tick, before inversion and trim.
    ///
    /// `now` is the tick time; it is only used in `buttons` mode.
    pub fn throttle(
        &mut self,
        now: Instant,
        tracker: &CalibrationTracker,
        pedals: &PedalConfig,
        shaping: &ShapingConfig,
    ) -> f64 {
        let shaper = Shaper::new(shaping.deadzone, shaping.expo);

        match self.mode {
            PedalMode::Buttons => {
                let ramped = self.button_throttle(now, pedals);
                if pedals.analog_pedal_feel {
                    apply_expo(ramped, shaping.expo * 0.5)
                } else {
                    ramped
                }
            }
            // Silent pedals count as released, a silent split axis as centered
            PedalMode::Axes => axes_throttle(
                tracker.normalized_or(Axis::Forward, -1.0),
                tracker.normalized_or(Axis::Reverse, -1.0),
                &shaper,
            ),
            PedalMode::SplitAxis => shaper.apply(split_axis_value(tracker)),
        }
    }

    /// Timed ramp for digital pedals.
    pub fn button_throttle(&mut self, now: Instant, pedals: &PedalConfig) -> f64 {
        let forward = self.forward.is_pressed();
        let reverse = self.reverse.is_pressed();

        match (forward, reverse) {
            (true, false) => {
                self.reverse.clear_start();
                let start = self.forward.start_if_needed(now);
                if start == now {
                    debug!("Forward pedal ramp started");
                }
                ramp(now, start, pedals)
            }
            (false, true) => {
                self.forward.clear_start();
                let start = self.reverse.start_if_needed(now);
                if start == now {
                    debug!("Reverse pedal ramp started");
                }
                if pedals.reverse_is_instant {
                    -1.0
                } else {
                    -ramp(now, start, pedals)
                }
            }
            _ => {
                // Released, or both held (safety interlock)
                self.forward.clear_start();
                self.reverse.clear_start();
                0.0
            }
        }
    }
}

/// Ramp progress of a hold that started at `start`, in 0.0..=1.0.
#[must_use]
pub fn ramp_progress(now: Instant, start: Instant, ramp_duration_s: f64) -> f64 {
    let held = now.saturating_duration_since(start).as_secs_f64();
    (held / ramp_duration_s).min(1.0)
}

fn ramp(now: Instant, start: Instant, pedals: &PedalConfig) -> f64 {
    let progress = ramp_progress(now, start, pedals.throttle_ramp_duration);
    pedals.curve().apply(progress, pedals.curve_strength)
}

/// Normalized split-axis input.
///
/// Reads the combined axis; until that axis reports, the throttle axis is
/// used instead. Both silent reads as centered.
#[must_use]
pub fn split_axis_value(tracker: &CalibrationTracker) -> f64 {
    if tracker.bounds(Axis::CombinedAxis).has_samples() {
        tracker.normalized(Axis::CombinedAxis)
    } else {
        tracker.normalized_or(Axis::Throttle, 0.0)
    }
}

/// Combines two analog pedals into one signed throttle.
///
/// Each normalized pedal (-1.0 released, 1.0 floored) is first mapped to
/// 0.0..=1.0 and shaped on its own, then combined as `forward - reverse`.
/// Subtracting the raw normalized values instead would put half pedal at
/// 0.0 - (-1.0) = 1.0, so throttle would saturate halfway through the travel.
#[must_use]
pub fn axes_throttle(forward_norm: f64, reverse_norm: f64, shaper: &Shaper) -> f64 {
    let forward = shaper.apply((forward_norm + 1.0) / 2.0);
    let reverse = shaper.apply((reverse_norm + 1.0) / 2.0);
    (forward - reverse).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::curve::AccelerationCurve;
    use std::time::Duration;

    fn ramp_config() -> PedalConfig {
        PedalConfig {
            pedal_mode: PedalMode::Buttons,
            acceleration_curve: AccelerationCurve::Exponential.name().to_string(),
            curve_strength: 2.0,
            throttle_ramp_duration: 1.0,
            reverse_is_instant: false,
            analog_pedal_feel: false,
        }
    }

    fn ms(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    #[test]
    fn test_idle_is_zero() {
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);
        assert_eq!(pedals.button_throttle(Instant::now(), &ramp_config()), 0.0);
    }

    #[test]
    fn test_exponential_ramp_scenario() {
        let cfg = ramp_config();
        let t0 = Instant::now();
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);

        pedals.set_button(Pedal::Forward, true);
        assert_eq!(pedals.button_throttle(t0, &cfg), 0.0);
        assert_eq!(pedals.button(Pedal::Forward).press_start(), Some(t0));

        assert_eq!(ramp_progress(ms(t0, 250), t0, 1.0), 0.25);
        assert_eq!(pedals.button_throttle(ms(t0, 250), &cfg), 0.0625);
        assert_eq!(pedals.button_throttle(ms(t0, 1000), &cfg), 1.0);
        assert_eq!(pedals.button_throttle(ms(t0, 5000), &cfg), 1.0);
    }

    #[test]
    fn test_press_start_recorded_once() {
        let cfg = ramp_config();
        let t0 = Instant::now();
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);

        pedals.set_button(Pedal::Forward, true);
        pedals.button_throttle(t0, &cfg);
        // Repeated press events do not restart the ramp
        assert!(!pedals.set_button(Pedal::Forward, true));
        pedals.button_throttle(ms(t0, 100), &cfg);
        assert_eq!(pedals.button(Pedal::Forward).press_start(), Some(t0));
    }

    #[test]
    fn test_release_drops_to_zero_next_tick() {
        let cfg = ramp_config();
        let t0 = Instant::now();
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);

        pedals.set_button(Pedal::Forward, true);
        pedals.button_throttle(t0, &cfg);
        assert!(pedals.button_throttle(ms(t0, 800), &cfg) > 0.5);

        pedals.set_button(Pedal::Forward, false);
        assert_eq!(pedals.button(Pedal::Forward).press_start(), None);
        assert_eq!(pedals.button_throttle(ms(t0, 805), &cfg), 0.0);

        // A new press ramps from zero again
        pedals.set_button(Pedal::Forward, true);
        assert_eq!(pedals.button_throttle(ms(t0, 900), &cfg), 0.0);
    }

    #[test]
    fn test_both_pressed_interlock() {
        let cfg = ramp_config();
        let t0 = Instant::now();
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);

        pedals.set_button(Pedal::Forward, true);
        pedals.button_throttle(t0, &cfg);
        pedals.set_button(Pedal::Reverse, true);

        assert_eq!(pedals.button_throttle(ms(t0, 500), &cfg), 0.0);
        assert_eq!(pedals.button(Pedal::Forward).press_start(), None);
        assert_eq!(pedals.button(Pedal::Reverse).press_start(), None);
    }

    #[test]
    fn test_reverse_ramps_negative() {
        let cfg = ramp_config();
        let t0 = Instant::now();
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);

        pedals.set_button(Pedal::Reverse, true);
        pedals.button_throttle(t0, &cfg);
        assert_eq!(pedals.button_throttle(ms(t0, 500), &cfg), -0.25);
        assert_eq!(pedals.button_throttle(ms(t0, 1500), &cfg), -1.0);
    }

    #[test]
    fn test_reverse_instant() {
        let mut cfg = ramp_config();
        cfg.reverse_is_instant = true;
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);

        pedals.set_button(Pedal::Reverse, true);
        assert_eq!(pedals.button_throttle(Instant::now(), &cfg), -1.0);
    }

    #[test]
    fn test_switching_pedals_restarts_ramp() {
        let cfg = ramp_config();
        let t0 = Instant::now();
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);

        pedals.set_button(Pedal::Forward, true);
        pedals.button_throttle(t0, &cfg);
        pedals.set_button(Pedal::Forward, false);
        pedals.set_button(Pedal::Reverse, true);

        assert_eq!(pedals.button_throttle(ms(t0, 600), &cfg), 0.0);
        assert_eq!(pedals.button(Pedal::Forward).press_start(), None);
        assert_eq!(pedals.button(Pedal::Reverse).press_start(), Some(ms(t0, 600)));
    }

    #[test]
    fn test_analog_feel_softens_ramp() {
        let mut cfg = ramp_config();
        cfg.acceleration_curve = AccelerationCurve::Linear.name().to_string();
        cfg.analog_pedal_feel = true;
        let shaping = ShapingConfig { expo: 0.5, ..ShapingConfig::default() };
        let tracker = CalibrationTracker::new();
        let t0 = Instant::now();
        let mut pedals = PedalStateMachine::new(PedalMode::Buttons);

        pedals.set_button(Pedal::Forward, true);
        pedals.throttle(t0, &tracker, &cfg, &shaping);
        let soft = pedals.throttle(ms(t0, 500), &tracker, &cfg, &shaping);
        assert!((soft - apply_expo(0.5, 0.25)).abs() < 1e-12);
        assert_eq!(pedals.throttle(ms(t0, 1000), &tracker, &cfg, &shaping), 1.0);
    }

    #[test]
    fn test_axes_mode() {
        let shaper = Shaper::linear();
        assert_eq!(axes_throttle(-1.0, -1.0, &shaper), 0.0);
        assert_eq!(axes_throttle(1.0, -1.0, &shaper), 1.0);
        assert_eq!(axes_throttle(-1.0, 1.0, &shaper), -1.0);
        assert_eq!(axes_throttle(1.0, 1.0, &shaper), 0.0);
        assert_eq!(axes_throttle(0.0, -1.0, &shaper), 0.5);
    }

    #[test]
    fn test_axes_mode_from_tracker() {
        let mut tracker = CalibrationTracker::new();
        for v in [0, 255, 255] {
            tracker.observe(Axis::Forward, v);
        }
        for v in [255, 0] {
            tracker.observe(Axis::Reverse, v);
        }
        let shaping = ShapingConfig { deadzone: 0.0, expo: 0.0, ..ShapingConfig::default() };
        let cfg = PedalConfig { pedal_mode: PedalMode::Axes, ..ramp_config() };
        let mut pedals = PedalStateMachine::new(PedalMode::Axes);

        assert_eq!(pedals.throttle(Instant::now(), &tracker, &cfg, &shaping), 1.0);
    }

    #[test]
    fn test_split_axis_center_is_neutral() {
        let mut tracker = CalibrationTracker::new();
        for v in [0, 1000, 500] {
            tracker.observe(Axis::CombinedAxis, v);
        }
        let shaping = ShapingConfig { deadzone: 0.02, ..ShapingConfig::default() };
        let cfg = PedalConfig { pedal_mode: PedalMode::SplitAxis, ..ramp_config() };
        let mut pedals = PedalStateMachine::new(PedalMode::SplitAxis);

        assert_eq!(pedals.throttle(Instant::now(), &tracker, &cfg, &shaping), 0.0);

        tracker.observe(Axis::CombinedAxis, 0);
        let full_reverse = pedals.throttle(Instant::now(), &tracker, &cfg, &shaping);
        assert!((full_reverse + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_axes_pedals_shaped_from_rest() {
        // Half travel normalizes to 0.0 and is shaped as 0.5 of the pedal
        let shaper = Shaper::new(0.0, 0.5);
        assert_eq!(axes_throttle(0.0, -1.0, &shaper), 0.3125);
        assert_eq!(axes_throttle(-1.0, 0.0, &shaper), -0.3125);
        assert_eq!(axes_throttle(1.0, -1.0, &shaper), 1.0);

        let shaper = Shaper::new(0.1, 0.0);
        assert_eq!(axes_throttle(-0.9, -1.0, &shaper), 0.0);
    }

    #[test]
    fn test_split_axis_falls_back_to_throttle_axis() {
        let mut tracker = CalibrationTracker::new();
        for v in [0, 1000] {
            tracker.observe(Axis::Throttle, v);
        }
        let shaping = ShapingConfig { deadzone: 0.0, expo: 0.0, ..ShapingConfig::default() };
        let cfg = PedalConfig { pedal_mode: PedalMode::SplitAxis, ..ramp_config() };
        let mut pedals = PedalStateMachine::new(PedalMode::SplitAxis);

        // Throttle axis drives while the combined axis is silent
        assert_eq!(split_axis_value(&tracker), 1.0);
        assert_eq!(pedals.throttle(Instant::now(), &tracker, &cfg, &shaping), 1.0);

        // Once the combined axis reports, it takes over
        for v in [0, 1000, 0] {
            tracker.observe(Axis::CombinedAxis, v);
        }
        assert_eq!(split_axis_value(&tracker), -1.0);
        assert_eq!(pedals.throttle(Instant::now(), &tracker, &cfg, &shaping), -1.0);
    }

    #[test]
    fn test_silent_axes_are_neutral() {
        let tracker = CalibrationTracker::new();
        let shaping = ShapingConfig::default();
        for mode in [PedalMode::Axes, PedalMode::SplitAxis] {
            let cfg = PedalConfig { pedal_mode: mode, ..ramp_config() };
            let mut pedals = PedalStateMachine::new(mode);
            assert_eq!(pedals.throttle(Instant::now(), &tracker, &cfg, &shaping), 0.0);
        }
    }

    #[test]
    fn test_pedal_mode_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: PedalMode,
        }
        let parsed: Wrapper = toml::from_str("mode = \"split_axis\"").unwrap();
        assert_eq!(parsed.mode, PedalMode::SplitAxis);
        assert!(toml::from_str::<Wrapper>("mode = \"paddles\"").is_err());
    }
}
