//! # Wheel Input Mapper Module
//!
//! Classifies raw evdev events from the wheel into logical axes and pedal
//! buttons, and learns new code assignments in binding mode.
//!
//! ## Default Codes
//!
//! | Role | evdev Code | Used in |
//! |------|------------|---------|
//! | Steering | ABS_X, ABS_RX | all modes |
//! | Throttle | ABS_Y, ABS_RY | `split_axis` input while the combined axis is silent; monitoring otherwise |
//! | Combined pedal axis | ABS_Z | `split_axis` |
//! | Forward pedal axis | ABS_GAS | `axes` |
//! | Reverse pedal axis | ABS_BRAKE | `axes` |
//! | Forward pedal button | BTN_TR, BTN_TRIGGER | `buttons` |
//! | Reverse pedal button | BTN_TL, BTN_THUMB | `buttons` |
//!
//! Every code is configurable (see `[input]` in the config file) and can be
//! relearned at runtime with [`EventMapper::start_binding`].
//!
//! ## Usage
//!
//! ```
//! use wheel_dac_bridge::config::InputConfig;
//! use wheel_dac_bridge::controller::calibration::Axis;
//! use wheel_dac_bridge::controller::mapper::{EventMapper, InputEvent, Mapped};
//!
//! let mapper = EventMapper::new(&InputConfig::default());
//! let event = InputEvent::Axis { code: 0x00, value: 512 }; // ABS_X
//! assert_eq!(mapper.classify(&event), Mapped::Axis(Axis::Steering, 512));
//! ```

use serde::Serialize;
use std::fmt;
use tracing::info;

use super::calibration::Axis;
use super::pedals::Pedal;
use crate::config::InputConfig;

/// Input event reduced to what the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Absolute axis motion.
    Axis { code: u16, value: i32 },
    /// Key or button transition (auto-repeat counts as pressed).
    Button { code: u16, pressed: bool },
}

impl InputEvent {
    /// Converts an evdev event; sync and other event kinds yield `None`.
    #[must_use]
    pub fn from_evdev(event: &evdev::InputEvent) -> Option<Self> {
        match event.kind() {
            evdev::InputEventKind::AbsAxis(axis) => Some(InputEvent::Axis {
                code: axis.0,
                value: event.value(),
            }),
            evdev::InputEventKind::Key(key) => Some(InputEvent::Button {
                code: key.code(),
                pressed: event.value() != 0,
            }),
            _ => None,
        }
    }
}

/// Result of classifying one event against the current bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapped {
    Axis(Axis, i32),
    Pedal(Pedal, bool),
    Ignored,
}

/// Control that binding mode can relearn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingTarget {
    Steering,
    Throttle,
    CombinedAxis,
    Forward,
    Reverse,
}

impl BindingTarget {
    fn accepts_buttons(self) -> bool {
        matches!(self, BindingTarget::Forward | BindingTarget::Reverse)
    }
}

impl fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingTarget::Steering => "steering",
            BindingTarget::Throttle => "throttle",
            BindingTarget::CombinedAxis => "combined_axis",
            BindingTarget::Forward => "forward",
            BindingTarget::Reverse => "reverse",
        };
        f.write_str(name)
    }
}

/// Kind of event a binding was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Axis,
    Button,
}

/// A learned code assignment, reported to the loop owner for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub target: BindingTarget,
    pub kind: BindingKind,
    pub code: u16,
}

/// Active code assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBindings {
    pub steering_codes: Vec<u16>,
    pub throttle_codes: Vec<u16>,
    pub combined_axis_code: u16,
    pub forward_axis_code: u16,
    pub reverse_axis_code: u16,
    pub forward_pedal_codes: Vec<u16>,
    pub reverse_pedal_codes: Vec<u16>,
}

impl From<&InputConfig> for InputBindings {
    fn from(config: &InputConfig) -> Self {
        Self {
            steering_codes: config.steering_codes.clone(),
            throttle_codes: config.throttle_codes.clone(),
            combined_axis_code: config.combined_axis_code,
            forward_axis_code: config.forward_axis_code,
            reverse_axis_code: config.reverse_axis_code,
            forward_pedal_codes: config.forward_pedal_codes.clone(),
            reverse_pedal_codes: config.reverse_pedal_codes.clone(),
        }
    }
}

/// Maps raw events to logical inputs and runs binding mode.
///
/// Not thread-safe; owned by the control loop.
#[derive(Debug)]
pub struct EventMapper {
    bindings: InputBindings,
    defaults: InputBindings,
    binding: Option<BindingTarget>,
    binding_axis_threshold: i32,
}

impl EventMapper {
    /// Creates a mapper from the `[input]` configuration.
    #[must_use]
    pub fn new(config: &InputConfig) -> Self {
        let bindings = InputBindings::from(config);
        Self {
            defaults: bindings.clone(),
            bindings,
            binding: None,
            binding_axis_threshold: config.binding_axis_threshold,
        }
    }

    /// Current code assignments.
    #[must_use]
    pub fn bindings(&self) -> &InputBindings {
        &self.bindings
    }

    /// Classifies an event.
    ///
    /// Axis lookup order is steering, combined, forward, reverse, throttle;
    /// the first match wins. Unmapped codes are ignored.
    #[must_use]
    pub fn classify(&self, event: &InputEvent) -> Mapped {
        let b = &self.bindings;
        match *event {
            InputEvent::Axis { code, value } => {
                let axis = if b.steering_codes.contains(&code) {
                    Axis::Steering
                } else if code == b.combined_axis_code {
                    Axis::CombinedAxis
                } else if code == b.forward_axis_code {
                    Axis::Forward
                } else if code == b.reverse_axis_code {
                    Axis::Reverse
                } else if b.throttle_codes.contains(&code) {
                    Axis::Throttle
                } else {
                    return Mapped::Ignored;
                };
                Mapped::Axis(axis, value)
            }
            InputEvent::Button { code, pressed } => {
                if b.forward_pedal_codes.contains(&code) {
                    Mapped::Pedal(Pedal::Forward, pressed)
                } else if b.reverse_pedal_codes.contains(&code) {
                    Mapped::Pedal(Pedal::Reverse, pressed)
                } else {
                    Mapped::Ignored
                }
            }
        }
    }

    /// Enters binding mode for `target`, replacing any pending target.
    pub fn start_binding(&mut self, target: BindingTarget) {
        info!("Binding {}: move or press the control now", target);
        self.binding = Some(target);
    }

    /// Leaves binding mode without changing any code.
    pub fn cancel_binding(&mut self) {
        if let Some(target) = self.binding.take() {
            info!("Binding {} cancelled", target);
        }
    }

    /// Target currently being learned.
    #[must_use]
    pub fn binding_target(&self) -> Option<BindingTarget> {
        self.binding
    }

    /// Returns `true` while binding mode is active.
    #[must_use]
    pub fn is_binding(&self) -> bool {
        self.binding.is_some()
    }

    /// Offers an event to binding mode.
    ///
    /// Axis events qualify when `|value|` exceeds the binding threshold;
    /// button events qualify on press, and only for pedal targets. A
    /// qualifying event replaces the target's codes, ends binding mode and
    /// is consumed. Anything else returns `None` and should be processed
    /// normally.
    pub fn try_bind(&mut self, event: &InputEvent) -> Option<Binding> {
        let target = self.binding?;

        let binding = match *event {
            InputEvent::Axis { code, value } if value.saturating_abs() > self.binding_axis_threshold => {
                Binding { target, kind: BindingKind::Axis, code }
            }
            InputEvent::Button { code, pressed: true } if target.accepts_buttons() => {
                Binding { target, kind: BindingKind::Button, code }
            }
            _ => return None,
        };

        self.apply(binding);
        self.binding = None;
        info!("Bound {} to {:?} code {}", binding.target, binding.kind, binding.code);
        Some(binding)
    }

    /// Restores the configured codes and leaves binding mode.
    pub fn reset_bindings(&mut self) {
        self.bindings = self.defaults.clone();
        self.binding = None;
        info!("Input bindings reset to configured defaults");
    }

    fn apply(&mut self, binding: Binding) {
        let b = &mut self.bindings;
        match (binding.target, binding.kind) {
            (BindingTarget::Steering, _) => b.steering_codes = vec![binding.code],
            (BindingTarget::Throttle, _) => b.throttle_codes = vec![binding.code],
            (BindingTarget::CombinedAxis, _) => b.combined_axis_code = binding.code,
            (BindingTarget::Forward, BindingKind::Button) => b.forward_pedal_codes = vec![binding.code],
            (BindingTarget::Forward, BindingKind::Axis) => b.forward_axis_code = binding.code,
            (BindingTarget::Reverse, BindingKind::Button) => b.reverse_pedal_codes = vec![binding.code],
            (BindingTarget::Reverse, BindingKind::Axis) => b.reverse_axis_code = binding.code,
        }
    }
}
