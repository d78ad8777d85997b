//! Status snapshot published by the control loop after every tick.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::controller::calibration::{Axis, CalibrationTracker};
use crate::controller::mapper::{Binding, BindingTarget};
use crate::controller::pedals::{Pedal, PedalMode, PedalStateMachine};
use crate::pipeline::{CodePair, OutputPair, TickOutput};

/// Calibration view of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisStatus {
    pub axis: Axis,
    pub last: i32,
    /// `None` until the axis has reported.
    pub min_seen: Option<i32>,
    pub max_seen: Option<i32>,
    pub normalized: f64,
}

impl AxisStatus {
    /// An axis that has not reported yet.
    #[must_use]
    pub fn silent(axis: Axis) -> Self {
        Self {
            axis,
            last: 0,
            min_seen: None,
            max_seen: None,
            normalized: 0.0,
        }
    }
}

/// A failure that did not stop the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fault {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl Fault {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

/// Snapshot of the bridge after the most recent tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStatus {
    pub pedal_mode: PedalMode,
    pub tick_count: u64,
    pub processed: OutputPair,
    pub smoothed: OutputPair,
    pub codes: CodePair,
    /// One entry per axis, in [`Axis::ALL`] order.
    pub axes: [AxisStatus; 5],
    pub forward_pressed: bool,
    pub reverse_pressed: bool,
    pub write_failures: u64,
    pub fallback_writes: u64,
    /// Target being learned, if binding mode is active.
    pub binding: Option<BindingTarget>,
    pub last_binding: Option<Binding>,
    pub last_fault: Option<Fault>,
}

impl BridgeStatus {
    #[must_use]
    pub fn new(pedal_mode: PedalMode) -> Self {
        Self {
            pedal_mode,
            tick_count: 0,
            processed: OutputPair::default(),
            smoothed: OutputPair::default(),
            codes: CodePair::default(),
            axes: Axis::ALL.map(AxisStatus::silent),
            forward_pressed: false,
            reverse_pressed: false,
            write_failures: 0,
            fallback_writes: 0,
            binding: None,
            last_binding: None,
            last_fault: None,
        }
    }

    /// Copies the outputs of a tick.
    pub fn record_tick(&mut self, output: &TickOutput) {
        self.processed = output.processed;
        self.smoothed = output.smoothed;
        self.codes = output.codes;
    }

    /// Refreshes the calibration and pedal views.
    pub fn record_inputs(&mut self, tracker: &CalibrationTracker, pedals: &PedalStateMachine) {
        self.axes = Axis::ALL.map(|axis| {
            let bounds = tracker.bounds(axis);
            let seen = bounds.has_samples();
            AxisStatus {
                axis,
                last: bounds.last,
                min_seen: seen.then_some(bounds.min_seen),
                max_seen: seen.then_some(bounds.max_seen),
                normalized: tracker.normalized(axis),
            }
        });
        self.forward_pressed = pedals.button(Pedal::Forward).is_pressed();
        self.reverse_pressed = pedals.button(Pedal::Reverse).is_pressed();
    }

    pub fn record_fault(&mut self, message: impl Into<String>) {
        self.last_fault = Some(Fault::now(message));
    }
}
