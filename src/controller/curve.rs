//! # Acceleration Curves
//!
//! Maps hold progress (0.0 to 1.0) to throttle magnitude.
//!
//! | Shape | Formula | Feel |
//! |-------|---------|------|
//! | `linear` | `p` | Constant build-up |
//! | `exponential` | `p^strength` | Slow start, rewards a sustained hold |
//! | `quadratic` | `p^2` | Gentle curve, strength ignored |
//! | `s_curve` | `1 / (1 + e^(-(p - 0.5) * strength * 2))` | Slow, fast, slow |
//!
//! The curve knows nothing about time; converting hold duration into progress
//! is done by the pedal state machine.
//!
//! ```
//! use wheel_dac_bridge::controller::curve::AccelerationCurve;
//!
//! let curve = AccelerationCurve::Exponential;
//! assert_eq!(curve.apply(0.25, 2.0), 0.0625);
//! assert_eq!(curve.apply(1.0, 2.0), 1.0);
//! ```

use std::fmt;

/// Shape of the throttle build-up while a pedal button is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationCurve {
    Linear,
    Exponential,
    Quadratic,
    SCurve,
}

impl AccelerationCurve {
    /// Looks up a curve by its configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            "quadratic" => Some(Self::Quadratic),
            "s_curve" => Some(Self::SCurve),
            _ => None,
        }
    }

    /// Configuration name of the curve.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Exponential => "exponential",
            Self::Quadratic => "quadratic",
            Self::SCurve => "s_curve",
        }
    }

    /// Evaluates the curve at `progress`.
    ///
    /// Progress is clamped to 0.0..=1.0 first; the endpoints are exact for
    /// every shape (`0.0` and `1.0`), including the s-curve whose logistic
    /// form would otherwise never reach them.
    #[must_use]
    pub fn apply(&self, progress: f64, strength: f64) -> f64 {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        if progress <= 0.0 {
            return 0.0;
        }
        if progress >= 1.0 {
            return 1.0;
        }

        match self {
            Self::Linear => progress,
            Self::Exponential => progress.powf(strength),
            Self::Quadratic => progress * progress,
            Self::SCurve => {
                let x = (progress - 0.5) * strength * 2.0;
                1.0 / (1.0 + (-x).exp())
            }
        }
    }
}

impl fmt::Display for AccelerationCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
