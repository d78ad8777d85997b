//! Moving-average smoothing for the two output channels.
//!
//! Each channel keeps a fixed-length ring of recent values, pre-filled with
//! 0.0, so the output eases in from neutral after startup or a reset.

/// Fixed-window moving average.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverage {
    buf: Vec<f64>,
    index: usize,
}

impl MovingAverage {
    /// Creates a window of `len` samples (at least one), all 0.0.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    /// Window length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always `false`; a window holds at least one sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Replaces the oldest sample with `value` and returns the new mean.
    pub fn push(&mut self, value: f64) -> f64 {
        self.buf[self.index] = value;
        self.index = (self.index + 1) % self.buf.len();
        self.mean()
    }

    /// Mean of the window.
    ///
    /// A window holding one repeated value returns that value exactly.
    #[must_use]
    pub fn mean(&self) -> f64 {
        let first = self.buf[0];
        if self.buf.iter().all(|&v| v == first) {
            return first;
        }
        self.buf.iter().sum::<f64>() / self.buf.len() as f64
    }

    /// Refills the window with 0.0.
    pub fn reset(&mut self) {
        self.buf.iter_mut().for_each(|v| *v = 0.0);
        self.index = 0;
    }
}

/// Smoothing state for the steering and throttle channels.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFilter {
    pub steering: MovingAverage,
    pub throttle: MovingAverage,
}

impl OutputFilter {
    #[must_use]
    pub fn new(steering_len: usize, throttle_len: usize) -> Self {
        Self {
            steering: MovingAverage::new(steering_len),
            throttle: MovingAverage::new(throttle_len),
        }
    }

    /// Pushes one value per channel and returns the smoothed pair.
    pub fn push(&mut self, steering: f64, throttle: f64) -> (f64, f64) {
        (self.steering.push(steering), self.throttle.push(throttle))
    }

    pub fn reset(&mut self) {
        self.steering.reset();
        self.throttle.reset();
    }
}
