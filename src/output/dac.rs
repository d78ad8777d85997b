//! # DAC Output Module
//!
//! Quantizes unit-range values to 12-bit codes and writes them to a pair of
//! MCP4725 DACs over I2C.
//!
//! ## Frame Layout
//!
//! ```text
//! Primary (write DAC register): [0x40, D11..D4, D3..D0 << 4]
//! Fallback (fast write):        [D11..D4, D3..D0 << 4]
//! ```
//!
//! The primary framing is tried first; if the bus rejects it, the same code
//! is sent once with the fallback framing before the write is reported as
//! failed.
//!
//! Both DACs are centered (code 2048) before control starts and again on
//! every exit path, including `Drop` when the pair was not closed cleanly.

use embedded_hal::i2c::I2c;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Highest 12-bit DAC code
pub const DAC_CODE_MAX: u16 = 4095;

/// Mid-scale code (neutral steering / throttle)
pub const DAC_CODE_CENTER: u16 = 2048;

/// MCP4725 "write DAC register" command byte
pub const MCP4725_CMD_WRITE_DAC: u8 = 0x40;

/// Output channel of the DAC pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Steering,
    Throttle,
}

/// Which framing a successful write used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePath {
    Primary,
    Fallback,
}

/// Converts a unit-range value to a 12-bit DAC code.
///
/// The value is clamped to `[-clamp, clamp]` and divided by `clamp`, so
/// `clamp` acts as a soft ceiling below full scale. The result is mapped to
/// 0..=4095 with rounding.
///
/// ```
/// use wheel_dac_bridge::output::dac::to_code;
///
/// assert_eq!(to_code(0.0, 0.98), 2048);
/// assert_eq!(to_code(1.0, 1.0), 4095);
/// assert_eq!(to_code(-1.0, 1.0), 0);
/// ```
#[must_use]
pub fn to_code(value: f64, clamp: f64) -> u16 {
    let value = if value.is_nan() { 0.0 } else { value };
    let scaled = value.clamp(-clamp, clamp) / clamp;
    let code = ((scaled + 1.0) * f64::from(DAC_CODE_MAX) / 2.0).round();
    code.clamp(0.0, f64::from(DAC_CODE_MAX)) as u16
}

/// Data bytes of a 12-bit code in MCP4725 register layout.
#[must_use]
pub fn code_bytes(code: u16) -> [u8; 2] {
    let code = code.min(DAC_CODE_MAX);
    [((code >> 4) & 0xFF) as u8, ((code & 0x0F) << 4) as u8]
}

/// Primary frame: command byte followed by the data bytes.
#[must_use]
pub fn encode_write_dac(code: u16) -> [u8; 3] {
    let [hi, lo] = code_bytes(code);
    [MCP4725_CMD_WRITE_DAC, hi, lo]
}

/// Writes one code to the DAC at `addr`, falling back to the raw framing once.
///
/// # Errors
///
/// Returns `BusWrite` when both framings fail.
pub fn write_code<B: I2c>(bus: &mut B, addr: u8, code: u16) -> Result<WritePath> {
    match bus.write(addr, &encode_write_dac(code)) {
        Ok(()) => Ok(WritePath::Primary),
        Err(primary) => {
            debug!("DAC 0x{:02x} rejected framed write ({:?}), trying raw write", addr, primary);
            bus.write(addr, &code_bytes(code))
                .map(|()| WritePath::Fallback)
                .map_err(|e| BridgeError::BusWrite {
                    addr,
                    reason: format!("{:?}", e),
                })
        }
    }
}

/// Two MCP4725 DACs sharing one I2C bus.
pub struct DacPair<B: I2c> {
    bus: B,
    steering_addr: u8,
    throttle_addr: u8,
    closed: bool,
}

impl<B: I2c> std::fmt::Debug for DacPair<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DacPair")
            .field("steering_addr", &self.steering_addr)
            .field("throttle_addr", &self.throttle_addr)
            .finish_non_exhaustive()
    }
}

impl<B: I2c> DacPair<B> {
    /// Wraps an open bus. Nothing is written until [`center`](Self::center).
    pub fn new(bus: B, steering_addr: u8, throttle_addr: u8) -> Self {
        Self {
            bus,
            steering_addr,
            throttle_addr,
            closed: false,
        }
    }

    /// Address of a channel's DAC.
    #[must_use]
    pub fn address(&self, channel: Channel) -> u8 {
        match channel {
            Channel::Steering => self.steering_addr,
            Channel::Throttle => self.throttle_addr,
        }
    }

    /// Writes `code` to one channel.
    ///
    /// # Errors
    ///
    /// Returns `BusWrite` when both framings fail.
    pub fn write(&mut self, channel: Channel, code: u16) -> Result<WritePath> {
        let addr = self.address(channel);
        write_code(&mut self.bus, addr, code)
    }

    /// Writes mid-scale to both channels.
    ///
    /// Both writes are attempted even if the first fails; the first error is
    /// returned.
    pub fn center(&mut self) -> Result<()> {
        let steering = self.write(Channel::Steering, DAC_CODE_CENTER);
        let throttle = self.write(Channel::Throttle, DAC_CODE_CENTER);
        steering.and(throttle).map(|_| ())
    }

    /// Centers both outputs and releases the bus.
    pub fn close(mut self) -> Result<()> {
        let result = self.center();
        self.closed = true;
        result
    }
}

impl<B: I2c> Drop for DacPair<B> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.center() {
                warn!("Failed to center DACs on drop: {}", e);
            }
        }
    }
}
