//! # Output Module
//!
//! Smoothing, quantization and the MCP4725 DAC pair.

pub mod dac;
pub mod filter;

use linux_embedded_hal::I2cdev;
use tracing::info;

use crate::error::{BridgeError, Result};
use dac::DacPair;

/// Opens a Linux I2C character device and wraps it as a DAC pair.
///
/// # Errors
///
/// Returns `Bus` if the device node cannot be opened.
pub fn open_linux(path: &str, steering_addr: u8, throttle_addr: u8) -> Result<DacPair<I2cdev>> {
    let bus = I2cdev::new(path).map_err(|e| BridgeError::Bus(format!("{}: {}", path, e)))?;
    info!(
        "Opened I2C bus {} (steering DAC 0x{:02x}, throttle DAC 0x{:02x})",
        path, steering_addr, throttle_addr
    );
    Ok(DacPair::new(bus, steering_addr, throttle_addr))
}
