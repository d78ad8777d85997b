//! # Error Types
//!
//! Custom error types for the wheel bridge using `thiserror`.

use thiserror::Error;

/// Main error type for the wheel bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No usable input device was found at startup
    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    /// Input device errors after it was opened (read failure, disconnect, grab)
    #[error("Input device error: {0}")]
    Device(String),

    /// I2C bus could not be opened or used
    #[error("I2C bus error: {0}")]
    Bus(String),

    /// Both the framed and the raw DAC write failed
    #[error("DAC write to 0x{addr:02x} failed: {reason}")]
    BusWrite {
        /// 7-bit address of the DAC
        addr: u8,
        /// Bus-level error of the last attempt
        reason: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the wheel bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
