//! # Racing Wheel Device Module
//!
//! Opens the wheel through the Linux evdev interface and streams its events
//! into the control loop.
//!
//! ## Device Selection
//!
//! 1. `input.device_path` from the config, when set.
//! 2. Otherwise the first `/dev/input/event*` device whose name contains
//!    `input.device_name_hint` (default `"Thrustmaster"`), in sorted path order.
//!
//! With `input.grab_device` the device is grabbed exclusively (`EVIOCGRAB`)
//! so the wheel does not also drive the desktop; the grab is released in
//! [`InputSource::release`].

use async_trait::async_trait;
use evdev::{Device, EventStream};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::mapper::InputEvent;
use super::source::InputSource;
use crate::config::InputConfig;
use crate::error::{BridgeError, Result};

/// Racing wheel handle
///
/// Represents an open wheel device whose events are read asynchronously.
pub struct WheelDevice {
    stream: EventStream,
    device_path: String,
    grabbed: bool,
}

impl std::fmt::Debug for WheelDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WheelDevice")
            .field("device_path", &self.device_path)
            .field("grabbed", &self.grabbed)
            .finish_non_exhaustive()
    }
}

impl WheelDevice {
    /// Open the wheel described by the `[input]` config.
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound`: no configured or matching device
    /// - `Device`: the device could not be grabbed or streamed
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wheel_dac_bridge::config::InputConfig;
    /// use wheel_dac_bridge::controller::wheel::WheelDevice;
    ///
    /// # #[tokio::main] async fn main() -> wheel_dac_bridge::error::Result<()> {
    /// let wheel = WheelDevice::open(&InputConfig::default())?;
    /// println!("Connected to wheel at: {}", wheel.device_path());
    /// # Ok(()) }
    /// ```
    pub fn open(config: &InputConfig) -> Result<Self> {
        let path = if config.device_path.is_empty() {
            find_device(Path::new("/dev/input"), &config.device_name_hint)?
        } else {
            PathBuf::from(&config.device_path)
        };

        let mut device = Device::open(&path).map_err(|e| {
            BridgeError::DeviceNotFound(format!("{}: {}", path.display(), e))
        })?;

        let device_path = path.to_string_lossy().to_string();
        info!(
            "Opened wheel '{}' at {}",
            device.name().unwrap_or("unknown"),
            device_path
        );

        if config.grab_device {
            device
                .grab()
                .map_err(|e| BridgeError::Device(format!("Failed to grab {}: {}", device_path, e)))?;
            debug!("Grabbed {} exclusively", device_path);
        }

        // Must be called inside a tokio runtime
        let stream = device
            .into_event_stream()
            .map_err(|e| BridgeError::Device(format!("Failed to stream {}: {}", device_path, e)))?;

        Ok(Self {
            stream,
            device_path,
            grabbed: config.grab_device,
        })
    }

    /// Get the device path of this wheel
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

/// Scans `input_dir` for an `event*` node whose device name contains `hint`.
fn find_device(input_dir: &Path, hint: &str) -> Result<PathBuf> {
    let mut entries: Vec<_> = std::fs::read_dir(input_dir)
        .map_err(|e| BridgeError::DeviceNotFound(format!("Failed to read {}: {}", input_dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().starts_with("event"))
                .unwrap_or(false)
        })
        .collect();

    // Deterministic selection when several wheels are connected
    entries.sort();

    for path in entries {
        match Device::open(&path) {
            Ok(device) => {
                let name = device.name().unwrap_or_default();
                debug!("Found input device: {} ({})", path.display(), name);
                if name.contains(hint) {
                    return Ok(path);
                }
            }
            Err(e) => debug!("Could not open {}: {}", path.display(), e),
        }
    }

    Err(BridgeError::DeviceNotFound(format!(
        "no device named like '{}' under {}",
        hint,
        input_dir.display()
    )))
}

#[async_trait]
impl InputSource for WheelDevice {
    async fn next_event(&mut self) -> Result<InputEvent> {
        loop {
            let event = self
                .stream
                .next_event()
                .await
                .map_err(|e| BridgeError::Device(format!("Failed to read events: {}", e)))?;

            if let Some(event) = InputEvent::from_evdev(&event) {
                return Ok(event);
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        if !self.grabbed {
            return Ok(());
        }
        self.grabbed = false;
        if let Err(e) = self.stream.device_mut().ungrab() {
            warn!("Failed to release {}: {}", self.device_path, e);
            return Err(BridgeError::Device(format!("Failed to ungrab: {}", e)));
        }
        debug!("Released grab on {}", self.device_path);
        Ok(())
    }
}
