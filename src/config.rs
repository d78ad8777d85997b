//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file (or a file with only the
//! sections you care about) is a valid configuration. Validation runs once at
//! load time; the control loop never sees an invalid [`Config`].

use evdev::{AbsoluteAxisType, Key};
use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::controller::curve::AccelerationCurve;
use crate::controller::pedals::PedalMode;
use crate::error::{BridgeError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub shaping: ShapingConfig,
    #[serde(default)]
    pub pedals: PedalConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// I2C bus and DAC addressing
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BusConfig {
    /// Explicit bus device; empty means `/dev/i2c-{bus_id}`.
    #[serde(default)]
    pub bus_path: String,

    #[serde(default = "default_bus_id")]
    pub bus_id: u8,

    #[serde(default = "default_steering_addr")]
    pub steering_addr: u8,

    #[serde(default = "default_throttle_addr")]
    pub throttle_addr: u8,
}

/// Wheel device and code mapping
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InputConfig {
    #[serde(default)]
    pub device_path: String,

    #[serde(default = "default_device_name_hint")]
    pub device_name_hint: String,

    #[serde(default = "default_grab_device")]
    pub grab_device: bool,

    #[serde(default = "default_steering_codes")]
    pub steering_codes: Vec<u16>,

    #[serde(default = "default_throttle_codes")]
    pub throttle_codes: Vec<u16>,

    #[serde(default = "default_combined_axis_code")]
    pub combined_axis_code: u16,

    #[serde(default = "default_forward_axis_code")]
    pub forward_axis_code: u16,

    #[serde(default = "default_reverse_axis_code")]
    pub reverse_axis_code: u16,

    #[serde(default = "default_forward_pedal_codes")]
    pub forward_pedal_codes: Vec<u16>,

    #[serde(default = "default_reverse_pedal_codes")]
    pub reverse_pedal_codes: Vec<u16>,

    #[serde(default = "default_binding_axis_threshold")]
    pub binding_axis_threshold: i32,
}

/// Deadzone, expo, output range and channel trims
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ShapingConfig {
    #[serde(default = "default_deadzone")]
    pub deadzone: f64,

    #[serde(default = "default_expo")]
    pub expo: f64,

    #[serde(default = "default_clamp")]
    pub clamp: f64,

    #[serde(default)]
    pub invert_steering: bool,

    #[serde(default = "default_invert_throttle")]
    pub invert_throttle: bool,

    #[serde(default)]
    pub swap_controls: bool,

    #[serde(default)]
    pub steering_trim: f64,

    #[serde(default)]
    pub throttle_trim: f64,
}

/// Pedal mode and throttle ramp
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PedalConfig {
    #[serde(default = "default_pedal_mode")]
    pub pedal_mode: PedalMode,

    /// Curve name; an unknown name runs as `linear` (see [`Config::warnings`]).
    #[serde(default = "default_acceleration_curve")]
    pub acceleration_curve: String,

    #[serde(default = "default_curve_strength")]
    pub curve_strength: f64,

    /// Seconds of hold needed to reach full throttle.
    #[serde(default = "default_throttle_ramp_duration")]
    pub throttle_ramp_duration: f64,

    #[serde(default)]
    pub reverse_is_instant: bool,

    #[serde(default = "default_analog_pedal_feel")]
    pub analog_pedal_feel: bool,
}

/// Control loop timing and smoothing
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ControlConfig {
    #[serde(default = "default_update_hz")]
    pub update_hz: u32,

    #[serde(default = "default_steering_filter_len")]
    pub steering_filter_len: usize,

    #[serde(default = "default_throttle_filter_len")]
    pub throttle_filter_len: usize,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Diagnostic log output
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; empty logs to the console only.
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_bus_id() -> u8 { 1 }
fn default_steering_addr() -> u8 { 0x60 }
fn default_throttle_addr() -> u8 { 0x61 }

fn default_device_name_hint() -> String { "Thrustmaster".to_string() }
fn default_grab_device() -> bool { true }
fn default_steering_codes() -> Vec<u16> { vec![AbsoluteAxisType::ABS_X.0, AbsoluteAxisType::ABS_RX.0] }
fn default_throttle_codes() -> Vec<u16> { vec![AbsoluteAxisType::ABS_Y.0, AbsoluteAxisType::ABS_RY.0] }
fn default_combined_axis_code() -> u16 { AbsoluteAxisType::ABS_Z.0 }
fn default_forward_axis_code() -> u16 { AbsoluteAxisType::ABS_GAS.0 }
fn default_reverse_axis_code() -> u16 { AbsoluteAxisType::ABS_BRAKE.0 }
fn default_forward_pedal_codes() -> Vec<u16> { vec![Key::BTN_TR.code(), Key::BTN_TRIGGER.code()] }
fn default_reverse_pedal_codes() -> Vec<u16> { vec![Key::BTN_TL.code(), Key::BTN_THUMB.code()] }
fn default_binding_axis_threshold() -> i32 { 1000 }

fn default_deadzone() -> f64 { 0.02 }
fn default_expo() -> f64 { 0.25 }
fn default_clamp() -> f64 { 0.98 }
fn default_invert_throttle() -> bool { true }

fn default_pedal_mode() -> PedalMode { PedalMode::Buttons }
fn default_acceleration_curve() -> String { AccelerationCurve::Exponential.name().to_string() }
fn default_curve_strength() -> f64 { 2.0 }
fn default_throttle_ramp_duration() -> f64 { 1.0 }
fn default_analog_pedal_feel() -> bool { true }

fn default_update_hz() -> u32 { 200 }
fn default_steering_filter_len() -> usize { 5 }
fn default_throttle_filter_len() -> usize { 3 }
fn default_poll_timeout_ms() -> u64 { 1 }

fn default_telemetry_enabled() -> bool { false }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 100 }
fn default_log_format() -> String { "jsonl".to_string() }

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_path: String::new(),
            bus_id: default_bus_id(),
            steering_addr: default_steering_addr(),
            throttle_addr: default_throttle_addr(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device_path: String::new(),
            device_name_hint: default_device_name_hint(),
            grab_device: default_grab_device(),
            steering_codes: default_steering_codes(),
            throttle_codes: default_throttle_codes(),
            combined_axis_code: default_combined_axis_code(),
            forward_axis_code: default_forward_axis_code(),
            reverse_axis_code: default_reverse_axis_code(),
            forward_pedal_codes: default_forward_pedal_codes(),
            reverse_pedal_codes: default_reverse_pedal_codes(),
            binding_axis_threshold: default_binding_axis_threshold(),
        }
    }
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            deadzone: default_deadzone(),
            expo: default_expo(),
            clamp: default_clamp(),
            invert_steering: false,
            invert_throttle: default_invert_throttle(),
            swap_controls: false,
            steering_trim: 0.0,
            throttle_trim: 0.0,
        }
    }
}

impl Default for PedalConfig {
    fn default() -> Self {
        Self {
            pedal_mode: default_pedal_mode(),
            acceleration_curve: default_acceleration_curve(),
            curve_strength: default_curve_strength(),
            throttle_ramp_duration: default_throttle_ramp_duration(),
            reverse_is_instant: false,
            analog_pedal_feel: default_analog_pedal_feel(),
        }
    }
}

impl PedalConfig {
    /// Curve to run; unknown names fall back to linear.
    #[must_use]
    pub fn curve(&self) -> AccelerationCurve {
        AccelerationCurve::from_name(&self.acceleration_curve).unwrap_or(AccelerationCurve::Linear)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            update_hz: default_update_hz(),
            steering_filter_len: default_steering_filter_len(),
            throttle_filter_len: default_throttle_filter_len(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

pub(crate) fn invalid(message: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails (including an unknown `pedal_mode`)
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wheel_dac_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the I2C character device to open.
    #[must_use]
    pub fn bus_device_path(&self) -> String {
        if self.bus.bus_path.is_empty() {
            format!("/dev/i2c-{}", self.bus.bus_id)
        } else {
            self.bus.bus_path.clone()
        }
    }

    /// Values that were accepted but degraded to a safe default.
    ///
    /// These do not fail validation; the caller logs them once logging is
    /// set up and reports them in the bridge status.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let name = &self.pedals.acceleration_curve;
        if AccelerationCurve::from_name(name).is_none() {
            warnings.push(format!(
                "Unknown acceleration_curve '{}', falling back to {}",
                name,
                AccelerationCurve::Linear
            ));
        }
        warnings
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Bus addressing
        for (name, addr) in [
            ("steering_addr", self.bus.steering_addr),
            ("throttle_addr", self.bus.throttle_addr),
        ] {
            if addr > 0x7F {
                return Err(invalid(format!("{} 0x{:02x} is not a 7-bit address", name, addr)));
            }
        }

        if self.bus.steering_addr == self.bus.throttle_addr {
            return Err(invalid("steering_addr and throttle_addr must differ"));
        }

        // Shaping
        let shaping = &self.shaping;
        if !(0.0..1.0).contains(&shaping.deadzone) {
            return Err(invalid("deadzone must be in [0.0, 1.0)"));
        }

        if !(0.0..=1.0).contains(&shaping.expo) {
            return Err(invalid("expo must be between 0.0 and 1.0"));
        }

        if !(shaping.clamp > 0.0 && shaping.clamp <= 1.0) {
            return Err(invalid("clamp must be in (0.0, 1.0]"));
        }

        for (name, value) in [
            ("steering_trim", shaping.steering_trim),
            ("throttle_trim", shaping.throttle_trim),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} must be between -1.0 and 1.0", name)));
            }
        }

        // Pedals
        let pedals = &self.pedals;
        if !(pedals.curve_strength.is_finite() && pedals.curve_strength > 0.0) {
            return Err(invalid("curve_strength must be greater than 0"));
        }

        if !(pedals.throttle_ramp_duration.is_finite() && pedals.throttle_ramp_duration > 0.0) {
            return Err(invalid("throttle_ramp_duration must be greater than 0 seconds"));
        }

        if pedals.pedal_mode == PedalMode::Buttons
            && (self.input.forward_pedal_codes.is_empty() || self.input.reverse_pedal_codes.is_empty())
        {
            return Err(invalid("buttons pedal mode needs forward and reverse pedal codes"));
        }

        if self.input.steering_codes.is_empty() {
            return Err(invalid("steering_codes cannot be empty"));
        }

        if self.input.binding_axis_threshold < 0 {
            return Err(invalid("binding_axis_threshold cannot be negative"));
        }

        // Control loop
        let control = &self.control;
        if control.update_hz == 0 || control.update_hz > 1000 {
            return Err(invalid("update_hz must be between 1 and 1000"));
        }

        for (name, len) in [
            ("steering_filter_len", control.steering_filter_len),
            ("throttle_filter_len", control.throttle_filter_len),
        ] {
            if len == 0 || len > 100 {
                return Err(invalid(format!("{} must be between 1 and 100", name)));
            }
        }

        if control.poll_timeout_ms == 0 || control.poll_timeout_ms > 100 {
            return Err(invalid("poll_timeout_ms must be between 1 and 100"));
        }

        // Telemetry
        let telemetry = &self.telemetry;
        if telemetry.enabled && telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if telemetry.log_interval_ms == 0 || telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 1 and 60000"));
        }

        if telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[bus]
bus_id = 3
steering_addr = 0x62

[pedals]
pedal_mode = "split_axis"
acceleration_curve = "s_curve"

[control]
update_hz = 250
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.bus.bus_id, 3);
        assert_eq!(config.bus.steering_addr, 0x62);
        assert_eq!(config.bus.throttle_addr, 0x61);
        assert_eq!(config.pedals.pedal_mode, PedalMode::SplitAxis);
        assert_eq!(config.pedals.curve(), AccelerationCurve::SCurve);
        assert!(config.warnings().is_empty());
        assert_eq!(config.control.update_hz, 250);
        assert_eq!(config.bus_device_path(), "/dev/i2c-3");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::load("/nonexistent/wheel-dac-bridge.toml");
        assert!(matches!(result, Err(BridgeError::Io(_))));
    }

    #[test]
    fn test_unknown_pedal_mode_refused() {
        let result = Config::from_toml_str("[pedals]\npedal_mode = \"paddles\"\n");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_unknown_curve_degrades_to_linear() {
        let config = Config::from_toml_str("[pedals]\nacceleration_curve = \"bouncy\"\n").unwrap();
        assert_eq!(config.pedals.curve(), AccelerationCurve::Linear);

        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bouncy"));
        assert!(warnings[0].contains("linear"));
    }

    #[test]
    fn test_default_config_has_no_warnings() {
        assert!(create_valid_config().warnings().is_empty());
    }

    #[test]
    fn test_explicit_bus_path() {
        let mut config = create_valid_config();
        config.bus.bus_path = "/dev/i2c-7".to_string();
        assert_eq!(config.bus_device_path(), "/dev/i2c-7");
    }

    #[test]
    fn test_address_not_7_bit() {
        let mut config = create_valid_config();
        config.bus.throttle_addr = 0x80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_addresses() {
        let mut config = create_valid_config();
        config.bus.throttle_addr = config.bus.steering_addr;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deadzone_one_rejected() {
        let mut config = create_valid_config();
        config.shaping.deadzone = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deadzone_negative() {
        let mut config = create_valid_config();
        config.shaping.deadzone = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expo_too_high() {
        let mut config = create_valid_config();
        config.shaping.expo = 1.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamp_zero() {
        let mut config = create_valid_config();
        config.shaping.clamp = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamp_full_scale_allowed() {
        let mut config = create_valid_config();
        config.shaping.clamp = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trim_out_of_range() {
        let mut config = create_valid_config();
        config.shaping.steering_trim = -1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_ramp_duration() {
        let mut config = create_valid_config();
        config.pedals.throttle_ramp_duration = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ramp_duration() {
        let mut config = create_valid_config();
        config.pedals.throttle_ramp_duration = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_curve_strength_zero() {
        let mut config = create_valid_config();
        config.pedals.curve_strength = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buttons_mode_needs_pedal_codes() {
        let mut config = create_valid_config();
        config.input.reverse_pedal_codes.clear();
        assert!(config.validate().is_err());

        config.pedals.pedal_mode = PedalMode::Axes;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_steering_codes() {
        let mut config = create_valid_config();
        config.input.steering_codes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_update_hz_zero() {
        let mut config = create_valid_config();
        config.control.update_hz = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_update_hz_too_high() {
        let mut config = create_valid_config();
        config.control.update_hz = 1001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_len_zero() {
        let mut config = create_valid_config();
        config.control.throttle_filter_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_timeout_zero() {
        let mut config = create_valid_config();
        config.control.poll_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir_when_enabled() {
        let mut config = create_valid_config();
        config.telemetry.enabled = true;
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir_when_disabled() {
        let mut config = create_valid_config();
        config.telemetry.enabled = false;
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_files_to_keep_zero() {
        let mut config = create_valid_config();
        config.telemetry.max_files_to_keep = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = create_valid_config();
        config.telemetry.format = "csv".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_bus_id(), 1);
        assert_eq!(default_steering_addr(), 0x60);
        assert_eq!(default_throttle_addr(), 0x61);
        assert_eq!(default_deadzone(), 0.02);
        assert_eq!(default_expo(), 0.25);
        assert_eq!(default_clamp(), 0.98);
        assert!(default_invert_throttle());
        assert_eq!(default_pedal_mode(), PedalMode::Buttons);
        assert_eq!(default_acceleration_curve(), "exponential");
        assert_eq!(default_curve_strength(), 2.0);
        assert_eq!(default_throttle_ramp_duration(), 1.0);
        assert_eq!(default_update_hz(), 200);
        assert_eq!(default_steering_filter_len(), 5);
        assert_eq!(default_throttle_filter_len(), 3);
        assert_eq!(default_steering_codes(), vec![0x00, 0x03]);
        assert_eq!(default_forward_pedal_codes(), vec![0x137, 0x120]);
        assert_eq!(default_reverse_pedal_codes(), vec![0x136, 0x121]);
    }
}
