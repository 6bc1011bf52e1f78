//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section is optional; a missing section or field takes the value
//! documented on its `default_*` function.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::controller::angle_model::{
    AngleModel, DEFAULT_AUTO_CENTER_SPEED, DEFAULT_KEY_SENSITIVITY, DEFAULT_MAX_ANGLE,
    KEY_SENSITIVITY_MAX, KEY_SENSITIVITY_MIN,
};
use crate::error::{Result, ServoRigError};
use crate::serial::protocol::BAUD_CANDIDATES;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub wheel: AxisConfig,
    pub throttle: AxisConfig,
    pub poll: PollConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialConfig {
    /// Empty means "first enumerated port"
    #[serde(default)]
    pub port: String,

    /// Used when no baud candidate answers
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_probe_delay_ms")]
    pub probe_delay_ms: u64,

    #[serde(default = "default_probe_window_ms")]
    pub probe_window_ms: u64,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_handshake_window_ms")]
    pub handshake_window_ms: u64,
}

/// Virtual wheel or throttle configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AxisConfig {
    /// 0 disables the limit
    #[serde(default = "default_max_angle")]
    pub max_angle: f64,

    #[serde(default = "default_auto_center_speed")]
    pub auto_center_speed: f64,

    #[serde(default = "default_key_sensitivity")]
    pub key_sensitivity: f64,
}

/// Poll loop configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
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
}

/// Log file configuration
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub file_dir: Option<String>,
}

// Default value functions
fn default_baud_rate() -> u32 { 9600 }
fn default_write_timeout_ms() -> u64 { 100 }
fn default_probe_delay_ms() -> u64 { 500 }
fn default_probe_window_ms() -> u64 { 2000 }
fn default_settle_delay_ms() -> u64 { 2000 }
fn default_handshake_window_ms() -> u64 { 3000 }

fn default_max_angle() -> f64 { DEFAULT_MAX_ANGLE }
fn default_auto_center_speed() -> f64 { DEFAULT_AUTO_CENTER_SPEED }
fn default_key_sensitivity() -> f64 { DEFAULT_KEY_SENSITIVITY }

fn default_interval_ms() -> u64 { 50 }

fn default_telemetry_enabled() -> bool { false }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 100 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            write_timeout_ms: default_write_timeout_ms(),
            probe_delay_ms: default_probe_delay_ms(),
            probe_window_ms: default_probe_window_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            handshake_window_ms: default_handshake_window_ms(),
        }
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            max_angle: default_max_angle(),
            auto_center_speed: default_auto_center_speed(),
            key_sensitivity: default_key_sensitivity(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
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
        }
    }
}

impl AxisConfig {
    /// Builds an angle model with these settings.
    #[must_use]
    pub fn to_model(&self) -> AngleModel {
        AngleModel::with_settings(self.max_angle, self.auto_center_speed, self.key_sensitivity)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if !self.max_angle.is_finite() || self.max_angle < 0.0 {
            return Err(invalid(format!("{}.max_angle must be 0 or greater", section)));
        }

        if !(0.0..=1.0).contains(&self.auto_center_speed) {
            return Err(invalid(format!(
                "{}.auto_center_speed must be between 0.0 and 1.0",
                section
            )));
        }

        if !(KEY_SENSITIVITY_MIN..=KEY_SENSITIVITY_MAX).contains(&self.key_sensitivity) {
            return Err(invalid(format!(
                "{}.key_sensitivity must be between {} and {}",
                section, KEY_SENSITIVITY_MIN, KEY_SENSITIVITY_MAX
            )));
        }

        Ok(())
    }
}

fn invalid(message: impl std::fmt::Display) -> ServoRigError {
    ServoRigError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use servo_rig::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns `Config` if parsing or validation fails.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate baud rate
        if !BAUD_CANDIDATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {}",
                BAUD_CANDIDATES
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        // Validate timing fields
        if self.serial.write_timeout_ms == 0 || self.serial.write_timeout_ms > 10000 {
            return Err(invalid("write_timeout_ms must be between 1 and 10000"));
        }

        for (name, value) in [
            ("probe_delay_ms", self.serial.probe_delay_ms),
            ("probe_window_ms", self.serial.probe_window_ms),
            ("settle_delay_ms", self.serial.settle_delay_ms),
            ("handshake_window_ms", self.serial.handshake_window_ms),
        ] {
            if value > 60000 {
                return Err(invalid(format!("{} must be at most 60000", name)));
            }
        }

        if self.serial.probe_window_ms == 0 || self.serial.handshake_window_ms == 0 {
            return Err(invalid("probe_window_ms and handshake_window_ms must be greater than 0"));
        }

        self.wheel.validate("wheel")?;
        self.throttle.validate("throttle")?;

        if self.poll.interval_ms == 0 || self.poll.interval_ms > 1000 {
            return Err(invalid("poll interval_ms must be between 1 and 1000"));
        }

        // Validate telemetry configuration
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.log_interval_ms == 0 || self.telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 1 and 60000"));
        }

        // Validate telemetry file limits
        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self
            .logging
            .file_dir
            .as_deref()
            .is_some_and(|dir| dir.trim().is_empty())
        {
            return Err(invalid("logging file_dir cannot be empty when set"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> Config {
        Config {
            serial: SerialConfig {
                port: "/dev/ttyACM0".to_string(),
                ..SerialConfig::default()
            },
            telemetry: TelemetryConfig {
                enabled: true,
                ..TelemetryConfig::default()
            },
            ..Config::default()
        }
    }

    fn assert_invalid(config: &Config, needle: &str) {
        match config.validate() {
            Err(ServoRigError::Config(e)) => assert!(
                e.to_string().contains(needle),
                "error '{}' should mention '{}'",
                e,
                needle
            ),
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.serial.port, "");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.probe_delay_ms, 500);
        assert_eq!(config.serial.probe_window_ms, 2000);
        assert_eq!(config.serial.settle_delay_ms, 2000);
        assert_eq!(config.serial.handshake_window_ms, 3000);
        assert_eq!(config.wheel.max_angle, 180.0);
        assert_eq!(config.wheel.auto_center_speed, 0.95);
        assert_eq!(config.wheel.key_sensitivity, 0.02);
        assert_eq!(config.poll.interval_ms, 50);
        assert!(!config.telemetry.enabled);
        assert_eq!(config.logging.file_dir, None);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [serial]
            port = "/dev/ttyUSB0"

            [wheel]
            max_angle = 900.0
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.wheel.max_angle, 900.0);
        assert_eq!(config.wheel.key_sensitivity, 0.02);
        assert_eq!(config.throttle, AxisConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [serial]
            port = "/dev/ttyACM1"
            baud_rate = 115200
            write_timeout_ms = 50

            [throttle]
            max_angle = 90.0
            auto_center_speed = 0.5
            key_sensitivity = 0.05

            [poll]
            interval_ms = 20

            [telemetry]
            enabled = true
            log_dir = "/tmp/servo-rig"

            [logging]
            file_dir = "/tmp/servo-rig/logs"
            "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyACM1");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.write_timeout_ms, 50);
        assert_eq!(config.throttle.max_angle, 90.0);
        assert_eq!(config.throttle.auto_center_speed, 0.5);
        assert_eq!(config.poll.interval_ms, 20);
        assert!(config.telemetry.enabled);
        assert_eq!(config.logging.file_dir.as_deref(), Some("/tmp/servo-rig/logs"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/servo-rig.toml");
        assert!(matches!(result, Err(ServoRigError::Io(_))));
    }

    #[test]
    fn test_load_malformed_toml() {
        let result = Config::parse("[serial\nport = ");
        assert!(matches!(result, Err(ServoRigError::Config(_))));
    }

    #[test]
    fn test_valid_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.serial.baud_rate = 420000;
        assert_invalid(&config, "baud_rate");
    }

    #[test]
    fn test_valid_baud_rates() {
        for baud in [115200, 9600, 57600, 38400, 19200] {
            let mut config = create_valid_config();
            config.serial.baud_rate = baud;
            assert!(config.validate().is_ok(), "baud {} should be valid", baud);
        }
    }

    #[test]
    fn test_write_timeout_zero() {
        let mut config = create_valid_config();
        config.serial.write_timeout_ms = 0;
        assert_invalid(&config, "write_timeout_ms");
    }

    #[test]
    fn test_write_timeout_too_high() {
        let mut config = create_valid_config();
        config.serial.write_timeout_ms = 10001;
        assert_invalid(&config, "write_timeout_ms");
    }

    #[test]
    fn test_settle_delay_too_high() {
        let mut config = create_valid_config();
        config.serial.settle_delay_ms = 60001;
        assert_invalid(&config, "settle_delay_ms");
    }

    #[test]
    fn test_zero_probe_delay_allowed() {
        let mut config = create_valid_config();
        config.serial.probe_delay_ms = 0;
        config.serial.settle_delay_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_handshake_window_zero() {
        let mut config = create_valid_config();
        config.serial.handshake_window_ms = 0;
        assert_invalid(&config, "handshake_window_ms");
    }

    #[test]
    fn test_negative_max_angle() {
        let mut config = create_valid_config();
        config.wheel.max_angle = -1.0;
        assert_invalid(&config, "wheel.max_angle");
    }

    #[test]
    fn test_unlimited_max_angle_allowed() {
        let mut config = create_valid_config();
        config.wheel.max_angle = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auto_center_speed_out_of_range() {
        let mut config = create_valid_config();
        config.throttle.auto_center_speed = 1.5;
        assert_invalid(&config, "throttle.auto_center_speed");
    }

    #[test]
    fn test_key_sensitivity_out_of_range() {
        let mut config = create_valid_config();
        config.wheel.key_sensitivity = 0.5;
        assert_invalid(&config, "wheel.key_sensitivity");

        config.wheel.key_sensitivity = 0.0;
        assert_invalid(&config, "wheel.key_sensitivity");
    }

    #[test]
    fn test_poll_interval_zero() {
        let mut config = create_valid_config();
        config.poll.interval_ms = 0;
        assert_invalid(&config, "interval_ms");
    }

    #[test]
    fn test_poll_interval_too_high() {
        let mut config = create_valid_config();
        config.poll.interval_ms = 1001;
        assert_invalid(&config, "interval_ms");
    }

    #[test]
    fn test_empty_log_dir_when_enabled() {
        let mut config = create_valid_config();
        config.telemetry.log_dir = String::new();
        assert_invalid(&config, "log_dir");
    }

    #[test]
    fn test_empty_log_dir_when_disabled() {
        let mut config = create_valid_config();
        config.telemetry.enabled = false;
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_interval_zero() {
        let mut config = create_valid_config();
        config.telemetry.log_interval_ms = 0;
        assert_invalid(&config, "log_interval_ms");
    }

    #[test]
    fn test_max_records_per_file_zero() {
        let mut config = create_valid_config();
        config.telemetry.max_records_per_file = 0;
        assert_invalid(&config, "max_records_per_file");
    }

    #[test]
    fn test_max_files_to_keep_zero() {
        let mut config = create_valid_config();
        config.telemetry.max_files_to_keep = 0;
        assert_invalid(&config, "max_files_to_keep");
    }

    #[test]
    fn test_blank_logging_dir() {
        let mut config = create_valid_config();
        config.logging.file_dir = Some("  ".to_string());
        assert_invalid(&config, "file_dir");
    }

    #[test]
    fn test_axis_config_to_model() {
        let axis = AxisConfig {
            max_angle: 90.0,
            auto_center_speed: 0.5,
            key_sensitivity: 0.05,
        };
        let model = axis.to_model();

        assert_eq!(model.max_angle(), 90.0);
        assert_eq!(model.auto_center_speed(), 0.5);
        assert_eq!(model.key_sensitivity(), 0.05);
        assert_eq!(model.angle(), 0.0);
    }
}
