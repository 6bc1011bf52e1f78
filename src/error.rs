//! # Error Types
//!
//! Custom error types for Servo Rig using `thiserror`.

use thiserror::Error;

/// Main error type for Servo Rig
#[derive(Debug, Error)]
pub enum ServoRigError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port open/read/write failures
    #[error("Serial error: {0}")]
    Serial(String),

    /// No usable serial port was found
    #[error("No serial port found (tried: {0})")]
    SerialPortNotFound(String),

    /// Operation needs an open device link
    #[error("Device link is not connected")]
    NotConnected,

    /// Rejected mapping input (servo id, kind, index or source)
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    /// Unparseable console command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// External controller discovery or read failure
    #[error("Controller error: {0}")]
    Controller(String),

    /// Telemetry record serialization failure
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] serde_json::Error),
}

/// Result type alias for Servo Rig
pub type Result<T> = std::result::Result<T, ServoRigError>;
