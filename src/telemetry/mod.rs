//! # Telemetry Module
//!
//! Handles session telemetry logging to JSONL files with rotation.
//!
//! This module handles:
//! - Building one record per logged poll tick
//! - Formatting as JSONL (JSON Lines)
//! - Writing to rotating log files
//! - Managing file rotation (max N records per file)
//! - Retaining only last M files

pub mod logger;
pub mod types;

pub use logger::TelemetryLogger;
pub use types::{OutputRecord, TelemetryRecord};
