//! Telemetry record types

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::mapping::ServoOutput;
use crate::poll::PollSnapshot;

/// One servo command as logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub servo_id: u8,
    pub angle: u8,
}

impl From<&ServoOutput> for OutputRecord {
    fn from(output: &ServoOutput) -> Self {
        Self {
            servo_id: output.servo_id,
            angle: output.angle,
        }
    }
}

/// One JSONL line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// RFC 3339, millisecond precision, UTC
    pub timestamp: String,
    pub tick: u64,
    pub connected: bool,
    pub commands_sent: u64,
    pub commands_confirmed: u64,
    pub wheel_angle: f64,
    pub throttle_angle: f64,
    pub outputs: Vec<OutputRecord>,
}

impl TelemetryRecord {
    /// Builds a record from a poll snapshot, stamped with `at`.
    #[must_use]
    pub fn from_snapshot(snapshot: &PollSnapshot, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            tick: snapshot.tick,
            connected: snapshot.link.is_connected(),
            commands_sent: snapshot.link.commands_sent,
            commands_confirmed: snapshot.link.commands_confirmed,
            wheel_angle: snapshot.wheel_angle,
            throttle_angle: snapshot.throttle_angle,
            outputs: snapshot.outputs.iter().map(OutputRecord::from).collect(),
        }
    }
}
