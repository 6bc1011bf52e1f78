//! Rotating JSONL telemetry writer

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use super::types::TelemetryRecord;
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::poll::PollSnapshot;

const FILE_PREFIX: &str = "telemetry_";
const FILE_SUFFIX: &str = ".jsonl";

/// Writes telemetry records as JSON Lines, rotating files by record count.
///
/// Files are named `telemetry_<session>_<seq>.jsonl`, where `<session>` is the
/// logger's start time. Only the newest `max_files_to_keep` telemetry files in
/// the directory are retained.
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    log_interval: Duration,
    session: String,
    seq: u32,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    last_logged: Option<Instant>,
}

impl TelemetryLogger {
    /// Creates the log directory if needed. No file is opened until the
    /// first record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created.
    pub fn new(
        dir: impl Into<PathBuf>,
        max_records_per_file: usize,
        max_files_to_keep: usize,
        log_interval: Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            log_interval,
            session: Utc::now().format("%Y%m%d_%H%M%S").to_string(),
            seq: 0,
            writer: None,
            current_path: None,
            records_in_file: 0,
            last_logged: None,
        })
    }

    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created.
    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        Self::new(
            &config.log_dir,
            config.max_records_per_file,
            config.max_files_to_keep,
            Duration::from_millis(config.log_interval_ms),
        )
    }

    /// File currently being written, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Logs `snapshot` unless the last record is younger than the log
    /// interval. Returns whether a record was written.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Telemetry` if writing fails.
    pub fn log_snapshot(&mut self, snapshot: &PollSnapshot, now: Instant) -> Result<bool> {
        let due = self
            .last_logged
            .map_or(true, |last| now.saturating_duration_since(last) >= self.log_interval);
        if !due {
            return Ok(false);
        }

        self.write(&TelemetryRecord::from_snapshot(snapshot, Utc::now()))?;
        self.last_logged = Some(now);
        Ok(true)
    }

    /// Appends one record, rotating first if the current file is full.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Telemetry` if writing fails.
    pub fn write(&mut self, record: &TelemetryRecord) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        self.seq += 1;
        let path = self.dir.join(format!(
            "{}{}_{:04}{}",
            FILE_PREFIX, self.session, self.seq, FILE_SUFFIX
        ));
        let file = File::create(&path)?;
        info!("Telemetry logging to {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;

        self.prune()
    }

    /// Deletes the oldest telemetry files beyond the retention limit.
    fn prune(&self) -> Result<()> {
        let files = telemetry_files(&self.dir)?;
        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for old in files.iter().take(excess) {
            debug!("Removing old telemetry file {}", old.display());
            fs::remove_file(old)?;
        }
        Ok(())
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

/// Telemetry files in `dir`, oldest first.
///
/// # Errors
///
/// Returns `Io` if the directory cannot be read.
pub fn telemetry_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
        })
        .collect();
    // Session timestamp then zero-padded sequence, so name order is age order
    files.sort();
    Ok(files)
}
