//! JSON Lines status recorder with size-based rotation.
//!
//! Records go to `status_<n>.jsonl` in the configured directory. After
//! `max_records_per_file` records the next file is started, and only the
//! newest `max_files_to_keep` files are kept. Numbering continues from the
//! highest index already present, so restarts never overwrite old records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::status::BridgeStatus;
use crate::config::TelemetryConfig;
use crate::error::Result;

const FILE_PREFIX: &str = "status_";
const FILE_SUFFIX: &str = ".jsonl";

#[derive(Serialize)]
struct Record<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    status: &'a BridgeStatus,
}

/// Appends status snapshots to rotating JSONL files.
#[derive(Debug)]
pub struct StatusLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    file_index: u64,
    records_in_file: usize,
    writer: Option<BufWriter<File>>,
}

impl StatusLogger {
    /// Creates the log directory if needed. No file is opened until the
    /// first record.
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&dir)?;

        let file_index = existing_indices(&dir)?.last().map_or(0, |last| last + 1);

        Ok(Self {
            dir,
            max_records_per_file: config.max_records_per_file.max(1),
            max_files_to_keep: config.max_files_to_keep.max(1),
            file_index,
            records_in_file: 0,
            writer: None,
        })
    }

    /// Path of the file currently being written (or about to be).
    pub fn current_path(&self) -> PathBuf {
        file_path(&self.dir, self.file_index)
    }

    /// Appends one snapshot, rotating first if the current file is full.
    pub fn log(&mut self, status: &BridgeStatus) -> Result<()> {
        if self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if self.writer.is_none() {
            self.open_current()?;
        }

        if let Some(writer) = self.writer.as_mut() {
            let record = Record {
                timestamp: Utc::now(),
                status,
            };
            serde_json::to_writer(&mut *writer, &record).map_err(std::io::Error::from)?;
            writer.write_all(b"\n")?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn open_current(&mut self) -> Result<()> {
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Telemetry file opened: {}", path.display());
        self.writer = Some(BufWriter::new(file));
        self.records_in_file = 0;
        self.prune()
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        self.writer = None;
        self.file_index += 1;
        self.open_current()
    }

    /// Deletes the oldest files beyond the retention limit.
    fn prune(&self) -> Result<()> {
        let indices = existing_indices(&self.dir)?;
        let excess = indices.len().saturating_sub(self.max_files_to_keep);
        for index in &indices[..excess] {
            let path = file_path(&self.dir, *index);
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove old telemetry file {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

impl Drop for StatusLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush telemetry: {}", e);
        }
    }
}

fn file_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}{}{}", FILE_PREFIX, index, FILE_SUFFIX))
}

/// Sorted indices of the `status_<n>.jsonl` files in `dir`.
fn existing_indices(dir: &Path) -> Result<Vec<u64>> {
    let mut indices: Vec<u64> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_prefix(FILE_PREFIX)?
                .strip_suffix(FILE_SUFFIX)?
                .parse()
                .ok()
        })
        .collect();
    indices.sort_unstable();
    Ok(indices)
}

/// Samples the status channel every `log_interval_ms` until the sender is
/// dropped.
pub async fn run_status_logger(config: TelemetryConfig, mut status: watch::Receiver<BridgeStatus>) -> Result<()> {
    let mut logger = StatusLogger::new(&config)?;
    info!(
        "Telemetry logging to {} every {} ms",
        config.log_dir, config.log_interval_ms
    );

    let mut ticker = interval(Duration::from_millis(config.log_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match status.has_changed() {
            Ok(true) => {
                let snapshot = status.borrow_and_update().clone();
                if let Err(e) = logger.log(&snapshot) {
                    warn!("Telemetry write failed: {}", e);
                }
            }
            Ok(false) => {}
            Err(_) => break,
        }
    }

    logger.flush()?;
    debug!("Telemetry logger stopped");
    Ok(())
}
