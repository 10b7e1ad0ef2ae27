//! JSONL telemetry log with rotation.
//!
//! Each record is one JSON object per line. A new file is started after
//! `max_records_per_file` records; only the newest `max_files_to_keep`
//! files are kept.
//!
//! File names sort chronologically:
//! `telemetry_<YYYYMMDD>_<HHMMSS>_<seq>.jsonl`.

use chrono::Local;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::link::LinkStats;
use crate::state::LinkState;

const FILE_PREFIX: &str = "telemetry_";
const FILE_SUFFIX: &str = ".jsonl";

/// One logged line.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TelemetryRecord {
    /// RFC 3339 local time
    pub timestamp: String,
    pub link_state: &'static str,
    pub sent: u32,
    pub logical_sent: u32,
    pub received: u32,
    pub lost: u32,
    pub last_id_sent: u32,
    pub last_id_received: u32,
    pub frame_rate: u32,
    /// Frame rate measured by the peer
    pub remote_frame_rate: Option<u16>,
    pub battery_voltage: Option<f32>,
    pub rssi: i32,
    pub snr: f32,
}

impl TelemetryRecord {
    /// Record stamped with the current local time.
    #[must_use]
    pub fn now(state: LinkState, stats: &LinkStats, frame_rate: u32, rssi: i32, snr: f32) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            link_state: state.as_str(),
            sent: stats.sent_counter,
            logical_sent: stats.logical_sent_counter,
            received: stats.received_counter,
            lost: stats.lost_counter,
            last_id_sent: stats.last_id_sent,
            last_id_received: stats.last_id_received,
            frame_rate,
            remote_frame_rate: None,
            battery_voltage: None,
            rssi,
            snr,
        }
    }
}

/// Rotating JSONL writer.
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    file_seq: u32,
}

impl TelemetryLogger {
    /// Creates `dir` if needed. No file is opened until the first record.
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            file_seq: 0,
        })
    }

    /// Appends one record, rotating first if the current file is full.
    pub fn log(&mut self, record: &TelemetryRecord) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let line = serde_json::to_string(record)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        self.records_in_file += 1;
        Ok(())
    }

    /// Log files currently on disk, oldest first.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy())
                    .map_or(false, |name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        self.file_seq = self.file_seq.wrapping_add(1);
        let name = format!(
            "{}{}_{:04}{}",
            FILE_PREFIX,
            Local::now().format("%Y%m%d_%H%M%S"),
            self.file_seq,
            FILE_SUFFIX
        );
        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Telemetry log: {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.records_in_file = 0;
        self.prune()
    }

    fn prune(&self) -> Result<()> {
        let files = self.files()?;
        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        let excess = files.len() - self.max_files_to_keep;
        for old in files.into_iter().take(excess) {
            match fs::remove_file(&old) {
                Ok(()) => debug!("Removed old telemetry log {}", old.display()),
                Err(e) => warn!("Failed to remove {}: {}", old.display(), e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(sent: u32) -> TelemetryRecord {
        let stats = LinkStats {
            sent_counter: sent,
            ..LinkStats::default()
        };
        TelemetryRecord::now(LinkState::Running, &stats, 40, -60, 9.5)
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_no_file_before_first_record() {
        let dir = TempDir::new().unwrap();
        let logger = TelemetryLogger::new(dir.path(), 10, 3).unwrap();
        assert!(logger.files().unwrap().is_empty());
    }

    #[test]
    fn test_records_are_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(dir.path(), 10, 3).unwrap();

        logger.log(&record(1)).unwrap();
        logger.log(&record(2)).unwrap();

        let files = logger.files().unwrap();
        assert_eq!(files.len(), 1);

        let lines = lines(&files[0]);
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(value["sent"], 2);
        assert_eq!(value["link_state"], "running");
        assert_eq!(value["rssi"], -60);
        assert!(value["battery_voltage"].is_null());
    }

    #[test]
    fn test_rotation_after_max_records() {
        let dir = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(dir.path(), 2, 10).unwrap();

        for i in 0..5 {
            logger.log(&record(i)).unwrap();
        }

        let files = logger.files().unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(lines(&files[0]).len(), 2);
        assert_eq!(lines(&files[1]).len(), 2);
        assert_eq!(lines(&files[2]).len(), 1);
    }

    #[test]
    fn test_prunes_oldest_files() {
        let dir = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(dir.path(), 1, 2).unwrap();

        for i in 0..5 {
            logger.log(&record(i)).unwrap();
        }

        let files = logger.files().unwrap();
        assert_eq!(files.len(), 2);

        // Newest two records survive
        let last: serde_json::Value = serde_json::from_str(&lines(&files[1])[0]).unwrap();
        assert_eq!(last["sent"], 4);
    }

    #[test]
    fn test_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        let mut logger = TelemetryLogger::new(dir.path(), 1, 1).unwrap();
        logger.log(&record(1)).unwrap();
        logger.log(&record(2)).unwrap();

        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(logger.files().unwrap().len(), 1);
    }
}
