//! Stage timing log
//!
//! One CSV row per stage run is appended to the metrics file in the output
//! directory: `timestamp,stage,workers,seconds`.

use crate::error::{PipelineError, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

const HEADER: [&str; 4] = ["timestamp", "stage", "workers", "seconds"];

/// Stage name recorded for the whole run
pub const TOTAL_STAGE: &str = "pipeline_total";

/// Append-only timing log
#[derive(Debug, Clone)]
pub struct MetricsLog {
    path: PathBuf,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timing row, writing the header if the file is new
    pub fn record(&self, stage: &str, workers: usize, elapsed: Duration) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let fresh = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PipelineError::io(&self.path, e))?;

        let mut writer = csv::Writer::from_writer(file);
        if fresh {
            writer.write_record(HEADER).map_err(|e| PipelineError::csv(&self.path, e))?;
        }
        writer
            .write_record([
                Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
                stage.to_string(),
                workers.to_string(),
                format!("{:.3}", elapsed.as_secs_f64()),
            ])
            .map_err(|e| PipelineError::csv(&self.path, e))?;
        writer.flush().map_err(|e| PipelineError::io(&self.path, e))?;
        Ok(())
    }

    /// Remove the log. Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PipelineError::io(&self.path, e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let log = MetricsLog::new(dir.path().join("out").join("metrics.csv"));

        log.record("revenue", 4, Duration::from_millis(1234)).unwrap();
        log.record(TOTAL_STAGE, 4, Duration::from_millis(5)).unwrap();

        let raw = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,stage,workers,seconds");
        assert!(lines[1].ends_with(",revenue,4,1.234"));
        assert!(lines[2].ends_with(",pipeline_total,4,0.005"));
    }

    #[test]
    fn test_clear_missing_log() {
        let dir = TempDir::new().unwrap();
        let log = MetricsLog::new(dir.path().join("metrics.csv"));
        assert!(!log.clear().unwrap());
        log.record("event_count", 1, Duration::ZERO).unwrap();
        assert!(log.clear().unwrap());
    }
}
