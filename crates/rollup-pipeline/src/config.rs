//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default staging directory for incoming flat log files.
pub const DEFAULT_STAGING_DIR: &str = "./streaming_logs";

/// Archive subdirectory created under the staging directory.
pub const ARCHIVE_SUBDIR: &str = "archive";

/// Default extension of staging files picked up by the event stage.
pub const DEFAULT_LOG_EXTENSION: &str = "txt";

/// Default SQLite database holding the relational source.
pub const DEFAULT_DB_PATH: &str = "./streaming_mock.db";

/// Default directory for marker files.
pub const DEFAULT_MARKER_DIR: &str = "./markers";

/// Default directory for stage artifacts.
pub const DEFAULT_OUTPUT_DIR: &str = "./transformed_data";

/// Metrics log file name inside the output directory.
pub const METRICS_FILE_NAME: &str = "stage_metrics.csv";

/// Default maximum number of rows per chunk and per query page.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Default worker count when none is given on the command line.
pub const DEFAULT_WORKERS: usize = 6;

/// Default work queue capacity per worker.
pub const DEFAULT_QUEUE_FACTOR: usize = 2;

/// Default trailing window of the event-count stage, in hours.
pub const DEFAULT_EVENT_WINDOW_HOURS: i64 = 1;

/// Default trailing window of the genre-view stage, in hours.
pub const DEFAULT_VIEW_WINDOW_HOURS: i64 = 24;

/// Default time the aggregator waits for outstanding results, in seconds.
pub const DEFAULT_AGGREGATION_TIMEOUT_SECS: u64 = 300;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub paths: PathConfig,
    pub processing: ProcessingConfig,
    pub windows: WindowConfig,
}

/// Filesystem and database locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathConfig {
    pub staging_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub log_extension: String,
    pub db_path: PathBuf,
    pub marker_dir: PathBuf,
    pub output_dir: PathBuf,
    pub metrics_file: PathBuf,
}

/// Chunking, parallelism and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub chunk_size: usize,
    pub default_workers: usize,
    pub queue_factor: usize,
    pub aggregation_timeout_secs: u64,
}

/// Trailing windows injected into time-filtered stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub event_window_hours: i64,
    pub view_window_hours: i64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Load configuration from `.env`, environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let staging_dir = std::env::var("ROLLUP_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STAGING_DIR));
        let output_dir = std::env::var("ROLLUP_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let config = PipelineConfig {
            paths: PathConfig {
                archive_dir: std::env::var("ROLLUP_ARCHIVE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| staging_dir.join(ARCHIVE_SUBDIR)),
                log_extension: std::env::var("ROLLUP_LOG_EXTENSION")
                    .map(|ext| ext.trim_start_matches('.').to_string())
                    .unwrap_or_else(|_| DEFAULT_LOG_EXTENSION.to_string()),
                db_path: std::env::var("ROLLUP_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH)),
                marker_dir: std::env::var("ROLLUP_MARKER_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_MARKER_DIR)),
                metrics_file: std::env::var("ROLLUP_METRICS_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| output_dir.join(METRICS_FILE_NAME)),
                staging_dir,
                output_dir,
            },
            processing: ProcessingConfig {
                chunk_size: env_or("ROLLUP_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                default_workers: env_or("ROLLUP_DEFAULT_WORKERS", DEFAULT_WORKERS),
                queue_factor: env_or("ROLLUP_QUEUE_FACTOR", DEFAULT_QUEUE_FACTOR),
                aggregation_timeout_secs: env_or(
                    "ROLLUP_AGGREGATION_TIMEOUT_SECS",
                    DEFAULT_AGGREGATION_TIMEOUT_SECS,
                ),
            },
            windows: WindowConfig {
                event_window_hours: env_or("ROLLUP_EVENT_WINDOW_HOURS", DEFAULT_EVENT_WINDOW_HOURS),
                view_window_hours: env_or("ROLLUP_VIEW_WINDOW_HOURS", DEFAULT_VIEW_WINDOW_HOURS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Configuration rooted at `root`, using default file names beneath it
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let staging_dir = root.join("streaming_logs");
        let output_dir = root.join("transformed_data");
        Self {
            paths: PathConfig {
                archive_dir: staging_dir.join(ARCHIVE_SUBDIR),
                log_extension: DEFAULT_LOG_EXTENSION.to_string(),
                db_path: root.join("streaming_mock.db"),
                marker_dir: root.join("markers"),
                metrics_file: output_dir.join(METRICS_FILE_NAME),
                staging_dir,
                output_dir,
            },
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.processing.chunk_size == 0 {
            anyhow::bail!("Chunk size must be greater than 0");
        }

        if self.processing.default_workers == 0 {
            anyhow::bail!("Default worker count must be greater than 0");
        }

        if self.processing.queue_factor == 0 {
            anyhow::bail!("Queue factor must be greater than 0");
        }

        if self.windows.event_window_hours <= 0 || self.windows.view_window_hours <= 0 {
            anyhow::bail!(
                "Windows must be positive (event: {}h, view: {}h)",
                self.windows.event_window_hours,
                self.windows.view_window_hours
            );
        }

        if self.paths.log_extension.is_empty() {
            anyhow::bail!("Log file extension cannot be empty");
        }

        if self.paths.archive_dir == self.paths.staging_dir {
            anyhow::bail!(
                "Archive directory must differ from the staging directory ({})",
                self.paths.staging_dir.display()
            );
        }

        if self.processing.aggregation_timeout_secs == 0 {
            tracing::warn!("Aggregation timeout is 0s - stages will keep only results already queued");
        }

        Ok(())
    }

    /// Effective worker count for a requested value; `None` means the
    /// configured default and anything at or below zero runs one worker.
    pub fn resolve_workers(&self, requested: Option<i64>) -> usize {
        match requested {
            None => self.processing.default_workers,
            Some(n) if n <= 0 => 1,
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
        }
    }

    /// Work queue capacity for `workers` workers
    pub fn queue_capacity(&self, workers: usize) -> usize {
        workers.max(1).saturating_mul(self.processing.queue_factor.max(1))
    }

    pub fn aggregation_timeout(&self) -> Duration {
        Duration::from_secs(self.processing.aggregation_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let staging_dir = PathBuf::from(DEFAULT_STAGING_DIR);
        let output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        Self {
            paths: PathConfig {
                archive_dir: staging_dir.join(ARCHIVE_SUBDIR),
                log_extension: DEFAULT_LOG_EXTENSION.to_string(),
                db_path: PathBuf::from(DEFAULT_DB_PATH),
                marker_dir: PathBuf::from(DEFAULT_MARKER_DIR),
                metrics_file: output_dir.join(METRICS_FILE_NAME),
                staging_dir,
                output_dir,
            },
            processing: ProcessingConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                default_workers: DEFAULT_WORKERS,
                queue_factor: DEFAULT_QUEUE_FACTOR,
                aggregation_timeout_secs: DEFAULT_AGGREGATION_TIMEOUT_SECS,
            },
            windows: WindowConfig {
                event_window_hours: DEFAULT_EVENT_WINDOW_HOURS,
                view_window_hours: DEFAULT_VIEW_WINDOW_HOURS,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "ROLLUP_STAGING_DIR",
        "ROLLUP_ARCHIVE_DIR",
        "ROLLUP_LOG_EXTENSION",
        "ROLLUP_DB_PATH",
        "ROLLUP_MARKER_DIR",
        "ROLLUP_OUTPUT_DIR",
        "ROLLUP_METRICS_FILE",
        "ROLLUP_CHUNK_SIZE",
        "ROLLUP_DEFAULT_WORKERS",
        "ROLLUP_QUEUE_FACTOR",
        "ROLLUP_EVENT_WINDOW_HOURS",
        "ROLLUP_VIEW_WINDOW_HOURS",
        "ROLLUP_AGGREGATION_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();
        let config = PipelineConfig::load().unwrap();
        assert_eq!(config.processing.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.processing.default_workers, 6);
        assert_eq!(config.paths.archive_dir, PathBuf::from("./streaming_logs/archive"));
        assert_eq!(
            config.paths.metrics_file,
            PathBuf::from("./transformed_data/stage_metrics.csv")
        );
    }

    #[test]
    #[serial]
    fn test_load_overrides_derive_dependent_paths() {
        clear_env();
        std::env::set_var("ROLLUP_STAGING_DIR", "/data/logs");
        std::env::set_var("ROLLUP_OUTPUT_DIR", "/data/out");
        std::env::set_var("ROLLUP_CHUNK_SIZE", "500");
        std::env::set_var("ROLLUP_LOG_EXTENSION", ".log");

        let config = PipelineConfig::load().unwrap();
        assert_eq!(config.paths.archive_dir, PathBuf::from("/data/logs/archive"));
        assert_eq!(config.paths.metrics_file, PathBuf::from("/data/out/stage_metrics.csv"));
        assert_eq!(config.paths.log_extension, "log");
        assert_eq!(config.processing.chunk_size, 500);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_rejects_zero_chunk_size() {
        clear_env();
        std::env::set_var("ROLLUP_CHUNK_SIZE", "0");
        assert!(PipelineConfig::load().is_err());
        clear_env();
    }

    #[test]
    fn test_resolve_workers_clamps() {
        let config = PipelineConfig::default();
        assert_eq!(config.resolve_workers(None), DEFAULT_WORKERS);
        assert_eq!(config.resolve_workers(Some(0)), 1);
        assert_eq!(config.resolve_workers(Some(-3)), 1);
        assert_eq!(config.resolve_workers(Some(4)), 4);
        assert_eq!(config.queue_capacity(4), 8);
    }

    #[test]
    fn test_rooted_config_is_valid() {
        let config = PipelineConfig::rooted_at("/srv/rollup");
        config.validate().unwrap();
        assert_eq!(config.paths.db_path, PathBuf::from("/srv/rollup/streaming_mock.db"));
        assert_eq!(
            config.paths.archive_dir,
            PathBuf::from("/srv/rollup/streaming_logs/archive")
        );
    }
}
