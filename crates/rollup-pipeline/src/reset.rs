//! Removal of persisted pipeline state
//!
//! Clears markers, artifacts (with the metrics log) and archived staging
//! files so the next run starts from scratch. The relational source and files
//! still waiting in staging are never touched.

use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::MetricsLog;
use crate::storage::ArtifactStore;
use serde::Serialize;
use tracing::info;

/// What to remove. An empty scope removes everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetScope {
    pub markers: bool,
    pub artifacts: bool,
    pub archive: bool,
}

impl ResetScope {
    pub fn all() -> Self {
        Self {
            markers: true,
            artifacts: true,
            archive: true,
        }
    }

    fn effective(self) -> Self {
        if self == Self::default() {
            Self::all()
        } else {
            self
        }
    }
}

/// Counts of removed files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub markers: usize,
    pub artifacts: usize,
    pub metrics_log: bool,
    pub archived_files: usize,
}

pub fn reset(config: &PipelineConfig, scope: ResetScope) -> Result<ResetSummary> {
    let scope = scope.effective();
    let mut summary = ResetSummary::default();

    if scope.markers {
        summary.markers = CheckpointStore::new(&config.paths.marker_dir).clear()?;
    }

    if scope.artifacts {
        summary.artifacts = ArtifactStore::new(&config.paths.output_dir).clear()?;
        summary.metrics_log = MetricsLog::new(&config.paths.metrics_file).clear()?;
    }

    if scope.archive {
        summary.archived_files = clear_archive(config)?;
    }

    info!(
        markers = summary.markers,
        artifacts = summary.artifacts,
        metrics_log = summary.metrics_log,
        archived_files = summary.archived_files,
        "Pipeline state reset"
    );
    Ok(summary)
}

/// Delete the regular files directly inside the archive directory
fn clear_archive(config: &PipelineConfig) -> Result<usize> {
    let dir = &config.paths.archive_dir;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        if path.is_file() {
            std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}
