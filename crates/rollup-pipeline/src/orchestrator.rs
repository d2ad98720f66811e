//! Pipeline orchestration
//!
//! Runs the four stages strictly in sequence with one worker count. Each stage
//! extracts, transforms in the pool, folds with the persisted rollup, writes
//! its artifacts and only then advances its marker or archives the staging
//! files it consumed. A failing stage is logged and reported; the run moves on
//! to the next one.

use crate::aggregate::{fold_results, merge_with_prior};
use crate::checkpoint::{CheckpointStore, MarkerKey};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::extract::table::{open_source, read_table};
use crate::extract::{archive_files, LogFileExtractor, SourceExtractor, TableExtractor};
use crate::metrics::{MetricsLog, TOTAL_STAGE};
use crate::pool::{PartialResult, PoolConfig, PoolOutcome, WorkerPool};
use crate::stages::{
    genre_dimension, ArtifactSpec, EventCountStage, GenreViewsStage, RevenueStage, SourceBinding,
    StageKind, StageTransform, UnfinishedViewsStage, CONTENT_TABLE,
};
use crate::storage::ArtifactStore;
use chrono::{DateTime, Duration as Window, Utc};
use rollup_common::TabularStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Outcome of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    /// Persisted, but some chunks failed or never arrived
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub status: StageStatus,
    pub chunks_submitted: usize,
    pub chunks_received: usize,
    pub chunks_failed: usize,
    pub rows_extracted: usize,
    pub files_archived: usize,
    pub files_skipped: usize,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    fn failed(stage: StageKind, err: &PipelineError, duration_secs: f64) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            chunks_submitted: 0,
            chunks_received: 0,
            chunks_failed: 0,
            rows_extracted: 0,
            files_archived: 0,
            files_skipped: 0,
            duration_secs,
            error: Some(err.to_string()),
        }
    }

    fn from_outcome(stage: StageKind, outcome: &PoolOutcome, duration_secs: f64) -> Self {
        let status = if outcome.timed_out || outcome.failed() > 0 || outcome.received() < outcome.submitted {
            StageStatus::Partial
        } else {
            StageStatus::Completed
        };
        Self {
            stage,
            status,
            chunks_submitted: outcome.submitted,
            chunks_received: outcome.received(),
            chunks_failed: outcome.failed(),
            rows_extracted: outcome.extraction.rows,
            files_archived: outcome.extraction.files_archived.len(),
            files_skipped: outcome.extraction.files_skipped.len(),
            duration_secs,
            error: None,
        }
    }
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub duration_secs: f64,
}

impl RunReport {
    /// No stage failed outright
    pub fn succeeded(&self) -> bool {
        self.stages.iter().all(|s| s.status != StageStatus::Failed)
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == kind)
    }
}

/// Runs every stage once per [`PipelineOrchestrator::run`] call
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    artifacts: ArtifactStore,
    markers: CheckpointStore,
    metrics: MetricsLog,
    clock: Option<DateTime<Utc>>,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            artifacts: ArtifactStore::new(&config.paths.output_dir),
            markers: CheckpointStore::new(&config.paths.marker_dir),
            metrics: MetricsLog::new(&config.paths.metrics_file),
            clock: None,
            config,
        }
    }

    /// Evaluate trailing windows against `now` instead of the wall clock
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run all stages with `requested` workers (`None` for the configured
    /// default, values at or below zero run one worker).
    pub async fn run(&self, requested: Option<i64>) -> RunReport {
        let workers = self.config.resolve_workers(requested);
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let now = self.clock.unwrap_or(started_at);
        let started = Instant::now();

        let span = tracing::info_span!("pipeline_run", run_id = %run_id, workers);
        let stages = async {
            info!("Pipeline run started");
            let mut reports = Vec::with_capacity(StageKind::ALL.len());
            for kind in StageKind::ALL {
                reports.push(self.run_stage(kind, workers, now).await);
            }
            reports
        }
        .instrument(span.clone())
        .await;

        let elapsed = started.elapsed();
        self.record_metric(TOTAL_STAGE, workers, elapsed);

        let report = RunReport {
            run_id,
            workers,
            started_at,
            stages,
            duration_secs: elapsed.as_secs_f64(),
        };

        span.in_scope(|| {
            let failed = report.stages.iter().filter(|s| s.status == StageStatus::Failed).count();
            info!(
                duration_secs = report.duration_secs,
                failed_stages = failed,
                "Pipeline run finished"
            );
        });
        report
    }

    async fn run_stage(&self, kind: StageKind, workers: usize, now: DateTime<Utc>) -> StageReport {
        let span = tracing::info_span!("stage", stage = kind.name());
        let started = Instant::now();

        let result = self.execute_stage(kind, workers, now).instrument(span.clone()).await;
        let elapsed = started.elapsed();
        self.record_metric(kind.name(), workers, elapsed);

        span.in_scope(|| match result {
            Ok(outcome) => {
                let report = StageReport::from_outcome(kind, &outcome, elapsed.as_secs_f64());
                info!(
                    status = ?report.status,
                    chunks = report.chunks_received,
                    failed_chunks = report.chunks_failed,
                    rows = report.rows_extracted,
                    duration_secs = report.duration_secs,
                    "Stage finished"
                );
                report
            },
            Err(e) => {
                error!(error = %e, duration_secs = elapsed.as_secs_f64(), "Stage failed");
                StageReport::failed(kind, &e, elapsed.as_secs_f64())
            },
        })
    }

    async fn execute_stage(&self, kind: StageKind, workers: usize, now: DateTime<Utc>) -> Result<PoolOutcome> {
        let result = self.extract_and_persist(kind, workers, now).await;
        if let Err(e) = &result {
            if e.is_source_unavailable() {
                warn!(error = %e, "Source unavailable, making sure empty artifacts exist");
                self.ensure_artifacts(kind).await?;
            }
        }
        result
    }

    async fn extract_and_persist(&self, kind: StageKind, workers: usize, now: DateTime<Utc>) -> Result<PoolOutcome> {
        let transform = self.build_transform(kind, now).await?;
        let (extractor, marker_key) = self.build_extractor(kind)?;
        self.process(kind, workers, extractor, transform, marker_key).await
    }

    /// Pool run, then persist, then marker commit or archive. Nothing is
    /// written when extraction fails.
    async fn process(
        &self,
        kind: StageKind,
        workers: usize,
        extractor: Box<dyn SourceExtractor>,
        transform: Arc<dyn StageTransform>,
        marker_key: Option<MarkerKey>,
    ) -> Result<PoolOutcome> {
        let pool = WorkerPool::new(PoolConfig {
            workers,
            queue_capacity: self.config.queue_capacity(workers),
            result_timeout: self.config.aggregation_timeout(),
        });
        let mut outcome = pool.run(extractor, transform).await?;

        let results = std::mem::take(&mut outcome.results);
        let store = self.artifacts.clone();
        let specs = kind.artifacts();
        let results = tokio::task::spawn_blocking(move || persist(&store, specs, results))
            .await
            .map_err(PipelineError::from_join)??;
        outcome.results = results;

        if let (Some(key), Some(marker)) = (marker_key, outcome.extraction.pending_marker.as_ref()) {
            self.markers.commit(&key, marker)?;
            info!(marker = %key, cursor = %marker.cursor, "Marker advanced");
        }

        let consumed = std::mem::take(&mut outcome.extraction.pending_archive);
        if !consumed.is_empty() {
            let archive_dir = self.config.paths.archive_dir.clone();
            outcome.extraction.files_archived =
                tokio::task::spawn_blocking(move || archive_files(&archive_dir, &consumed))
                    .await
                    .map_err(PipelineError::from_join)?;
            info!(files = outcome.extraction.files_archived.len(), "Staging files archived");
        }

        Ok(outcome)
    }

    async fn build_transform(&self, kind: StageKind, now: DateTime<Utc>) -> Result<Arc<dyn StageTransform>> {
        let windows = &self.config.windows;
        let transform: Arc<dyn StageTransform> = match kind {
            StageKind::EventCount => {
                Arc::new(EventCountStage::new(now, Window::hours(windows.event_window_hours)))
            },
            StageKind::Revenue => Arc::new(RevenueStage::new()),
            StageKind::GenreViews => Arc::new(GenreViewsStage::new(
                self.load_genres().await?,
                now,
                Window::hours(windows.view_window_hours),
            )),
            StageKind::UnfinishedViews => Arc::new(UnfinishedViewsStage::new(self.load_genres().await?)),
        };
        Ok(transform)
    }

    /// Read the content dimension once for the stage; workers share it
    async fn load_genres(&self) -> Result<Arc<TabularStore>> {
        let db_path = self.config.paths.db_path.clone();
        let dimension = tokio::task::spawn_blocking(move || {
            let conn = open_source(&db_path)?;
            let content = read_table(&conn, CONTENT_TABLE)?;
            genre_dimension(&content)
        })
        .await
        .map_err(PipelineError::from_join)??;
        Ok(Arc::new(dimension))
    }

    fn build_extractor(&self, kind: StageKind) -> Result<(Box<dyn SourceExtractor>, Option<MarkerKey>)> {
        let paths = &self.config.paths;
        let chunk_size = self.config.processing.chunk_size;

        match kind.source() {
            SourceBinding::LogFiles => {
                let extractor = LogFileExtractor::new(&paths.staging_dir, &paths.log_extension, chunk_size);
                Ok((Box::new(extractor), None))
            },
            SourceBinding::Table { table, cursor } => {
                let key = MarkerKey::new(table, kind.name());
                let marker = self.markers.load(&key, cursor.kind())?;
                if let Some(m) = &marker {
                    info!(marker = %key, cursor = %m.cursor, "Resuming after marker");
                }
                let extractor =
                    TableExtractor::new(&paths.db_path, table, cursor, chunk_size).starting_after(marker);
                Ok((Box::new(extractor), Some(key)))
            },
        }
    }

    async fn ensure_artifacts(&self, kind: StageKind) -> Result<()> {
        let store = self.artifacts.clone();
        let created: Vec<PathBuf> = tokio::task::spawn_blocking(move || {
            let mut created = Vec::new();
            for spec in kind.artifacts() {
                if store.ensure_exists(spec)? {
                    created.push(store.path(spec));
                }
            }
            Ok::<_, PipelineError>(created)
        })
        .await
        .map_err(PipelineError::from_join)??;

        for path in created {
            info!(artifact = %path.display(), "Created empty artifact");
        }
        Ok(())
    }

    fn record_metric(&self, stage: &str, workers: usize, elapsed: std::time::Duration) {
        if let Err(e) = self.metrics.record(stage, workers, elapsed) {
            warn!(stage, error = %e, "Failed to append metrics row");
        }
    }
}

/// Fold this run's partials into every artifact of the stage and write them.
/// Hands the results back for reporting.
fn persist(
    store: &ArtifactStore,
    specs: &'static [ArtifactSpec],
    results: Vec<PartialResult>,
) -> Result<Vec<PartialResult>> {
    for (index, spec) in specs.iter().enumerate() {
        let delta = fold_results(spec, index, &results)?;
        let prior = store.read(spec)?;
        let merged = merge_with_prior(spec, &prior, &delta)?;
        store.write(spec, &merged)?;
        tracing::debug!(
            artifact = spec.file_name,
            new_keys = delta.len(),
            total_keys = merged.len(),
            "Artifact merged"
        );
    }
    Ok(results)
}
