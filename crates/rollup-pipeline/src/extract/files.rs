//! Flat log file extraction
//!
//! Staging files are header-plus-rows CSV files. The first readable header of
//! a run fixes the expected schema; later files with a different header are
//! skipped and left in place. A file is read completely into `chunk_size`
//! batches before any of them is submitted, so a file that fails to parse
//! halfway contributes nothing and stays in staging.
//!
//! The extractor never moves files itself. Fully submitted files are listed in
//! [`ExtractSummary::pending_archive`] and the orchestrator moves them with
//! [`archive_files`] once the stage's artifacts are written. A crash in
//! between makes the next run read them again, so consumers of this path get
//! at-least-once delivery.

use super::{ChunkSink, ExtractSummary, SourceExtractor};
use crate::error::{PipelineError, Result};
use rollup_common::{TabularStore, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reads new staging files in name order
#[derive(Debug, Clone)]
pub struct LogFileExtractor {
    staging_dir: PathBuf,
    extension: String,
    chunk_size: usize,
}

/// A staging file parsed into batches, not yet submitted
#[derive(Debug)]
struct LoadedFile {
    header: Vec<String>,
    batches: Vec<TabularStore>,
    rows: usize,
    dropped: usize,
}

impl LogFileExtractor {
    pub fn new(staging_dir: impl Into<PathBuf>, extension: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            extension: extension.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Staging files waiting to be read, in name order
    pub fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.staging_dir.display(), "Staging directory missing");
                return Ok(Vec::new());
            },
            Err(e) => return Err(PipelineError::io(&self.staging_dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(&self.staging_dir, e))?;
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && path.extension().is_some_and(|ext| ext == self.extension.as_str()) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse a whole file. Any error means the file is unusable this run.
    fn load_file(&self, path: &Path, expected: Option<&[String]>) -> Result<LoadedFile> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| PipelineError::csv(path, e))?;

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::csv(path, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if header.iter().all(String::is_empty) {
            return Err(PipelineError::malformed_header(path, "no header line"));
        }
        if let Some(schema) = expected {
            if schema != header.as_slice() {
                return Err(PipelineError::malformed_header(
                    path,
                    format!("expected [{}], found [{}]", schema.join(","), header.join(",")),
                ));
            }
        }

        let template = TabularStore::new(header.iter().cloned())
            .map_err(|e| PipelineError::malformed_header(path, e.to_string()))?;
        let width = template.num_columns();
        let mut batch = template.empty_like();
        let mut loaded = LoadedFile {
            header,
            batches: Vec::new(),
            rows: 0,
            dropped: 0,
        };

        for record in reader.records() {
            let record = record.map_err(|e| PipelineError::csv(path, e))?;
            if record.len() != width {
                loaded.dropped += 1;
                continue;
            }

            batch.add_row(record.iter().map(Value::infer).collect())?;
            if batch.len() >= self.chunk_size {
                let full = std::mem::replace(&mut batch, template.empty_like());
                loaded.rows += full.len();
                loaded.batches.push(full);
            }
        }

        if !batch.is_empty() {
            loaded.rows += batch.len();
            loaded.batches.push(batch);
        }
        Ok(loaded)
    }
}

impl SourceExtractor for LogFileExtractor {
    fn describe(&self) -> String {
        format!("{}/*.{}", self.staging_dir.display(), self.extension)
    }

    fn extract(&self, sink: &mut dyn ChunkSink) -> Result<ExtractSummary> {
        let files = self.pending_files()?;
        let mut summary = ExtractSummary::default();
        let mut expected: Option<Vec<String>> = None;

        if files.is_empty() {
            info!(dir = %self.staging_dir.display(), "No staging files to process");
            return Ok(summary);
        }

        for path in files {
            let loaded = match self.load_file(&path, expected.as_deref()) {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping staging file");
                    summary.files_skipped.push(path);
                    continue;
                },
            };

            if loaded.dropped > 0 {
                warn!(
                    file = %path.display(),
                    dropped = loaded.dropped,
                    "Dropped rows with the wrong number of fields"
                );
            }
            if expected.is_none() {
                expected = Some(loaded.header);
            }

            let origin = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            for batch in loaded.batches {
                sink.submit(&origin, batch)?;
                summary.chunks += 1;
            }
            summary.rows += loaded.rows;
            debug!(file = %path.display(), rows = loaded.rows, "File submitted");
            summary.pending_archive.push(path);
        }

        info!(
            files = summary.pending_archive.len(),
            skipped = summary.files_skipped.len(),
            chunks = summary.chunks,
            rows = summary.rows,
            "Staging files extracted"
        );
        Ok(summary)
    }
}

/// Move consumed staging files into `archive_dir`.
///
/// Returns the new locations. A file that cannot be moved is logged and left
/// in staging, where the next run reads it again.
pub fn archive_files(archive_dir: &Path, files: &[PathBuf]) -> Vec<PathBuf> {
    let mut archived = Vec::with_capacity(files.len());
    for path in files {
        match archive_one(archive_dir, path) {
            Ok(target) => {
                debug!(file = %path.display(), target = %target.display(), "File archived");
                archived.push(target);
            },
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Archiving failed, file will be read again");
            },
        }
    }
    archived
}

fn archive_one(archive_dir: &Path, path: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(archive_dir).map_err(|e| PipelineError::io(archive_dir, e))?;
    let name = path
        .file_name()
        .ok_or_else(|| PipelineError::io(path, std::io::ErrorKind::InvalidInput.into()))?;
    let target = archive_dir.join(name);
    std::fs::rename(path, &target).map_err(|e| PipelineError::io(path, e))?;
    Ok(target)
}
