//! Artifact persistence
//!
//! Artifacts are two-column CSV files. Writes go through a temporary file in
//! the output directory that is renamed over the target, so readers see either
//! the previous or the new rollup.

use crate::error::{PipelineError, Result};
use crate::stages::{all_artifacts, ArtifactSpec};
use rollup_common::{RollupError, TabularStore, Value};
use std::path::{Path, PathBuf};

/// Directory holding every stage artifact
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, spec: &ArtifactSpec) -> PathBuf {
        self.dir.join(spec.file_name)
    }

    pub fn exists(&self, spec: &ArtifactSpec) -> bool {
        self.path(spec).is_file()
    }

    /// Read an artifact; a missing file is an empty rollup.
    ///
    /// Keys are read as text and values as numbers.
    pub fn read(&self, spec: &ArtifactSpec) -> Result<TabularStore> {
        let path = self.path(spec);
        let mut store = spec.empty()?;

        let mut reader = match csv::Reader::from_path(&path) {
            Ok(reader) => reader,
            Err(e) => match e.kind() {
                csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(store);
                },
                _ => return Err(PipelineError::csv(&path, e)),
            },
        };

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::csv(&path, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if header.is_empty() || header.iter().all(String::is_empty) {
            return Ok(store);
        }
        if header != [spec.key_column, spec.value_column] {
            return Err(PipelineError::malformed_header(
                &path,
                format!(
                    "expected [{},{}], found [{}]",
                    spec.key_column,
                    spec.value_column,
                    header.join(",")
                ),
            ));
        }

        for record in reader.records() {
            let record = record.map_err(|e| PipelineError::csv(&path, e))?;
            let key = record.get(0).unwrap_or_default();
            let raw = record.get(1).unwrap_or_default();
            let value = Value::infer(raw);
            if value.as_f64().is_none() {
                return Err(RollupError::NotNumeric {
                    column: spec.value_column.to_string(),
                    value: raw.to_string(),
                }
                .into());
            }
            store.add_row(vec![Value::Text(key.to_string()), value])?;
        }

        Ok(store)
    }

    /// Atomically replace an artifact, rows sorted by key
    pub fn write(&self, spec: &ArtifactSpec, store: &TabularStore) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;
        let path = self.path(spec);
        let sorted = store.sort(spec.key_column, false)?;
        let keys = sorted.column(spec.key_column)?;
        let values = sorted.column(spec.value_column)?;

        let tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file());
            writer
                .write_record([spec.key_column, spec.value_column])
                .map_err(|e| PipelineError::csv(tmp.path(), e))?;
            for (key, value) in keys.iter().zip(values) {
                writer
                    .write_record([key.to_string(), value.to_string()])
                    .map_err(|e| PipelineError::csv(tmp.path(), e))?;
            }
            writer.flush().map_err(|e| PipelineError::io(tmp.path(), e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| PipelineError::io(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| PipelineError::io(&path, e.error))?;

        tracing::debug!(artifact = spec.file_name, rows = sorted.len(), "Artifact written");
        Ok(())
    }

    /// Write an empty artifact unless one already exists. Returns whether a
    /// file was created.
    pub fn ensure_exists(&self, spec: &ArtifactSpec) -> Result<bool> {
        if self.exists(spec) {
            return Ok(false);
        }
        self.write(spec, &spec.empty()?)?;
        Ok(true)
    }

    /// Remove every known artifact file. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for spec in all_artifacts() {
            let path = self.path(spec);
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(PipelineError::io(&path, e)),
            }
        }
        Ok(removed)
    }
}
