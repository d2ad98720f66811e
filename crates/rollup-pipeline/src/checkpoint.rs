//! Durable extraction cursors
//!
//! One marker file per (source, stage) pair, named `{source}.{stage}.marker`.
//! The first line holds the cursor value. An optional second line holds the
//! SQLite rowid of the last extracted row, used as a tie-break when several
//! rows share the cursor value.

use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

const MARKER_EXTENSION: &str = "marker";

/// How a marker's cursor line is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    RowId,
    Timestamp,
}

/// Last extracted position of a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Cursor {
    RowId(i64),
    Timestamp(String),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::RowId(id) => write!(f, "{}", id),
            Cursor::Timestamp(ts) => write!(f, "{}", ts),
        }
    }
}

/// Persisted high-water mark
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub cursor: Cursor,
    /// Rowid of the last row at `cursor`; `None` means every row at `cursor`
    /// has been consumed.
    pub rowid: Option<i64>,
}

impl Marker {
    pub fn row_id(id: i64) -> Self {
        Self {
            cursor: Cursor::RowId(id),
            rowid: None,
        }
    }

    pub fn timestamp(ts: impl Into<String>, rowid: Option<i64>) -> Self {
        Self {
            cursor: Cursor::Timestamp(ts.into()),
            rowid,
        }
    }

    fn encode(&self) -> String {
        match (&self.cursor, self.rowid) {
            (Cursor::Timestamp(ts), Some(rowid)) => format!("{}\n{}\n", ts, rowid),
            (cursor, _) => format!("{}\n", cursor),
        }
    }

    fn decode(path: &Path, raw: &str, kind: CursorKind) -> Result<Option<Self>> {
        let mut lines = raw.lines().map(str::trim).filter(|l| !l.is_empty());
        let Some(first) = lines.next() else {
            return Ok(None);
        };

        let marker = match kind {
            CursorKind::RowId => {
                let id = first.parse::<i64>().map_err(|e| {
                    PipelineError::invalid_marker(path, format!("rowid '{}': {}", first, e))
                })?;
                Marker::row_id(id)
            },
            CursorKind::Timestamp => {
                let rowid = lines
                    .next()
                    .map(|line| {
                        line.parse::<i64>().map_err(|e| {
                            PipelineError::invalid_marker(path, format!("tie-break '{}': {}", line, e))
                        })
                    })
                    .transpose()?;
                Marker::timestamp(first, rowid)
            },
        };

        Ok(Some(marker))
    }
}

/// Identifies the marker of one stage reading one source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerKey {
    pub source: String,
    pub stage: String,
}

impl MarkerKey {
    pub fn new(source: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stage: stage.into(),
        }
    }

    fn file_name(&self) -> String {
        format!("{}.{}.{}", self.source, self.stage, MARKER_EXTENSION)
    }
}

impl fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.stage)
    }
}

/// Directory of marker files
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &MarkerKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read the marker for `key`; a missing or empty file means no marker.
    pub fn load(&self, key: &MarkerKey, kind: CursorKind) -> Result<Option<Marker>> {
        let path = self.path(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Marker::decode(&path, &raw, kind),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::io(&path, e)),
        }
    }

    /// Atomically replace the marker for `key`.
    pub fn commit(&self, key: &MarkerKey, marker: &Marker) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;
        let path = self.path(key);

        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;
        tmp.write_all(marker.encode().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| PipelineError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| PipelineError::io(&path, e.error))?;

        tracing::debug!(marker = %key, cursor = %marker.cursor, "Marker committed");
        Ok(())
    }

    /// Remove every marker file. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::io(&self.dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| PipelineError::io(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == MARKER_EXTENSION) {
                std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
