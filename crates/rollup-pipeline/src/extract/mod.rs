//! Incremental source extraction
//!
//! Extractors read only data not consumed by a previous run and hand it to a
//! [`ChunkSink`] in tables of at most `chunk_size` rows. They never persist
//! progress themselves: a table extractor reports the pending high-water
//! [`Marker`] and the file extractor the files it consumed, both in its
//! [`ExtractSummary`]. The orchestrator commits the marker or archives the
//! files once the stage's artifacts are on disk.

pub mod files;
pub mod table;

pub use files::{archive_files, LogFileExtractor};
pub use table::{CursorColumn, TableExtractor};

use crate::checkpoint::Marker;
use crate::error::Result;
use rollup_common::TabularStore;
use serde::Serialize;
use std::path::PathBuf;

/// Bounded unit of work handed to one worker invocation
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Submission order within the stage run, starting at 0
    pub seq: usize,
    /// File name or table the rows came from
    pub origin: String,
    pub table: TabularStore,
}

/// Receiver of extracted chunks.
///
/// The pool's implementation blocks while the work queue is full.
pub trait ChunkSink {
    fn submit(&mut self, origin: &str, table: TabularStore) -> Result<()>;
}

/// Collects tables in memory.
impl ChunkSink for Vec<TabularStore> {
    fn submit(&mut self, _origin: &str, table: TabularStore) -> Result<()> {
        self.push(table);
        Ok(())
    }
}

/// What one extraction call produced
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractSummary {
    pub chunks: usize,
    pub rows: usize,
    /// Marker to commit once the stage is persisted; `None` leaves it unchanged
    pub pending_marker: Option<Marker>,
    /// Fully submitted staging files to archive once the stage is persisted
    pub pending_archive: Vec<PathBuf>,
    /// Filled by the orchestrator after archiving
    pub files_archived: Vec<PathBuf>,
    pub files_skipped: Vec<PathBuf>,
}

/// A source that streams unconsumed rows into a [`ChunkSink`].
///
/// Implementations do blocking I/O and are driven from the blocking pool.
pub trait SourceExtractor: Send {
    /// Short label for logs
    fn describe(&self) -> String;

    fn extract(&self, sink: &mut dyn ChunkSink) -> Result<ExtractSummary>;
}
