//! Error types for the rollup pipeline

use rollup_common::RollupError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures raised while extracting, transforming or persisting a stage
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Table operation failed inside a transform or fold
    #[error(transparent)]
    Table(#[from] RollupError),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A staging file or artifact does not carry the expected header
    #[error("Malformed header in '{}': {reason}", path.display())]
    MalformedHeader { path: PathBuf, reason: String },

    /// A marker file could not be parsed
    #[error("Invalid marker '{}': {reason}", path.display())]
    InvalidMarker { path: PathBuf, reason: String },

    /// The relational source cannot be opened at all
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Every worker has gone away while chunks were still being submitted
    #[error("Work queue closed before extraction finished")]
    QueueClosed,

    /// A blocking task panicked or was cancelled
    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn csv(path: impl AsRef<Path>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn malformed_header(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::MalformedHeader {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn invalid_marker(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::InvalidMarker {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Convert a failed `spawn_blocking` join into an error
    pub fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            Self::TaskFailed(format!("blocking task panicked: {}", err))
        } else {
            Self::TaskFailed(format!("blocking task cancelled: {}", err))
        }
    }

    /// Whether this error means the relational source could not be reached
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_))
    }
}
