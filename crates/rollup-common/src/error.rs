//! Error types for tabular operations

use thiserror::Error;

/// Result type alias for table operations
pub type Result<T> = std::result::Result<T, RollupError>;

/// Errors raised by [`crate::TabularStore`] operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RollupError {
    #[error("Column not found: '{0}'")]
    ColumnNotFound(String),

    #[error("Row index {index} is out of range for a table with {rows} rows")]
    RowOutOfBounds { index: usize, rows: usize },

    #[error("Row has {actual} values but the table has {expected} columns")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Columns must be defined before adding rows")]
    NoColumns,

    #[error("Column sets differ: left has [{left}], right has [{right}]")]
    ColumnSetMismatch { left: String, right: String },

    #[error("Column already exists: '{0}'")]
    DuplicateColumn(String),

    #[error("Value in column '{column}' is not numeric: {value}")]
    NotNumeric { column: String, value: String },
}

impl RollupError {
    /// Create a column-set mismatch error from two column lists
    pub fn column_set_mismatch(left: &[String], right: &[String]) -> Self {
        Self::ColumnSetMismatch {
            left: left.join(", "),
            right: right.join(", "),
        }
    }
}
