//! Rollup Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the rollup workspace.
//!
//! # Overview
//!
//! - **Tables**: the in-memory columnar [`TabularStore`] every stage works on
//! - **Error Handling**: table error type and result alias
//! - **Logging**: centralized tracing setup shared by every binary
//!
//! # Example
//!
//! ```
//! use rollup_common::{TabularStore, Value};
//!
//! # fn main() -> rollup_common::Result<()> {
//! let mut views = TabularStore::new(["genre", "views"])?;
//! views.add_row(vec![Value::from("drama"), Value::Int(3)])?;
//! views.add_row(vec![Value::from("drama"), Value::Int(2)])?;
//!
//! let totals = views.group_by_sum("genre", "views")?;
//! assert_eq!(totals.cell("views", 0)?, &Value::Int(5));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod logging;
pub mod table;

// Re-export commonly used types
pub use error::{Result, RollupError};
pub use table::{RowView, TabularStore, Value};
