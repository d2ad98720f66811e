//! Stage transforms
//!
//! A stage turns one chunk into one partial table per artifact it maintains.
//! Every partial has the artifact's `[key, value]` schema and is already
//! grouped within the chunk; the aggregator folds partials across chunks and
//! with the previously persisted rollup. Transforms are pure: windows and the
//! reference clock are fixed when the stage is constructed.

pub mod events;
pub mod genre;
pub mod revenue;
pub mod unfinished;

pub use events::EventCountStage;
pub use genre::{genre_dimension, GenreViewsStage};
pub use revenue::RevenueStage;
pub use unfinished::UnfinishedViewsStage;

use crate::error::Result;
use crate::extract::CursorColumn;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rollup_common::{RollupError, TabularStore, Value};
use serde::Serialize;

/// How partial totals of an artifact are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FoldMode {
    /// Float accumulation truncated to an integer total
    Truncate,
    /// Float accumulation kept as is
    Exact,
}

/// A persisted two-column rollup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub file_name: &'static str,
    pub key_column: &'static str,
    pub value_column: &'static str,
    pub fold: FoldMode,
}

impl ArtifactSpec {
    /// Empty table with this artifact's schema
    pub fn empty(&self) -> Result<TabularStore> {
        Ok(TabularStore::new([self.key_column, self.value_column])?)
    }

    /// Sum values per key with this artifact's fold mode
    pub fn fold(&self, store: &TabularStore) -> Result<TabularStore> {
        let folded = match self.fold {
            FoldMode::Truncate => store.group_by_sum(self.key_column, self.value_column)?,
            FoldMode::Exact => store.group_by_sum_exact(self.key_column, self.value_column)?,
        };
        Ok(folded)
    }
}

pub const EVENT_ARTIFACTS: &[ArtifactSpec] = &[ArtifactSpec {
    file_name: "event_count_last_hour.csv",
    key_column: "event_type",
    value_column: "count",
    fold: FoldMode::Truncate,
}];

pub const REVENUE_ARTIFACTS: &[ArtifactSpec] = &[
    ArtifactSpec {
        file_name: "revenue_by_day.csv",
        key_column: "date",
        value_column: "revenue",
        fold: FoldMode::Exact,
    },
    ArtifactSpec {
        file_name: "revenue_by_month.csv",
        key_column: "month",
        value_column: "revenue",
        fold: FoldMode::Exact,
    },
    ArtifactSpec {
        file_name: "revenue_by_year.csv",
        key_column: "year",
        value_column: "revenue",
        fold: FoldMode::Exact,
    },
];

pub const GENRE_ARTIFACTS: &[ArtifactSpec] = &[ArtifactSpec {
    file_name: "genre_views_last_24h.csv",
    key_column: "genre",
    value_column: "views",
    fold: FoldMode::Truncate,
}];

pub const UNFINISHED_ARTIFACTS: &[ArtifactSpec] = &[ArtifactSpec {
    file_name: "unfinished_by_genre.csv",
    key_column: "genre",
    value_column: "unfinished_views",
    fold: FoldMode::Truncate,
}];

/// Pure per-chunk transform of one stage
pub trait StageTransform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Artifacts produced, in the order of [`StageTransform::apply`]'s output
    fn artifacts(&self) -> &'static [ArtifactSpec];

    fn apply(&self, chunk: &TabularStore) -> Result<Vec<TabularStore>>;

    /// Empty partials, substituted for a chunk whose transform failed
    fn placeholder(&self) -> Vec<TabularStore> {
        self.artifacts()
            .iter()
            .filter_map(|spec| spec.empty().ok())
            .collect()
    }
}

/// Where a stage reads its input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceBinding {
    LogFiles,
    Table {
        table: &'static str,
        cursor: CursorColumn,
    },
}

pub const REVENUE_TABLE: &str = "Revenue";
pub const VIEW_HISTORY_TABLE: &str = "ViewHistory";
pub const CONTENT_TABLE: &str = "Content";

/// The four stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    EventCount,
    Revenue,
    GenreViews,
    UnfinishedViews,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::EventCount,
        StageKind::Revenue,
        StageKind::GenreViews,
        StageKind::UnfinishedViews,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageKind::EventCount => "event_count",
            StageKind::Revenue => "revenue",
            StageKind::GenreViews => "genre_views",
            StageKind::UnfinishedViews => "unfinished_views",
        }
    }

    pub fn artifacts(self) -> &'static [ArtifactSpec] {
        match self {
            StageKind::EventCount => EVENT_ARTIFACTS,
            StageKind::Revenue => REVENUE_ARTIFACTS,
            StageKind::GenreViews => GENRE_ARTIFACTS,
            StageKind::UnfinishedViews => UNFINISHED_ARTIFACTS,
        }
    }

    pub fn source(self) -> SourceBinding {
        match self {
            StageKind::EventCount => SourceBinding::LogFiles,
            StageKind::Revenue => SourceBinding::Table {
                table: REVENUE_TABLE,
                cursor: CursorColumn::RowId,
            },
            StageKind::GenreViews | StageKind::UnfinishedViews => SourceBinding::Table {
                table: VIEW_HISTORY_TABLE,
                cursor: CursorColumn::Column("start_date".to_string()),
            },
        }
    }

    /// Whether the stage joins against the content dimension
    pub fn needs_content(self) -> bool {
        matches!(self, StageKind::GenreViews | StageKind::UnfinishedViews)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Every artifact of every stage
pub fn all_artifacts() -> impl Iterator<Item = &'static ArtifactSpec> {
    StageKind::ALL.into_iter().flat_map(|kind| kind.artifacts().iter())
}

/// Parse an event or view timestamp.
///
/// Accepts RFC 3339 (`Z` or an offset) and naive `YYYY-MM-DD[ T]HH:MM:SS[.f]`
/// or `YYYY-MM-DD`; naive values are local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// First of `candidates` present in `store`
pub(crate) fn first_present<'a>(store: &TabularStore, candidates: &[&'a str]) -> Result<&'a str> {
    candidates
        .iter()
        .copied()
        .find(|name| store.has_column(name))
        .ok_or_else(|| RollupError::ColumnNotFound(candidates.join("|")).into())
}

/// Group label of a cell; empty cells count under "unknown"
pub(crate) fn label(value: &Value) -> Value {
    match value {
        Value::Null => Value::from("unknown"),
        Value::Text(s) if s.trim().is_empty() => Value::from("unknown"),
        other => Value::Text(other.to_string()),
    }
}

/// Count occurrences of each key into an artifact-shaped partial
pub(crate) fn count_keys<I>(spec: &ArtifactSpec, keys: I) -> Result<TabularStore>
where
    I: IntoIterator<Item = Value>,
{
    let mut ones = spec.empty()?;
    for key in keys {
        ones.add_row(vec![key, Value::Int(1)])?;
    }
    spec.fold(&ones)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_formats() {
        let utc = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:30:00Z"), Some(utc));
        assert_eq!(parse_timestamp("2024-03-01T13:30:00+01:00"), Some(utc));

        let local = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap().with_timezone(&Utc);
        assert_eq!(parse_timestamp("2024-03-01 12:30:00"), Some(local));
        assert_eq!(parse_timestamp("2024-03-01T12:30:00.250").map(|t| t.timestamp()), Some(local.timestamp()));
        assert!(parse_timestamp("2024-03-01").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_stage_sources() {
        assert_eq!(StageKind::EventCount.source(), SourceBinding::LogFiles);
        assert!(matches!(
            StageKind::Revenue.source(),
            SourceBinding::Table { table: "Revenue", cursor: CursorColumn::RowId }
        ));
        assert!(StageKind::UnfinishedViews.needs_content());
        assert_eq!(all_artifacts().count(), 6);
    }

    #[test]
    fn test_count_keys_groups() {
        let counts = count_keys(
            &EVENT_ARTIFACTS[0],
            vec![Value::from("play"), Value::from("stop"), Value::from("play")],
        )
        .unwrap();
        assert_eq!(counts.columns(), &["event_type", "count"]);
        assert_eq!(counts.cell("count", 0).unwrap(), &Value::Int(2));
    }

    #[test]
    fn test_label_normalizes_keys() {
        assert_eq!(label(&Value::Null), Value::from("unknown"));
        assert_eq!(label(&Value::Int(2024)), Value::from("2024"));
        assert_eq!(label(&Value::from("drama")), Value::from("drama"));
    }
}
