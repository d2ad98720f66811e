//! Views per genre over a trailing window

use super::{count_keys, label, parse_timestamp, ArtifactSpec, StageTransform, GENRE_ARTIFACTS};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use rollup_common::{TabularStore, Value};
use std::sync::Arc;

pub(crate) const CONTENT_KEY: &str = "content_id";
const CONTENT_GENRE: &str = "content_genre";
pub(crate) const GENRE: &str = "genre";
const START_DATE: &str = "start_date";

/// Project the content dimension down to `[content_id, genre]`.
///
/// A dimension without columns (missing table) becomes an empty lookup.
pub fn genre_dimension(content: &TabularStore) -> Result<TabularStore> {
    let mut dimension = TabularStore::new([CONTENT_KEY, GENRE])?;
    if content.num_columns() == 0 {
        return Ok(dimension);
    }

    let ids = content.column(CONTENT_KEY)?;
    let genres = content.column(CONTENT_GENRE)?;
    for (id, genre) in ids.iter().zip(genres) {
        dimension.add_row(vec![id.clone(), genre.clone()])?;
    }
    Ok(dimension)
}

/// Counts view-history rows started within `window` of `now`, per genre.
///
/// Views of content missing from the dimension are dropped by the join.
#[derive(Debug, Clone)]
pub struct GenreViewsStage {
    genres: Arc<TabularStore>,
    cutoff: DateTime<Utc>,
}

impl GenreViewsStage {
    pub fn new(genres: Arc<TabularStore>, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            genres,
            cutoff: now - window,
        }
    }
}

impl StageTransform for GenreViewsStage {
    fn name(&self) -> &'static str {
        "genre_views"
    }

    fn artifacts(&self) -> &'static [ArtifactSpec] {
        GENRE_ARTIFACTS
    }

    fn apply(&self, chunk: &TabularStore) -> Result<Vec<TabularStore>> {
        // surface a missing column instead of filtering everything away
        chunk.column(START_DATE)?;

        let recent = chunk.filter(|row| {
            row.get(START_DATE)
                .ok()
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
                .is_some_and(|ts| ts >= self.cutoff)
        });

        let joined = recent.merge(&self.genres, CONTENT_KEY)?;
        let keys = joined.column(GENRE)?.iter().map(label);
        Ok(vec![count_keys(&GENRE_ARTIFACTS[0], keys)?])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn content() -> Arc<TabularStore> {
        let content = TabularStore::from_rows(
            ["content_id", "content_title", "content_genre"],
            vec![
                vec![Value::Int(1), "Up".into(), "animation".into()],
                vec![Value::Int(2), "Heat".into(), "crime".into()],
            ],
        )
        .unwrap();
        Arc::new(genre_dimension(&content).unwrap())
    }

    #[test]
    fn test_dimension_projection() {
        let dim = content();
        assert_eq!(dim.columns(), &["content_id", "genre"]);
        assert_eq!(dim.len(), 2);
        assert_eq!(genre_dimension(&TabularStore::default()).unwrap().len(), 0);
    }

    #[test]
    fn test_counts_recent_views_per_genre() {
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
        let stage = GenreViewsStage::new(content(), now, Duration::hours(24));
        let chunk = TabularStore::from_rows(
            ["view_id", "start_date", "user_id", "content_id"],
            vec![
                vec![Value::Int(1), "2024-06-01T10:00:00Z".into(), Value::Int(7), Value::Int(1)],
                vec![Value::Int(2), "2024-06-01T11:00:00Z".into(), Value::Int(8), Value::Int(1)],
                vec![Value::Int(3), "2024-06-01T12:00:00Z".into(), Value::Int(9), Value::Int(2)],
                vec![Value::Int(4), "2024-05-20T12:00:00Z".into(), Value::Int(9), Value::Int(2)],
                vec![Value::Int(5), "2024-06-01T12:00:00Z".into(), Value::Int(9), Value::Int(99)],
            ],
        )
        .unwrap();

        let out = stage.apply(&chunk).unwrap();
        let views = out[0].sort("genre", false).unwrap();
        assert_eq!(views.column("genre").unwrap(), &[Value::from("animation"), Value::from("crime")]);
        assert_eq!(views.column("views").unwrap(), &[Value::Int(2), Value::Int(1)]);
    }
}
