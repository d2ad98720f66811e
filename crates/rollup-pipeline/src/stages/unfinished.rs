//! Unfinished sessions per genre
//!
//! A session is every row of one `(user_id, content_id)` pair. It is
//! unfinished when it has a `play` or `pause` event and no `stop` event.
//! Rows without an event column count as `play`. Sessions are rebuilt within
//! a chunk; rows of one session split across chunks are judged separately.
//!
//! Each run adds its count to the all-time rollup. A `play` and its `stop`
//! that land in different chunks or different runs therefore both leave the
//! session counted as unfinished, so the rollup over-counts rather than
//! under-counts.

use super::genre::{CONTENT_KEY, GENRE};
use super::{count_keys, first_present, label, ArtifactSpec, StageTransform, UNFINISHED_ARTIFACTS};
use crate::error::Result;
use rollup_common::{TabularStore, Value};
use std::collections::HashMap;
use std::sync::Arc;

const USER_KEY: &str = "user_id";
const EVENT_COLUMNS: &[&str] = &["event", "event_type"];

#[derive(Debug)]
struct Session {
    genre: Value,
    started: bool,
    stopped: bool,
}

impl Session {
    fn observe(&mut self, event: &str) {
        match event {
            "play" | "pause" => self.started = true,
            "stop" => self.stopped = true,
            _ => {},
        }
    }

    fn unfinished(&self) -> bool {
        self.started && !self.stopped
    }
}

/// Counts unfinished `(user, content)` sessions per genre
#[derive(Debug, Clone)]
pub struct UnfinishedViewsStage {
    genres: Arc<TabularStore>,
}

impl UnfinishedViewsStage {
    pub fn new(genres: Arc<TabularStore>) -> Self {
        Self { genres }
    }
}

impl StageTransform for UnfinishedViewsStage {
    fn name(&self) -> &'static str {
        "unfinished_views"
    }

    fn artifacts(&self) -> &'static [ArtifactSpec] {
        UNFINISHED_ARTIFACTS
    }

    fn apply(&self, chunk: &TabularStore) -> Result<Vec<TabularStore>> {
        chunk.column(USER_KEY)?;
        let joined = chunk.merge(&self.genres, CONTENT_KEY)?;
        let event_col = first_present(&joined, EVENT_COLUMNS).ok();

        let mut order: Vec<(Value, Value)> = Vec::new();
        let mut sessions: HashMap<(Value, Value), Session> = HashMap::new();

        for row in joined.rows() {
            let key = (row.get(USER_KEY)?.clone(), row.get(CONTENT_KEY)?.clone());
            let event = match event_col {
                Some(col) => row.get(col)?.to_string().trim().to_lowercase(),
                None => "play".to_string(),
            };

            let genre = label(row.get(GENRE)?);
            let session = sessions.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Session {
                    genre,
                    started: false,
                    stopped: false,
                }
            });
            session.observe(&event);
        }

        let keys = order
            .iter()
            .filter_map(|key| sessions.get(key))
            .filter(|session| session.unfinished())
            .map(|session| session.genre.clone());

        Ok(vec![count_keys(&UNFINISHED_ARTIFACTS[0], keys)?])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stages::genre_dimension;

    fn stage() -> UnfinishedViewsStage {
        let content = TabularStore::from_rows(
            ["content_id", "content_genre"],
            vec![
                vec![Value::Int(1), "drama".into()],
                vec![Value::Int(2), "comedy".into()],
            ],
        )
        .unwrap();
        UnfinishedViewsStage::new(Arc::new(genre_dimension(&content).unwrap()))
    }

    fn events(rows: &[(i64, i64, &str)]) -> TabularStore {
        TabularStore::from_rows(
            ["user_id", "content_id", "event"],
            rows.iter()
                .map(|(u, c, e)| vec![Value::Int(*u), Value::Int(*c), Value::from(*e)])
                .collect(),
        )
        .unwrap()
    }

    fn unfinished(out: &[TabularStore], genre: &str) -> i64 {
        out[0]
            .rows()
            .find(|row| row.get("genre").unwrap() == &Value::from(genre))
            .map(|row| match row.get("unfinished_views").unwrap() {
                Value::Int(n) => *n,
                other => panic!("unexpected value {:?}", other),
            })
            .unwrap_or(0)
    }

    #[test]
    fn test_session_rules() {
        let out = stage()
            .apply(&events(&[
                (1, 1, "play"), // play only: unfinished
                (2, 1, "play"),
                (2, 1, "stop"), // play + stop: finished
                (3, 2, "pause"), // pause only: unfinished
                (4, 2, "pause"),
                (4, 2, "stop"), // pause + stop: finished
                (5, 2, "stop"), // stop only: not started
            ]))
            .unwrap();

        assert_eq!(unfinished(&out, "drama"), 1);
        assert_eq!(unfinished(&out, "comedy"), 1);
    }

    #[test]
    fn test_event_order_does_not_matter() {
        let out = stage().apply(&events(&[(1, 1, "stop"), (1, 1, "play")])).unwrap();
        assert_eq!(unfinished(&out, "drama"), 0);
    }

    #[test]
    fn test_missing_event_column_means_play() {
        let chunk = TabularStore::from_rows(
            ["view_id", "user_id", "content_id"],
            vec![
                vec![Value::Int(1), Value::Int(1), Value::Int(1)],
                vec![Value::Int(2), Value::Int(1), Value::Int(1)],
                vec![Value::Int(3), Value::Int(2), Value::Int(2)],
            ],
        )
        .unwrap();
        let out = stage().apply(&chunk).unwrap();
        assert_eq!(unfinished(&out, "drama"), 1);
        assert_eq!(unfinished(&out, "comedy"), 1);
    }
}
