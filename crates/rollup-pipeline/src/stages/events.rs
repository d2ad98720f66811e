//! Event counts over a trailing window

use super::{
    count_keys, first_present, label, parse_timestamp, ArtifactSpec, StageTransform, EVENT_ARTIFACTS,
};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use rollup_common::{TabularStore, Value};

const TIME_COLUMNS: &[&str] = &["time", "timestamp"];
const EVENT_COLUMNS: &[&str] = &["event", "event_type"];

/// Counts log events per type whose timestamp falls within `window` of `now`.
///
/// Rows with an unreadable timestamp are skipped.
#[derive(Debug, Clone)]
pub struct EventCountStage {
    cutoff: DateTime<Utc>,
}

impl EventCountStage {
    pub fn new(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            cutoff: now - window,
        }
    }

    fn spec(&self) -> &'static ArtifactSpec {
        &EVENT_ARTIFACTS[0]
    }
}

impl StageTransform for EventCountStage {
    fn name(&self) -> &'static str {
        "event_count"
    }

    fn artifacts(&self) -> &'static [ArtifactSpec] {
        EVENT_ARTIFACTS
    }

    fn apply(&self, chunk: &TabularStore) -> Result<Vec<TabularStore>> {
        let time_col = first_present(chunk, TIME_COLUMNS)?;
        let event_col = first_present(chunk, EVENT_COLUMNS)?;

        let mut keys: Vec<Value> = Vec::new();
        let mut unreadable = 0usize;
        for row in chunk.rows() {
            let Some(ts) = row.get(time_col)?.as_str().and_then(parse_timestamp) else {
                unreadable += 1;
                continue;
            };
            if ts >= self.cutoff {
                keys.push(label(row.get(event_col)?));
            }
        }

        if unreadable > 0 {
            tracing::warn!(rows = unreadable, column = time_col, "Skipped rows with unreadable timestamps");
        }

        Ok(vec![count_keys(self.spec(), keys)?])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn chunk(columns: [&str; 2], rows: &[(&str, &str)]) -> TabularStore {
        TabularStore::from_rows(
            columns,
            rows.iter()
                .map(|(ts, ev)| vec![Value::from(*ts), Value::from(*ev)])
                .collect(),
        )
        .unwrap()
    }

    fn count(store: &TabularStore, event: &str) -> Option<i64> {
        store.rows().find_map(|row| {
            (row.get("event_type").unwrap() == &Value::from(event)).then(|| {
                match row.get("count").unwrap() {
                    Value::Int(n) => *n,
                    other => panic!("unexpected count {:?}", other),
                }
            })
        })
    }

    #[test]
    fn test_counts_only_recent_events() {
        let stage = EventCountStage::new(now(), Duration::hours(1));
        let data = chunk(
            ["timestamp", "event_type"],
            &[
                ("2024-06-01T11:30:00Z", "play"),
                ("2024-06-01T11:59:59Z", "play"),
                ("2024-06-01T10:00:00Z", "play"),
                ("2024-06-01T11:00:00Z", "stop"),
            ],
        );

        let out = stage.apply(&data).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(count(&out[0], "play"), Some(2));
        assert_eq!(count(&out[0], "stop"), Some(1));
    }

    #[test]
    fn test_alternate_column_names() {
        let stage = EventCountStage::new(now(), Duration::hours(1));
        let data = chunk(["time", "event"], &[("2024-06-01T11:45:00Z", "pause"), ("garbage", "pause")]);
        let out = stage.apply(&data).unwrap();
        assert_eq!(count(&out[0], "pause"), Some(1));
    }

    #[test]
    fn test_missing_columns_fail_the_chunk() {
        let stage = EventCountStage::new(now(), Duration::hours(1));
        let data = chunk(["when", "what"], &[("2024-06-01T11:45:00Z", "play")]);
        assert!(stage.apply(&data).is_err());
        assert_eq!(stage.placeholder()[0].columns(), &["event_type", "count"]);
    }
}
