//! Revenue per day, month and year

use super::{ArtifactSpec, StageTransform, REVENUE_ARTIFACTS};
use crate::error::Result;
use chrono::NaiveDate;
use rollup_common::{TabularStore, Value};

const DATE_COLUMN: &str = "date";
const VALUE_COLUMN: &str = "value";

/// Period formats, matching the order of [`REVENUE_ARTIFACTS`]
const PERIODS: [&str; 3] = ["%Y-%m-%d", "%Y-%m", "%Y"];

/// Buckets `Revenue(date, value)` rows into day, month and year totals.
///
/// Rows with an unreadable date or a non-numeric value are skipped.
#[derive(Debug, Clone, Default)]
pub struct RevenueStage;

impl RevenueStage {
    pub fn new() -> Self {
        Self
    }
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

impl StageTransform for RevenueStage {
    fn name(&self) -> &'static str {
        "revenue"
    }

    fn artifacts(&self) -> &'static [ArtifactSpec] {
        REVENUE_ARTIFACTS
    }

    fn apply(&self, chunk: &TabularStore) -> Result<Vec<TabularStore>> {
        let dates = chunk.column(DATE_COLUMN)?;
        let values = chunk.column(VALUE_COLUMN)?;

        let mut buckets = REVENUE_ARTIFACTS
            .iter()
            .map(ArtifactSpec::empty)
            .collect::<Result<Vec<_>>>()?;

        let mut skipped = 0usize;
        for (date, value) in dates.iter().zip(values) {
            let (Some(date), Some(amount)) = (parse_date(date), value.as_f64()) else {
                skipped += 1;
                continue;
            };
            for (bucket, period) in buckets.iter_mut().zip(PERIODS) {
                bucket.add_row(vec![
                    Value::Text(date.format(period).to_string()),
                    Value::Float(amount),
                ])?;
            }
        }

        if skipped > 0 {
            tracing::warn!(rows = skipped, "Skipped revenue rows with unreadable date or value");
        }

        buckets
            .iter()
            .zip(REVENUE_ARTIFACTS)
            .map(|(bucket, spec)| spec.fold(bucket))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn revenue(rows: &[(&str, Value)]) -> TabularStore {
        TabularStore::from_rows(
            ["revenue_id", "date", "value"],
            rows.iter()
                .enumerate()
                .map(|(i, (date, value))| vec![Value::Int(i as i64), Value::from(*date), value.clone()])
                .collect(),
        )
        .unwrap()
    }

    fn totals(store: &TabularStore, key: &str) -> Vec<(String, f64)> {
        store
            .rows()
            .map(|row| {
                (
                    row.get(key).unwrap().to_string(),
                    row.get("revenue").unwrap().as_f64().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_buckets_by_day_month_year() {
        let chunk = revenue(&[
            ("2024-01-01", Value::Float(10.0)),
            ("2024-01-02", Value::Float(5.0)),
            ("2024-02-01 08:15:00", Value::Float(7.0)),
        ]);

        let out = RevenueStage::new().apply(&chunk).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(
            totals(&out[0], "date"),
            vec![
                ("2024-01-01".to_string(), 10.0),
                ("2024-01-02".to_string(), 5.0),
                ("2024-02-01".to_string(), 7.0)
            ]
        );
        assert_eq!(
            totals(&out[1], "month"),
            vec![("2024-01".to_string(), 15.0), ("2024-02".to_string(), 7.0)]
        );
        assert_eq!(totals(&out[2], "year"), vec![("2024".to_string(), 22.0)]);
    }

    #[test]
    fn test_cents_are_not_truncated() {
        let chunk = revenue(&[("2024-01-01", Value::Float(2.5)), ("2024-01-01", Value::from("0.25"))]);
        let out = RevenueStage::new().apply(&chunk).unwrap();
        assert_eq!(out[0].cell("revenue", 0).unwrap(), &Value::Float(2.75));
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let chunk = revenue(&[
            ("not a date", Value::Float(1.0)),
            ("2024-01-01", Value::Null),
            ("2024-01-01", Value::Float(3.0)),
        ]);
        let out = RevenueStage::new().apply(&chunk).unwrap();
        assert_eq!(totals(&out[2], "year"), vec![("2024".to_string(), 3.0)]);
    }
}
