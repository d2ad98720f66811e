//! Folding partial results into rollups

use crate::error::Result;
use crate::pool::PartialResult;
use crate::stages::{label, ArtifactSpec};
use rollup_common::{TabularStore, Value};

/// Fold one artifact's partials into a single table, one row per key.
///
/// `partials` are the tables in position `index` of each partial result.
/// No partials yields an empty table with the artifact's schema.
pub fn fold_partials<'a, I>(spec: &ArtifactSpec, partials: I) -> Result<TabularStore>
where
    I: IntoIterator<Item = &'a TabularStore>,
{
    let mut stacked = spec.empty()?;
    for partial in partials {
        stacked.vconcat(&normalize(spec, partial)?)?;
    }
    spec.fold(&stacked)
}

/// Fold the `index`-th output of every partial result
pub fn fold_results(spec: &ArtifactSpec, index: usize, results: &[PartialResult]) -> Result<TabularStore> {
    fold_partials(spec, results.iter().filter_map(|r| r.outputs.get(index)))
}

/// Combine the persisted rollup with this run's delta, sorted by key
pub fn merge_with_prior(spec: &ArtifactSpec, prior: &TabularStore, delta: &TabularStore) -> Result<TabularStore> {
    let merged = fold_partials(spec, [prior, delta])?;
    Ok(merged.sort(spec.key_column, false)?)
}

/// Restrict a table to the artifact's columns with text keys
fn normalize(spec: &ArtifactSpec, table: &TabularStore) -> Result<TabularStore> {
    let keys = table.column(spec.key_column)?;
    let values = table.column(spec.value_column)?;
    let rows = keys
        .iter()
        .zip(values)
        .map(|(key, value)| vec![key_text(key), value.clone()])
        .collect();
    Ok(TabularStore::from_rows([spec.key_column, spec.value_column], rows)?)
}

fn key_text(key: &Value) -> Value {
    match key {
        Value::Text(_) => key.clone(),
        other => label(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stages::{EVENT_ARTIFACTS, REVENUE_ARTIFACTS};

    fn counts(rows: &[(&str, i64)]) -> TabularStore {
        TabularStore::from_rows(
            ["event_type", "count"],
            rows.iter().map(|(k, v)| vec![Value::from(*k), Value::Int(*v)]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_fold_sums_per_key() {
        let spec = &EVENT_ARTIFACTS[0];
        let a = counts(&[("play", 3), ("stop", 1)]);
        let b = counts(&[("play", 2), ("pause", 4)]);

        let folded = fold_partials(spec, [&a, &b]).unwrap().sort("event_type", false).unwrap();
        assert_eq!(
            folded.column("event_type").unwrap(),
            &[Value::from("pause"), Value::from("play"), Value::from("stop")]
        );
        assert_eq!(folded.column("count").unwrap(), &[Value::Int(4), Value::Int(5), Value::Int(1)]);
    }

    #[test]
    fn test_no_partials_is_empty_artifact() {
        let folded = fold_partials(&EVENT_ARTIFACTS[0], std::iter::empty()).unwrap();
        assert_eq!(folded.columns(), &["event_type", "count"]);
        assert!(folded.is_empty());
    }

    #[test]
    fn test_merge_with_prior_adds_and_sorts() {
        let spec = &EVENT_ARTIFACTS[0];
        let prior = counts(&[("stop", 10), ("play", 1)]);
        let delta = counts(&[("play", 2)]);

        let merged = merge_with_prior(spec, &prior, &delta).unwrap();
        assert_eq!(merged.column("event_type").unwrap(), &[Value::from("play"), Value::from("stop")]);
        assert_eq!(merged.column("count").unwrap(), &[Value::Int(3), Value::Int(10)]);
    }

    #[test]
    fn test_numeric_keys_match_text_keys() {
        let spec = &REVENUE_ARTIFACTS[2];
        let prior = TabularStore::from_rows(["year", "revenue"], vec![vec![Value::from("2024"), Value::Float(10.0)]])
            .unwrap();
        let delta =
            TabularStore::from_rows(["year", "revenue"], vec![vec![Value::Int(2024), Value::Float(2.5)]]).unwrap();

        let merged = merge_with_prior(spec, &prior, &delta).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.cell("revenue", 0).unwrap(), &Value::Float(12.5));
    }

    #[test]
    fn test_fold_results_skips_missing_outputs() {
        let spec = &EVENT_ARTIFACTS[0];
        let results = vec![
            PartialResult {
                seq: 0,
                rows: 2,
                outputs: vec![counts(&[("play", 2)])],
                failed: false,
            },
            PartialResult {
                seq: 1,
                rows: 1,
                outputs: Vec::new(),
                failed: true,
            },
        ];
        let folded = fold_results(spec, 0, &results).unwrap();
        assert_eq!(folded.cell("count", 0).unwrap(), &Value::Int(2));
    }
}
