//! In-memory columnar table
//!
//! [`TabularStore`] holds an ordered list of unique column names and one value
//! sequence per column. Every column always has the same length, which is the
//! row count of the store.
//!
//! Only [`TabularStore::add_row`], [`TabularStore::vconcat`] and
//! [`TabularStore::rename_column`] mutate a store. Joins, filters, grouping and
//! sorting return new stores.

mod value;

pub use value::Value;

use crate::error::{Result, RollupError};
use std::collections::HashMap;

/// Ordered, named columns of [`Value`]s with a shared row count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularStore {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
    index: HashMap<String, usize>,
    rows: usize,
}

/// Borrowed view of a single row, handed to filter predicates.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    store: &'a TabularStore,
    row: usize,
}

impl<'a> RowView<'a> {
    /// Value of `column` in this row.
    pub fn get(&self, column: &str) -> Result<&'a Value> {
        self.store.cell(column, self.row)
    }

    pub fn index(&self) -> usize {
        self.row
    }
}

impl TabularStore {
    /// Create an empty store with the given columns.
    ///
    /// Fails with [`RollupError::DuplicateColumn`] if a name repeats.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = Self::default();
        for name in columns {
            let name = name.into();
            if store.index.contains_key(&name) {
                return Err(RollupError::DuplicateColumn(name));
            }
            store.index.insert(name.clone(), store.columns.len());
            store.columns.push(name);
            store.data.push(Vec::new());
        }
        Ok(store)
    }

    /// Build a store from row-major data.
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = Self::new(columns)?;
        for row in rows {
            store.add_row(row)?;
        }
        Ok(store)
    }

    /// Empty store sharing this store's columns.
    pub fn empty_like(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            data: vec![Vec::new(); self.columns.len()],
            index: self.index.clone(),
            rows: 0,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.columns.len())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| RollupError::ColumnNotFound(name.to_string()))
    }

    /// All values of a column.
    pub fn column(&self, name: &str) -> Result<&[Value]> {
        let pos = self.position(name)?;
        Ok(&self.data[pos])
    }

    /// A single cell.
    pub fn cell(&self, column: &str, row: usize) -> Result<&Value> {
        let values = self.column(column)?;
        values.get(row).ok_or(RollupError::RowOutOfBounds {
            index: row,
            rows: self.rows,
        })
    }

    /// A full row in column order.
    pub fn row(&self, row: usize) -> Result<Vec<&Value>> {
        if row >= self.rows {
            return Err(RollupError::RowOutOfBounds {
                index: row,
                rows: self.rows,
            });
        }
        Ok(self.data.iter().map(|col| &col[row]).collect())
    }

    /// Iterate over row views.
    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        (0..self.rows).map(move |row| RowView { store: self, row })
    }

    /// Append one row. The number of values must match the column count.
    pub fn add_row(&mut self, values: Vec<Value>) -> Result<()> {
        if self.columns.is_empty() {
            return Err(RollupError::NoColumns);
        }
        if values.len() != self.columns.len() {
            return Err(RollupError::ShapeMismatch {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        for (column, value) in self.data.iter_mut().zip(values) {
            column.push(value);
        }
        self.rows += 1;
        Ok(())
    }

    /// Inner hash join on `on`.
    ///
    /// Output columns are this store's columns followed by `other`'s columns
    /// except `on`. A left row produces one output row per matching right row
    /// and nothing when unmatched. Overlapping column names are rejected with
    /// [`RollupError::DuplicateColumn`]; rename before merging.
    pub fn merge(&self, other: &TabularStore, on: &str) -> Result<TabularStore> {
        let left_key = self.column(on)?;
        let right_key = other.column(on)?;

        let right_columns: Vec<usize> = other
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| name.as_str() != on)
            .map(|(pos, _)| pos)
            .collect();

        let mut out = TabularStore::new(
            self.columns
                .iter()
                .chain(right_columns.iter().map(|&pos| &other.columns[pos]))
                .cloned(),
        )?;

        let mut lookup: HashMap<&Value, Vec<usize>> = HashMap::with_capacity(other.rows);
        for (j, key) in right_key.iter().enumerate() {
            lookup.entry(key).or_default().push(j);
        }

        for (i, key) in left_key.iter().enumerate() {
            let Some(matches) = lookup.get(key) else {
                continue;
            };
            for &j in matches {
                let mut row: Vec<Value> = self.data.iter().map(|col| col[i].clone()).collect();
                row.extend(right_columns.iter().map(|&pos| other.data[pos][j].clone()));
                out.add_row(row)?;
            }
        }

        Ok(out)
    }

    /// Append the rows of `other`. Both stores must have the same set of
    /// column names; order may differ.
    pub fn vconcat(&mut self, other: &TabularStore) -> Result<()> {
        let same_set = self.columns.len() == other.columns.len()
            && self.columns.iter().all(|c| other.index.contains_key(c));
        if !same_set {
            return Err(RollupError::column_set_mismatch(&self.columns, &other.columns));
        }

        for (pos, name) in self.columns.iter().enumerate() {
            let source = other.column(name)?;
            self.data[pos].extend_from_slice(source);
        }
        self.rows += other.rows;
        Ok(())
    }

    /// Rows for which `predicate` holds, column order preserved.
    pub fn filter<F>(&self, mut predicate: F) -> TabularStore
    where
        F: FnMut(RowView<'_>) -> bool,
    {
        let keep: Vec<usize> = self
            .rows()
            .filter(|row| predicate(*row))
            .map(|row| row.row)
            .collect();
        self.select_rows(&keep)
    }

    /// Sum `sum_col` per distinct `group_col` value, truncating each total
    /// toward zero. Keys keep first-seen order.
    pub fn group_by_sum(&self, group_col: &str, sum_col: &str) -> Result<TabularStore> {
        let totals = self.fold_sums(group_col, sum_col)?;
        let rows = totals
            .into_iter()
            .map(|(key, total)| vec![key, Value::Int(total.trunc() as i64)])
            .collect();
        TabularStore::from_rows([group_col, sum_col], rows)
    }

    /// Like [`Self::group_by_sum`] but keeps floating totals.
    pub fn group_by_sum_exact(&self, group_col: &str, sum_col: &str) -> Result<TabularStore> {
        let totals = self.fold_sums(group_col, sum_col)?;
        let rows = totals
            .into_iter()
            .map(|(key, total)| vec![key, Value::Float(total)])
            .collect();
        TabularStore::from_rows([group_col, sum_col], rows)
    }

    fn fold_sums(&self, group_col: &str, sum_col: &str) -> Result<Vec<(Value, f64)>> {
        let keys = self.column(group_col)?;
        let values = self.column(sum_col)?;

        let mut order: Vec<(Value, f64)> = Vec::new();
        let mut seen: HashMap<&Value, usize> = HashMap::new();

        for (key, value) in keys.iter().zip(values) {
            let amount = value.as_f64().ok_or_else(|| RollupError::NotNumeric {
                column: sum_col.to_string(),
                value: value.to_string(),
            })?;
            match seen.get(key) {
                Some(&slot) => order[slot].1 += amount,
                None => {
                    seen.insert(key, order.len());
                    order.push((key.clone(), amount));
                },
            }
        }

        Ok(order)
    }

    /// Rename a column in place, keeping its position and data.
    pub fn rename_column(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let pos = self.position(old_name)?;
        if self.index.contains_key(new_name) {
            return Err(RollupError::DuplicateColumn(new_name.to_string()));
        }
        self.index.remove(old_name);
        self.index.insert(new_name.to_string(), pos);
        self.columns[pos] = new_name.to_string();
        Ok(())
    }

    /// Stable full sort on one column.
    pub fn sort(&self, column: &str, descending: bool) -> Result<TabularStore> {
        let keys = self.column(column)?;
        let mut order: Vec<usize> = (0..self.rows).collect();
        order.sort_by(|&a, &b| {
            let ord = keys[a].total_cmp(&keys[b]);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(self.select_rows(&order))
    }

    fn select_rows(&self, rows: &[usize]) -> TabularStore {
        let mut out = self.empty_like();
        for (pos, column) in self.data.iter().enumerate() {
            out.data[pos] = rows.iter().map(|&r| column[r].clone()).collect();
        }
        out.rows = rows.len();
        out
    }
}
