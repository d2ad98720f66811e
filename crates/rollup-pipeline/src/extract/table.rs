//! Relational table extraction
//!
//! Rows are read in keyset pages ordered by `(cursor, rowid)`. Each page starts
//! strictly after the last `(cursor, rowid)` pair of the previous page, so rows
//! sharing a cursor value across a page boundary are neither skipped nor read
//! twice. Rows whose cursor column is NULL are never returned.

use super::{ChunkSink, ExtractSummary, SourceExtractor};
use crate::checkpoint::{Cursor, CursorKind, Marker};
use crate::error::{PipelineError, Result};
use rollup_common::{TabularStore, Value};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Column that orders extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorColumn {
    /// SQLite's implicit rowid
    RowId,
    /// A sortable column such as an ISO-8601 timestamp
    Column(String),
}

impl CursorColumn {
    pub fn kind(&self) -> CursorKind {
        match self {
            CursorColumn::RowId => CursorKind::RowId,
            CursorColumn::Column(_) => CursorKind::Timestamp,
        }
    }
}

/// Open the relational source read-only.
///
/// Fails with [`PipelineError::SourceUnavailable`] when the database file is
/// missing or cannot be opened.
pub fn open_source(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(PipelineError::source_unavailable(format!(
            "database '{}' does not exist",
            path.display()
        )));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        PipelineError::source_unavailable(format!("cannot open '{}': {}", path.display(), e))
    })?;
    // Reading the schema surfaces "file is not a database" early
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .map_err(|e| {
            PipelineError::source_unavailable(format!("cannot read '{}': {}", path.display(), e))
        })?;
    Ok(conn)
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Read a whole table, e.g. a small dimension. A missing table is an empty
/// store without columns.
pub fn read_table(conn: &Connection, table: &str) -> Result<TabularStore> {
    if !table_exists(conn, table)? {
        warn!(table = table, "Table not found, using an empty table");
        return Ok(TabularStore::default());
    }

    let sql = format!("SELECT * FROM {}", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = names.len();
    let mut store = TabularStore::new(names)?;

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_value(row.get_ref(i)?));
        }
        store.add_row(values)?;
    }
    Ok(store)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        },
    }
}

/// Pages through rows of one table beyond a starting marker
#[derive(Debug, Clone)]
pub struct TableExtractor {
    db_path: PathBuf,
    table: String,
    cursor: CursorColumn,
    chunk_size: usize,
    start: Option<Marker>,
}

/// Position of the last row read
#[derive(Debug, Clone)]
struct Position {
    cursor: Value,
    rowid: i64,
}

impl TableExtractor {
    pub fn new(
        db_path: impl Into<PathBuf>,
        table: impl Into<String>,
        cursor: CursorColumn,
        chunk_size: usize,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            table: table.into(),
            cursor,
            chunk_size: chunk_size.max(1),
            start: None,
        }
    }

    /// Resume after `marker`; `None` reads from the beginning.
    pub fn starting_after(mut self, marker: Option<Marker>) -> Self {
        self.start = marker;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn start_position(&self) -> Option<Position> {
        let marker = self.start.as_ref()?;
        let position = match (&self.cursor, &marker.cursor) {
            (CursorColumn::RowId, Cursor::RowId(id)) => Position {
                cursor: Value::Int(*id),
                rowid: *id,
            },
            (CursorColumn::Column(_), Cursor::Timestamp(ts)) => Position {
                cursor: Value::Text(ts.clone()),
                // a cursor-only marker consumed every row at that cursor
                rowid: marker.rowid.unwrap_or(i64::MAX),
            },
            (CursorColumn::Column(_), Cursor::RowId(id)) => Position {
                cursor: Value::Int(*id),
                rowid: marker.rowid.unwrap_or(i64::MAX),
            },
            (CursorColumn::RowId, Cursor::Timestamp(ts)) => {
                warn!(table = %self.table, marker = %ts, "Ignoring timestamp marker on a rowid cursor");
                return None;
            },
        };
        Some(position)
    }

    fn page_sql(&self, resume: bool) -> String {
        let table = quote_ident(&self.table);
        match (&self.cursor, resume) {
            (CursorColumn::RowId, false) => {
                format!("SELECT rowid, * FROM {} ORDER BY rowid LIMIT ?1", table)
            },
            (CursorColumn::RowId, true) => format!(
                "SELECT rowid, * FROM {} WHERE rowid > ?2 ORDER BY rowid LIMIT ?3",
                table
            ),
            (CursorColumn::Column(col), false) => {
                let col = quote_ident(col);
                format!(
                    "SELECT rowid, * FROM {t} WHERE {c} IS NOT NULL ORDER BY {c}, rowid LIMIT ?1",
                    t = table,
                    c = col
                )
            },
            (CursorColumn::Column(col), true) => {
                let col = quote_ident(col);
                format!(
                    "SELECT rowid, * FROM {t} WHERE {c} IS NOT NULL \
                     AND ({c} > ?1 OR ({c} = ?1 AND rowid > ?2)) \
                     ORDER BY {c}, rowid LIMIT ?3",
                    t = table,
                    c = col
                )
            },
        }
    }

    /// Read one page after `after`, returning the rows and the position of the
    /// last one.
    fn read_page(
        &self,
        conn: &Connection,
        after: Option<&Position>,
    ) -> Result<(TabularStore, Option<Position>)> {
        let sql = self.page_sql(after.is_some());
        let mut stmt = conn.prepare_cached(&sql)?;

        let names: Vec<String> = stmt
            .column_names()
            .iter()
            .skip(1)
            .map(|c| c.to_string())
            .collect();
        let cursor_index = match &self.cursor {
            CursorColumn::RowId => None,
            CursorColumn::Column(col) => Some(
                names
                    .iter()
                    .position(|n| n == col)
                    .ok_or_else(|| rollup_common::RollupError::ColumnNotFound(col.clone()))?,
            ),
        };
        let width = names.len();
        let mut page = TabularStore::new(names)?;
        let limit = i64::try_from(self.chunk_size).unwrap_or(i64::MAX);

        let mut rows = match after {
            None => stmt.query(params![limit])?,
            Some(pos) => {
                let cursor = match &pos.cursor {
                    Value::Int(i) => rusqlite::types::Value::Integer(*i),
                    Value::Float(f) => rusqlite::types::Value::Real(*f),
                    Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
                    Value::Null => rusqlite::types::Value::Null,
                };
                stmt.query(params![cursor, pos.rowid, limit])?
            },
        };

        let mut last = None;
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(to_value(row.get_ref(i + 1)?));
            }
            let cursor = match cursor_index {
                Some(idx) => values[idx].clone(),
                None => Value::Int(rowid),
            };
            page.add_row(values)?;
            last = Some(Position { cursor, rowid });
        }

        Ok((page, last))
    }

    fn marker_for(&self, position: &Position) -> Marker {
        match &self.cursor {
            CursorColumn::RowId => Marker::row_id(position.rowid),
            CursorColumn::Column(_) => Marker::timestamp(position.cursor.to_string(), Some(position.rowid)),
        }
    }
}

impl SourceExtractor for TableExtractor {
    fn describe(&self) -> String {
        match &self.cursor {
            CursorColumn::RowId => format!("{} by rowid", self.table),
            CursorColumn::Column(col) => format!("{} by {}", self.table, col),
        }
    }

    fn extract(&self, sink: &mut dyn ChunkSink) -> Result<ExtractSummary> {
        let conn = open_source(&self.db_path)?;
        let mut summary = ExtractSummary::default();

        if !table_exists(&conn, &self.table)? {
            warn!(table = %self.table, "Source table not found, nothing to extract");
            return Ok(summary);
        }

        let mut position = self.start_position();
        debug!(
            table = %self.table,
            resume = position.is_some(),
            "Starting table extraction"
        );

        loop {
            let (page, last) = self.read_page(&conn, position.as_ref())?;
            let Some(last) = last else {
                break;
            };

            let rows = page.len();
            summary.rows += rows;
            summary.chunks += 1;
            sink.submit(&self.table, page)?;
            position = Some(last);

            if rows < self.chunk_size {
                break;
            }
        }

        // only advance when new rows were seen
        if summary.rows > 0 {
            summary.pending_marker = position.as_ref().map(|p| self.marker_for(p));
        }

        info!(
            table = %self.table,
            chunks = summary.chunks,
            rows = summary.rows,
            marker = ?summary.pending_marker.as_ref().map(|m| m.cursor.to_string()),
            "Table extracted"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn view_history(dir: &TempDir, start_dates: &[&str]) -> PathBuf {
        let path = dir.path().join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ViewHistory (
                view_id INTEGER PRIMARY KEY,
                start_date TEXT,
                user_id INTEGER,
                content_id INTEGER
            );",
        )
        .unwrap();
        for (i, date) in start_dates.iter().enumerate() {
            conn.execute(
                "INSERT INTO ViewHistory (start_date, user_id, content_id) VALUES (?1, ?2, 1)",
                params![date, i as i64],
            )
            .unwrap();
        }
        path
    }

    fn drain(extractor: &TableExtractor) -> (Vec<TabularStore>, ExtractSummary) {
        let mut chunks: Vec<TabularStore> = Vec::new();
        let summary = extractor.extract(&mut chunks).unwrap();
        (chunks, summary)
    }

    #[test]
    fn test_missing_database_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = open_source(&dir.path().join("nope.db")).unwrap_err();
        assert!(err.is_source_unavailable());
    }

    #[test]
    fn test_missing_table_yields_no_chunks() {
        let dir = TempDir::new().unwrap();
        let path = view_history(&dir, &[]);
        let extractor = TableExtractor::new(&path, "Revenue", CursorColumn::RowId, 10);
        let (chunks, summary) = drain(&extractor);
        assert!(chunks.is_empty());
        assert_eq!(summary.pending_marker, None);
    }

    #[test]
    fn test_ties_across_page_boundary_are_read_once() {
        let dir = TempDir::new().unwrap();
        let path = view_history(
            &dir,
            &["2024-01-01", "2024-01-02", "2024-01-02", "2024-01-02", "2024-01-03"],
        );
        let extractor = TableExtractor::new(
            &path,
            "ViewHistory",
            CursorColumn::Column("start_date".into()),
            2,
        );

        let (chunks, summary) = drain(&extractor);
        let users: Vec<Value> = chunks
            .iter()
            .flat_map(|c| c.column("user_id").unwrap().to_vec())
            .collect();
        assert_eq!(users, (0..5).map(Value::Int).collect::<Vec<_>>());
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.pending_marker, Some(Marker::timestamp("2024-01-03", Some(5))));
        assert!(!chunks[0].has_column("rowid"));
    }

    #[test]
    fn test_resume_after_tie_marker() {
        let dir = TempDir::new().unwrap();
        let path = view_history(&dir, &["2024-01-02", "2024-01-02", "2024-01-03"]);
        let extractor = TableExtractor::new(
            &path,
            "ViewHistory",
            CursorColumn::Column("start_date".into()),
            10,
        )
        .starting_after(Some(Marker::timestamp("2024-01-02", Some(1))));

        let (chunks, _) = drain(&extractor);
        assert_eq!(chunks[0].column("user_id").unwrap(), &[Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_null_cursor_rows_are_never_read() {
        let dir = TempDir::new().unwrap();
        let path = view_history(&dir, &["2024-01-01"]);
        let conn = Connection::open(&path).unwrap();
        conn.execute("INSERT INTO ViewHistory (start_date, user_id, content_id) VALUES (NULL, 9, 1)", [])
            .unwrap();

        let extractor = TableExtractor::new(
            &path,
            "ViewHistory",
            CursorColumn::Column("start_date".into()),
            10,
        );
        let (chunks, summary) = drain(&extractor);
        assert_eq!(summary.rows, 1);
        assert_eq!(chunks[0].cell("user_id", 0).unwrap(), &Value::Int(0));
    }

    #[test]
    fn test_read_table_loads_dimension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Content (content_id INTEGER PRIMARY KEY, content_genre TEXT);
             INSERT INTO Content VALUES (1, 'drama'), (2, 'comedy');",
        )
        .unwrap();

        let content = read_table(&conn, "Content").unwrap();
        assert_eq!(content.columns(), &["content_id", "content_genre"]);
        assert_eq!(content.len(), 2);
        assert_eq!(read_table(&conn, "Missing").unwrap().num_columns(), 0);
    }
}
