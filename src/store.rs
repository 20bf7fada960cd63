//! Thin query layer over the SQLite backing store.
//!
//! Rule SQL scopes itself to a chunk through the named parameters `:low`
//! (inclusive) and `:high` (exclusive). Statements run without a window get
//! the full `i64` range bound instead.

use crate::error::{RepairError, Result};
use crate::scanner::ChunkWindow;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Statement};

/// Placeholder replaced by a `?, ?, …` list in id-batch statements
pub const IDS_PLACEHOLDER: &str = "{ids}";

/// One fetched row, values in query column order
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRow {
    values: Vec<Value>,
}

impl FetchedRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Integer column; NULL reads as 0, the schema's "no reference" value
    pub fn int(&self, column: usize) -> Result<i64> {
        match self.values.get(column) {
            Some(Value::Integer(v)) => Ok(*v),
            Some(Value::Null) => Ok(0),
            Some(other) => Err(RepairError::RowValue {
                column,
                reason: format!("expected integer, found {:?}", other.data_type()),
            }),
            None => Err(RepairError::RowValue {
                column,
                reason: format!("out of range for a {}-column row", self.values.len()),
            }),
        }
    }

    pub fn text(&self, column: usize) -> Result<String> {
        match self.values.get(column) {
            Some(Value::Text(v)) => Ok(v.clone()),
            Some(Value::Null) => Ok(String::new()),
            Some(Value::Integer(v)) => Ok(v.to_string()),
            Some(other) => Err(RepairError::RowValue {
                column,
                reason: format!("expected text, found {:?}", other.data_type()),
            }),
            None => Err(RepairError::RowValue {
                column,
                reason: format!("out of range for a {}-column row", self.values.len()),
            }),
        }
    }

    /// Lossy rendering used for diagnostics
    pub fn display(&self, column: usize) -> String {
        match self.values.get(column) {
            Some(Value::Integer(v)) => v.to_string(),
            Some(Value::Real(v)) => v.to_string(),
            Some(Value::Text(v)) => v.clone(),
            Some(Value::Blob(v)) => format!("<{} bytes>", v.len()),
            Some(Value::Null) | None => String::new(),
        }
    }
}

/// Declared column names of a rule's query
#[derive(Debug, Clone, Copy)]
pub struct RowShape<'a> {
    pub rule: &'a str,
    pub columns: &'a [&'a str],
}

impl RowShape<'_> {
    fn check(&self, stmt: &Statement<'_>) -> Result<()> {
        let found = stmt.column_names();
        if found.len() == self.columns.len()
            && found
                .iter()
                .zip(self.columns)
                .all(|(f, e)| f.eq_ignore_ascii_case(e))
        {
            return Ok(());
        }
        Err(RepairError::QueryShape {
            rule: self.rule.to_string(),
            expected: self.columns.iter().map(|c| c.to_string()).collect(),
            found: found.into_iter().map(str::to_string).collect(),
        })
    }
}

/// Bind `:low` / `:high` if the statement declares them
pub fn bind_window(stmt: &mut Statement<'_>, window: Option<ChunkWindow>) -> Result<()> {
    let (low, high) = window.map_or((i64::MIN, i64::MAX), |w| (w.low, w.high));
    if let Some(index) = stmt.parameter_index(":low")? {
        stmt.raw_bind_parameter(index, low)?;
    }
    if let Some(index) = stmt.parameter_index(":high")? {
        stmt.raw_bind_parameter(index, high)?;
    }
    Ok(())
}

/// First column of the first row; no row or NULL reads as 0
pub fn query_scalar(conn: &Connection, sql: &str, window: Option<ChunkWindow>) -> Result<i64> {
    let mut stmt = conn.prepare(sql)?;
    bind_window(&mut stmt, window)?;
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => Ok(row.get::<_, Option<i64>>(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

/// Run a row-set query and validate it against the declared shape
pub fn query_rows(
    conn: &Connection,
    sql: &str,
    window: Option<ChunkWindow>,
    shape: RowShape<'_>,
) -> Result<Vec<FetchedRow>> {
    let mut stmt = conn.prepare(sql)?;
    shape.check(&stmt)?;
    bind_window(&mut stmt, window)?;

    let width = stmt.column_count();
    let mut rows = stmt.raw_query();
    let mut fetched = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for column in 0..width {
            values.push(row.get::<_, Value>(column)?);
        }
        fetched.push(FetchedRow::new(values));
    }
    Ok(fetched)
}

/// Execute a statement scoped to an optional window; returns changed rows
pub fn execute_scoped(conn: &Connection, sql: &str, window: Option<ChunkWindow>) -> Result<usize> {
    let mut stmt = conn.prepare(sql)?;
    bind_window(&mut stmt, window)?;
    Ok(stmt.raw_execute()?)
}

/// `?, ?, ?` for `count` parameters
pub fn id_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Run `template` once per batch of ids, with `{ids}` expanded to the batch.
/// Returns `(statements, changed rows)`.
pub fn execute_for_ids(
    conn: &Connection,
    template: &str,
    ids: &[i64],
    batch_size: usize,
) -> Result<(u64, usize)> {
    let mut statements = 0;
    let mut changed = 0;
    for batch in ids.chunks(batch_size.max(1)) {
        let sql = template.replace(IDS_PLACEHOLDER, &id_placeholders(batch.len()));
        changed += conn.execute(&sql, params_from_iter(batch.iter()))?;
        statements += 1;
    }
    Ok((statements, changed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO t (id, name) VALUES (1, 'a'), (2, NULL), (5, 'c'), (9, 'd');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_scalar_null_reads_as_zero() {
        let conn = conn();
        assert_eq!(query_scalar(&conn, "SELECT MAX(id) FROM t WHERE id > 100", None).unwrap(), 0);
        assert_eq!(query_scalar(&conn, "SELECT MAX(id) FROM t", None).unwrap(), 9);
    }

    #[test]
    fn test_window_binding() {
        let conn = conn();
        let sql = "SELECT COUNT(*) FROM t WHERE id >= :low AND id < :high";
        let window = ChunkWindow { low: 2, high: 9 };
        assert_eq!(query_scalar(&conn, sql, Some(window)).unwrap(), 2);
        assert_eq!(query_scalar(&conn, sql, None).unwrap(), 4);
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let conn = conn();
        let shape = RowShape {
            rule: "shape_check",
            columns: &["id", "title"],
        };
        let err = query_rows(&conn, "SELECT id, name FROM t", None, shape).unwrap_err();
        assert!(matches!(err, RepairError::QueryShape { ref rule, .. } if rule == "shape_check"));
    }

    #[test]
    fn test_typed_accessors() {
        let conn = conn();
        let shape = RowShape {
            rule: "shape_check",
            columns: &["id", "name"],
        };
        let rows = query_rows(&conn, "SELECT id, name FROM t ORDER BY id", None, shape).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].int(0).unwrap(), 1);
        assert_eq!(rows[1].text(1).unwrap(), "");
        assert!(rows[0].int(1).is_err());
        assert!(rows[0].int(7).is_err());
    }

    #[test]
    fn test_execute_for_ids_batches() {
        let conn = conn();
        let (statements, changed) =
            execute_for_ids(&conn, "DELETE FROM t WHERE id IN ({ids})", &[1, 2, 5], 2).unwrap();
        assert_eq!(statements, 2);
        assert_eq!(changed, 3);
        assert_eq!(query_scalar(&conn, "SELECT COUNT(*) FROM t", None).unwrap(), 1);
    }
}
