//! Statements and decoded query results

use crate::error::{DbError, DbResult};
use serde::Deserialize;

/// SQL text plus named server-side parameters.
///
/// Parameters are referenced in SQL as `{name:Type}` and sent alongside the
/// statement, so values never need to be spliced into the text:
///
/// ```
/// use ct_db::Statement;
///
/// let stmt = Statement::new("SELECT count() FROM system.replication_queue WHERE database = {db:String}")
///     .bind("db", "test_mainnet_blocks_1700000000_deadbeef");
/// assert_eq!(stmt.params().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<(String, String)>,
}

impl Statement {
    /// Statement without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind `value` to the `{name:Type}` placeholder
    pub fn bind(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters in bind order
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// Result column metadata
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Column {
    /// Column name as returned by the server
    pub name: String,

    /// Server type name, e.g. `Nullable(String)`
    #[serde(rename = "type")]
    pub type_name: String,
}

impl Column {
    /// Create column metadata
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A single result cell.
///
/// String-typed cells arrive as raw bytes; every other scalar is carried as
/// the JSON value the server produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Bytes(Vec<u8>),
    Value(serde_json::Value),
}

impl Datum {
    /// Text cell
    pub fn text(s: impl Into<String>) -> Self {
        Datum::Bytes(s.into().into_bytes())
    }

    /// Non-text cell
    pub fn value(v: impl Into<serde_json::Value>) -> Self {
        Datum::Value(v.into())
    }

    /// Cell rendered as text; invalid UTF-8 is replaced
    pub fn to_text_lossy(&self) -> String {
        match self {
            Datum::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Datum::Value(serde_json::Value::String(s)) => s.clone(),
            Datum::Value(v) => v.to_string(),
        }
    }

    /// Interpret the cell as an unsigned count
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Datum::Value(v) => v
                .as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok())),
            Datum::Bytes(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()),
        }
    }
}

/// Rows returned by a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Datum>>,
}

impl QueryResult {
    /// Create a result from columns and rows
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Datum>>) -> Self {
        Self { columns, rows }
    }

    /// One-row result built from (column, cell) pairs
    pub fn single_row<N: Into<String>>(cells: Vec<(N, Datum)>) -> Self {
        let mut columns = Vec::with_capacity(cells.len());
        let mut row = Vec::with_capacity(cells.len());
        for (name, datum) in cells {
            let type_name = match &datum {
                Datum::Bytes(_) => "String",
                Datum::Value(_) => "Unknown",
            };
            columns.push(Column::new(name, type_name));
            row.push(datum);
        }
        Self {
            columns,
            rows: vec![row],
        }
    }

    /// One-row, one-column unsigned result
    pub fn scalar(name: &str, value: u64) -> Self {
        Self {
            columns: vec![Column::new(name, "UInt64")],
            rows: vec![vec![Datum::value(value)]],
        }
    }

    /// Whether the query produced no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row, if any
    pub fn first_row(&self) -> Option<&[Datum]> {
        self.rows.first().map(Vec::as_slice)
    }

    /// First column of the first row as an unsigned count
    pub fn first_u64(&self) -> DbResult<u64> {
        let cell = self
            .first_row()
            .and_then(|row| row.first())
            .ok_or_else(|| DbError::Decode("expected one row with one column".to_string()))?;
        cell.as_u64()
            .ok_or_else(|| DbError::Decode(format!("expected an unsigned integer, got {cell:?}")))
    }

    /// First column of every row decoded as text
    pub fn first_column_strings(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first())
            .map(Datum::to_text_lossy)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_bind_order() {
        let stmt = Statement::new("SELECT {a:UInt8}, {b:String}")
            .bind("a", 1)
            .bind("b", "x");
        assert_eq!(
            stmt.params(),
            &[("a".to_string(), "1".to_string()), ("b".to_string(), "x".to_string())]
        );
    }

    #[test]
    fn test_first_u64_accepts_quoted_integers() {
        let result = QueryResult::new(
            vec![Column::new("c", "UInt64")],
            vec![vec![Datum::value(json!("18446744073709551615"))]],
        );
        assert_eq!(result.first_u64().unwrap(), u64::MAX);
    }

    #[test]
    fn test_first_u64_on_empty_result() {
        let err = QueryResult::default().first_u64().unwrap_err();
        assert!(matches!(err, DbError::Decode(_)));
    }

    #[test]
    fn test_single_row_columns() {
        let result = QueryResult::single_row(vec![
            ("a", Datum::value(42)),
            ("b", Datum::text("x")),
        ]);
        assert_eq!(result.columns[0].name, "a");
        assert_eq!(result.columns[1].type_name, "String");
        assert_eq!(result.first_row().unwrap().len(), 2);
    }
}
