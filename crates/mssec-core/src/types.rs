//! Core types for mssec

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MssecError, Result};

/// A value bound to, or read from, a SQL Server statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean (`bit`)
    Bool(bool),
    /// 16-bit signed integer (`smallint`, session ids)
    Int16(i16),
    /// 32-bit signed integer (principal ids, major/minor ids)
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// Unicode string (`nvarchar`, `sysname`)
    String(String),
    /// Binary data (`varbinary`, security identifiers)
    Bytes(Vec<u8>),
    /// UUID (`uniqueidentifier`)
    Uuid(Uuid),
    /// DateTime without timezone
    DateTime(NaiveDateTime),
}

impl Value {
    /// Check if the value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Try to get as bool; `bit` columns sometimes surface as integers
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int16(v) => Some(*v != 0),
            Value::Int32(v) => Some(*v != 0),
            Value::Int64(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::Int16(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Uuid(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
        }
    }
}

/// A row from a query result
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column values
    pub values: Vec<Value>,
    /// Column names
    columns: Vec<String>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self { values, columns }
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Get column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.get_by_name(name)
            .ok_or_else(|| MssecError::Driver(format!("column '{}' missing from result", name)))
    }

    /// Read a text column; NULL reads as the empty string
    pub fn string(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }

    /// Read an integer column that must not be NULL
    pub fn i32(&self, name: &str) -> Result<i32> {
        let value = self.require(name)?;
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| {
                MssecError::Driver(format!("column '{}' is not an integer: {}", name, value))
            })
    }

    /// Read a `bit` column; NULL reads as false
    pub fn bool(&self, name: &str) -> Result<bool> {
        let value = self.require(name)?;
        if value.is_null() {
            return Ok(false);
        }
        value
            .as_bool()
            .ok_or_else(|| MssecError::Driver(format!("column '{}' is not a bit: {}", name, value)))
    }

    /// Read an optional timestamp column
    pub fn datetime(&self, name: &str) -> Option<NaiveDateTime> {
        match self.get_by_name(name) {
            Some(Value::DateTime(dt)) => Some(*dt),
            _ => None,
        }
    }
}

/// Query result
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column names of the first result set
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new empty query result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a result from rows, taking column names from the first row
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|r| r.columns().to_vec())
            .unwrap_or_default();
        Self {
            columns,
            rows,
            execution_time_ms: 0,
        }
    }

    /// Check if the result has rows
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Consume the result, returning the first row if any
    pub fn into_first_row(self) -> Option<Row> {
        self.rows.into_iter().next()
    }
}

/// Result of a statement that does not return rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementResult {
    /// Rows affected
    pub affected_rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn login_row() -> Row {
        Row::from_pairs([
            ("name", Value::from("app_login")),
            ("principal_id", Value::Int32(267)),
            ("is_disabled", Value::Bool(true)),
            ("default_language_name", Value::Null),
        ])
    }

    #[test]
    fn test_row_typed_getters() {
        let row = login_row();
        assert_eq!(row.string("name").unwrap(), "app_login");
        assert_eq!(row.i32("principal_id").unwrap(), 267);
        assert!(row.bool("is_disabled").unwrap());
        assert_eq!(row.string("default_language_name").unwrap(), "");
    }

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = login_row();
        assert_eq!(row.string("NAME").unwrap(), "app_login");
    }

    #[test]
    fn test_row_missing_column_is_driver_error() {
        let row = login_row();
        let err = row.string("sid").unwrap_err();
        assert!(matches!(err, MssecError::Driver(_)));
    }

    #[test]
    fn test_row_integer_from_smallint() {
        let row = Row::from_pairs([("session_id", Value::Int16(57))]);
        assert_eq!(row.i32("session_id").unwrap(), 57);
    }

    #[test]
    fn test_row_bit_from_integer() {
        let row = Row::from_pairs([("value_in_use", Value::Int32(1))]);
        assert!(row.bool("value_in_use").unwrap());
    }

    #[test]
    fn test_query_result_first_row() {
        let result = QueryResult::from_rows(vec![login_row()]);
        assert_eq!(result.columns.len(), 4);
        assert_eq!(result.row_count(), 1);
        assert!(result.into_first_row().is_some());
        assert!(QueryResult::empty().into_first_row().is_none());
    }
}
