//! Core types for Templar

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Result, TemplarError};

/// A backend value.
///
/// Parameters and results share this type so a bound value can be read back
/// with the same variant it was bound with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// Decimal/Numeric (stored as string for precision)
    Decimal(String),
    /// UTF-8 string
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Date and time without timezone
    Timestamp(NaiveDateTime),
    /// Rows produced by a cursor OUT parameter
    Cursor(Vec<Row>),
}

impl Value {
    /// Check if the value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(*v as i64),
            Value::Text(s) | Value::Decimal(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Try to get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Text(s) | Value::Decimal(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Try to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The SQL type this value binds as, `None` for NULL
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(SqlType::Boolean),
            Value::Int(_) => Some(SqlType::Integer),
            Value::Float(_) => Some(SqlType::Float),
            Value::Decimal(_) => Some(SqlType::Numeric),
            Value::Text(_) => Some(SqlType::Text),
            Value::Bytes(_) => Some(SqlType::Binary),
            Value::Date(_) => Some(SqlType::Date),
            Value::Timestamp(_) => Some(SqlType::Timestamp),
            Value::Cursor(_) => Some(SqlType::Cursor),
        }
    }

    /// Convert into a JSON value for front ends
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(v) | Value::Text(v) => serde_json::Value::String(v.clone()),
            Value::Bytes(v) => {
                serde_json::Value::String(v.iter().map(|b| format!("{:02x}", b)).collect())
            }
            Value::Date(v) => serde_json::Value::String(v.to_string()),
            Value::Timestamp(v) => serde_json::Value::String(v.to_string()),
            Value::Cursor(rows) => {
                serde_json::Value::Array(rows.iter().map(Row::to_json).collect())
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Date(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v),
            Value::Cursor(v) => write!(f, "<cursor: {} rows>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

/// SQL types a parameter can be declared as, or an OUT slot registered with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Integer,
    Float,
    Numeric,
    Text,
    Boolean,
    Binary,
    Date,
    Timestamp,
    Cursor,
}

impl SqlType {
    /// Resolve a type name as accepted from callers (case-insensitive)
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "BIGINT" => Ok(Self::Integer),
            "FLOAT" | "DOUBLE" | "REAL" => Ok(Self::Float),
            "NUMBER" | "NUMERIC" | "DECIMAL" => Ok(Self::Numeric),
            "VARCHAR" | "VARCHAR2" | "STRING" | "TEXT" => Ok(Self::Text),
            "BOOLEAN" | "BOOL" => Ok(Self::Boolean),
            "BLOB" | "BYTEA" | "BINARY" => Ok(Self::Binary),
            "DATE" => Ok(Self::Date),
            "TIMESTAMP" => Ok(Self::Timestamp),
            "CURSOR" | "REFCURSOR" => Ok(Self::Cursor),
            other => Err(TemplarError::UnsupportedType(format!(
                "unknown SQL type name '{}'",
                other
            ))),
        }
    }

    /// Canonical upper-case name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Numeric => "NUMERIC",
            Self::Text => "VARCHAR",
            Self::Boolean => "BOOLEAN",
            Self::Binary => "BINARY",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Cursor => "CURSOR",
        }
    }
}

impl FromStr for SqlType {
    type Err = TemplarError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A row from a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Column values
    pub values: Vec<Value>,
    /// Column names, in backend order
    columns: Vec<String>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    ///
    /// When a name repeats, the last column with that name wins, matching
    /// `to_map`.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .rposition(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Convert to a column name -> value map (duplicate names: last value wins)
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Consume into a column name -> value map (duplicate names: last value wins)
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns.into_iter().zip(self.values).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (name, value) in self.columns.iter().zip(self.values.iter()) {
            object.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}

/// Column metadata
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ColumnMeta {
    /// Column name
    #[serde(default)]
    pub name: String,
    /// Data type (database-specific string)
    #[serde(default)]
    pub data_type: String,
    /// Whether the column can be NULL
    #[serde(default)]
    pub nullable: bool,
    /// Column ordinal position (0-based)
    #[serde(default)]
    pub ordinal: usize,
}

/// Query result
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Unique query ID
    pub id: Uuid,
    /// Column metadata
    pub columns: Vec<ColumnMeta>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Rows affected (for DML statements)
    pub affected_rows: u64,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new empty query result
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: 0,
            execution_time_ms: 0,
        }
    }

    /// Build a result from column names and rows, as mocks and tests do
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let metas = columns
            .iter()
            .enumerate()
            .map(|(ordinal, name)| ColumnMeta {
                name: name.clone(),
                data_type: "DYNAMIC".to_string(),
                nullable: true,
                ordinal,
            })
            .collect();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(columns.clone(), values))
            .collect();
        Self {
            columns: metas,
            rows,
            ..Self::empty()
        }
    }

    /// Check if the result has rows
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Result of a statement that does not return rows
#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    /// Rows affected
    pub affected_rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sql_type_from_name() {
        assert_eq!(SqlType::from_name("number").unwrap(), SqlType::Numeric);
        assert_eq!(SqlType::from_name("VARCHAR").unwrap(), SqlType::Text);
        assert_eq!(SqlType::from_name(" Cursor ").unwrap(), SqlType::Cursor);
        assert_eq!("int".parse::<SqlType>().unwrap(), SqlType::Integer);

        let err = SqlType::from_name("XMLTYPE").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnsupportedType);
    }

    #[test]
    fn test_row_duplicate_columns_last_value_wins() {
        let row = Row::new(
            vec!["id".into(), "name".into(), "id".into()],
            vec![Value::Int(1), Value::from("a"), Value::Int(2)],
        );

        assert_eq!(row.get_by_name("id"), Some(&Value::Int(2)));
        assert_eq!(row.get(0), Some(&Value::Int(1)));

        let map = row.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("id"), Some(&Value::Int(2)));
        assert_eq!(row.into_map().get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(7).as_i64(), Some(7));
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert_eq!(Value::from("12").as_i64(), Some(12));
        assert_eq!(Value::Null.sql_type(), None);
        assert_eq!(Value::Float(1.5).sql_type(), Some(SqlType::Float));
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_row_to_json() {
        let row = Row::new(
            vec!["id".into(), "score".into()],
            vec![Value::Int(1), Value::Float(2.5)],
        );
        assert_eq!(row.to_json(), serde_json::json!({"id": 1, "score": 2.5}));
    }

    #[test]
    fn test_query_result_from_rows() {
        let result = QueryResult::from_rows(
            vec!["a".into()],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.column_count(), 1);
        assert!(result.has_rows());
        assert_eq!(result.rows[1].get_by_name("a"), Some(&Value::Int(2)));
    }
}
