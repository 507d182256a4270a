//! SQL literal rendering for textual parameter substitution

use std::sync::LazyLock;

use regex::Regex;
use templar_core::{Result, TemplarError, Value};

static PLAIN_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
});

static NUMERIC_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?([eE][-+]?\d+)?$").expect("valid regex"));

/// SQL-specific filters
pub struct SqlFilters;

impl SqlFilters {
    /// Quote a string for SQL
    pub fn sqlquote(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Create an IN clause from a list of values
    pub fn inclause(values: &[Value]) -> Result<String> {
        let rendered = values
            .iter()
            .map(Self::literal)
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", rendered.join(", ")))
    }

    /// Quote an identifier (table/column name)
    pub fn identifier(value: &str) -> String {
        format!("\"{}\"", value.replace('"', "\"\""))
    }

    /// True for `name` or `schema.name` made of identifier characters only
    pub fn is_plain_identifier(value: &str) -> bool {
        PLAIN_IDENTIFIER.is_match(value)
    }

    /// Render a value as a SQL literal.
    ///
    /// Strings and temporal values are single-quoted with embedded quotes
    /// doubled. Cursor values have no literal form.
    pub fn literal(value: &Value) -> Result<String> {
        let rendered = match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => f.to_string(),
            Value::Float(f) => Self::sqlquote(&f.to_string()),
            Value::Decimal(d) if NUMERIC_LITERAL.is_match(d) => d.clone(),
            Value::Decimal(d) => Self::sqlquote(d),
            Value::Text(s) => Self::sqlquote(s),
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                format!("X'{}'", hex)
            }
            Value::Date(d) => Self::sqlquote(&d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(ts) => Self::sqlquote(&ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            Value::Cursor(_) => {
                return Err(TemplarError::UnsupportedType(
                    "cursor values cannot be rendered as SQL literals".into(),
                ));
            }
        };
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_sqlquote() {
        assert_eq!(SqlFilters::sqlquote("hello"), "'hello'");
        assert_eq!(SqlFilters::sqlquote("it's"), "'it''s'");
    }

    #[test]
    fn test_identifier() {
        assert_eq!(SqlFilters::identifier("users"), "\"users\"");
        assert_eq!(SqlFilters::identifier("user\"name"), "\"user\"\"name\"");
    }

    #[test]
    fn test_plain_identifier() {
        assert!(SqlFilters::is_plain_identifier("db_template"));
        assert!(SqlFilters::is_plain_identifier("app.db_template"));
        assert!(!SqlFilters::is_plain_identifier("db_template; DROP TABLE x"));
        assert!(!SqlFilters::is_plain_identifier("a.b.c"));
        assert!(!SqlFilters::is_plain_identifier(""));
    }

    #[test]
    fn test_literal() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 0))
            .expect("valid timestamp");

        assert_eq!(SqlFilters::literal(&Value::Null).unwrap(), "NULL");
        assert_eq!(SqlFilters::literal(&Value::Int(-7)).unwrap(), "-7");
        assert_eq!(SqlFilters::literal(&Value::Float(2.5)).unwrap(), "2.5");
        assert_eq!(SqlFilters::literal(&Value::Float(f64::NAN)).unwrap(), "'NaN'");
        assert_eq!(
            SqlFilters::literal(&Value::Text("O'Brien".into())).unwrap(),
            "'O''Brien'"
        );
        assert_eq!(
            SqlFilters::literal(&Value::Decimal("1; DROP".into())).unwrap(),
            "'1; DROP'"
        );
        assert_eq!(
            SqlFilters::literal(&Value::Timestamp(ts)).unwrap(),
            "'2024-03-09 14:05:00'"
        );
        assert_eq!(SqlFilters::literal(&Value::Bytes(vec![0xde, 0xad])).unwrap(), "X'DEAD'");
        assert!(SqlFilters::literal(&Value::Cursor(Vec::new())).is_err());
    }

    #[test]
    fn test_inclause() {
        let values = vec![Value::Int(1), Value::Text("a".into())];
        assert_eq!(SqlFilters::inclause(&values).unwrap(), "(1, 'a')");
    }
}
