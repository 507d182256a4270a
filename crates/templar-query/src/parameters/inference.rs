//! Type inference and declared-type conversion for text parameters

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use templar_core::{Result, SqlType, TemplarError, Value};

static INTEGER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+$").expect("valid regex"));

static NUMERIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?(\d+(\.\d*)?|\.\d+)([eE][-+]?\d+)?$").expect("valid regex"));

const ISO_TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Turns text parameters into typed values
#[derive(Debug, Clone)]
pub struct TypeInference {
    date_pattern: String,
}

impl TypeInference {
    /// `date_pattern` is a chrono format string, e.g. `%d/%m/%Y %H.%M`
    pub fn new(date_pattern: impl Into<String>) -> Self {
        Self {
            date_pattern: date_pattern.into(),
        }
    }

    pub fn date_pattern(&self) -> &str {
        &self.date_pattern
    }

    /// Infer a type for untyped text.
    ///
    /// Tried in order: integer, floating point, the configured date pattern;
    /// anything else is text. Integers too large for `i64` fall through to
    /// floating point, and non-finite floats (`NaN`, `inf`) stay text.
    pub fn infer(&self, text: &str) -> Value {
        if INTEGER_REGEX.is_match(text) {
            if let Ok(i) = text.parse::<i64>() {
                return Value::Int(i);
            }
        }
        if let Ok(f) = text.parse::<f64>() {
            if f.is_finite() {
                return Value::Float(f);
            }
        }
        if let Some(ts) = self.parse_pattern(text) {
            return Value::Timestamp(ts);
        }
        Value::Text(text.to_string())
    }

    /// Convert text to a declared type, failing with `TypeConversion`
    pub fn convert(&self, text: &str, sql_type: SqlType) -> Result<Value> {
        let mismatch = || {
            TemplarError::TypeConversion(format!(
                "'{}' is not a valid {}",
                text,
                sql_type.name()
            ))
        };

        match sql_type {
            SqlType::Integer => text.trim().parse::<i64>().map(Value::Int).map_err(|_| mismatch()),
            SqlType::Float => match text.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => Err(mismatch()),
            },
            SqlType::Numeric => {
                let trimmed = text.trim();
                if NUMERIC_REGEX.is_match(trimmed) {
                    Ok(Value::Decimal(trimmed.to_string()))
                } else {
                    Err(mismatch())
                }
            }
            SqlType::Text => Ok(Value::Text(text.to_string())),
            SqlType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "f" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            SqlType::Binary => Ok(Value::Bytes(text.as_bytes().to_vec())),
            SqlType::Date => self
                .parse_date(text.trim())
                .map(Value::Date)
                .ok_or_else(mismatch),
            SqlType::Timestamp => self
                .parse_timestamp(text.trim())
                .map(Value::Timestamp)
                .ok_or_else(mismatch),
            SqlType::Cursor => Err(TemplarError::UnsupportedType(
                "cursor values cannot be bound as parameters".into(),
            )),
        }
    }

    /// Coerce a value that already carries a type to a declared type
    pub fn coerce(&self, value: Value, sql_type: SqlType) -> Result<Value> {
        if value.is_null() || value.sql_type() == Some(sql_type) {
            return Ok(value);
        }
        match (value, sql_type) {
            (Value::Int(i), SqlType::Float) => Ok(Value::Float(i as f64)),
            (Value::Int(i), SqlType::Numeric) => Ok(Value::Decimal(i.to_string())),
            (Value::Float(f), SqlType::Numeric) if f.is_finite() => Ok(Value::Decimal(f.to_string())),
            (Value::Timestamp(ts), SqlType::Date) => Ok(Value::Date(ts.date())),
            (Value::Date(d), SqlType::Timestamp) => Ok(Value::Timestamp(d.and_time(chrono::NaiveTime::MIN))),
            (Value::Text(s), ty) => self.convert(&s, ty),
            (other, ty) => self.convert(&other.to_string(), ty),
        }
    }

    fn parse_pattern(&self, text: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(text, &self.date_pattern)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, &self.date_pattern)
                    .ok()
                    .map(|d| d.and_time(chrono::NaiveTime::MIN))
            })
    }

    fn parse_timestamp(&self, text: &str) -> Option<NaiveDateTime> {
        self.parse_pattern(text).or_else(|| {
            ISO_TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(text, ISO_DATE_FORMAT)
                        .ok()
                        .map(|d| d.and_time(chrono::NaiveTime::MIN))
                })
        })
    }

    fn parse_date(&self, text: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(text, ISO_DATE_FORMAT)
            .ok()
            .or_else(|| self.parse_timestamp(text).map(|ts| ts.date()))
    }
}

impl Default for TypeInference {
    fn default() -> Self {
        Self::new("%d/%m/%Y %H.%M")
    }
}
