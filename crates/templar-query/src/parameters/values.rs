//! Caller-supplied parameter values

use std::collections::HashMap;

use serde::Deserialize;
use templar_core::{SqlType, TemplarError, Value};

/// One loosely typed parameter value.
///
/// In JSON a value is a string (type inferred), a number, a boolean, `null`,
/// or an object `{"value": "...", "type": "DATE"}` with a declared type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawParam")]
pub enum ParamValue {
    /// Text whose type is inferred at bind time
    Untyped(String),
    /// Text converted to a declared type at bind time
    Typed { text: String, sql_type: SqlType },
    /// A value already carrying its type
    Value(Value),
}

impl ParamValue {
    pub fn untyped(text: impl Into<String>) -> Self {
        Self::Untyped(text.into())
    }

    pub fn typed(text: impl Into<String>, sql_type: SqlType) -> Self {
        Self::Typed {
            text: text.into(),
            sql_type,
        }
    }

    pub fn null() -> Self {
        Self::Value(Value::Null)
    }
}

impl From<&str> for ParamValue {
    fn from(text: &str) -> Self {
        Self::Untyped(text.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(text: String) -> Self {
        Self::Untyped(text)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Value(Value::Int(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Value(Value::Float(v))
    }
}

impl From<Value> for ParamValue {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParam {
    Null(()),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Typed {
        value: String,
        #[serde(rename = "type")]
        sql_type: String,
    },
}

impl TryFrom<RawParam> for ParamValue {
    type Error = TemplarError;

    fn try_from(raw: RawParam) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawParam::Null(()) => Self::Value(Value::Null),
            RawParam::Bool(b) => Self::Value(Value::Bool(b)),
            RawParam::Int(i) => Self::Value(Value::Int(i)),
            RawParam::Float(f) => Self::Value(Value::Float(f)),
            RawParam::Text(s) => Self::Untyped(s),
            RawParam::Typed { value, sql_type } => Self::Typed {
                text: value,
                sql_type: SqlType::from_name(&sql_type)?,
            },
        })
    }
}

/// Parameters for one execution, either positional or named
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParameterSet {
    Positional(Vec<ParamValue>),
    Named(HashMap<String, ParamValue>),
}

impl ParameterSet {
    /// An empty positional set
    pub fn empty() -> Self {
        Self::Positional(Vec::new())
    }

    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        Self::Named(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named(_))
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<ParamValue>> for ParameterSet {
    fn from(values: Vec<ParamValue>) -> Self {
        Self::Positional(values)
    }
}
