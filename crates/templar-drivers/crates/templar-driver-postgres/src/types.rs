//! Conversions between Templar values and PostgreSQL wire types

use bytes::{BufMut, BytesMut};
use postgres_types::{FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Row as PgRow, Statement};
use templar_core::{Result, SqlType, TemplarError, Value};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Owned parameter value that picks its wire encoding from the type the
/// server inferred for the placeholder.
#[derive(Debug)]
pub(crate) enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Numeric(String),
    String(String),
    Bytes(Vec<u8>),
    Date(chrono::NaiveDate),
    DateTime(chrono::NaiveDateTime),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
}

impl PgValue {
    /// Convert a Value for a placeholder of `target_type`, so tokio-postgres
    /// writes the binary width the server expects (4 bytes for INT4, not 8)
    pub(crate) fn for_type(value: &Value, target_type: &Type) -> Self {
        match value {
            Value::Null | Value::Cursor(_) => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int(v) => Self::coerce_int(*v, target_type),
            Value::Float(v) => match *target_type {
                Type::FLOAT4 => PgValue::Float32(*v as f32),
                Type::NUMERIC => PgValue::Numeric(v.to_string()),
                _ => PgValue::Float64(*v),
            },
            Value::Decimal(v) => match *target_type {
                Type::FLOAT8 | Type::FLOAT4 => v
                    .parse::<f64>()
                    .map(|f| Self::for_type(&Value::Float(f), target_type))
                    .unwrap_or_else(|_| PgValue::String(v.clone())),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => PgValue::String(v.clone()),
                _ => PgValue::Numeric(v.clone()),
            },
            Value::Text(v) => PgValue::String(v.clone()),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Date(v) => match *target_type {
                Type::TIMESTAMP => PgValue::DateTime(v.and_time(chrono::NaiveTime::MIN)),
                _ => PgValue::Date(*v),
            },
            Value::Timestamp(v) => match *target_type {
                Type::DATE => PgValue::Date(v.date()),
                Type::TIMESTAMPTZ => PgValue::DateTimeUtc(v.and_utc()),
                _ => PgValue::DateTime(*v),
            },
        }
    }

    fn coerce_int(value: i64, target_type: &Type) -> Self {
        match *target_type {
            Type::INT2 => PgValue::Int16(value as i16),
            Type::INT4 => PgValue::Int32(value as i32),
            Type::FLOAT4 => PgValue::Float32(value as f32),
            Type::FLOAT8 => PgValue::Float64(value as f64),
            Type::NUMERIC => PgValue::Numeric(value.to_string()),
            _ => PgValue::Int64(value),
        }
    }
}

impl ToSql for PgValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int16(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float32(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::Numeric(v) => encode_numeric(v, out),
            PgValue::String(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Date(v) => v.to_sql(ty, out),
            PgValue::DateTime(v) => v.to_sql(ty, out),
            PgValue::DateTimeUtc(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// Convert parameters using the placeholder types of a prepared statement
pub(crate) fn bind_params(statement: &Statement, params: &[Value]) -> Vec<PgValue> {
    let param_types = statement.params();
    let untyped = Type::TEXT;
    params
        .iter()
        .enumerate()
        .map(|(i, value)| PgValue::for_type(value, param_types.get(i).unwrap_or(&untyped)))
        .collect()
}

pub(crate) fn as_refs(params: &[PgValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// PostgreSQL type used to declare an OUT argument of `ty` in a CALL
pub(crate) fn pg_type_name(ty: SqlType) -> &'static str {
    match ty {
        SqlType::Integer => "bigint",
        SqlType::Float => "double precision",
        SqlType::Numeric => "numeric",
        SqlType::Text => "text",
        SqlType::Boolean => "boolean",
        SqlType::Binary => "bytea",
        SqlType::Date => "date",
        SqlType::Timestamp => "timestamp",
        SqlType::Cursor => "refcursor",
    }
}

/// Write a decimal string in NUMERIC binary form: base-10000 digit groups
/// with a group weight, sign word and display scale
fn encode_numeric(text: &str, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(0xC000);
        out.put_i16(0);
        return Ok(IsNull::No);
    }

    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(format!("invalid numeric literal '{}'", text).into());
    }

    let int_part = int_part.trim_start_matches('0');
    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let padded = format!(
        "{}{}{}{}",
        "0".repeat(int_pad),
        int_part,
        frac_part,
        "0".repeat(frac_pad)
    );

    let mut groups: Vec<i16> = padded
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + (b - b'0') as i16))
        .collect();
    let mut weight = ((int_pad + int_part.len()) / 4) as i16 - 1;

    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(groups.len() as i16);
    out.put_i16(weight);
    out.put_u16(if negative && !groups.is_empty() { 0x4000 } else { 0 });
    out.put_i16(frac_part.len() as i16);
    for group in groups {
        out.put_i16(group);
    }
    Ok(IsNull::No)
}

/// NUMERIC decoded to its exact decimal text
#[derive(Debug)]
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }
        let word = |i: usize| i16::from_be_bytes([raw[i], raw[i + 1]]);
        let ndigits = word(0).max(0) as usize;
        let weight = word(2) as i32;
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = word(6).max(0) as usize;

        if sign == 0xC000 {
            return Ok(Self("NaN".into()));
        }
        if raw.len() < 8 + ndigits * 2 {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }
        let group = |index: i32| -> i16 {
            if index < 0 || index as usize >= ndigits {
                0
            } else {
                word(8 + index as usize * 2)
            }
        };

        let mut text = String::new();
        if sign == 0x4000 {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            for index in 0..=weight {
                if index == 0 {
                    text.push_str(&group(index).to_string());
                } else {
                    text.push_str(&format!("{:04}", group(index)));
                }
            }
        }

        if dscale > 0 {
            let mut fraction = String::new();
            let mut index = weight + 1;
            while fraction.len() < dscale {
                fraction.push_str(&format!("{:04}", group(index)));
                index += 1;
            }
            fraction.truncate(dscale);
            text.push('.');
            text.push_str(&fraction);
        }

        Ok(Self(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Raw UTF-8 payload of types without a dedicated decoder (enums, domains)
#[derive(Debug)]
struct PgFallbackString(String);

impl<'a> FromSql<'a> for PgFallbackString {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        TemplarError::Query(format!(
            "Failed to decode column '{}': {}",
            row.columns()[idx].name(),
            e
        ))
    })
}

/// Convert PostgreSQL row value to our Value type
pub(crate) fn postgres_to_value(row: &PgRow, idx: usize) -> Result<Value> {
    let type_name = row.columns()[idx].type_().name();

    let value = match type_name {
        "bool" => get::<bool>(row, idx)?.map(Value::Bool),
        "int2" => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        "int4" => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        "int8" => get::<i64>(row, idx)?.map(Value::Int),
        "oid" => get::<u32>(row, idx)?.map(|v| Value::Int(v.into())),
        "float4" => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        "float8" => get::<f64>(row, idx)?.map(Value::Float),
        "numeric" => get::<PgNumeric>(row, idx)?.map(|v| Value::Decimal(v.0)),
        "text" | "varchar" | "bpchar" | "name" | "refcursor" => {
            get::<String>(row, idx)?.map(Value::Text)
        }
        "bytea" => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        "date" => get::<chrono::NaiveDate>(row, idx)?.map(Value::Date),
        "timestamp" => get::<chrono::NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        "timestamptz" => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|v| Value::Timestamp(v.naive_utc())),
        "uuid" => get::<uuid::Uuid>(row, idx)?.map(|v| Value::Text(v.to_string())),
        "json" | "jsonb" => get::<serde_json::Value>(row, idx)?.map(|v| Value::Text(v.to_string())),
        _ => get::<PgFallbackString>(row, idx)?.map(|v| Value::Text(v.0)),
    };

    Ok(value.unwrap_or(Value::Null))
}

pub(crate) fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();
    if let Some(detail) = db_error.detail().filter(|d| !d.trim().is_empty()) {
        message.push_str(&format!(" (detail: {})", detail));
    }
    if let Some(hint) = db_error.hint().filter(|h| !h.trim().is_empty()) {
        message.push_str(&format!(" (hint: {})", hint));
    }

    format!("{} (code: {})", message, db_error.code().code())
}

/// Map a driver error, reporting server-side cancellation as `Cancelled`
pub(crate) fn map_postgres_error(context: &str, error: &tokio_postgres::Error) -> TemplarError {
    if error
        .as_db_error()
        .is_some_and(|db| *db.code() == tokio_postgres::error::SqlState::QUERY_CANCELED)
    {
        return TemplarError::Cancelled;
    }
    TemplarError::Query(format!("{}: {}", context, format_postgres_error(error)))
}
