//! Tests for placeholder extraction, inference and binding

use chrono::{NaiveDate, NaiveDateTime};
use templar_core::{ErrorKind, PlaceholderStyle, SqlType, Value};

use super::*;
use crate::BindingMode;

fn binder() -> ParameterBinder {
    ParameterBinder::new(TypeInference::default(), PlaceholderStyle::Dollar, BindingMode::Native)
}

fn timestamp(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(h, min, 0))
        .expect("valid timestamp")
}

mod extractor_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(sql: &str) -> Vec<Placeholder> {
        extract_placeholders(sql)
            .into_iter()
            .map(|m| m.placeholder)
            .collect()
    }

    #[test]
    fn test_extract_named() {
        assert_eq!(
            kinds("SELECT * FROM users WHERE id = :id OR parent_id = :id AND name = :name"),
            vec![
                Placeholder::Named("id".into()),
                Placeholder::Named("id".into()),
                Placeholder::Named("name".into()),
            ]
        );
    }

    #[test]
    fn test_casts_are_not_placeholders() {
        assert_eq!(
            kinds("SELECT :value::text, created_at::date FROM t"),
            vec![Placeholder::Named("value".into())]
        );
    }

    #[test]
    fn test_skips_literals_and_comments() {
        let sql = "SELECT ':nope', \"a?b\" -- :comment ?\nFROM t /* $1 */ WHERE x = ?";
        assert_eq!(kinds(sql), vec![Placeholder::Question]);
    }

    #[test]
    fn test_extract_numbered() {
        assert_eq!(
            kinds("SELECT $2, $1, $2"),
            vec![
                Placeholder::Numbered(2),
                Placeholder::Numbered(1),
                Placeholder::Numbered(2),
            ]
        );
    }

    #[test]
    fn test_byte_ranges() {
        let matches = extract_placeholders("id = :id");
        assert_eq!(matches[0].start, 5);
        assert_eq!(matches[0].end, 8);
    }
}

mod inference_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_inference_order() {
        let inference = TypeInference::default();
        assert_eq!(inference.infer("42"), Value::Int(42));
        assert_eq!(inference.infer("-7"), Value::Int(-7));
        assert_eq!(inference.infer("3.25"), Value::Float(3.25));
        assert_eq!(
            inference.infer("05/11/2023 14.30"),
            Value::Timestamp(timestamp(2023, 11, 5, 14, 30))
        );
        assert_eq!(inference.infer("hello"), Value::Text("hello".into()));
    }

    #[test]
    fn test_integer_overflow_falls_to_float() {
        let inference = TypeInference::default();
        assert_eq!(
            inference.infer("99999999999999999999"),
            Value::Float(99999999999999999999.0)
        );
    }

    #[test]
    fn test_non_finite_stays_text() {
        let inference = TypeInference::default();
        assert_eq!(inference.infer("NaN"), Value::Text("NaN".into()));
        assert_eq!(inference.infer("inf"), Value::Text("inf".into()));
    }

    #[test]
    fn test_leading_zero_identifiers_are_integers() {
        // Ambiguous by design: callers needing text must declare it
        let inference = TypeInference::default();
        assert_eq!(inference.infer("007"), Value::Int(7));
        assert_eq!(
            inference.convert("007", SqlType::Text).unwrap(),
            Value::Text("007".into())
        );
    }

    #[test]
    fn test_custom_date_pattern() {
        let inference = TypeInference::new("%Y%m%d");
        // Integer parsing wins over the date pattern
        assert_eq!(inference.infer("20240101"), Value::Int(20240101));

        let inference = TypeInference::new("%Y/%m/%d");
        assert_eq!(
            inference.infer("2024/01/02"),
            Value::Timestamp(timestamp(2024, 1, 2, 0, 0))
        );
    }

    #[test]
    fn test_declared_conversions() {
        let inference = TypeInference::default();
        assert_eq!(
            inference.convert("12.50", SqlType::Numeric).unwrap(),
            Value::Decimal("12.50".into())
        );
        assert_eq!(
            inference.convert("2024-02-29", SqlType::Date).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            inference.convert("2024-02-29 08:15:00", SqlType::Timestamp).unwrap(),
            Value::Timestamp(timestamp(2024, 2, 29, 8, 15))
        );
        assert_eq!(inference.convert("yes", SqlType::Boolean).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_declared_conversion_failures() {
        let inference = TypeInference::default();
        assert_eq!(
            inference.convert("31/02/2024 10.00", SqlType::Timestamp).unwrap_err().kind(),
            ErrorKind::TypeConversion
        );
        assert_eq!(
            inference.convert("abc", SqlType::Integer).unwrap_err().kind(),
            ErrorKind::TypeConversion
        );
        assert_eq!(
            inference.convert("1;2", SqlType::Numeric).unwrap_err().kind(),
            ErrorKind::TypeConversion
        );
        assert_eq!(
            inference.convert("x", SqlType::Cursor).unwrap_err().kind(),
            ErrorKind::UnsupportedType
        );
    }

    #[test]
    fn test_coerce_typed_values() {
        let inference = TypeInference::default();
        assert_eq!(inference.coerce(Value::Int(3), SqlType::Float).unwrap(), Value::Float(3.0));
        assert_eq!(
            inference.coerce(Value::Text("17".into()), SqlType::Integer).unwrap(),
            Value::Int(17)
        );
        assert_eq!(inference.coerce(Value::Null, SqlType::Date).unwrap(), Value::Null);
        assert!(inference.coerce(Value::Float(2.5), SqlType::Integer).is_err());
    }
}

mod binder_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bind_named_reuses_slots() {
        let params = ParameterSet::named([("id", "42"), ("name", "Alice"), ("unused", "x")]);
        let bound = binder()
            .bind("SELECT * FROM users WHERE id = :id OR parent = :id AND name = :name", &params)
            .unwrap();

        assert_eq!(bound.sql, "SELECT * FROM users WHERE id = $1 OR parent = $1 AND name = $2");
        assert_eq!(bound.params(), vec![Value::Int(42), Value::Text("Alice".into())]);
        assert_eq!(bound.values[0].inferred, Some(SqlType::Integer));
        assert_eq!(bound.values[0].declared, None);
    }

    #[test]
    fn test_bind_named_missing_value() {
        let params = ParameterSet::named([("id", "1")]);
        let err = binder()
            .bind("SELECT * FROM t WHERE id = :id AND kind = :kind", &params)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundPlaceholder);
        assert!(err.to_string().contains(":kind"));
    }

    #[test]
    fn test_bind_question_marks() {
        let binder =
            ParameterBinder::new(TypeInference::default(), PlaceholderStyle::QuestionNumbered, BindingMode::Native);
        let params = ParameterSet::positional(["1", "2.5", "text"]);
        let bound = binder.bind("INSERT INTO t VALUES (?, ?, ?)", &params).unwrap();

        assert_eq!(bound.sql, "INSERT INTO t VALUES (?1, ?2, ?3)");
        assert_eq!(
            bound.values.iter().map(|v| v.sql_type()).collect::<Vec<_>>(),
            vec![Some(SqlType::Integer), Some(SqlType::Float), Some(SqlType::Text)]
        );
    }

    #[test]
    fn test_bind_numbered_out_of_order() {
        let params = ParameterSet::positional(["a", "b"]);
        let bound = binder().bind("SELECT $2, $1", &params).unwrap();
        assert_eq!(bound.sql, "SELECT $2, $1");
        assert_eq!(
            bound.params(),
            vec![Value::Text("a".into()), Value::Text("b".into())]
        );
    }

    #[test]
    fn test_positional_arity() {
        let sql = "SELECT * FROM t WHERE a = ? AND b = ?";

        let too_few = binder().bind(sql, &ParameterSet::positional(["1"])).unwrap_err();
        assert_eq!(too_few.kind(), ErrorKind::UnboundPlaceholder);

        let too_many = binder()
            .bind(sql, &ParameterSet::positional(["1", "2", "3"]))
            .unwrap_err();
        assert_eq!(too_many.kind(), ErrorKind::ArityMismatch);

        let none_expected = binder()
            .bind("SELECT 1", &ParameterSet::positional(["1"]))
            .unwrap_err();
        assert_eq!(none_expected.kind(), ErrorKind::ArityMismatch);
    }

    #[test]
    fn test_style_mismatch() {
        let err = binder()
            .bind("SELECT :a", &ParameterSet::positional(["1"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundPlaceholder);

        let err = binder()
            .bind("SELECT ?", &ParameterSet::named([("a", "1")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundPlaceholder);

        let err = binder()
            .bind("SELECT ?, $1", &ParameterSet::positional(["1", "2"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTemplate);
    }

    #[test]
    fn test_declared_type_failure() {
        let params = ParameterSet::named([("at", ParamValue::typed("not a date", SqlType::Date))]);
        let err = binder().bind("SELECT :at", &params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversion);
    }

    #[test]
    fn test_declared_type_wins_over_inference() {
        let params = ParameterSet::named([("code", ParamValue::typed("007", SqlType::Text))]);
        let bound = binder().bind("SELECT :code", &params).unwrap();
        assert_eq!(bound.params(), vec![Value::Text("007".into())]);
        assert_eq!(bound.values[0].sql_type(), Some(SqlType::Text));
    }

    #[test]
    fn test_literal_mode_renders_values() {
        let binder =
            ParameterBinder::new(TypeInference::default(), PlaceholderStyle::Dollar, BindingMode::Literal);
        let params = ParameterSet::named([("name", "O'Brien"), ("n", "3")]);
        let bound = binder
            .bind("SELECT * FROM t WHERE name = :name LIMIT :n", &params)
            .unwrap();

        assert_eq!(bound.sql, "SELECT * FROM t WHERE name = 'O''Brien' LIMIT 3");
        assert!(bound.values.is_empty());
        assert_eq!(bound.mode, BindingMode::Literal);
    }

    #[test]
    fn test_parameter_set_from_json() {
        let positional: ParameterSet =
            serde_json::from_str(r#"["42", 7, null, {"value": "2024-01-01", "type": "date"}]"#).unwrap();
        assert_eq!(
            positional,
            ParameterSet::Positional(vec![
                ParamValue::untyped("42"),
                ParamValue::Value(Value::Int(7)),
                ParamValue::null(),
                ParamValue::typed("2024-01-01", SqlType::Date),
            ])
        );

        let named: ParameterSet = serde_json::from_str(r#"{"id": "1"}"#).unwrap();
        assert!(named.is_named());

        let bad = serde_json::from_str::<ParameterSet>(r#"[{"value": "x", "type": "GEOMETRY"}]"#);
        assert!(bad.is_err());
    }
}
