//! Tests for procedure call specs and invocations

use std::collections::HashMap;

use templar_core::{ErrorKind, SqlType, TemplarError, Value};

use super::*;
use crate::ExecutionOutcome;
use crate::parameters::{ParamValue, TypeInference};
use crate::test_helpers::{MockConnection, MockState, mock_service};

fn in_map(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn out_map(entries: &[(&str, &str)]) -> HashMap<String, OutDeclaration> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), OutDeclaration::Type(v.to_string())))
        .collect()
}

mod spec_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_call_string() {
        let spec = ProcedureCallSpec::new("P")
            .with_in(1, "a")
            .with_in(2, "b")
            .with_out(3, SqlType::Integer, None);
        assert_eq!(build_call_string(&spec), "{call P(?, ?, ?)}");

        let qualified = ProcedureCallSpec::new("recalc")
            .with_schema("billing")
            .with_catalog("pkg")
            .with_out(1, SqlType::Numeric, None);
        assert_eq!(build_call_string(&qualified), "{call billing.pkg.recalc(?)}");

        assert_eq!(build_call_string(&ProcedureCallSpec::new("noop")), "{call noop()}");
    }

    #[test]
    fn test_from_positional_maps() {
        let spec = ProcedureCallSpec::from_positional_maps(
            "P",
            Some("s"),
            None,
            &in_map(&[("1", "a"), ("2", "b")]),
            &out_map(&[("3", "NUMBER")]),
        )
        .unwrap();

        assert_eq!(spec.arity(), 3);
        assert_eq!(spec.qualified_name(), "s.P");
        assert_eq!(spec.out_params[&3].sql_type, SqlType::Numeric);
    }

    #[test]
    fn test_gap_in_positions_is_arity_mismatch() {
        let err = ProcedureCallSpec::from_positional_maps(
            "P",
            None,
            None,
            &in_map(&[("1", "a"), ("2", "b")]),
            &out_map(&[("4", "NUMBER")]),
        )
        .unwrap_err();
        assert!(matches!(err, TemplarError::ArityMismatch { expected: 3, actual: 4 }));
    }

    #[test]
    fn test_out_before_in_is_arity_mismatch() {
        let err = ProcedureCallSpec::from_positional_maps(
            "P",
            None,
            None,
            &in_map(&[("1", "a"), ("3", "b")]),
            &out_map(&[("2", "NUMBER")]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);
    }

    #[test]
    fn test_same_slot_twice_is_arity_mismatch() {
        let err = ProcedureCallSpec::from_positional_maps(
            "P",
            None,
            None,
            &in_map(&[("1", "a"), ("01", "b")]),
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);
    }

    #[test]
    fn test_bad_keys_and_types() {
        let err = ProcedureCallSpec::from_positional_maps("P", None, None, &in_map(&[("first", "a")]), &HashMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversion);

        let err = ProcedureCallSpec::from_positional_maps("P", None, None, &in_map(&[("0", "a")]), &HashMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversion);

        let err = ProcedureCallSpec::from_positional_maps("P", None, None, &HashMap::new(), &out_map(&[("1", "BLOB_ARRAY")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = ProcedureCallSpec::new("  ").validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTemplate);
    }

    #[test]
    fn test_out_declaration_json() {
        let decls: HashMap<String, OutDeclaration> =
            serde_json::from_str(r#"{"2": "VARCHAR", "3": {"type": "INTEGER", "name": "total"}}"#).unwrap();
        assert_eq!(decls["2"], OutDeclaration::Type("VARCHAR".into()));
        assert_eq!(
            decls["3"],
            OutDeclaration::Named {
                type_name: "INTEGER".into(),
                name: Some("total".into()),
            }
        );
    }
}

mod invocation_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn connection() -> (Arc<MockState>, MockConnection) {
        let state = Arc::new(MockState::default());
        (Arc::clone(&state), MockConnection::new(state))
    }

    #[tokio::test]
    async fn test_state_machine_order() {
        let (state, conn) = connection();
        let spec = ProcedureCallSpec::new("P")
            .with_in(1, "42")
            .with_in(2, "hello")
            .with_out(3, SqlType::Text, None);

        let mut invocation = ProcedureInvocation::build(spec).unwrap();
        assert_eq!(invocation.state(), CallState::Built);

        // Out of order steps are refused
        let err = invocation.extract().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcedureFailed);
        let err = invocation.execute(&conn).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcedureFailed);

        invocation.bind(&TypeInference::default()).unwrap();
        assert_eq!(invocation.state(), CallState::Bound);
        invocation.execute(&conn).await.unwrap();
        assert_eq!(invocation.state(), CallState::Executed);

        let out = invocation.extract().unwrap();
        assert_eq!(invocation.state(), CallState::Extracted);
        assert_eq!(out["OUT_PARAM_3"], Value::Text("out3".into()));

        assert_eq!(state.sql_log(), vec!["{call P(?, ?, ?)}"]);
        assert_eq!(state.params_of(0), vec![Value::Int(42), Value::Text("hello".into())]);
    }

    #[tokio::test]
    async fn test_logical_names_and_types() {
        let (_state, conn) = connection();
        let spec = ProcedureCallSpec::new("report")
            .with_in(1, "7")
            .with_out(2, SqlType::Numeric, Some("total"))
            .with_out(3, SqlType::Cursor, Some("lines"))
            .with_out(4, SqlType::Date, None);

        let out = ProcedureInvocation::invoke(spec, &TypeInference::default(), &conn)
            .await
            .unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out["total"], Value::Decimal("10.50".into()));
        assert!(matches!(&out["lines"], Value::Cursor(rows) if rows.len() == 1));
        assert_eq!(out["OUT_PARAM_4"].sql_type(), Some(SqlType::Date));
    }

    #[tokio::test]
    async fn test_typed_in_conversion_failure() {
        let (state, conn) = connection();
        let spec = ProcedureCallSpec::new("P").with_in(1, ParamValue::typed("abc", SqlType::Integer));

        let err = ProcedureInvocation::invoke(spec, &TypeInference::default(), &conn)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversion);
        assert!(state.sql_log().is_empty());
    }

    #[tokio::test]
    async fn test_in_value_of_unbindable_type_is_conversion_error() {
        let (state, conn) = connection();
        let spec = ProcedureCallSpec::new("P").with_in(1, ParamValue::typed("x", SqlType::Cursor));

        let err = ProcedureInvocation::invoke(spec, &TypeInference::default(), &conn)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversion);
        assert!(err.to_string().contains("IN parameter 1"));
        assert!(state.sql_log().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_out_type_fails_before_call() {
        let (state, conn) = connection();
        state.unsupported_out.lock().push(SqlType::Cursor);
        let spec = ProcedureCallSpec::new("P").with_out(1, SqlType::Cursor, None);

        let err = ProcedureInvocation::invoke(spec, &TypeInference::default(), &conn)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert!(state.sql_log().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_is_procedure_failed() {
        let (_state, conn) = connection();
        let spec = ProcedureCallSpec::new("FAIL_ALWAYS").with_in(1, "1");

        let err = ProcedureInvocation::invoke(spec, &TypeInference::default(), &conn)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcedureFailed);
        assert!(err.to_string().contains("exception"));
    }
}

mod service_call_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_call_procedure_through_service() {
        let (state, service) = mock_service(&[], 1);
        let spec = ProcedureCallSpec::from_positional_maps(
            "P",
            None,
            None,
            &in_map(&[("1", "a"), ("2", "b")]),
            &out_map(&[("3", "NUMBER")]),
        )
        .unwrap();

        let outcome = service.call_procedure(spec).await.unwrap();
        let ExecutionOutcome::ProcedureResult(values) = outcome else {
            panic!("expected procedure result");
        };
        assert_eq!(values["OUT_PARAM_3"], Value::Decimal("10.50".into()));
        assert_eq!(state.sql_log(), vec!["{call P(?, ?, ?)}"]);
        assert_eq!(service.pool().stats().active, 0);
    }

    #[tokio::test]
    async fn test_invalid_spec_never_borrows_connection() {
        let (state, service) = mock_service(&[], 1);
        let spec = ProcedureCallSpec::new("P").with_in(2, "x");

        let err = service.call_procedure(spec).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);
        assert_eq!(state.created.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
