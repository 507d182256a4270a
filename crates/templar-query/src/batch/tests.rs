//! Tests for batch coordination

use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;
use templar_core::{ErrorKind, TemplarError, Value};

use super::*;
use crate::test_helpers::{init_test_logging, mock_service};
use crate::{ExecutionOutcome, ParameterSet, ResultMode};

const TEMPLATES: &[(&str, &str)] = &[
    ("a", "SELECT :x"),
    ("b", "SELECT :y"),
    ("insert", "INSERT INTO t VALUES (:v)"),
    ("broken", "UPDATE FAIL SET x = 1"),
];

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn named(key: &str, value: &str) -> ParameterSet {
    ParameterSet::named([(key, value)])
}

fn kinds(result: &BatchExecutionResult) -> Vec<Option<ErrorKind>> {
    result.outcomes().map(ExecutionOutcome::failure_kind).collect()
}

#[test]
fn test_options_defaults() {
    let options = BatchOptions::default();
    assert_eq!(options.mode, ExecutionMode::Parallel);
    assert!(!options.fail_fast);
    assert!(!options.atomic);
    assert_eq!(options.result_mode, ResultMode::Rows);
    assert_eq!(BatchOptions::default().with_max_parallelism(0).max_parallelism, 1);

    let parsed: BatchOptions = serde_json::from_str(r#"{"mode": "sequential", "fail_fast": true}"#).unwrap();
    assert_eq!(parsed.mode, ExecutionMode::Sequential);
    assert!(parsed.fail_fast);
}

#[tokio::test]
async fn test_arity_mismatch_rejected_before_any_work() {
    let (state, service) = mock_service(TEMPLATES, 2);

    let err = service
        .execute_batch(ids(&["a", "b"]), vec![named("x", "1")], BatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TemplarError::ArityMismatch { expected: 2, actual: 1 }));
    assert_eq!(state.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_batch() {
    let (_state, service) = mock_service(TEMPLATES, 1);
    let result = service
        .execute_batch(Vec::new(), Vec::new(), BatchOptions::sequential())
        .await
        .unwrap();
    assert!(result.is_empty());
    assert!(result.all_succeeded());
}

#[tokio::test]
async fn test_failures_are_per_item() {
    init_test_logging();
    let (_state, service) = mock_service(TEMPLATES, 2);

    for options in [BatchOptions::sequential(), BatchOptions::parallel()] {
        let result = service
            .execute_batch(
                ids(&["a", "missing", "b"]),
                vec![named("x", "1"), ParameterSet::empty(), named("y", "2")],
                options,
            )
            .await
            .unwrap();

        assert_eq!(kinds(&result), vec![None, Some(ErrorKind::NotFound), None]);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert!(!result.in_transaction);
    }
}

#[tokio::test]
async fn test_sequential_fail_fast_aborts_rest() {
    let (state, service) = mock_service(TEMPLATES, 1);

    let result = service
        .execute_batch(
            ids(&["a", "broken", "b"]),
            vec![named("x", "1"), ParameterSet::empty(), named("y", "2")],
            BatchOptions::sequential()
                .with_fail_fast(true)
                .with_result_mode(ResultMode::Execute),
        )
        .await
        .unwrap();

    assert_eq!(
        kinds(&result),
        vec![None, Some(ErrorKind::Backend), Some(ErrorKind::Aborted)]
    );
    assert_eq!(result.aborted_count, 1);
    assert!(result.results[1].is_failed());
    assert!(result.results[2].is_aborted());
    assert_eq!(state.sql_log().len(), 2);
}

#[tokio::test]
async fn test_parallel_preserves_input_order() {
    let (_state, service) = mock_service(TEMPLATES, 3);
    let count = 12;
    let template_ids = (0..count).map(|i| if i % 2 == 0 { "a" } else { "b" }.to_string()).collect();
    let params = (0..count)
        .map(|i| named(if i % 2 == 0 { "x" } else { "y" }, &i.to_string()))
        .collect();

    let result = service
        .execute_batch(template_ids, params, BatchOptions::parallel().with_max_parallelism(3))
        .await
        .unwrap();

    assert!(result.all_succeeded());
    for (i, item) in result.results.iter().enumerate() {
        assert_eq!(item.index, i);
        let ExecutionOutcome::RowSet(rows) = &item.outcome else {
            panic!("expected rows");
        };
        assert_eq!(rows[0].values, vec![Value::Int(i as i64)]);
    }
}

#[tokio::test]
async fn test_stream_items_do_not_hold_connections() {
    let (_state, service) = mock_service(TEMPLATES, 2);

    for options in [BatchOptions::sequential(), BatchOptions::parallel()] {
        let result = service
            .execute_batch(
                ids(&["a", "a", "a"]),
                vec![named("x", "1"), named("x", "2"), named("x", "3")],
                options.with_result_mode(ResultMode::stream()),
            )
            .await
            .unwrap();

        assert_eq!(kinds(&result), vec![None, None, None]);
        assert_eq!(service.pool().stats().active, 0);

        for (i, item) in result.results.into_iter().enumerate() {
            let ExecutionOutcome::RowStream(stream) = item.outcome else {
                panic!("expected a row stream");
            };
            assert!(!stream.holds_connection());
            let rows = stream.collect_rows().await.unwrap();
            assert_eq!(rows[0].values, vec![Value::Int(i as i64 + 1)]);
        }
    }
}

#[tokio::test]
async fn test_parallel_fail_fast_with_single_lane() {
    let (_state, service) = mock_service(TEMPLATES, 2);

    let result = service
        .execute_batch(
            ids(&["broken", "a"]),
            vec![ParameterSet::empty(), named("x", "1")],
            BatchOptions::parallel()
                .with_max_parallelism(1)
                .with_fail_fast(true)
                .with_result_mode(ResultMode::Execute),
        )
        .await
        .unwrap();

    assert_eq!(kinds(&result), vec![Some(ErrorKind::Backend), Some(ErrorKind::Aborted)]);
}

#[tokio::test]
async fn test_atomic_commits_on_one_connection() {
    let (state, service) = mock_service(TEMPLATES, 2);

    let result = service
        .execute_batch(
            ids(&["insert", "insert"]),
            vec![named("v", "1"), named("v", "2")],
            BatchOptions::atomic().with_result_mode(ResultMode::Execute),
        )
        .await
        .unwrap();

    assert!(result.all_succeeded());
    assert!(result.in_transaction);
    assert!(!result.rolled_back);
    assert_eq!(
        state.sql_log(),
        vec!["BEGIN", "INSERT INTO t VALUES ($1)", "INSERT INTO t VALUES ($1)", "COMMIT"]
    );
    assert_eq!(state.created.load(Ordering::SeqCst), 1);
    assert_eq!(service.pool().stats().active, 0);
}

#[tokio::test]
async fn test_atomic_rolls_back_on_first_failure() {
    let (state, service) = mock_service(TEMPLATES, 2);

    let result = service
        .execute_batch(
            ids(&["insert", "broken", "insert"]),
            vec![named("v", "1"), ParameterSet::empty(), named("v", "3")],
            BatchOptions::atomic().with_result_mode(ResultMode::Execute),
        )
        .await
        .unwrap();

    assert!(result.rolled_back);
    assert_eq!(
        kinds(&result),
        vec![None, Some(ErrorKind::Backend), Some(ErrorKind::Aborted)]
    );
    assert_eq!(
        state.sql_log(),
        vec!["BEGIN", "INSERT INTO t VALUES ($1)", "UPDATE FAIL SET x = 1", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_atomic_prepare_failure_touches_no_connection() {
    let (state, service) = mock_service(TEMPLATES, 2);

    let result = service
        .execute_batch(
            ids(&["insert", "a", "insert"]),
            vec![named("v", "1"), ParameterSet::empty(), named("v", "3")],
            BatchOptions::atomic(),
        )
        .await
        .unwrap();

    assert_eq!(
        kinds(&result),
        vec![
            Some(ErrorKind::Aborted),
            Some(ErrorKind::UnboundPlaceholder),
            Some(ErrorKind::Aborted)
        ]
    );
    assert!(!result.rolled_back);
    assert_eq!(state.created.load(Ordering::SeqCst), 0);
}
