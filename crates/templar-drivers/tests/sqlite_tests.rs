#![cfg(feature = "sqlite")]

//! Integration tests for the SQLite driver

use std::path::PathBuf;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use templar_core::{
    Connection, DataSourceConfig, DatabaseDriver, ErrorKind, PlaceholderStyle, SqlType, Value,
};
use templar_drivers::sqlite::{SqliteConnection, SqliteDriver};

/// Helper to create a test database with sample data
async fn setup_test_database() -> (tempfile::TempDir, PathBuf, SqliteConnection) {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let db_path = temp_dir
        .path()
        .join(format!("templar_test_{}.db", uuid::Uuid::new_v4()));

    let conn = SqliteConnection::open(&db_path.to_string_lossy())
        .expect("Failed to create test database");

    conn.execute_batch(
        r#"
        CREATE TABLE accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            balance REAL NOT NULL DEFAULT 0.0,
            opened_on DATE,
            updated_at TIMESTAMP
        );
        INSERT INTO accounts (owner, balance, opened_on, updated_at) VALUES
            ('alice', 120.5, '2023-01-15', '2024-03-09 14:05:00'),
            ('bob', 0.0, '2022-07-01', NULL),
            ('carol', 980.25, NULL, NULL);
        "#,
    )
    .await
    .expect("schema");

    (temp_dir, db_path, conn)
}

#[tokio::test]
async fn test_query_with_numbered_placeholders() {
    let (_dir, _path, conn) = setup_test_database().await;

    let result = conn
        .query(
            "SELECT owner, balance FROM accounts WHERE balance > ?1 AND owner <> ?2 ORDER BY id",
            &[Value::Float(100.0), Value::Text("carol".into())],
        )
        .await
        .expect("query");

    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get_by_name("owner"), Some(&Value::Text("alice".into())));
    assert_eq!(result.columns[1].data_type, "REAL");
}

#[tokio::test]
async fn test_declared_temporal_columns_decode() {
    let (_dir, _path, conn) = setup_test_database().await;

    let result = conn
        .query("SELECT opened_on, updated_at FROM accounts WHERE owner = ?1", &[Value::from("alice")])
        .await
        .expect("query");

    let row = &result.rows[0];
    assert!(matches!(row.get(0), Some(Value::Date(_))));
    assert!(matches!(row.get(1), Some(Value::Timestamp(_))));
}

#[tokio::test]
async fn test_execute_reports_affected_rows() {
    let (_dir, _path, conn) = setup_test_database().await;

    let result = conn
        .execute("UPDATE accounts SET balance = balance + ?1", &[Value::Int(1)])
        .await
        .expect("update");
    assert_eq!(result.affected_rows, 3);
}

#[tokio::test]
async fn test_inferred_types_reach_backend() {
    let (_dir, _path, conn) = setup_test_database().await;

    let result = conn
        .query(
            "SELECT typeof(?1), typeof(?2), typeof(?3)",
            &[Value::Int(42), Value::Float(4.2), Value::Text("x".into())],
        )
        .await
        .expect("query");

    assert_eq!(
        result.rows[0].values,
        vec![
            Value::Text("integer".into()),
            Value::Text("real".into()),
            Value::Text("text".into()),
        ]
    );
}

#[tokio::test]
async fn test_stream_delivers_rows_in_order() {
    let (_dir, _path, conn) = setup_test_database().await;

    let cursor = conn
        .query_stream("SELECT owner FROM accounts ORDER BY id", &[], 1)
        .await
        .expect("stream");
    let owners: Vec<Value> = cursor
        .map(|row| row.expect("row").get(0).cloned().expect("owner"))
        .collect()
        .await;

    assert_eq!(
        owners,
        vec![Value::from("alice"), Value::from("bob"), Value::from("carol")]
    );
}

#[tokio::test]
async fn test_stream_prepare_error_surfaces_immediately() {
    let (_dir, _path, conn) = setup_test_database().await;

    let err = conn
        .query_stream("SELECT * FROM missing_table", &[], 10)
        .await
        .err()
        .expect("prepare must fail");
    assert_eq!(err.kind(), ErrorKind::Backend);
}

#[tokio::test]
async fn test_closed_stream_frees_connection() {
    let (_dir, _path, conn) = setup_test_database().await;

    let mut cursor = conn
        .query_stream(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT x FROM n",
            &[],
            4,
        )
        .await
        .expect("stream");
    assert!(cursor.next_row().await.expect("first").is_ok());
    cursor.close();

    // The producer lets go of the connection once it sees the closed cursor
    let result = conn.query("SELECT COUNT(*) FROM accounts", &[]).await.expect("query");
    assert_eq!(result.rows[0].get(0), Some(&Value::Int(3)));
}

#[tokio::test]
async fn test_transaction_rollback() {
    let (_dir, _path, conn) = setup_test_database().await;

    let tx = conn.begin_transaction().await.expect("begin");
    tx.execute("DELETE FROM accounts", &[]).await.expect("delete");
    tx.rollback().await.expect("rollback");

    let result = conn.query("SELECT COUNT(*) FROM accounts", &[]).await.expect("count");
    assert_eq!(result.rows[0].get(0), Some(&Value::Int(3)));
}

#[tokio::test]
async fn test_procedures_not_supported() {
    let (_dir, _path, conn) = setup_test_database().await;

    assert!(!conn.supports_out_type(SqlType::Cursor));
    assert!(conn.supports_out_type(SqlType::Numeric));

    let call = templar_core::ProcedureCall {
        call_sql: "{call p(?)}".into(),
        procedure: "p".into(),
        in_values: vec![Value::Int(1)],
        out_slots: Vec::new(),
    };
    let err = conn.call(&call).await.err().expect("no procedures in sqlite");
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}

#[tokio::test]
async fn test_driver_connects_from_data_source() {
    let (_dir, path, _conn) = setup_test_database().await;
    let driver = SqliteDriver::new();
    assert_eq!(driver.placeholder_style(), PlaceholderStyle::QuestionNumbered);

    let conn = driver
        .connect(&DataSourceConfig::sqlite(&path.to_string_lossy()))
        .await
        .expect("connect");
    let result = conn.query("SELECT COUNT(*) FROM accounts", &[]).await.expect("count");
    assert_eq!(result.rows[0].get(0), Some(&Value::Int(3)));

    let err = driver
        .connect(&DataSourceConfig::new("sqlite"))
        .await
        .err()
        .expect("missing path");
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
