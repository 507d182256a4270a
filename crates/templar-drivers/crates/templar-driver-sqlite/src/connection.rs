//! SQLite connection implementation
//!
//! rusqlite is synchronous, so every statement runs on the blocking thread
//! pool while holding the connection mutex. That keeps runtime workers free
//! and lets `SqliteCancelHandle` interrupt a statement from another thread.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rusqlite::{
    Connection as RusqliteConnection, ErrorCode, InterruptHandle, OpenFlags, params_from_iter,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use templar_core::{
    ColumnMeta, Connection, QueryCancelHandle, QueryResult, Result, Row, RowCursor, SqlType,
    StatementResult, TemplarError, Transaction, Value, row_channel,
};

/// Cancel handle for SQLite queries.
///
/// This wraps the rusqlite `InterruptHandle` and can be called from any thread
/// to interrupt a running query. The interrupted query will return SQLITE_INTERRUPT.
pub struct SqliteCancelHandle {
    interrupt_handle: Arc<InterruptHandle>,
}

impl QueryCancelHandle for SqliteCancelHandle {
    fn cancel(&self) {
        tracing::debug!("Interrupting SQLite query");
        self.interrupt_handle.interrupt();
    }
}

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: Arc<Mutex<RusqliteConnection>>,
    interrupt_handle: Arc<InterruptHandle>,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Open a SQLite database
    ///
    /// Blocks on file I/O; call from a blocking context.
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                TemplarError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(TemplarError::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                TemplarError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            TemplarError::Connection(format!("Failed to enable foreign keys: {}", e))
        })?;

        // journal_mode reports the resulting mode as a row
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| TemplarError::Connection(format!("Failed to set journal mode: {}", e)))?;

        conn.pragma_update(None, "synchronous", "NORMAL").map_err(|e| {
            TemplarError::Connection(format!("Failed to set synchronous mode: {}", e))
        })?;

        // Pooled connections to one file contend for the write lock
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| TemplarError::Connection(format!("Failed to set busy timeout: {}", e)))?;

        let interrupt_handle = Arc::new(conn.get_interrupt_handle());

        tracing::info!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt_handle,
            closed: AtomicBool::new(false),
        })
    }

    /// Expand path to handle ~ (home directory) and relative paths
    fn expand_path(path: &str) -> Result<String> {
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            match std::env::var_os("HOME") {
                Some(home) => std::path::PathBuf::from(home)
                    .join(rest)
                    .to_string_lossy()
                    .to_string(),
                None => {
                    return Err(TemplarError::Configuration(
                        "Unable to determine HOME directory".into(),
                    ));
                }
            }
        } else if path.starts_with('~') {
            return Err(TemplarError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        if path_buf.is_relative() {
            Ok(std::env::current_dir()?
                .join(path_buf)
                .to_string_lossy()
                .to_string())
        } else {
            Ok(expanded)
        }
    }

    /// Execute multiple SQL statements separated by semicolons, without parameters
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!("executing SQL batch");
        let sql = sql.to_string();
        run_blocking(&self.conn, move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| map_sqlite_error("Failed to execute batch", e))
        })
        .await
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        let result =
            run_blocking(&self.conn, move |conn| execute_blocking(conn, &sql, &params)).await?;

        tracing::debug!(affected_rows = result.affected_rows, "statement executed");
        Ok(result)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        let result =
            run_blocking(&self.conn, move |conn| query_blocking(conn, &sql, &params)).await?;

        tracing::debug!(
            row_count = result.rows.len(),
            execution_time_ms = result.execution_time_ms,
            "query executed successfully"
        );
        Ok(result)
    }

    /// Rows are produced by a blocking thread that steps the statement and
    /// pushes each row into the cursor's channel, so at most `fetch_size`
    /// rows are buffered ahead of the consumer.
    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query_stream(
        &self,
        sql: &str,
        params: &[Value],
        fetch_size: usize,
    ) -> Result<RowCursor> {
        let (tx, cursor) = row_channel(fetch_size);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<()>>();
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = match guard.prepare(&sql) {
                Ok(stmt) => stmt,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_sqlite_error("Failed to prepare query", e)));
                    return;
                }
            };
            let (column_names, decl_types) = describe_columns(&stmt);
            let mut rows = match stmt.query(params_from_iter(params.iter())) {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_sqlite_error("Failed to execute query", e)));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            let mut delivered = 0usize;
            loop {
                let item = match rows.next() {
                    Ok(Some(row)) => read_row(row, &decl_types)
                        .map(|values| Row::new(column_names.clone(), values)),
                    Ok(None) => break,
                    Err(e) => Err(map_sqlite_error("Failed to fetch row", e)),
                };
                let failed = item.is_err();
                if !tx.blocking_send(item) {
                    tracing::debug!(delivered, "SQLite stream consumer went away");
                    break;
                }
                if failed {
                    break;
                }
                delivered += 1;
            }
            tracing::debug!(delivered, "SQLite stream producer finished");
        });

        ready_rx
            .await
            .map_err(|_| TemplarError::Query("SQLite stream worker exited early".into()))??;

        Ok(cursor.with_cancel_handle(self.cancel_handle()))
    }

    fn supports_out_type(&self, ty: SqlType) -> bool {
        ty != SqlType::Cursor
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning SQLite transaction");
        run_blocking(&self.conn, |conn| {
            // DEFERRED takes the write lock at the first write
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| map_sqlite_error("Failed to begin transaction", e))
        })
        .await?;

        Ok(Box::new(SqliteTransaction {
            conn: Arc::clone(&self.conn),
            finished: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing SQLite connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(SqliteCancelHandle {
            interrupt_handle: self.interrupt_handle.clone(),
        }))
    }
}

/// SQLite transaction wrapper.
///
/// Issues raw `BEGIN DEFERRED` / `COMMIT` / `ROLLBACK` SQL so that it can share
/// the connection `Arc<Mutex<…>>` without rusqlite's borrow-based transaction
/// lifetime.
pub struct SqliteTransaction {
    conn: Arc<Mutex<RusqliteConnection>>,
    finished: bool,
}

impl SqliteTransaction {
    async fn finish(&mut self, sql: &'static str) -> Result<()> {
        if self.finished {
            return Err(TemplarError::Query("Transaction already finished".into()));
        }
        run_blocking(&self.conn, move |conn| {
            conn.execute_batch(sql)
                .map_err(|e| map_sqlite_error("Failed to finish transaction", e))
        })
        .await?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("SQLite transaction dropped without commit or rollback, issuing automatic rollback");
            let conn = self.conn.lock();
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("committing SQLite transaction");
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back SQLite transaction");
        self.finish("ROLLBACK").await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing query in SQLite transaction");
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        run_blocking(&self.conn, move |conn| query_blocking(conn, &sql, &params)).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing statement in SQLite transaction");
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        run_blocking(&self.conn, move |conn| execute_blocking(conn, &sql, &params)).await
    }
}

/// Run `f` against the locked connection on the blocking thread pool
async fn run_blocking<T, F>(conn: &Arc<Mutex<RusqliteConnection>>, f: F) -> Result<T>
where
    F: FnOnce(&RusqliteConnection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock();
        f(&guard)
    })
    .await
    .map_err(|e| TemplarError::Query(format!("SQLite worker task failed: {}", e)))?
}

fn execute_blocking(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[rusqlite::types::Value],
) -> Result<StatementResult> {
    let rows_affected = conn
        .execute(sql, params_from_iter(params.iter()))
        .map_err(|e| map_sqlite_error("Failed to execute statement", e))?;
    Ok(StatementResult {
        affected_rows: rows_affected as u64,
    })
}

fn query_blocking(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[rusqlite::types::Value],
) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| map_sqlite_error("Failed to prepare query", e))?;

    let (column_names, decl_types) = describe_columns(&stmt);
    let columns = column_names
        .iter()
        .zip(decl_types.iter())
        .enumerate()
        .map(|(ordinal, (name, decl))| ColumnMeta {
            name: name.clone(),
            data_type: decl.clone().unwrap_or_else(|| "DYNAMIC".to_string()),
            nullable: true,
            ordinal,
        })
        .collect();

    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(|e| map_sqlite_error("Failed to execute query", e))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| map_sqlite_error("Failed to fetch row", e))?
    {
        rows.push(Row::new(column_names.clone(), read_row(row, &decl_types)?));
    }

    Ok(QueryResult {
        id: uuid::Uuid::new_v4(),
        columns,
        rows,
        affected_rows: 0,
        execution_time_ms: start_time.elapsed().as_millis() as u64,
    })
}

/// Column names plus declared types (from `CREATE TABLE`, when known)
fn describe_columns(stmt: &rusqlite::Statement<'_>) -> (Vec<String>, Vec<Option<String>>) {
    stmt.columns()
        .iter()
        .map(|col| {
            (
                col.name().to_string(),
                col.decl_type().map(|t| t.to_ascii_uppercase()),
            )
        })
        .unzip()
}

fn read_row(row: &rusqlite::Row<'_>, decl_types: &[Option<String>]) -> Result<Vec<Value>> {
    decl_types
        .iter()
        .enumerate()
        .map(|(idx, decl)| rusqlite_to_value(row, idx, decl.as_deref()))
        .collect()
}

fn map_sqlite_error(context: &str, error: rusqlite::Error) -> TemplarError {
    match &error {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::OperationInterrupted => {
            TemplarError::Cancelled
        }
        _ => TemplarError::Query(format!("{}: {}", context, error)),
    }
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null | Value::Cursor(_) => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Int(i) => Sql::Integer(*i),
        Value::Float(f) => Sql::Real(*f),
        Value::Decimal(d) => Sql::Text(d.clone()),
        Value::Text(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::Date(d) => Sql::Text(d.format("%Y-%m-%d").to_string()),
        Value::Timestamp(ts) => Sql::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

/// Convert rusqlite row value to our Value type
///
/// Text in DATE/DATETIME/TIMESTAMP columns comes back as a date or timestamp
/// when it parses in the format `value_to_rusqlite` writes.
fn rusqlite_to_value(row: &rusqlite::Row<'_>, idx: usize, decl_type: Option<&str>) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| TemplarError::Query(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match decl_type {
            Some("BOOLEAN") | Some("BOOL") => Value::Bool(i != 0),
            _ => Value::Int(i),
        },
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(s) => {
            let text = String::from_utf8_lossy(s).to_string();
            match decl_type {
                Some("DATE") => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .map(Value::Date)
                    .unwrap_or(Value::Text(text)),
                Some("DATETIME") | Some("TIMESTAMP") => {
                    NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
                        .map(Value::Timestamp)
                        .unwrap_or(Value::Text(text))
                }
                _ => Value::Text(text),
            }
        }
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_rusqlite_formats_temporal_values() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 0))
            .unwrap();
        assert_eq!(
            value_to_rusqlite(&Value::Timestamp(ts)),
            rusqlite::types::Value::Text("2024-03-09 14:05:00".into())
        );
        assert_eq!(
            value_to_rusqlite(&Value::Bool(true)),
            rusqlite::types::Value::Integer(1)
        );
    }

    #[test]
    fn test_interrupt_maps_to_cancelled() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        assert!(matches!(
            map_sqlite_error("ctx", err),
            TemplarError::Cancelled
        ));
    }

    #[test]
    fn test_expand_path_keeps_memory_and_uri() {
        assert_eq!(SqliteConnection::expand_path(":memory:").unwrap(), ":memory:");
        assert_eq!(
            SqliteConnection::expand_path("file:test?mode=memory").unwrap(),
            "file:test?mode=memory"
        );
        assert!(SqliteConnection::expand_path("~bob/db").is_err());
    }
}
