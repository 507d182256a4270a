//! Query execution over a borrowed connection
//!
//! One `BoundStatement` runs in one of four result modes: a scalar, a fully
//! materialized row set, a lazily fetched row stream, or execute-only with an
//! affected-row count.

mod stream;

pub use stream::RowStream;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use templar_connection::PooledConnection;
use templar_core::{
    Connection, ErrorKind, QueryResult, Result, Row, StatementResult, TemplarError, Transaction, Value,
};

use crate::parameters::BoundStatement;

/// What an execution returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    /// First column of the first row
    Scalar,
    /// Every row, materialized before returning
    #[default]
    Rows,
    /// Rows fetched lazily, `fetch_size` at a time
    Stream { fetch_size: Option<usize> },
    /// Run as a statement and report affected rows
    Execute,
}

impl ResultMode {
    pub fn stream() -> Self {
        Self::Stream { fetch_size: None }
    }

    pub fn stream_with_fetch_size(fetch_size: usize) -> Self {
        Self::Stream {
            fetch_size: Some(fetch_size),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Rows => "rows",
            Self::Stream { .. } => "stream",
            Self::Execute => "execute",
        }
    }
}

/// Result of one execution
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// `None` when the query returned no rows
    Scalar(Option<Value>),
    RowSet(Vec<Row>),
    RowStream(RowStream),
    /// OUT parameter values by logical name
    ProcedureResult(HashMap<String, Value>),
    /// Rows affected by an execute-only statement
    Affected(u64),
    Failure { kind: ErrorKind, message: String },
}

impl ExecutionOutcome {
    pub fn from_error(error: &TemplarError) -> Self {
        Self::Failure {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn aborted(reason: &str) -> Self {
        Self::from_error(&TemplarError::Aborted(reason.to_string()))
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::RowSet(_) => "row_set",
            Self::RowStream(_) => "row_stream",
            Self::ProcedureResult(_) => "procedure_result",
            Self::Affected(_) => "affected",
            Self::Failure { .. } => "failure",
        }
    }

    /// JSON rendering; a stream is drained into its rows first
    pub async fn into_json(self) -> serde_json::Value {
        use serde_json::json;

        match self {
            Self::Scalar(value) => json!({ "scalar": value.map(|v| v.to_json()) }),
            Self::RowSet(rows) => json!({ "rows": rows.iter().map(Row::to_json).collect::<Vec<_>>() }),
            Self::RowStream(stream) => match stream.collect_rows().await {
                Ok(rows) => json!({ "rows": rows.iter().map(Row::to_json).collect::<Vec<_>>() }),
                Err(e) => json!({ "failure": { "kind": e.kind(), "message": e.to_string() } }),
            },
            Self::ProcedureResult(values) => {
                let map: serde_json::Map<String, serde_json::Value> =
                    values.into_iter().map(|(k, v)| (k, v.to_json())).collect();
                json!({ "out": map })
            }
            Self::Affected(rows) => json!({ "affected_rows": rows }),
            Self::Failure { kind, message } => json!({ "failure": { "kind": kind, "message": message } }),
        }
    }
}

/// Where a statement runs: a plain connection or an open transaction
#[derive(Clone, Copy)]
pub enum ExecutionTarget<'a> {
    Connection(&'a dyn Connection),
    Transaction(&'a dyn Transaction),
}

impl ExecutionTarget<'_> {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        match self {
            Self::Connection(conn) => conn.query(sql, params).await,
            Self::Transaction(tx) => tx.query(sql, params).await,
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        match self {
            Self::Connection(conn) => conn.execute(sql, params).await,
            Self::Transaction(tx) => tx.execute(sql, params).await,
        }
    }
}

/// Runs bound statements
pub struct QueryExecutor;

impl QueryExecutor {
    /// First column of the first row, `None` if no rows came back
    #[tracing::instrument(skip(target, bound), fields(sql_preview = %bound.sql_preview()))]
    pub async fn execute_scalar(target: ExecutionTarget<'_>, bound: &BoundStatement) -> Result<Option<Value>> {
        let result = target.query(&bound.sql, &bound.params()).await.map_err(|e| {
            tracing::error!(error = %e, "scalar query failed");
            e
        })?;
        Ok(result
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.values.into_iter().next()))
    }

    /// All rows, in backend order
    #[tracing::instrument(skip(target, bound), fields(sql_preview = %bound.sql_preview()))]
    pub async fn execute_rows(target: ExecutionTarget<'_>, bound: &BoundStatement) -> Result<Vec<Row>> {
        let result = target.query(&bound.sql, &bound.params()).await.map_err(|e| {
            tracing::error!(error = %e, "query failed");
            e
        })?;
        tracing::debug!(
            rows = result.rows.len(),
            execution_time_ms = result.execution_time_ms,
            "query executed"
        );
        Ok(result.rows)
    }

    /// Run as a statement, returning the affected row count
    #[tracing::instrument(skip(target, bound), fields(sql_preview = %bound.sql_preview()))]
    pub async fn execute_update(target: ExecutionTarget<'_>, bound: &BoundStatement) -> Result<u64> {
        let result = target.execute(&bound.sql, &bound.params()).await.map_err(|e| {
            tracing::error!(error = %e, "statement failed");
            e
        })?;
        tracing::debug!(affected_rows = result.affected_rows, "statement executed");
        Ok(result.affected_rows)
    }

    /// Open a row stream that keeps `connection` until it ends.
    ///
    /// If the stream cannot be opened the connection goes back to the pool
    /// before the error is returned.
    #[tracing::instrument(skip(connection, bound), fields(sql_preview = %bound.sql_preview()))]
    pub async fn execute_stream(
        connection: PooledConnection,
        bound: &BoundStatement,
        fetch_size: usize,
    ) -> Result<RowStream> {
        let cursor = match connection
            .query_stream(&bound.sql, &bound.params(), fetch_size)
            .await
        {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::error!(error = %e, "failed to open row stream");
                connection.release();
                return Err(e);
            }
        };
        Ok(RowStream::new(cursor, Some(connection)))
    }

    /// Run `bound` on a pooled connection in the given mode.
    ///
    /// Streams take ownership of the connection; every other mode releases
    /// it before returning, on success and on error.
    pub async fn execute(
        connection: PooledConnection,
        bound: &BoundStatement,
        mode: ResultMode,
        default_fetch_size: usize,
    ) -> Result<ExecutionOutcome> {
        let outcome = match mode {
            ResultMode::Stream { fetch_size } => {
                let fetch_size = fetch_size.unwrap_or(default_fetch_size);
                return Self::execute_stream(connection, bound, fetch_size)
                    .await
                    .map(ExecutionOutcome::RowStream);
            }
            other => Self::execute_on(ExecutionTarget::Connection(&*connection), bound, other).await,
        };
        connection.release();
        outcome
    }

    /// Run `bound` on a connection or transaction the caller keeps.
    ///
    /// Stream mode materializes the rows since the stream cannot own the
    /// target.
    pub async fn execute_on(
        target: ExecutionTarget<'_>,
        bound: &BoundStatement,
        mode: ResultMode,
    ) -> Result<ExecutionOutcome> {
        match mode {
            ResultMode::Scalar => Self::execute_scalar(target, bound)
                .await
                .map(ExecutionOutcome::Scalar),
            ResultMode::Rows => Self::execute_rows(target, bound)
                .await
                .map(ExecutionOutcome::RowSet),
            ResultMode::Stream { .. } => Self::execute_rows(target, bound)
                .await
                .map(|rows| ExecutionOutcome::RowStream(RowStream::from_rows(rows))),
            ResultMode::Execute => Self::execute_update(target, bound)
                .await
                .map(ExecutionOutcome::Affected),
        }
    }
}
