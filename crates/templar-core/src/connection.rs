//! Connection trait and transaction handling

use crate::{
    ProcedureCall, QueryResult, Result, RowCursor, SqlType, StatementResult, TemplarError, Value,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handle for cancelling a running query from any thread.
///
/// This trait allows database drivers to provide a way to interrupt
/// long-running queries. The handle is safe to call from any thread
/// and can be called multiple times (subsequent calls are no-ops).
pub trait QueryCancelHandle: Send + Sync {
    /// Cancel the currently running statement on the associated connection.
    ///
    /// If no statement is running, this is a no-op.
    fn cancel(&self);
}

/// How a backend spells its native positional placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (PostgreSQL)
    #[default]
    Dollar,
    /// `?1`, `?2`, ... (SQLite)
    QuestionNumbered,
}

impl PlaceholderStyle {
    /// Render the placeholder for a 1-based position
    pub fn render(&self, position: usize) -> String {
        match self {
            Self::Dollar => format!("${}", position),
            Self::QuestionNumbered => format!("?{}", position),
        }
    }
}

/// A database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgresql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a query and deliver its rows lazily.
    ///
    /// `fetch_size` hints how many rows the backend should batch per round
    /// trip. The default materializes the result and replays it, which keeps
    /// the contract for drivers without cursor support.
    async fn query_stream(
        &self,
        sql: &str,
        params: &[Value],
        fetch_size: usize,
    ) -> Result<RowCursor> {
        tracing::debug!(fetch_size, driver = self.driver_name(), "emulating row stream");
        let result = self.query(sql, params).await?;
        Ok(RowCursor::from_rows(result.rows).with_cancel_handle(self.cancel_handle()))
    }

    /// Invoke a stored procedure, returning OUT values in slot order
    async fn call(&self, call: &ProcedureCall) -> Result<Vec<Value>> {
        Err(TemplarError::NotSupported(format!(
            "{} does not support stored procedure '{}'",
            self.driver_name(),
            call.procedure
        )))
    }

    /// Whether an OUT slot of this type can be registered
    fn supports_out_type(&self, _ty: SqlType) -> bool {
        true
    }

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get a handle that can be used to cancel running queries.
    ///
    /// Returns `None` if the driver does not support query cancellation.
    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        None
    }
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a query within the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_rendering() {
        assert_eq!(PlaceholderStyle::Dollar.render(3), "$3");
        assert_eq!(PlaceholderStyle::QuestionNumbered.render(1), "?1");
    }
}
