//! Row streams that own their borrowed connection

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use templar_connection::PooledConnection;
use templar_core::{Result, Row, RowCursor, TemplarError};
use tokio::sync::OwnedSemaphorePermit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Finished,
    /// Cancelled by the caller; the flag records whether that was reported
    Cancelled { reported: bool },
}

/// A lazy, finite, not restartable sequence of rows.
///
/// The connection the rows come from stays borrowed until the stream ends,
/// fails, is closed or cancelled, or is dropped. Its pool slot is freed
/// exactly once, on whichever of those happens first; a stream left before
/// its last row discards the connection rather than pooling it.
pub struct RowStream {
    cursor: RowCursor,
    connection: Option<PooledConnection>,
    /// Worker permit of the execution that opened the stream
    worker: Option<OwnedSemaphorePermit>,
    state: StreamState,
    rows_read: usize,
}

impl RowStream {
    pub(crate) fn new(cursor: RowCursor, connection: Option<PooledConnection>) -> Self {
        Self {
            cursor,
            connection,
            worker: None,
            state: StreamState::Open,
            rows_read: 0,
        }
    }

    /// Keep the opening worker busy until the connection is handed back
    pub(crate) fn hold_worker(&mut self, permit: OwnedSemaphorePermit) {
        if self.connection.is_some() {
            self.worker = Some(permit);
        }
    }

    /// A stream over rows already in memory, holding no connection
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(RowCursor::from_rows(rows), None)
    }

    /// Next row in backend order, `None` once the stream has ended.
    ///
    /// After `cancel` the next call yields `Err(Cancelled)` once.
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        if let Some(item) = self.terminal_item() {
            return item;
        }
        let item = self.cursor.next_row().await;
        self.observe(item)
    }

    /// Stop reading and give the connection back; any unread rows are dropped
    pub fn close(&mut self) {
        if self.state == StreamState::Open {
            self.state = StreamState::Finished;
        }
        self.shutdown();
    }

    /// Abandon the stream; the backend query is interrupted if still running
    pub fn cancel(&mut self) {
        if self.state == StreamState::Open {
            tracing::debug!(rows_read = self.rows_read, "row stream cancelled");
            self.state = StreamState::Cancelled { reported: false };
        }
        self.shutdown();
    }

    /// True while the stream still holds its connection
    pub fn holds_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.state != StreamState::Open
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Read the remaining rows into memory
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    fn terminal_item(&mut self) -> Option<Option<Result<Row>>> {
        match self.state {
            StreamState::Open => None,
            StreamState::Finished | StreamState::Cancelled { reported: true } => Some(None),
            StreamState::Cancelled { reported: false } => {
                self.state = StreamState::Cancelled { reported: true };
                Some(Some(Err(TemplarError::Cancelled)))
            }
        }
    }

    fn observe(&mut self, item: Option<Result<Row>>) -> Option<Result<Row>> {
        match &item {
            Some(Ok(_)) => self.rows_read += 1,
            Some(Err(e)) => {
                tracing::debug!(error = %e, rows_read = self.rows_read, "row stream failed");
                self.state = StreamState::Finished;
                self.shutdown();
            }
            None => {
                tracing::debug!(rows_read = self.rows_read, "row stream exhausted");
                self.state = StreamState::Finished;
                self.shutdown();
            }
        }
        item
    }

    fn shutdown(&mut self) {
        // Closing an unfinished cursor interrupts the backend fetch
        let interrupted = !self.cursor.is_exhausted();
        self.cursor.close();
        if let Some(connection) = self.connection.take() {
            if interrupted {
                tracing::debug!(rows_read = self.rows_read, "discarding connection of interrupted stream");
                connection.discard();
            } else {
                connection.release();
            }
        }
        self.worker.take();
    }
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.terminal_item() {
            return Poll::Ready(item);
        }
        match Pin::new(&mut self.cursor).poll_next(cx) {
            Poll::Ready(item) => Poll::Ready(self.observe(item)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("state", &self.state)
            .field("rows_read", &self.rows_read)
            .field("holds_connection", &self.connection.is_some())
            .finish()
    }
}
