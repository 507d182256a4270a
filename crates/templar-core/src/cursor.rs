//! Lazily produced row sequences
//!
//! Drivers stream rows by running the backend fetch loop on their own task or
//! thread and pushing rows through a bounded channel. The channel capacity is
//! the fetch size, so a slow consumer applies backpressure to the fetch loop.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::{QueryCancelHandle, Result, Row};

/// Create a producer/consumer pair with room for `fetch_size` rows in flight
pub fn row_channel(fetch_size: usize) -> (RowSender, RowCursor) {
    let (tx, rx) = mpsc::channel(fetch_size.max(1));
    (
        RowSender { inner: tx },
        RowCursor {
            receiver: rx,
            cancel_handle: None,
            exhausted: false,
        },
    )
}

/// Producer half of a row channel
#[derive(Clone)]
pub struct RowSender {
    inner: mpsc::Sender<Result<Row>>,
}

impl RowSender {
    /// Push an item from an async producer.
    ///
    /// Returns `false` once the consumer has gone away; producers should stop
    /// fetching at that point.
    pub async fn send(&self, item: Result<Row>) -> bool {
        self.inner.send(item).await.is_ok()
    }

    /// Push an item from a blocking producer thread.
    ///
    /// Must not be called from inside the async runtime.
    pub fn blocking_send(&self, item: Result<Row>) -> bool {
        self.inner.blocking_send(item).is_ok()
    }

    /// True once the consumer has closed or dropped its cursor
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Consumer half of a row channel.
///
/// Finite and not restartable. Once `next_row` has returned `None` or an error
/// the cursor stays exhausted.
pub struct RowCursor {
    receiver: mpsc::Receiver<Result<Row>>,
    cancel_handle: Option<Arc<dyn QueryCancelHandle>>,
    exhausted: bool,
}

impl RowCursor {
    /// Wrap already materialized rows, for drivers without native streaming
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let (tx, cursor) = row_channel(rows.len());
        for row in rows {
            // capacity covers every row, so this never fails
            let _ = tx.inner.try_send(Ok(row));
        }
        cursor
    }

    /// Attach a handle used to interrupt the backend fetch when the cursor is
    /// closed before it is exhausted
    pub fn with_cancel_handle(mut self, handle: Option<Arc<dyn QueryCancelHandle>>) -> Self {
        self.cancel_handle = handle;
        self
    }

    /// Fetch the next row, in backend result order
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        if self.exhausted {
            return None;
        }
        let item = self.receiver.recv().await;
        self.observe(item)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Stop consuming. Pending fetches are abandoned and, if the producer is
    /// still running, the backend statement is interrupted. Idempotent.
    pub fn close(&mut self) {
        if self.exhausted {
            return;
        }
        self.exhausted = true;
        self.receiver.close();
        if let Some(handle) = self.cancel_handle.take() {
            tracing::debug!("interrupting backend fetch for closed cursor");
            handle.cancel();
        }
    }

    fn observe(&mut self, item: Option<Result<Row>>) -> Option<Result<Row>> {
        match item {
            Some(Ok(row)) => Some(Ok(row)),
            Some(Err(e)) => {
                self.exhausted = true;
                self.receiver.close();
                Some(Err(e))
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

impl Stream for RowCursor {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.exhausted {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(item) => Poll::Ready(self.observe(item)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TemplarError, Value};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCancel(AtomicUsize);

    impl QueryCancelHandle for CountingCancel {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn row(n: i64) -> Row {
        Row::new(vec!["n".into()], vec![Value::Int(n)])
    }

    #[tokio::test]
    async fn test_from_rows_preserves_order() {
        let mut cursor = RowCursor::from_rows(vec![row(1), row(2), row(3)]);
        let mut seen = Vec::new();
        while let Some(item) = cursor.next_row().await {
            seen.push(item.unwrap().get(0).cloned().unwrap());
        }
        assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(cursor.is_exhausted());
        assert!(cursor.next_row().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_cursor() {
        let mut cursor = RowCursor::from_rows(Vec::new());
        assert!(cursor.next_row().await.is_none());
    }

    #[tokio::test]
    async fn test_close_stops_producer_and_fires_cancel_once() {
        let cancel = Arc::new(CountingCancel(AtomicUsize::new(0)));
        let (tx, cursor) = row_channel(1);
        let mut cursor = cursor.with_cancel_handle(Some(cancel.clone()));

        let producer = tokio::spawn(async move {
            let mut sent = 0;
            for i in 0..1000 {
                if !tx.send(Ok(row(i))).await {
                    break;
                }
                sent += 1;
            }
            sent
        });

        assert!(cursor.next_row().await.is_some());
        cursor.close();
        cursor.close();

        let sent = producer.await.unwrap();
        assert!(sent < 1000);
        assert_eq!(cancel.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_exhausts_cursor() {
        let (tx, mut cursor) = row_channel(4);
        assert!(tx.send(Ok(row(1))).await);
        assert!(tx.send(Err(TemplarError::Query("fetch failed".into()))).await);
        assert!(tx.send(Ok(row(2))).await || tx.is_closed());

        assert!(cursor.next_row().await.unwrap().is_ok());
        assert!(cursor.next_row().await.unwrap().is_err());
        assert!(cursor.next_row().await.is_none());
    }

    #[tokio::test]
    async fn test_cursor_as_stream() {
        let cursor = RowCursor::from_rows(vec![row(1), row(2)]);
        let rows: Vec<_> = cursor.collect().await;
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_drop_fires_cancel_when_not_exhausted() {
        let cancel = Arc::new(CountingCancel(AtomicUsize::new(0)));
        let (_tx, cursor) = row_channel(1);
        drop(cursor.with_cancel_handle(Some(cancel.clone())));
        assert_eq!(cancel.0.load(Ordering::SeqCst), 1);
    }
}
