//! Bounded worker pool for executions
//!
//! Every execution runs as its own task so the caller is never blocked on
//! backend I/O. A semaphore caps how many run at once; the rest wait for a
//! permit in submission order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use templar_core::{QueryCancelHandle, Result, TemplarError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs execution futures with bounded concurrency
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "worker pool size must be greater than 0");
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers neither running an execution nor held by an open stream
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Submit `work`; the returned handle resolves to its result.
    ///
    /// Cancelling the handle drops `work` wherever it is suspended, waiting
    /// for a worker included, and resolves the handle to `Cancelled`.
    pub fn spawn<F, T>(&self, work: F) -> ExecutionHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with_slot(move |_| work)
    }

    /// Like `spawn`, but `work` is built once a worker is free and receives
    /// that worker's slot, which it may detach to outlive the task.
    pub(crate) fn spawn_with_slot<F, Fut, T>(&self, work: F) -> ExecutionHandle<T>
    where
        F: FnOnce(WorkerSlot) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let permits = Arc::clone(&self.permits);
        let task_token = token.clone();

        let join = tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = task_token.cancelled() => return Err(TemplarError::Cancelled),
                permit = permits.acquire_owned() => permit
                    .map_err(|_| TemplarError::Aborted("worker pool shut down".into()))?,
            };
            // Released when the task ends unless the work detached it
            let slot = WorkerSlot(Arc::new(Mutex::new(Some(permit))));
            let work = work(slot.clone());

            tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    tracing::debug!("execution cancelled while running");
                    Err(TemplarError::Cancelled)
                }
                result = work => result,
            }
        });

        ExecutionHandle { join, token }
    }
}

/// The permit of the worker running one task.
///
/// A result that keeps using a connection after its task returns (an open
/// row stream) takes the permit with `detach`, so the worker stays busy
/// until that result is done with the connection.
#[derive(Clone)]
pub(crate) struct WorkerSlot(Arc<Mutex<Option<OwnedSemaphorePermit>>>);

impl WorkerSlot {
    pub(crate) fn detach(&self) -> Option<OwnedSemaphorePermit> {
        self.0.lock().take()
    }
}

/// Completion handle for one submitted execution
pub struct ExecutionHandle<T> {
    join: JoinHandle<Result<T>>,
    token: CancellationToken,
}

impl<T> ExecutionHandle<T> {
    /// Request cancellation; never blocks
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A token that cancels this execution when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<T> Future for ExecutionHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(TemplarError::Cancelled)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(TemplarError::Aborted(format!(
                "execution task failed: {}",
                e
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Interrupts the backend statement on drop unless disarmed.
///
/// Held across backend calls inside a worker so that dropping the execution
/// future on cancellation also stops the statement on the server.
pub(crate) struct InterruptGuard {
    handle: Option<Arc<dyn QueryCancelHandle>>,
}

impl InterruptGuard {
    pub(crate) fn new(handle: Option<Arc<dyn QueryCancelHandle>>) -> Self {
        Self { handle }
    }

    pub(crate) fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!("interrupting backend statement of abandoned execution");
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_returns_result() {
        let pool = WorkerPool::new(2);
        let value = pool.spawn(async { Ok(21 * 2) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_cancel_running_execution() {
        let pool = WorkerPool::new(1);
        let handle = pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        tokio::task::yield_now().await;

        handle.cancel();
        let err = handle.await.unwrap_err();
        assert_eq!(err.kind(), templar_core::ErrorKind::Cancelled);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_worker() {
        let pool = WorkerPool::new(1);
        let blocker = pool.spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        });
        let queued = pool.spawn(async { Ok(2) });

        queued.cancel();
        assert!(queued.await.is_err());
        assert_eq!(blocker.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_detached_slot_outlives_task() {
        let pool = WorkerPool::new(1);
        let permit = pool
            .spawn_with_slot(|slot| async move { Ok(slot.detach()) })
            .await
            .unwrap();
        assert!(permit.is_some());
        assert_eq!(pool.available(), 0);

        drop(permit);
        assert_eq!(pool.available(), 1);
        assert!(pool.spawn_with_slot(|_| async { Ok(()) }).await.is_ok());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_interrupt_guard() {
        struct Counter(AtomicUsize);
        impl QueryCancelHandle for Counter {
            fn cancel(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        drop(InterruptGuard::new(Some(counter.clone())));
        InterruptGuard::new(Some(counter.clone())).disarm();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
