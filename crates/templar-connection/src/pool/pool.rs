//! Bounded pool of backend connections shared by executions, streams and batches

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use templar_core::{Connection, PlaceholderStyle, QueryCancelHandle, Result, TemplarError};

use super::config::PoolConfig;
use super::stats::PoolStats;

/// Opens backend connections on behalf of a pool
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open one backend connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Whether an idle connection may be handed out again
    ///
    /// Default implementation checks that the connection is not closed.
    async fn validate(&self, conn: &dyn Connection) -> bool {
        !conn.is_closed()
    }

    /// Placeholder syntax of the connections this factory creates
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::default()
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    async fn validate(&self, conn: &dyn Connection) -> bool {
        (**self).validate(conn).await
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        (**self).placeholder_style()
    }
}

/// An idle connection with its lifecycle timestamps
struct IdleConnection {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    returned_at: Instant,
    interrupted: Arc<AtomicBool>,
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<VecDeque<IdleConnection>>,
    /// Limits total checked-out connections to `max_size`
    semaphore: Arc<Semaphore>,
    active_count: AtomicUsize,
    waiting_count: AtomicUsize,
}

impl PoolInner {
    fn return_connection(
        &self,
        connection: Arc<dyn Connection>,
        created_at: Instant,
        interrupted: Arc<AtomicBool>,
    ) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);

        if connection.is_closed() {
            tracing::debug!("dropping closed connection instead of returning it");
            return;
        }
        if interrupted.load(Ordering::SeqCst) {
            tracing::debug!("dropping interrupted connection instead of returning it");
            return;
        }

        self.idle.lock().push_back(IdleConnection {
            connection,
            created_at,
            returned_at: Instant::now(),
            interrupted,
        });
    }
}

/// A bounded pool of backend connections
///
/// Cloning the pool is cheap; clones share the same connections. Connections
/// are returned to the pool when the `PooledConnection` is released or
/// dropped, whichever happens first.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// A pool that opens connections lazily through `factory`
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size()));
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory: Arc::new(factory),
                idle: Mutex::new(VecDeque::new()),
                semaphore,
                active_count: AtomicUsize::new(0),
                waiting_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Borrow a connection, waiting up to the acquire timeout for a free slot
    ///
    /// This will:
    /// 1. Wait (up to the acquire timeout) until fewer than `max_size`
    ///    connections are checked out
    /// 2. Reuse an idle connection that is still valid and young enough
    /// 3. Otherwise open a new connection through the factory
    ///
    /// Returns `PoolExhausted` if the acquire timeout is exceeded.
    pub async fn get(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        inner.waiting_count.fetch_add(1, Ordering::SeqCst);

        let acquired = tokio::time::timeout(
            inner.config.acquire_timeout(),
            inner.semaphore.clone().acquire_owned(),
        )
        .await;

        inner.waiting_count.fetch_sub(1, Ordering::SeqCst);

        let permit = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(TemplarError::Connection("Pool semaphore closed".into()));
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = inner.config.acquire_timeout().as_millis() as u64,
                    max_size = inner.config.max_size(),
                    "connection pool exhausted"
                );
                return Err(TemplarError::PoolExhausted(format!(
                    "no connection became free within {:?}",
                    inner.config.acquire_timeout()
                )));
            }
        };

        // A failed create drops the permit, so the slot is freed again
        let (connection, created_at, interrupted) = match self.try_get_idle().await {
            Some(idle) => (idle.connection, idle.created_at, idle.interrupted),
            None => {
                let connection = inner.factory.create().await?;
                tracing::debug!(driver = connection.driver_name(), "opened pooled connection");
                (connection, Instant::now(), Arc::new(AtomicBool::new(false)))
            }
        };

        inner.active_count.fetch_add(1, Ordering::SeqCst);

        Ok(PooledConnection {
            connection,
            created_at,
            interrupted,
            pool: Arc::clone(inner),
            _permit: permit,
        })
    }

    /// Pop idle connections until one is fresh and passes validation
    async fn try_get_idle(&self) -> Option<IdleConnection> {
        let config = &self.inner.config;
        loop {
            let idle = { self.inner.idle.lock().pop_front() }?;

            let expired = config
                .max_lifetime()
                .is_some_and(|max| idle.created_at.elapsed() > max);
            let stale = idle.returned_at.elapsed() > config.idle_timeout();
            // An interrupt fired after the connection came back
            let interrupted = idle.interrupted.load(Ordering::SeqCst);

            if expired || stale || interrupted || !self.inner.factory.validate(&*idle.connection).await {
                tracing::debug!(expired, stale, interrupted, "closing unusable idle connection");
                let _ = idle.connection.close().await;
                continue;
            }

            return Some(idle);
        }
    }

    /// Open connections until at least `min_size` are held by the pool
    ///
    /// Returns the number of connections opened.
    pub async fn warm_up(&self) -> Result<usize> {
        let inner = &self.inner;
        let mut opened = 0;

        loop {
            let total = inner.idle.lock().len() + inner.active_count.load(Ordering::SeqCst);
            if total >= inner.config.min_size() {
                break;
            }
            let connection = inner.factory.create().await?;
            let now = Instant::now();
            inner.idle.lock().push_back(IdleConnection {
                connection,
                created_at: now,
                returned_at: now,
                interrupted: Arc::new(AtomicBool::new(false)),
            });
            opened += 1;
        }

        tracing::info!(opened, min_size = inner.config.min_size(), "connection pool warmed up");
        Ok(opened)
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            idle: inner.idle.lock().len(),
            active: inner.active_count.load(Ordering::SeqCst),
            waiting: inner.waiting_count.load(Ordering::SeqCst),
            available: inner.semaphore.available_permits(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Placeholder syntax of the pooled backend
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.inner.factory.placeholder_style()
    }

    /// Close every idle connection; borrowed ones are unaffected
    pub async fn close_idle(&self) {
        let connections: Vec<_> = {
            let mut idle = self.inner.idle.lock();
            idle.drain(..).collect()
        };

        for idle in connections {
            let _ = idle.connection.close().await;
        }
    }
}

/// A borrowed connection, handed back to its pool on `release` or drop
///
/// Owns its slot in the pool, so it can be moved into spawned tasks and
/// streams. The connection goes back to the pool exactly once, on `release`
/// or on drop. A connection whose statement was interrupted is never handed
/// out again: the interrupt may still be in flight to the server.
pub struct PooledConnection {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    /// Set once an interrupt was sent; shared with every cancel handle
    interrupted: Arc<AtomicBool>,
    pool: Arc<PoolInner>,
    // Dropped after the connection is back in the idle queue
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Shared handle to the backend connection
    pub fn inner(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Return the connection to the pool
    pub fn release(self) {
        drop(self);
    }

    /// Give up the slot without keeping the connection for reuse
    pub fn discard(self) {
        self.interrupted.store(true, Ordering::SeqCst);
        drop(self);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// The backend's cancel handle; firing it also retires this connection
    pub fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        let backend = self.connection.cancel_handle()?;
        Some(Arc::new(RetiringCancelHandle {
            backend,
            interrupted: Arc::clone(&self.interrupted),
        }))
    }
}

struct RetiringCancelHandle {
    backend: Arc<dyn QueryCancelHandle>,
    interrupted: Arc<AtomicBool>,
}

impl QueryCancelHandle for RetiringCancelHandle {
    fn cancel(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.backend.cancel();
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.return_connection(
            Arc::clone(&self.connection),
            self.created_at,
            Arc::clone(&self.interrupted),
        );
    }
}
