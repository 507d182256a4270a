//! The execution pipeline shared by single, batch and procedure calls
//!
//! resolve template -> bind parameters -> borrow a connection -> execute.
//! Resolution and binding never touch the pool, so their errors leave no
//! connection borrowed.

use std::sync::Arc;

use templar_connection::ConnectionPool;
use templar_core::{Result, TemplarError};
use templar_templates::TemplateRegistry;

use crate::executor::{ExecutionOutcome, QueryExecutor, ResultMode};
use crate::parameters::{BoundStatement, ParameterBinder, ParameterSet, TypeInference};
use crate::worker::{InterruptGuard, WorkerPool, WorkerSlot};
use crate::EngineConfig;

/// Registry, binder, pool and workers for one data source
pub struct QueryEngine {
    config: EngineConfig,
    registry: Arc<TemplateRegistry>,
    pool: ConnectionPool,
    binder: ParameterBinder,
    workers: WorkerPool,
}

impl QueryEngine {
    pub fn new(config: EngineConfig, pool: ConnectionPool, registry: Arc<TemplateRegistry>) -> Result<Self> {
        config.validate()?;
        let binder = ParameterBinder::new(
            TypeInference::new(config.date_pattern.clone()),
            pool.placeholder_style(),
            config.binding_mode,
        );
        let workers = WorkerPool::new(config.worker_pool_size);
        Ok(Self {
            config,
            registry,
            pool,
            binder,
            workers,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn binder(&self) -> &ParameterBinder {
        &self.binder
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Resolve and bind without any backend I/O
    pub fn prepare(&self, template_id: &str, params: &ParameterSet) -> Result<BoundStatement> {
        let template = self.registry.resolve(template_id)?;
        if template.sql_text.trim().is_empty() {
            return Err(TemplarError::InvalidTemplate(format!(
                "template '{}' has no SQL text",
                template_id
            )));
        }
        self.binder.bind(&template.sql_text, params)
    }

    /// Borrow a connection and run an already bound statement.
    ///
    /// If this future is dropped mid-flight the backend statement is
    /// interrupted and the connection goes back to the pool.
    pub async fn run(&self, bound: &BoundStatement, mode: ResultMode) -> Result<ExecutionOutcome> {
        let connection = self.pool.get().await?;
        let guard = InterruptGuard::new(connection.cancel_handle());
        let outcome = QueryExecutor::execute(connection, bound, mode, self.config.default_fetch_size).await;
        guard.disarm();
        outcome
    }

    /// `prepare` then `run`
    pub async fn execute(
        &self,
        template_id: &str,
        params: &ParameterSet,
        mode: ResultMode,
    ) -> Result<ExecutionOutcome> {
        let bound = self.prepare(template_id, params)?;
        self.run(&bound, mode).await
    }

    /// `execute` inside a worker task.
    ///
    /// An open stream takes over the worker's slot, so streams count
    /// against the worker pool for as long as they hold a connection.
    pub(crate) async fn execute_in_worker(
        &self,
        template_id: &str,
        params: &ParameterSet,
        mode: ResultMode,
        slot: WorkerSlot,
    ) -> Result<ExecutionOutcome> {
        let mut outcome = self.execute(template_id, params, mode).await?;
        if let ExecutionOutcome::RowStream(stream) = &mut outcome {
            if let Some(permit) = slot.detach() {
                stream.hold_worker(permit);
            }
        }
        Ok(outcome)
    }
}
