//! Caller-facing query service
//!
//! Entry point for front ends: template lookup and refresh, single and batch
//! execution, and stored procedure calls. Single executions and procedure
//! calls are dispatched to the worker pool and return an `ExecutionHandle`
//! that resolves when the work completes and can be cancelled.

use std::collections::BTreeMap;
use std::sync::Arc;

use templar_connection::ConnectionPool;
use templar_core::Result;
use templar_templates::{TableTemplateSource, Template, TemplateRegistry, TemplateSource};

use crate::batch::{BatchExecutionResult, BatchExecutor, BatchOptions};
use crate::engine::QueryEngine;
use crate::executor::{ExecutionOutcome, ResultMode};
use crate::parameters::ParameterSet;
use crate::procedure::{ProcedureCallSpec, ProcedureInvocation};
use crate::worker::{ExecutionHandle, InterruptGuard};
use crate::EngineConfig;

/// Service for executing templates and procedures against one data source
///
/// Cloning is cheap; clones share the registry, pool and workers.
#[derive(Clone)]
pub struct QueryService {
    engine: Arc<QueryEngine>,
}

impl QueryService {
    /// Create a service with an empty template registry
    pub fn new(config: EngineConfig, pool: ConnectionPool) -> Result<Self> {
        Self::with_registry(config, pool, Arc::new(TemplateRegistry::new()))
    }

    /// Create a service sharing an existing registry
    pub fn with_registry(
        config: EngineConfig,
        pool: ConnectionPool,
        registry: Arc<TemplateRegistry>,
    ) -> Result<Self> {
        let engine = QueryEngine::new(config, pool, registry)?;
        tracing::info!(
            workers = engine.config().worker_pool_size,
            binding_mode = ?engine.config().binding_mode,
            pool_max = engine.pool().config().max_size(),
            "query service ready"
        );
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        self.engine.registry()
    }

    pub fn pool(&self) -> &ConnectionPool {
        self.engine.pool()
    }

    pub fn resolve_template(&self, template_id: &str) -> Result<Template> {
        self.engine.registry().resolve(template_id)
    }

    /// Copy of every template id and SQL text
    pub fn list_templates(&self) -> BTreeMap<String, String> {
        self.engine.registry().list_all()
    }

    /// Reload the registry from the configured template table
    #[tracing::instrument(skip(self), fields(table = %self.engine.config().template_table))]
    pub async fn refresh_templates(&self) -> Result<usize> {
        let source = TableTemplateSource::new(
            self.engine.pool().clone(),
            self.engine.config().template_table.clone(),
        )?;
        self.refresh_from(&source).await
    }

    /// Reload the registry from any source
    pub async fn refresh_from(&self, source: &dyn TemplateSource) -> Result<usize> {
        self.engine.registry().refresh(source).await
    }

    /// Execute one template.
    ///
    /// Resolution and binding errors surface before any connection is
    /// borrowed. Cancelling the handle interrupts the backend statement and
    /// resolves to `Cancelled`. A returned stream occupies its worker until
    /// it ends or is closed.
    #[tracing::instrument(skip(self, params, mode), fields(params = params.len(), mode = mode.name()))]
    pub fn execute_single(
        &self,
        template_id: &str,
        params: ParameterSet,
        mode: ResultMode,
    ) -> ExecutionHandle<ExecutionOutcome> {
        let engine = Arc::clone(&self.engine);
        let template_id = template_id.to_string();
        self.engine.workers().spawn_with_slot(move |slot| async move {
            engine
                .execute_in_worker(&template_id, &params, mode, slot)
                .await
        })
    }

    /// Execute `template_ids[i]` with `param_sets[i]` for every `i`.
    ///
    /// Fails with `ArityMismatch` if the lists differ in length; per-item
    /// failures are reported in the result.
    pub async fn execute_batch(
        &self,
        template_ids: Vec<String>,
        param_sets: Vec<ParameterSet>,
        options: BatchOptions,
    ) -> Result<BatchExecutionResult> {
        BatchExecutor::new(options)
            .execute(&self.engine, template_ids, param_sets)
            .await
    }

    /// Call a stored procedure, yielding `ExecutionOutcome::ProcedureResult`
    #[tracing::instrument(skip(self, spec), fields(procedure = %spec.qualified_name()))]
    pub fn call_procedure(&self, spec: ProcedureCallSpec) -> ExecutionHandle<ExecutionOutcome> {
        let engine = Arc::clone(&self.engine);
        self.engine.workers().spawn(async move {
            let mut invocation = ProcedureInvocation::build(spec)?;
            invocation.bind(engine.binder().inference())?;

            let connection = engine.pool().get().await?;
            let guard = InterruptGuard::new(connection.cancel_handle());
            let executed = invocation.execute(&*connection).await;
            guard.disarm();
            connection.release();
            executed?;

            invocation.extract().map(ExecutionOutcome::ProcedureResult)
        })
    }
}
