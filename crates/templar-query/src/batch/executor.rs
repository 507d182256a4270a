//! Batch executor implementation
//!
//! Items are isolated by default: a failing item yields a `Failure` outcome
//! at its index and its siblings still run. Fail-fast marks every item that
//! had not started when the first failure was seen as `Aborted`. Atomic
//! batches run in order on one connection inside one transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use templar_core::{ErrorKind, Result, TemplarError};
use tokio::sync::Semaphore;

use crate::engine::QueryEngine;
use crate::executor::{ExecutionOutcome, ExecutionTarget, QueryExecutor, ResultMode, RowStream};
use crate::parameters::{BoundStatement, ParameterSet};
use crate::worker::InterruptGuard;

/// Configuration options for batch execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub mode: ExecutionMode,
    /// Abort remaining items after the first failure
    pub fail_fast: bool,
    /// Run every item in one transaction; implies sequential execution
    pub atomic: bool,
    /// Maximum items in flight (only applies to Parallel mode)
    pub max_parallelism: usize,
    /// Result mode applied to every item
    pub result_mode: ResultMode,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Item `i + 1` starts only after item `i` completes
    pub fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            ..Self::default()
        }
    }

    pub fn parallel() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            ..Self::default()
        }
    }

    /// Sequential, one connection, one transaction
    pub fn atomic() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            atomic: true,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max.max(1);
        self
    }

    pub fn with_result_mode(mut self, mode: ResultMode) -> Self {
        self.result_mode = mode;
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            fail_fast: false,
            atomic: false,
            max_parallelism: 4,
            result_mode: ResultMode::Rows,
        }
    }
}

/// Execution order for batch items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One at a time, in order
    Sequential,
    /// Concurrently, order not guaranteed
    #[default]
    Parallel,
}

/// Outcome of one batch item
#[derive(Debug)]
pub struct BatchItemResult {
    /// Position of the item in the batch (0-based)
    pub index: usize,
    pub template_id: String,
    pub outcome: ExecutionOutcome,
    pub execution_time: Duration,
}

impl BatchItemResult {
    fn new(index: usize, template_id: String, outcome: ExecutionOutcome, execution_time: Duration) -> Self {
        Self {
            index,
            template_id,
            outcome,
            execution_time,
        }
    }

    fn aborted(index: usize, template_id: String, reason: &str) -> Self {
        Self::new(index, template_id, ExecutionOutcome::aborted(reason), Duration::ZERO)
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn is_aborted(&self) -> bool {
        self.outcome.failure_kind() == Some(ErrorKind::Aborted)
    }

    /// Failed on its own account, not aborted
    pub fn is_failed(&self) -> bool {
        self.outcome.is_failure() && !self.is_aborted()
    }
}

/// Result of batch execution containing every item's outcome in order
#[derive(Debug)]
pub struct BatchExecutionResult {
    pub results: Vec<BatchItemResult>,
    pub total_execution_time: Duration,
    pub success_count: usize,
    pub failure_count: usize,
    pub aborted_count: usize,
    /// Whether the batch ran inside a transaction
    pub in_transaction: bool,
    /// Whether that transaction was rolled back
    pub rolled_back: bool,
}

impl BatchExecutionResult {
    pub fn new(
        mut results: Vec<BatchItemResult>,
        total_time: Duration,
        in_transaction: bool,
        rolled_back: bool,
    ) -> Self {
        results.sort_by_key(|r| r.index);
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.iter().filter(|r| r.is_failed()).count();
        let aborted_count = results.iter().filter(|r| r.is_aborted()).count();

        Self {
            results,
            total_execution_time: total_time,
            success_count,
            failure_count,
            aborted_count,
            in_transaction,
            rolled_back,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.success_count == self.results.len()
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }

    /// Outcomes in item order
    pub fn outcomes(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.results.iter().map(|r| &r.outcome)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Runs batches of template executions on a `QueryEngine`
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    options: BatchOptions,
}

impl BatchExecutor {
    pub fn new(options: BatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Execute `template_ids[i]` with `param_sets[i]` for every `i`.
    ///
    /// Fails with `ArityMismatch` before touching any connection if the two
    /// lists differ in length. Per-item failures are reported in the result.
    pub async fn execute(
        &self,
        engine: &Arc<QueryEngine>,
        template_ids: Vec<String>,
        param_sets: Vec<ParameterSet>,
    ) -> Result<BatchExecutionResult> {
        if template_ids.len() != param_sets.len() {
            return Err(TemplarError::ArityMismatch {
                expected: template_ids.len(),
                actual: param_sets.len(),
            });
        }

        let batch_start = Instant::now();
        let items: Vec<(String, ParameterSet)> = template_ids.into_iter().zip(param_sets).collect();
        if items.is_empty() {
            return Ok(BatchExecutionResult::new(Vec::new(), Duration::ZERO, false, false));
        }

        tracing::info!(
            items = items.len(),
            mode = ?self.options.mode,
            fail_fast = self.options.fail_fast,
            atomic = self.options.atomic,
            "executing batch"
        );

        let result = if self.options.atomic {
            if self.options.mode == ExecutionMode::Parallel {
                tracing::warn!("atomic batches run sequentially on one connection, ignoring parallel mode");
            }
            self.execute_atomic(engine, items, batch_start).await?
        } else {
            match self.options.mode {
                ExecutionMode::Sequential => self.execute_sequential(engine, items, batch_start).await,
                ExecutionMode::Parallel => self.execute_parallel(engine, items, batch_start).await,
            }
        };

        tracing::info!(
            success = result.success_count,
            failed = result.failure_count,
            aborted = result.aborted_count,
            rolled_back = result.rolled_back,
            duration_ms = result.total_execution_time.as_millis() as u64,
            "batch completed"
        );
        Ok(result)
    }

    async fn execute_sequential(
        &self,
        engine: &Arc<QueryEngine>,
        items: Vec<(String, ParameterSet)>,
        batch_start: Instant,
    ) -> BatchExecutionResult {
        let mut results = Vec::with_capacity(items.len());
        let mut should_stop = false;

        for (index, (template_id, params)) in items.into_iter().enumerate() {
            if should_stop {
                results.push(BatchItemResult::aborted(index, template_id, "an earlier batch item failed"));
                continue;
            }

            let result = dispatch_item(engine, index, template_id, params, self.options.result_mode).await;
            if !result.is_success() && self.options.fail_fast {
                should_stop = true;
            }
            results.push(result);
        }

        BatchExecutionResult::new(results, batch_start.elapsed(), false, false)
    }

    async fn execute_parallel(
        &self,
        engine: &Arc<QueryEngine>,
        items: Vec<(String, ParameterSet)>,
        batch_start: Instant,
    ) -> BatchExecutionResult {
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallelism.max(1)));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let fail_fast = self.options.fail_fast;
        let result_mode = self.options.result_mode;

        let mut results = Vec::with_capacity(items.len());
        let mut handles = Vec::with_capacity(items.len());
        for (index, (template_id, params)) in items.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore).acquire_owned().await.ok();

            // Checked after the permit so items queued behind a failure abort
            if fail_fast && stop_flag.load(Ordering::Acquire) {
                results.push(BatchItemResult::aborted(index, template_id, "an earlier batch item failed"));
                continue;
            }

            let task_engine = Arc::clone(engine);
            let stop_flag = Arc::clone(&stop_flag);
            let task_template_id = template_id.clone();
            let handle = engine.workers().spawn(async move {
                let _permit = permit;
                let result = run_item(&task_engine, index, task_template_id, params, result_mode).await;
                if fail_fast && !result.is_success() {
                    stop_flag.store(true, Ordering::Release);
                }
                Ok(result)
            });
            handles.push((index, template_id, handle));
        }

        for (index, template_id, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(BatchItemResult::new(
                    index,
                    template_id,
                    ExecutionOutcome::from_error(&e),
                    Duration::ZERO,
                )),
            }
        }

        BatchExecutionResult::new(results, batch_start.elapsed(), false, false)
    }

    async fn execute_atomic(
        &self,
        engine: &Arc<QueryEngine>,
        items: Vec<(String, ParameterSet)>,
        batch_start: Instant,
    ) -> Result<BatchExecutionResult> {
        let task_engine = Arc::clone(engine);
        let result_mode = self.options.result_mode;
        engine
            .workers()
            .spawn(async move { run_atomic(&task_engine, items, result_mode, batch_start).await })
            .await
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(BatchOptions::default())
    }
}

/// Run one item on a worker, folding any error into its outcome
async fn dispatch_item(
    engine: &Arc<QueryEngine>,
    index: usize,
    template_id: String,
    params: ParameterSet,
    mode: ResultMode,
) -> BatchItemResult {
    let task_engine = Arc::clone(engine);
    let task_template_id = template_id.clone();
    let handle = engine
        .workers()
        .spawn(async move { Ok(run_item(&task_engine, index, task_template_id, params, mode).await) });

    match handle.await {
        Ok(result) => result,
        Err(e) => BatchItemResult::new(index, template_id, ExecutionOutcome::from_error(&e), Duration::ZERO),
    }
}

/// Resolve, bind and run one item, folding any error into its outcome
async fn run_item(
    engine: &QueryEngine,
    index: usize,
    template_id: String,
    params: ParameterSet,
    mode: ResultMode,
) -> BatchItemResult {
    let start = Instant::now();
    // Streams are materialized so no item keeps a connection past its run.
    let materialize = matches!(mode, ResultMode::Stream { .. });
    let run_mode = if materialize { ResultMode::Rows } else { mode };
    let outcome = match engine.execute(&template_id, &params, run_mode).await {
        Ok(ExecutionOutcome::RowSet(rows)) if materialize => {
            ExecutionOutcome::RowStream(RowStream::from_rows(rows))
        }
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(index, template_id = %template_id, error = %e, "batch item failed");
            ExecutionOutcome::from_error(&e)
        }
    };
    BatchItemResult::new(index, template_id, outcome, start.elapsed())
}

/// All items on one connection in one transaction.
///
/// Every item is resolved and bound first; a failure there rejects the batch
/// without borrowing a connection. The first execution failure rolls the
/// transaction back and aborts every later item.
async fn run_atomic(
    engine: &QueryEngine,
    items: Vec<(String, ParameterSet)>,
    mode: ResultMode,
    batch_start: Instant,
) -> Result<BatchExecutionResult> {
    let mut prepared: Vec<(String, BoundStatement)> = Vec::with_capacity(items.len());
    let mut prepare_failure: Option<(usize, TemplarError)> = None;
    for (index, (template_id, params)) in items.iter().enumerate() {
        match engine.prepare(template_id, params) {
            Ok(bound) => prepared.push((template_id.clone(), bound)),
            Err(e) => {
                prepare_failure = Some((index, e));
                break;
            }
        }
    }

    if let Some((failed_index, error)) = prepare_failure {
        tracing::warn!(index = failed_index, error = %error, "atomic batch rejected before execution");
        let results = items
            .into_iter()
            .enumerate()
            .map(|(index, (template_id, _))| {
                if index == failed_index {
                    BatchItemResult::new(index, template_id, ExecutionOutcome::from_error(&error), Duration::ZERO)
                } else {
                    BatchItemResult::aborted(index, template_id, "atomic batch rejected")
                }
            })
            .collect();
        return Ok(BatchExecutionResult::new(results, batch_start.elapsed(), true, false));
    }

    let connection = engine.pool().get().await?;
    // Abandoning the batch mid-transaction retires the connection
    let guard = InterruptGuard::new(connection.cancel_handle());
    let transaction = connection.begin_transaction().await?;

    let mut results = Vec::with_capacity(prepared.len());
    let mut failed = false;
    for (index, (template_id, bound)) in prepared.into_iter().enumerate() {
        if failed {
            results.push(BatchItemResult::aborted(index, template_id, "atomic batch rolled back"));
            continue;
        }

        let start = Instant::now();
        let outcome = QueryExecutor::execute_on(ExecutionTarget::Transaction(transaction.as_ref()), &bound, mode)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(index, template_id = %template_id, error = %e, "atomic batch item failed");
                ExecutionOutcome::from_error(&e)
            });
        failed = outcome.is_failure();
        results.push(BatchItemResult::new(index, template_id, outcome, start.elapsed()));
    }

    if failed {
        transaction.rollback().await?;
    } else {
        transaction.commit().await?;
    }
    guard.disarm();
    connection.release();

    Ok(BatchExecutionResult::new(results, batch_start.elapsed(), true, failed))
}
