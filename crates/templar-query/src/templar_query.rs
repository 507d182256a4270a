//! Templar Query - template-driven SQL execution
//!
//! This crate runs SQL resolved by template id: parameters are bound with
//! type inference, statements run on pooled connections through a bounded
//! worker pool, and results come back as scalars, row sets, lazy row streams,
//! affected-row counts or stored procedure OUT values.
//!
//! ## Example
//!
//! ```rust,ignore
//! use templar_query::{EngineConfig, ParameterSet, QueryService, ResultMode};
//!
//! let service = QueryService::new(EngineConfig::default(), pool)?;
//! service.refresh_templates().await?;
//!
//! let params = ParameterSet::named([("customer", "1042")]);
//! let outcome = service
//!     .execute_single("orders_by_customer", params, ResultMode::Rows)
//!     .await?;
//! ```

pub mod batch;
mod config;
mod engine;
pub mod executor;
pub mod parameters;
pub mod procedure;
mod service;
mod worker;

#[cfg(test)]
mod test_helpers;

pub use batch::{BatchExecutionResult, BatchExecutor, BatchItemResult, BatchOptions, ExecutionMode};
pub use config::{BindingMode, EngineConfig};
pub use engine::QueryEngine;
pub use executor::{ExecutionOutcome, ExecutionTarget, QueryExecutor, ResultMode, RowStream};
pub use parameters::{BoundStatement, BoundValue, ParamValue, ParameterBinder, ParameterSet, TypeInference};
pub use procedure::{CallState, OutDeclaration, OutParam, ProcedureCallSpec, ProcedureInvocation};
pub use service::QueryService;
pub use worker::{ExecutionHandle, WorkerPool};
