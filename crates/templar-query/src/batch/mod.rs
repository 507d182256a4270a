//! Batch execution of (template, parameters) pairs
//!
//! This module runs many independent template executions with configurable
//! ordering, failure handling and transaction wrapping, and reports one
//! outcome per item.

mod executor;
#[cfg(test)]
mod tests;

pub use executor::{BatchExecutionResult, BatchExecutor, BatchItemResult, BatchOptions, ExecutionMode};
