//! Stored procedure invocation
//!
//! A call is described by a `ProcedureCallSpec`: IN values at positions
//! `1..=n` followed by OUT slots at `n+1..=n+m`. An invocation moves through
//! `Built -> Bound -> Executed -> Extracted` exactly once, with no retries.

mod invoker;
mod spec;
#[cfg(test)]
mod tests;

pub use invoker::{CallState, ProcedureInvocation};
pub use spec::{OutDeclaration, OutParam, ProcedureCallSpec, build_call_string};
