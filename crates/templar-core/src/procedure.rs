//! Driver-facing description of a stored procedure call

use crate::{SqlType, Value};

/// An OUT parameter slot registered on a call
#[derive(Debug, Clone, PartialEq)]
pub struct OutSlot {
    /// 1-based placeholder position
    pub position: usize,
    pub sql_type: SqlType,
}

/// A fully built and bound procedure call, ready for a driver.
///
/// IN values occupy positions `1..=in_values.len()` and OUT slots follow
/// contiguously. Drivers return OUT values in `out_slots` order.
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    /// Escape-syntax call string, e.g. `{call billing.close_period(?, ?, ?)}`
    pub call_sql: String,
    /// Qualified procedure name without the argument list
    pub procedure: String,
    pub in_values: Vec<Value>,
    pub out_slots: Vec<OutSlot>,
}

impl ProcedureCall {
    /// Total placeholder count
    pub fn arity(&self) -> usize {
        self.in_values.len() + self.out_slots.len()
    }
}
