use std::collections::HashMap;

use templar_core::{Connection, ErrorKind, OutSlot, ProcedureCall, Result, TemplarError, Value};

use super::{ProcedureCallSpec, build_call_string};
use crate::parameters::{ParamValue, TypeInference};

/// Progress of one procedure call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Call string built, positions validated
    Built,
    /// IN values converted
    Bound,
    /// Backend call returned OUT values
    Executed,
    /// OUT values handed to the caller
    Extracted,
}

/// One procedure call moving through `Built -> Bound -> Executed -> Extracted`
#[derive(Debug)]
pub struct ProcedureInvocation {
    spec: ProcedureCallSpec,
    call_sql: String,
    state: CallState,
    in_values: Vec<Value>,
    out_values: Vec<Value>,
}

impl ProcedureInvocation {
    /// Validate slot positions and build the call string
    pub fn build(spec: ProcedureCallSpec) -> Result<Self> {
        spec.validate()?;
        let call_sql = build_call_string(&spec);
        Ok(Self {
            spec,
            call_sql,
            state: CallState::Built,
            in_values: Vec::new(),
            out_values: Vec::new(),
        })
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn call_sql(&self) -> &str {
        &self.call_sql
    }

    pub fn spec(&self) -> &ProcedureCallSpec {
        &self.spec
    }

    /// Convert IN values to backend values, in position order
    pub fn bind(&mut self, inference: &TypeInference) -> Result<()> {
        self.expect_state(CallState::Built, "bind")?;

        let mut values = Vec::with_capacity(self.spec.in_params.len());
        for (position, param) in &self.spec.in_params {
            let value = match param {
                ParamValue::Untyped(text) => inference.infer(text),
                ParamValue::Typed { text, sql_type } => {
                    inference.convert(text, *sql_type).map_err(|e| match e {
                        TemplarError::TypeConversion(msg) | TemplarError::UnsupportedType(msg) => {
                            TemplarError::TypeConversion(format!("IN parameter {}: {}", position, msg))
                        }
                        other => other,
                    })?
                }
                ParamValue::Value(value) => value.clone(),
            };
            values.push(value);
        }

        self.in_values = values;
        self.state = CallState::Bound;
        Ok(())
    }

    /// Register OUT slots and run the call on `conn`.
    ///
    /// OUT types the backend cannot register fail with `UnsupportedType`
    /// before anything is sent; backend failures become `ProcedureFailed`.
    #[tracing::instrument(skip(self, conn), fields(procedure = %self.spec.qualified_name(), arity = self.spec.arity()))]
    pub async fn execute(&mut self, conn: &dyn Connection) -> Result<()> {
        self.expect_state(CallState::Bound, "execute")?;

        let first_out = self.in_values.len() + 1;
        let mut out_slots = Vec::with_capacity(self.spec.out_params.len());
        for (offset, out) in self.spec.out_params.values().enumerate() {
            if !conn.supports_out_type(out.sql_type) {
                return Err(TemplarError::UnsupportedType(format!(
                    "{} OUT parameters are not supported by {}",
                    out.sql_type,
                    conn.driver_name()
                )));
            }
            out_slots.push(OutSlot {
                position: first_out + offset,
                sql_type: out.sql_type,
            });
        }

        let call = ProcedureCall {
            call_sql: self.call_sql.clone(),
            procedure: self.spec.qualified_name(),
            in_values: std::mem::take(&mut self.in_values),
            out_slots,
        };

        let out_values = conn.call(&call).await.map_err(|e| {
            tracing::error!(error = %e, "procedure call failed");
            match e.kind() {
                ErrorKind::Backend => TemplarError::ProcedureFailed(e.to_string()),
                _ => e,
            }
        })?;

        if out_values.len() != call.out_slots.len() {
            return Err(TemplarError::ProcedureFailed(format!(
                "backend returned {} OUT values for {} slots",
                out_values.len(),
                call.out_slots.len()
            )));
        }

        self.in_values = call.in_values;
        self.out_values = out_values;
        self.state = CallState::Executed;
        Ok(())
    }

    /// OUT values keyed by their logical names
    pub fn extract(&mut self) -> Result<HashMap<String, Value>> {
        self.expect_state(CallState::Executed, "extract")?;

        let values = std::mem::take(&mut self.out_values);
        let result = self
            .spec
            .out_params
            .iter()
            .zip(values)
            .map(|((position, out), value)| (out.result_key(*position), value))
            .collect();

        self.state = CallState::Extracted;
        Ok(result)
    }

    /// Build, bind, execute and extract in one go
    pub async fn invoke(
        spec: ProcedureCallSpec,
        inference: &TypeInference,
        conn: &dyn Connection,
    ) -> Result<HashMap<String, Value>> {
        let mut invocation = Self::build(spec)?;
        invocation.bind(inference)?;
        invocation.execute(conn).await?;
        invocation.extract()
    }

    fn expect_state(&self, expected: CallState, step: &str) -> Result<()> {
        if self.state != expected {
            return Err(TemplarError::ProcedureFailed(format!(
                "cannot {} a call in state {:?}",
                step, self.state
            )));
        }
        Ok(())
    }
}
