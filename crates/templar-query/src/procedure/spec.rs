use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use templar_core::{Result, SqlType, TemplarError};

use crate::parameters::ParamValue;

/// A declared OUT parameter slot
#[derive(Debug, Clone, PartialEq)]
pub struct OutParam {
    pub sql_type: SqlType,
    /// Key of the value in the result; `OUT_PARAM_<position>` when absent
    pub name: Option<String>,
}

impl OutParam {
    pub fn result_key(&self, position: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("OUT_PARAM_{}", position))
    }
}

/// OUT slot as written by callers: a type name, or a type name and result key.
///
/// `"NUMBER"` or `{"type": "NUMBER", "name": "total"}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OutDeclaration {
    Type(String),
    Named {
        #[serde(rename = "type")]
        type_name: String,
        name: Option<String>,
    },
}

impl OutDeclaration {
    fn into_param(self) -> Result<OutParam> {
        let (type_name, name) = match self {
            Self::Type(type_name) => (type_name, None),
            Self::Named { type_name, name } => (type_name, name),
        };
        Ok(OutParam {
            sql_type: SqlType::from_name(&type_name)?,
            name,
        })
    }
}

/// Everything needed to call one stored procedure
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCallSpec {
    pub schema: Option<String>,
    pub catalog: Option<String>,
    pub procedure_name: String,
    pub in_params: BTreeMap<usize, ParamValue>,
    pub out_params: BTreeMap<usize, OutParam>,
}

impl ProcedureCallSpec {
    pub fn new(procedure_name: impl Into<String>) -> Self {
        Self {
            schema: None,
            catalog: None,
            procedure_name: procedure_name.into(),
            in_params: BTreeMap::new(),
            out_params: BTreeMap::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn with_in(mut self, position: usize, value: impl Into<ParamValue>) -> Self {
        self.in_params.insert(position, value.into());
        self
    }

    pub fn with_out(mut self, position: usize, sql_type: SqlType, name: Option<&str>) -> Self {
        self.out_params.insert(
            position,
            OutParam {
                sql_type,
                name: name.map(str::to_string),
            },
        );
        self
    }

    /// Build a spec from string-keyed position maps, as received from callers.
    ///
    /// IN values are untyped text and go through type inference at bind time.
    /// Keys must parse as positions and be contiguous: IN at `1..=n`, OUT at
    /// `n+1..=n+m`.
    pub fn from_positional_maps(
        procedure_name: &str,
        schema: Option<&str>,
        catalog: Option<&str>,
        in_params: &HashMap<String, String>,
        out_params: &HashMap<String, OutDeclaration>,
    ) -> Result<Self> {
        let mut spec = Self::new(procedure_name);
        spec.schema = schema.map(str::to_string);
        spec.catalog = catalog.map(str::to_string);

        for (key, value) in in_params {
            let position = parse_position(key)?;
            spec.in_params.insert(position, ParamValue::untyped(value.clone()));
        }
        for (key, declaration) in out_params {
            let position = parse_position(key)?;
            spec.out_params.insert(position, declaration.clone().into_param()?);
        }

        // "1" and "01" name the same slot
        let distinct = spec.arity();
        let supplied = in_params.len() + out_params.len();
        if distinct != supplied {
            return Err(TemplarError::ArityMismatch {
                expected: supplied,
                actual: distinct,
            });
        }

        spec.validate()?;
        Ok(spec)
    }

    /// Total placeholder count
    pub fn arity(&self) -> usize {
        self.in_params.len() + self.out_params.len()
    }

    /// `[schema.][catalog.]procedure`
    pub fn qualified_name(&self) -> String {
        let mut name = String::new();
        for part in [&self.schema, &self.catalog].into_iter().flatten() {
            name.push_str(part);
            name.push('.');
        }
        name.push_str(&self.procedure_name);
        name
    }

    /// Check positions are contiguous from 1, IN slots before OUT slots
    pub fn validate(&self) -> Result<()> {
        if self.procedure_name.trim().is_empty() {
            return Err(TemplarError::InvalidTemplate("procedure name is empty".into()));
        }

        let positions = self.in_params.keys().chain(self.out_params.keys());
        for (expected, &actual) in (1..).zip(positions) {
            if actual != expected {
                return Err(TemplarError::ArityMismatch { expected, actual });
            }
        }
        Ok(())
    }
}

fn parse_position(key: &str) -> Result<usize> {
    match key.trim().parse::<usize>() {
        Ok(position) if position > 0 => Ok(position),
        _ => Err(TemplarError::TypeConversion(format!(
            "parameter position '{}' is not a positive integer",
            key
        ))),
    }
}

/// `{call [schema.][catalog.]name(?, ?, ...)}` with one `?` per slot
pub fn build_call_string(spec: &ProcedureCallSpec) -> String {
    let placeholders = vec!["?"; spec.arity()].join(", ");
    format!("{{call {}({})}}", spec.qualified_name(), placeholders)
}
