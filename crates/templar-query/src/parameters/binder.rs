//! SQL Parameter Binder
//!
//! Resolves the placeholders of a template against a `ParameterSet` and
//! produces a `BoundStatement` in the driver's placeholder style, or with the
//! values rendered as literals when literal binding is configured.

use std::collections::HashMap;

use templar_core::{PlaceholderStyle, Result, SqlType, TemplarError, Value};
use templar_templates::SqlFilters;

use super::{ParamValue, ParameterSet, Placeholder, PlaceholderMatch, TypeInference, extract_placeholders};
use crate::BindingMode;

/// A parameter value after binding
#[derive(Debug, Clone, PartialEq)]
pub struct BoundValue {
    pub value: Value,
    /// Type the caller declared, if any
    pub declared: Option<SqlType>,
    /// Type chosen by inference for untyped text
    pub inferred: Option<SqlType>,
}

impl BoundValue {
    /// The effective type: declared, else inferred, else the value's own
    pub fn sql_type(&self) -> Option<SqlType> {
        self.declared
            .or(self.inferred)
            .or_else(|| self.value.sql_type())
    }
}

/// Template text combined with its parameter values, ready to execute
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub sql: String,
    /// Values for placeholders `1..=values.len()`; empty in literal mode
    pub values: Vec<BoundValue>,
    pub mode: BindingMode,
}

impl BoundStatement {
    /// The values to hand to the driver
    pub fn params(&self) -> Vec<Value> {
        self.values.iter().map(|v| v.value.clone()).collect()
    }

    pub fn sql_preview(&self) -> String {
        self.sql.chars().take(100).collect()
    }
}

/// Binds parameter sets to template SQL
#[derive(Debug, Clone)]
pub struct ParameterBinder {
    inference: TypeInference,
    style: PlaceholderStyle,
    mode: BindingMode,
}

impl ParameterBinder {
    pub fn new(inference: TypeInference, style: PlaceholderStyle, mode: BindingMode) -> Self {
        Self {
            inference,
            style,
            mode,
        }
    }

    pub fn inference(&self) -> &TypeInference {
        &self.inference
    }

    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    /// Bind `params` to the placeholders of `sql`.
    ///
    /// Named sets bind `:name` placeholders; a name may appear several times
    /// and unused names are ignored. Positional sets bind `?` placeholders in
    /// order of appearance, or `$n` placeholders by number. Fewer values than
    /// placeholders fails with `UnboundPlaceholder`, more with `ArityMismatch`.
    pub fn bind(&self, sql: &str, params: &ParameterSet) -> Result<BoundStatement> {
        let placeholders = extract_placeholders(sql);

        let (slots, ordered) = match params {
            ParameterSet::Named(values) => self.bind_named(&placeholders, values)?,
            ParameterSet::Positional(values) => self.bind_positional(&placeholders, values)?,
        };

        let mut bound_values = Vec::with_capacity(ordered.len());
        for param in ordered {
            bound_values.push(self.bind_value(param)?);
        }

        let sql = match self.mode {
            BindingMode::Native => rewrite(sql, &placeholders, |slot| Ok(self.style.render(slot)), &slots)?,
            BindingMode::Literal => rewrite(
                sql,
                &placeholders,
                |slot| SqlFilters::literal(&bound_values[slot - 1].value),
                &slots,
            )?,
        };

        let values = match self.mode {
            BindingMode::Native => bound_values,
            BindingMode::Literal => Vec::new(),
        };

        tracing::trace!(placeholders = placeholders.len(), values = values.len(), "bound parameters");
        Ok(BoundStatement {
            sql,
            values,
            mode: self.mode,
        })
    }

    /// Map each named placeholder occurrence to a slot; one slot per distinct name
    fn bind_named<'a>(
        &self,
        placeholders: &[PlaceholderMatch],
        values: &'a HashMap<String, ParamValue>,
    ) -> Result<(Vec<usize>, Vec<&'a ParamValue>)> {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut ordered = Vec::new();
        let mut slots = Vec::with_capacity(placeholders.len());

        for m in placeholders {
            let name = match &m.placeholder {
                Placeholder::Named(name) => name.as_str(),
                Placeholder::Question => {
                    return Err(TemplarError::UnboundPlaceholder(
                        "'?' cannot be bound from named parameters".into(),
                    ));
                }
                Placeholder::Numbered(n) => {
                    return Err(TemplarError::UnboundPlaceholder(format!(
                        "'${}' cannot be bound from named parameters",
                        n
                    )));
                }
            };

            let slot = match positions.get(name) {
                Some(&slot) => slot,
                None => {
                    let value = values
                        .get(name)
                        .ok_or_else(|| TemplarError::UnboundPlaceholder(format!(":{}", name)))?;
                    ordered.push(value);
                    positions.insert(name, ordered.len());
                    ordered.len()
                }
            };
            slots.push(slot);
        }

        Ok((slots, ordered))
    }

    fn bind_positional<'a>(
        &self,
        placeholders: &[PlaceholderMatch],
        values: &'a [ParamValue],
    ) -> Result<(Vec<usize>, Vec<&'a ParamValue>)> {
        let mut question_count = 0;
        let mut max_numbered = 0;
        let mut slots = Vec::with_capacity(placeholders.len());

        for m in placeholders {
            match &m.placeholder {
                Placeholder::Named(name) => {
                    return Err(TemplarError::UnboundPlaceholder(format!(
                        ":{} cannot be bound from positional parameters",
                        name
                    )));
                }
                Placeholder::Question => {
                    question_count += 1;
                    slots.push(question_count);
                }
                Placeholder::Numbered(n) => {
                    max_numbered = max_numbered.max(*n);
                    slots.push(*n);
                }
            }
        }

        if question_count > 0 && max_numbered > 0 {
            return Err(TemplarError::InvalidTemplate(
                "template mixes '?' and '$n' placeholders".into(),
            ));
        }

        let expected = question_count.max(max_numbered);
        if values.len() < expected {
            let missing = values.len() + 1;
            let label = if question_count > 0 {
                format!("?{}", missing)
            } else {
                format!("${}", missing)
            };
            return Err(TemplarError::UnboundPlaceholder(label));
        }
        if values.len() > expected {
            return Err(TemplarError::ArityMismatch {
                expected,
                actual: values.len(),
            });
        }

        Ok((slots, values.iter().collect()))
    }

    fn bind_value(&self, param: &ParamValue) -> Result<BoundValue> {
        Ok(match param {
            ParamValue::Untyped(text) => {
                let value = self.inference.infer(text);
                BoundValue {
                    inferred: value.sql_type(),
                    value,
                    declared: None,
                }
            }
            ParamValue::Typed { text, sql_type } => BoundValue {
                value: self.inference.convert(text, *sql_type)?,
                declared: Some(*sql_type),
                inferred: None,
            },
            ParamValue::Value(value) => BoundValue {
                value: value.clone(),
                declared: None,
                inferred: None,
            },
        })
    }
}

/// Replace each placeholder occurrence with the rendering of its slot
fn rewrite<F>(sql: &str, placeholders: &[PlaceholderMatch], render: F, slots: &[usize]) -> Result<String>
where
    F: Fn(usize) -> Result<String>,
{
    let mut result = String::with_capacity(sql.len());
    let mut last_end = 0;
    for (m, &slot) in placeholders.iter().zip(slots) {
        result.push_str(&sql[last_end..m.start]);
        result.push_str(&render(slot)?);
        last_end = m.end;
    }
    result.push_str(&sql[last_end..]);
    Ok(result)
}
