//! Engine configuration

use serde::{Deserialize, Serialize};
use templar_core::{Result, TemplarError};
use templar_templates::SqlFilters;

/// How parameter values reach the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingMode {
    /// Placeholders are rewritten to the driver's native style and values are
    /// bound through the driver
    #[default]
    Native,
    /// Values are rendered as SQL literals into the statement text.
    ///
    /// Open to SQL injection through parameter values; only for backends or
    /// statements that cannot take bound parameters.
    Literal,
}

/// Configuration for the query engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum executions running at once
    pub worker_pool_size: usize,
    pub binding_mode: BindingMode,
    /// chrono format string tried when inferring timestamps from untyped values
    pub date_pattern: String,
    /// Table the template registry is loaded from
    pub template_table: String,
    /// Rows fetched per round trip when a stream does not ask for a size
    pub default_fetch_size: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_binding_mode(mut self, mode: BindingMode) -> Self {
        self.binding_mode = mode;
        self
    }

    pub fn with_date_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.date_pattern = pattern.into();
        self
    }

    pub fn with_template_table(mut self, table: impl Into<String>) -> Self {
        self.template_table = table.into();
        self
    }

    pub fn with_default_fetch_size(mut self, size: usize) -> Self {
        self.default_fetch_size = size;
        self
    }

    /// Check the configuration before the engine starts.
    ///
    /// Literal binding is accepted but logged as an injection risk.
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(TemplarError::Configuration(
                "worker_pool_size must be greater than 0".into(),
            ));
        }
        if self.default_fetch_size == 0 {
            return Err(TemplarError::Configuration(
                "default_fetch_size must be greater than 0".into(),
            ));
        }
        if self.date_pattern.trim().is_empty() {
            return Err(TemplarError::Configuration("date_pattern must not be empty".into()));
        }
        if !SqlFilters::is_plain_identifier(&self.template_table) {
            return Err(TemplarError::Configuration(format!(
                "template_table '{}' must be a plain identifier, optionally schema-qualified",
                self.template_table
            )));
        }

        if self.binding_mode == BindingMode::Literal {
            tracing::warn!(
                binding_mode = "literal",
                "parameter values will be rendered into SQL text; this is open to SQL injection, \
                 use native binding unless the backend cannot bind parameters"
            );
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            binding_mode: BindingMode::Native,
            date_pattern: "%d/%m/%Y %H.%M".to_string(),
            template_table: "db_template".to_string(),
            default_fetch_size: 100,
        }
    }
}
