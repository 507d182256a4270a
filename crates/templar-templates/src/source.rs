//! Backing stores a registry is refreshed from

use async_trait::async_trait;
use templar_connection::ConnectionPool;
use templar_core::{Result, TemplarError, Value};

use crate::{SqlFilters, Template};

/// A store holding the full template set.
///
/// `load` returns every template or fails; a partial read is an error.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Template>>;

    /// Short description used in logs
    fn describe(&self) -> String;
}

/// Reads `template_id, query_string` rows from a table over a pooled connection
pub struct TableTemplateSource {
    pool: ConnectionPool,
    table: String,
}

impl TableTemplateSource {
    /// `table` must be a plain, optionally schema-qualified, identifier
    pub fn new(pool: ConnectionPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !SqlFilters::is_plain_identifier(&table) {
            return Err(TemplarError::Configuration(format!(
                "template table '{}' is not a plain identifier",
                table
            )));
        }
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn load_query(&self) -> String {
        format!("SELECT template_id, query_string FROM {}", self.table)
    }
}

fn column_text(value: Option<&Value>, column: &str, row: usize) -> Result<String> {
    match value {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(TemplarError::SourceUnavailable(format!(
            "row {} has no {}",
            row, column
        ))),
        Some(other) => Ok(other.to_string()),
    }
}

#[async_trait]
impl TemplateSource for TableTemplateSource {
    async fn load(&self) -> Result<Vec<Template>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| TemplarError::SourceUnavailable(e.to_string()))?;

        let result = conn
            .query(&self.load_query(), &[])
            .await
            .map_err(|e| TemplarError::SourceUnavailable(e.to_string()))?;
        conn.release();

        let mut templates = Vec::with_capacity(result.rows.len());
        for (index, row) in result.rows.iter().enumerate() {
            let id = column_text(row.get(0), "template_id", index)?;
            let sql_text = column_text(row.get(1), "query_string", index)?;
            templates.push(Template { id, sql_text });
        }

        tracing::debug!(table = %self.table, count = templates.len(), "loaded templates");
        Ok(templates)
    }

    fn describe(&self) -> String {
        format!("table {}", self.table)
    }
}

/// A fixed template set, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateSource {
    templates: Vec<Template>,
}

impl StaticTemplateSource {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    pub fn with_template(mut self, id: &str, sql_text: &str) -> Self {
        self.templates.push(Template::new(id, sql_text));
        self
    }
}

#[async_trait]
impl TemplateSource for StaticTemplateSource {
    async fn load(&self) -> Result<Vec<Template>> {
        Ok(self.templates.clone())
    }

    fn describe(&self) -> String {
        format!("{} static templates", self.templates.len())
    }
}
