//! Opens `SqliteConnection`s from a data source's `path`

use std::sync::Arc;

use async_trait::async_trait;
use templar_core::{
    Connection, DataSourceConfig, DatabaseDriver, PlaceholderStyle, Result, TemplarError,
};

use crate::SqliteConnection;

/// Reads `path` (or `database`) from the data source; placeholders are `?N`
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub const fn new() -> Self {
        Self
    }

    fn database_path(config: &DataSourceConfig) -> Result<String> {
        config
            .get_string("path")
            .or_else(|| config.get_string("database"))
            .ok_or_else(|| {
                TemplarError::Configuration(
                    "sqlite data source needs a 'path' parameter, e.g. params = { path = \"app.db\" }"
                        .into(),
                )
            })
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionNumbered
    }

    #[tracing::instrument(skip_all)]
    async fn connect(&self, config: &DataSourceConfig) -> Result<Arc<dyn Connection>> {
        let path = Self::database_path(config)?;
        tracing::debug!(path = %path, "opening sqlite database");

        // File I/O and pragmas run off the async threads
        let conn = tokio::task::spawn_blocking(move || SqliteConnection::open(&path))
            .await
            .map_err(|e| TemplarError::Connection(format!("sqlite open task failed: {}", e)))?
            .inspect_err(|e| tracing::error!(error = %e, "could not open sqlite database"))?;

        Ok(Arc::new(conn))
    }
}
