//! Opens `PostgresConnection`s from host, port, database and credentials

use std::sync::Arc;

use async_trait::async_trait;
use templar_core::{Connection, DataSourceConfig, DatabaseDriver, PlaceholderStyle, Result};

use crate::PostgresConnection;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DATABASE: &str = "postgres";

/// Reads `host`, `port`, `database`, `user` and `password`; placeholders are `$N`
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }

    #[tracing::instrument(skip_all)]
    async fn connect(&self, config: &DataSourceConfig) -> Result<Arc<dyn Connection>> {
        let host = config.get_string("host").unwrap_or_else(|| DEFAULT_HOST.into());
        let port = config.get_u16("port").unwrap_or(DEFAULT_PORT);
        let database = config.get_string("database").unwrap_or_else(|| DEFAULT_DATABASE.into());
        let user = config.get_string("user").or_else(|| config.get_string("username"));
        let password = config.get_string("password");
        tracing::debug!(host = %host, port, database = %database, "connecting to postgres");

        let conn = PostgresConnection::connect(&host, port, &database, user.as_deref(), password.as_deref())
            .await
            .inspect_err(|e| tracing::error!(error = %e, "could not connect to postgres"))?;

        Ok(Arc::new(conn))
    }
}
