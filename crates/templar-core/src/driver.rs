//! Database driver trait and data source configuration

use crate::{Connection, PlaceholderStyle, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Where connections come from: a driver id plus driver-specific parameters.
///
/// SQLite reads `path`. PostgreSQL reads `host`, `port`, `database`, `user`
/// and `password`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Driver ID (e.g., "postgres", "sqlite")
    pub driver: String,
    /// Driver-specific connection parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl DataSourceConfig {
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            params: HashMap::new(),
        }
    }

    /// Create a SQLite configuration
    pub fn sqlite(path: &str) -> Self {
        Self::new("sqlite").with_param("path", path)
    }

    /// Create a PostgreSQL configuration
    pub fn postgres(host: &str, port: u16, database: &str, user: &str) -> Self {
        Self::new("postgres")
            .with_param("host", host)
            .with_param("port", &port.to_string())
            .with_param("database", database)
            .with_param("user", user)
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Get a parameter as a string
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.params.get(key).cloned()
    }

    /// Get a parameter as a port number, ignoring unparseable values
    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.params.get(key).and_then(|v| v.parse().ok())
    }
}

/// A database driver that opens connections for a data source
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "postgres", "sqlite")
    fn name(&self) -> &'static str;

    /// Native positional placeholder syntax of this backend
    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Open a new connection
    async fn connect(&self, config: &DataSourceConfig) -> Result<Arc<dyn Connection>>;
}
