//! Connection factory backed by a registered database driver

use std::sync::Arc;

use async_trait::async_trait;
use templar_core::{
    Connection, DataSourceConfig, DatabaseDriver, PlaceholderStyle, Result, TemplarError,
};
use templar_drivers::DriverRegistry;

use crate::pool::ConnectionFactory;

/// Opens pooled connections through a driver for one data source
pub struct DriverConnectionFactory {
    driver: Arc<dyn DatabaseDriver>,
    config: DataSourceConfig,
}

impl DriverConnectionFactory {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: DataSourceConfig) -> Self {
        Self { driver, config }
    }

    /// Look up the driver named by `config.driver` among the built-in drivers
    pub fn from_config(config: DataSourceConfig) -> Result<Self> {
        let registry = DriverRegistry::with_defaults();
        let driver = registry.get(&config.driver).ok_or_else(|| {
            TemplarError::Configuration(format!(
                "unknown driver '{}', available: {}",
                config.driver,
                registry.list().join(", ")
            ))
        })?;
        Ok(Self::new(driver, config))
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }
}

#[async_trait]
impl ConnectionFactory for DriverConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        self.driver.connect(&self.config).await
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        self.driver.placeholder_style()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionPool, PoolConfig};
    use templar_core::ErrorKind;

    #[test]
    fn test_unknown_driver_is_configuration_error() {
        let err = DriverConnectionFactory::from_config(DataSourceConfig::new("oracle"))
            .err()
            .expect("unknown driver");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("oracle"));
    }

    #[tokio::test]
    async fn test_sqlite_factory_feeds_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pool.db");
        let config = DataSourceConfig::sqlite(&path.to_string_lossy());

        let factory = DriverConnectionFactory::from_config(config).expect("sqlite driver");
        assert_eq!(factory.driver_name(), "sqlite");

        let pool = ConnectionPool::new(PoolConfig::new(1, 2), factory);
        assert_eq!(pool.placeholder_style(), PlaceholderStyle::QuestionNumbered);

        let conn = pool.get().await.expect("connect");
        let result = conn.query("SELECT 1 AS one", &[]).await.expect("query");
        assert_eq!(result.rows.len(), 1);
    }
}
