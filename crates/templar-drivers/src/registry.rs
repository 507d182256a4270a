//! Built-in drivers, looked up by the `driver` field of a data source

use std::collections::HashMap;
use std::sync::Arc;
use templar_core::DatabaseDriver;

/// Drivers keyed by lower-case name
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Every driver compiled in; `postgresql` is accepted as an alias
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));
        #[cfg(feature = "postgres")]
        {
            let driver: Arc<dyn DatabaseDriver> = Arc::new(crate::postgres::PostgresDriver::new());
            registry.register(Arc::clone(&driver));
            registry.register_alias("postgresql", driver);
        }

        registry
    }

    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let name = driver.name().to_string();
        tracing::debug!(driver = %name, "registering database driver");
        self.drivers.insert(name, driver);
    }

    fn register_alias(&mut self, alias: &str, driver: Arc<dyn DatabaseDriver>) {
        self.drivers.insert(alias.to_string(), driver);
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(&name.to_ascii_lowercase()).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %name, "no such driver");
        }
        driver
    }

    /// Registered names and aliases, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn has(&self, name: &str) -> bool {
        self.drivers.contains_key(&name.to_ascii_lowercase())
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
