//! Configuration file for the `templar` binary
//!
//! ```toml
//! [data_source]
//! driver = "sqlite"
//! params = { path = "/var/lib/app/app.db" }
//!
//! [pool]
//! min_size = 1
//! max_size = 10
//! acquire_timeout_ms = 30000
//!
//! [engine]
//! worker_pool_size = 8
//! binding_mode = "native"        # native | literal
//! date_pattern = "%d/%m/%Y %H.%M"
//! template_table = "db_template"
//!
//! [logging]
//! level = "info"
//! json_file = false
//! log_dir = "/var/log/templar"
//! ```
//!
//! Only `[data_source]` is required.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use templar_connection::{DataSourceConfig, PoolConfig};
use templar_query::EngineConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    pub data_source: DataSourceConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default `EnvFilter` directive
    pub level: String,
    /// Also write JSON logs to a daily rolling file under `log_dir`
    pub json_file: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_file: false,
            log_dir: None,
        }
    }
}

impl CliConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("invalid configuration")?;
        config.pool.validate().context("invalid [pool] section")?;
        config.engine.validate().context("invalid [engine] section")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }
}

/// `<config dir>/templar/templar.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("templar")
        .join("templar.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use templar_query::BindingMode;

    #[test]
    fn test_minimal_config() {
        let config = CliConfig::from_toml(
            r#"
            [data_source]
            driver = "sqlite"
            params = { path = "app.db" }
            "#,
        )
        .unwrap();

        assert_eq!(config.data_source, DataSourceConfig::sqlite("app.db"));
        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.engine.worker_pool_size, 8);
        assert_eq!(config.logging, LoggingSection::default());
    }

    #[test]
    fn test_full_config() {
        let config = CliConfig::from_toml(
            r#"
            [data_source]
            driver = "postgres"
            params = { host = "db", port = "5432", database = "app", user = "svc" }

            [pool]
            min_size = 2
            max_size = 4

            [engine]
            worker_pool_size = 2
            binding_mode = "literal"
            template_table = "cfg.templates"

            [logging]
            level = "debug"
            json_file = true
            log_dir = "/tmp/templar-logs"
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.max_size(), 4);
        assert_eq!(config.engine.binding_mode, BindingMode::Literal);
        assert_eq!(config.engine.template_table, "cfg.templates");
        assert!(config.logging.json_file);
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("/tmp/templar-logs")));
    }

    #[test]
    fn test_rejects_bad_sections() {
        assert!(CliConfig::from_toml("[pool]\nmax_size = 2").is_err());

        let bad_engine = r#"
            [data_source]
            driver = "sqlite"
            [engine]
            template_table = "templates; DROP TABLE x"
        "#;
        assert!(CliConfig::from_toml(bad_engine).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templar.toml");
        std::fs::write(&path, "[data_source]\ndriver = \"sqlite\"\n").unwrap();
        assert_eq!(CliConfig::load(&path).unwrap().data_source.driver, "sqlite");

        let err = CliConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
