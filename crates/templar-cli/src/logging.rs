//! Logging setup for the `templar` binary
//!
//! Human-readable output goes to stderr so stdout stays clean for results.
//! Optionally, JSON lines are also written to a daily rolling file.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSection;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter, used when `RUST_LOG` is not set
    pub default_filter: String,
    /// Directory for JSON log files, `None` disables file output
    pub json_dir: Option<PathBuf>,
    /// Whether to include file/line information in console logs
    pub include_location: bool,
}

impl LoggingConfig {
    /// Build from the `[logging]` section, with an optional CLI level override
    pub fn from_section(section: &LoggingSection, level_override: Option<&str>) -> Self {
        let json_dir = section
            .json_file
            .then(|| section.log_dir.clone().unwrap_or_else(log_directory));

        Self {
            default_filter: level_override.unwrap_or(&section.level).to_string(),
            json_dir,
            include_location: cfg!(debug_assertions),
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped and must be held
/// until the process exits.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG takes precedence over the configured filter
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let mut layers = Vec::new();

    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone())
        .boxed();
    layers.push(console_layer);

    let mut guard = None;
    if let Some(log_dir) = &config.json_dir {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "templar.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        filter = %config.default_filter,
        json_dir = ?config.json_dir,
        "logging initialized"
    );
    Ok(guard)
}

/// `<local data dir>/templar/logs`
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("templar")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_log_to_console_only() {
        let config = LoggingConfig::from_section(&LoggingSection::default(), None);
        assert_eq!(config.default_filter, "info");
        assert!(config.json_dir.is_none());
    }

    #[test]
    fn test_level_override_and_json_dir() {
        let section = LoggingSection {
            level: "warn".into(),
            json_file: true,
            log_dir: None,
        };
        let config = LoggingConfig::from_section(&section, Some("templar_query=debug"));
        assert_eq!(config.default_filter, "templar_query=debug");
        assert_eq!(config.json_dir, Some(log_directory()));
    }
}
