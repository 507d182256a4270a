//! `templar` - run named SQL templates from the command line

mod args;
mod commands;
mod config;
mod logging;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use templar_connection::{ConnectionPool, DriverConnectionFactory};
use templar_query::QueryService;

use crate::args::Cli;
use crate::config::{CliConfig, default_config_path};
use crate::logging::LoggingConfig;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = CliConfig::load(&config_path)?;

    let _log_guard = logging::init(LoggingConfig::from_section(
        &config.logging,
        cli.log_level.as_deref(),
    ))
    .context("failed to initialize logging")?;

    let factory = DriverConnectionFactory::from_config(config.data_source.clone())?;
    tracing::info!(driver = factory.driver_name(), config = %config_path.display(), "opening data source");
    let pool = ConnectionPool::new(config.pool.clone(), factory);
    pool.warm_up().await.context("failed to open initial connections")?;

    let service = QueryService::new(config.engine.clone(), pool.clone())?;
    service
        .refresh_templates()
        .await
        .context("failed to load templates")?;

    let code = commands::run(cli.command, &service).await;
    pool.close_idle().await;
    code
}
