use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use templar_query::ResultMode;

/// Templar - run named SQL templates against a configured data source
#[derive(Parser, Debug)]
#[command(name = "templar")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults to <config dir>/templar/templar.toml)
    #[arg(short = 'c', long = "config", env = "TEMPLAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, overriding `[logging] level` (RUST_LOG still wins)
    #[arg(long = "log-level", env = "TEMPLAR_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect the template registry
    #[command(subcommand)]
    Templates(TemplatesCommand),

    /// Execute one template
    Exec(ExecArgs),

    /// Execute a batch described by a JSON file
    Batch {
        /// Path to the batch file
        file: PathBuf,
    },

    /// Call a stored procedure
    Call(CallArgs),
}

#[derive(Subcommand, Debug)]
pub enum TemplatesCommand {
    /// List every loaded template
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the SQL text of one template
    Show { template_id: String },
    /// Reload templates from the template table and report the count
    Refresh,
}

#[derive(clap::Args, Debug)]
pub struct ExecArgs {
    pub template_id: String,

    /// Named parameter as `name=value` (repeatable)
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", conflicts_with = "args")]
    pub params: Vec<String>,

    /// Positional parameter value (repeatable, in order)
    #[arg(short = 'a', long = "arg", value_name = "VALUE")]
    pub args: Vec<String>,

    #[arg(short = 'm', long = "mode", value_enum, default_value_t = ModeArg::Rows)]
    pub mode: ModeArg,

    /// Rows fetched per round trip in stream mode
    #[arg(long = "fetch-size")]
    pub fetch_size: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct CallArgs {
    pub procedure: String,

    #[arg(long)]
    pub schema: Option<String>,

    #[arg(long)]
    pub catalog: Option<String>,

    /// IN parameter as `position=value` (repeatable)
    #[arg(long = "in", value_name = "POS=VALUE")]
    pub in_params: Vec<String>,

    /// OUT parameter as `position:TYPE[:name]` (repeatable)
    #[arg(long = "out", value_name = "POS:TYPE[:NAME]")]
    pub out_params: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Scalar,
    Rows,
    Stream,
    Execute,
}

impl ModeArg {
    pub fn into_result_mode(self, fetch_size: Option<usize>) -> ResultMode {
        match self {
            Self::Scalar => ResultMode::Scalar,
            Self::Rows => ResultMode::Rows,
            Self::Stream => ResultMode::Stream { fetch_size },
            Self::Execute => ResultMode::Execute,
        }
    }
}
