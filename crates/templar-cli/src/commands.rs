//! Subcommand handlers

use std::collections::HashMap;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, bail};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde::Deserialize;
use serde_json::json;
use templar_query::{
    BatchExecutionResult, BatchOptions, ExecutionOutcome, OutDeclaration, ParamValue, ParameterSet,
    ProcedureCallSpec, QueryService,
};

use crate::args::{CallArgs, Command, ExecArgs, TemplatesCommand};

/// Batch file layout:
///
/// ```json
/// {
///   "options": { "mode": "sequential", "fail_fast": true },
///   "items": [
///     { "template_id": "open_account", "params": { "owner": "dave" } },
///     { "template_id": "balance", "params": ["dave"] }
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct BatchFile {
    #[serde(default)]
    pub options: BatchOptions,
    pub items: Vec<BatchFileItem>,
}

#[derive(Debug, Deserialize)]
pub struct BatchFileItem {
    pub template_id: String,
    #[serde(default)]
    pub params: ParameterSet,
}

impl BatchFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read batch file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid batch file {}", path.display()))
    }
}

pub async fn run(command: Command, service: &QueryService) -> anyhow::Result<ExitCode> {
    match command {
        Command::Templates(command) => templates(command, service).await,
        Command::Exec(args) => exec(args, service).await,
        Command::Batch { file } => batch(&file, service).await,
        Command::Call(args) => call(args, service).await,
    }
}

async fn templates(command: TemplatesCommand, service: &QueryService) -> anyhow::Result<ExitCode> {
    match command {
        TemplatesCommand::List { json } => {
            let templates = service.list_templates();
            if json {
                print_json(&json!(templates))?;
            } else {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["Template", "SQL"]);
                for (id, sql) in &templates {
                    table.add_row(vec![id.as_str(), sql.as_str()]);
                }
                println!("{table}");
            }
        }
        TemplatesCommand::Show { template_id } => {
            let template = service.resolve_template(&template_id)?;
            println!("{}", template.sql_text);
        }
        TemplatesCommand::Refresh => {
            let loaded = service.refresh_templates().await?;
            print_json(&json!({
                "loaded": loaded,
                "generation": service.registry().generation(),
            }))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn exec(args: ExecArgs, service: &QueryService) -> anyhow::Result<ExitCode> {
    let params = if args.params.is_empty() {
        ParameterSet::positional(args.args)
    } else {
        parse_named(&args.params)?
    };
    let mode = args.mode.into_result_mode(args.fetch_size);

    let outcome = service.execute_single(&args.template_id, params, mode).await?;
    match outcome {
        // One JSON object per line, as rows arrive
        ExecutionOutcome::RowStream(mut stream) => {
            while let Some(row) = stream.next_row().await {
                println!("{}", row?.to_json());
            }
        }
        other => print_json(&other.into_json().await)?,
    }
    Ok(ExitCode::SUCCESS)
}

async fn batch(path: &Path, service: &QueryService) -> anyhow::Result<ExitCode> {
    let file = BatchFile::load(path)?;
    let (template_ids, param_sets): (Vec<String>, Vec<ParameterSet>) = file
        .items
        .into_iter()
        .map(|item| (item.template_id, item.params))
        .unzip();

    let result = service.execute_batch(template_ids, param_sets, file.options).await?;
    let code = if result.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };
    print_json(&batch_json(result).await)?;
    Ok(code)
}

async fn call(args: CallArgs, service: &QueryService) -> anyhow::Result<ExitCode> {
    let in_params = parse_in(&args.in_params)?;
    let out_params = parse_out(&args.out_params)?;
    let spec = ProcedureCallSpec::from_positional_maps(
        &args.procedure,
        args.schema.as_deref(),
        args.catalog.as_deref(),
        &in_params,
        &out_params,
    )?;

    let outcome = service.call_procedure(spec).await?;
    print_json(&outcome.into_json().await)?;
    Ok(ExitCode::SUCCESS)
}

async fn batch_json(result: BatchExecutionResult) -> serde_json::Value {
    let mut items = Vec::with_capacity(result.results.len());
    for item in result.results {
        items.push(json!({
            "index": item.index,
            "template_id": item.template_id,
            "elapsed_ms": item.execution_time.as_millis() as u64,
            "outcome": item.outcome.into_json().await,
        }));
    }

    json!({
        "success_count": result.success_count,
        "failure_count": result.failure_count,
        "aborted_count": result.aborted_count,
        "in_transaction": result.in_transaction,
        "rolled_back": result.rolled_back,
        "elapsed_ms": result.total_execution_time.as_millis() as u64,
        "results": items,
    })
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `name=value` pairs into a named parameter set
pub fn parse_named(pairs: &[String]) -> anyhow::Result<ParameterSet> {
    let mut values = HashMap::new();
    for pair in pairs {
        let (name, value) = split_pair(pair, '=')?;
        let name = name.strip_prefix(':').unwrap_or(name);
        if values.insert(name.to_string(), ParamValue::untyped(value)).is_some() {
            bail!("parameter '{}' given more than once", name);
        }
    }
    Ok(ParameterSet::Named(values))
}

/// `position=value` pairs, keyed by the position text
pub fn parse_in(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| split_pair(pair, '=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect()
}

/// `position:TYPE[:name]` declarations, keyed by the position text
pub fn parse_out(declarations: &[String]) -> anyhow::Result<HashMap<String, OutDeclaration>> {
    let mut out = HashMap::new();
    for declaration in declarations {
        let mut parts = declaration.splitn(3, ':');
        let (Some(position), Some(type_name)) = (parts.next(), parts.next()) else {
            bail!("expected POS:TYPE[:NAME], got '{}'", declaration);
        };
        let parsed = match parts.next() {
            Some(name) if !name.is_empty() => OutDeclaration::Named {
                type_name: type_name.to_string(),
                name: Some(name.to_string()),
            },
            _ => OutDeclaration::Type(type_name.to_string()),
        };
        out.insert(position.to_string(), parsed);
    }
    Ok(out)
}

fn split_pair(pair: &str, separator: char) -> anyhow::Result<(&str, &str)> {
    match pair.split_once(separator) {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => bail!("expected KEY{}VALUE, got '{}'", separator, pair),
    }
}
