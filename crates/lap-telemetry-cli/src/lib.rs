//! Command surface over the lap telemetry service.
//!
//! Results print as JSON on stdout; logs go to stderr. The `submit` command
//! follows the streaming channel's contract and never fails, while every
//! other command surfaces the taxonomy error with its response code.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use lap_telemetry_core::{
    format_rfc3339, now_utc, Lap, ParameterValue, RegisterRequest, TelemetryError,
    TelemetrySubmission,
};
use lap_telemetry_service::{
    IngestGateway, LapRegistry, QueryService, RetentionConfig, RetentionSweeper, TelemetryConfig,
};
use lap_telemetry_store_sqlite::SqliteTelemetryStore;

#[derive(Debug, Parser)]
#[command(name = "lapt")]
#[command(about = "Lap telemetry store CLI")]
pub struct Cli {
    /// Database file path; overrides the config file value.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Lap {
        #[command(subcommand)]
        command: LapCommand,
    },
    Register(RegisterArgs),
    Submit(SubmitArgs),
    Params {
        #[command(subcommand)]
        command: ParamsCommand,
    },
    Sweep(SweepArgs),
}

#[derive(Debug, Subcommand)]
pub enum LapCommand {
    Create(LapCreateArgs),
    List,
}

#[derive(Debug, Args)]
pub struct LapCreateArgs {
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    #[arg(long)]
    lap: String,

    /// Reading as key=value; repeatable.
    #[arg(long = "reading", value_parser = parse_reading)]
    readings: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[arg(long)]
    lap: Option<String>,

    /// Reading as key=value; repeatable.
    #[arg(long = "reading", value_parser = parse_reading)]
    readings: Vec<(String, String)>,

    /// Raw streaming message JSON: {"lapName": ..., "parameters": {...}}.
    #[arg(long, conflicts_with_all = ["lap", "readings"])]
    json: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ParamsCommand {
    Get(ParamsGetArgs),
    All(ParamsAllArgs),
}

#[derive(Debug, Args)]
pub struct ParamsGetArgs {
    #[arg(long)]
    lap: String,
    #[arg(long)]
    key: String,
}

#[derive(Debug, Args)]
pub struct ParamsAllArgs {
    #[arg(long)]
    lap: String,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Override the configured retention window.
    #[arg(long)]
    retention_days: Option<u32>,
}

/// Runs one parsed command to completion.
///
/// # Errors
/// Returns the taxonomy error (annotated with its response code) for every
/// command except `submit`, which drops failures per the streaming contract.
pub fn run_cli(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => TelemetryConfig::load(path)?,
        None => TelemetryConfig::default(),
    };
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.storage.db_path));

    let store = Arc::new(SqliteTelemetryStore::open(&db_path)?);
    store.migrate()?;

    match cli.command {
        Command::Lap { command } => run_lap(&store, command),
        Command::Register(args) => run_register(&store, &args),
        Command::Submit(args) => run_submit(&store, args),
        Command::Params { command } => run_params(&store, command),
        Command::Sweep(args) => run_sweep(&store, &config.retention, &args),
    }
}

fn run_lap(store: &Arc<SqliteTelemetryStore>, command: LapCommand) -> Result<()> {
    let registry = LapRegistry::new(Arc::clone(store));
    match command {
        LapCommand::Create(args) => {
            let lap = boundary(registry.create(&args.name))?;
            print_json(&lap_json(&lap)?)
        }
        LapCommand::List => {
            let laps = boundary(registry.list())?;
            let rendered = laps
                .iter()
                .map(lap_json)
                .collect::<Result<Vec<serde_json::Value>>>()?;
            print_json(&serde_json::Value::Array(rendered))
        }
    }
}

fn run_register(store: &Arc<SqliteTelemetryStore>, args: &RegisterArgs) -> Result<()> {
    let gateway = IngestGateway::new(Arc::clone(store));
    let request = RegisterRequest {
        lap_name: args.lap.clone(),
        parameters: readings_map(&args.readings),
    };

    let receipt = boundary(gateway.register(&request))?;
    print_json(&serde_json::to_value(&receipt)?)
}

fn run_submit(store: &Arc<SqliteTelemetryStore>, args: SubmitArgs) -> Result<()> {
    let gateway = IngestGateway::new(Arc::clone(store));

    let submission = match args.json {
        Some(raw) => match serde_json::from_str::<TelemetrySubmission>(&raw) {
            Ok(value) => value,
            Err(err) => {
                // Fire-and-forget channel: a malformed message is dropped,
                // not surfaced to the sender.
                tracing::warn!(error = %err, "dropping malformed streamed telemetry");
                return print_json(&serde_json::json!({ "submitted": false }));
            }
        },
        None => TelemetrySubmission {
            lap_name: args.lap,
            parameters: if args.readings.is_empty() {
                None
            } else {
                Some(readings_map(&args.readings))
            },
        },
    };

    gateway.submit(&submission);
    print_json(&serde_json::json!({ "submitted": true }))
}

fn run_params(store: &Arc<SqliteTelemetryStore>, command: ParamsCommand) -> Result<()> {
    let queries = QueryService::new(Arc::clone(store));
    let parameters = match command {
        ParamsCommand::Get(args) => boundary(queries.parameter_values(&args.lap, &args.key))?,
        ParamsCommand::All(args) => boundary(queries.all_parameters(&args.lap))?,
    };

    let rendered = parameters
        .iter()
        .map(|parameter| {
            let value = boundary(ParameterValue::from_parameter(parameter))?;
            Ok(serde_json::to_value(value)?)
        })
        .collect::<Result<Vec<serde_json::Value>>>()?;
    print_json(&serde_json::Value::Array(rendered))
}

fn run_sweep(
    store: &Arc<SqliteTelemetryStore>,
    retention: &RetentionConfig,
    args: &SweepArgs,
) -> Result<()> {
    let config = RetentionConfig {
        retention_days: args.retention_days.unwrap_or(retention.retention_days),
        sweep_interval_secs: retention.sweep_interval_secs,
    };
    boundary(config.validate())?;

    let sweeper = RetentionSweeper::new(Arc::clone(store), config);
    let report = boundary(sweeper.sweep_once(now_utc()))?;
    print_json(&serde_json::to_value(report)?)
}

/// Annotates a taxonomy error with the response code the request/response
/// boundary would translate it to.
fn boundary<T>(result: Result<T, TelemetryError>) -> Result<T> {
    result.map_err(|err| anyhow::anyhow!("{err} (response code {})", err.response_code()))
}

fn readings_map(readings: &[(String, String)]) -> BTreeMap<String, String> {
    readings.iter().cloned().collect()
}

fn lap_json(lap: &Lap) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "lap_id": lap.lap_id.to_string(),
        "name": lap.name,
        "created_at": boundary(format_rfc3339(lap.created_at))?,
    }))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_reading(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got: {raw}")),
    }
}
