use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use html_surgeon::config::{setup_api_key_interactive, Config, API_KEY_ENV};
use html_surgeon::llm::AnthropicClient;
use html_surgeon::pipeline::{add_feature, build_map, validate_file, AddRequest};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "surgeon",
    about = "Map, edit and check large single-file HTML apps one section at a time",
    version
)]
struct Cli {
    /// Model id for mapping and section selection
    #[arg(long, global = true)]
    scout_model: Option<String>,

    /// Model id for writing modifications
    #[arg(long, global = true)]
    generation_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a Section Map for a document
    Map(MapArgs),
    /// Implement a feature by editing mapped sections
    Add(AddArgs),
    /// Run the structural checks on a document
    Validate(ValidateArgs),
    /// Store the Anthropic API key in the system keychain
    Setup,
}

#[derive(Args, Debug)]
struct MapArgs {
    #[arg(env = "INPUT_FILENAME")]
    file: PathBuf,
    /// Where to write the map (default: map-<basename>.json)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AddArgs {
    #[arg(env = "INPUT_FILENAME")]
    file: PathBuf,
    /// Natural-language feature description
    #[arg(short, long, env = "INPUT_FEATURE")]
    feature: String,
    /// Section Map file (default: map-<basename>.json)
    #[arg(short, long, env = "INPUT_MAP")]
    map: Option<PathBuf>,
    /// Sections to modify; repeat or comma-separate. Omit to let the scout pick.
    #[arg(long = "section", value_delimiter = ',', env = "INPUT_SECTIONS")]
    sections: Vec<String>,
    /// Where to write the result (default: <basename>.modified.html)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Run every stage but do not write the result
    #[arg(long)]
    dry_run: bool,
    /// Write the result even if it fails structural checks
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[arg(env = "INPUT_FILENAME")]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let mut config = Config::load();
    if let Some(model) = cli.scout_model {
        config.models.scout_id = model;
    }
    if let Some(model) = cli.generation_model {
        config.models.generation_id = model;
    }

    match cli.command {
        Commands::Map(args) => finish(run_map(&config, args).await, "success"),
        Commands::Add(args) => finish(run_add(&config, args).await, "success"),
        Commands::Validate(args) => finish(run_validate(args), "valid"),
        Commands::Setup => finish(run_setup(), "success"),
    }
}

/// Print the JSON report on stdout and pick the exit status.
fn finish(result: Result<Value>, flag: &str) -> ExitCode {
    match result {
        Ok(report) => {
            print_json(&report);
            if report.get(flag).and_then(Value::as_bool) == Some(false) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            let message = format!("{:#}", err);
            log::error!("{}", message);
            let mut failure = serde_json::Map::new();
            failure.insert(flag.to_string(), Value::Bool(false));
            failure.insert("error".to_string(), Value::String(message));
            print_json(&Value::Object(failure));
            ExitCode::FAILURE
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

fn client(config: &Config) -> Result<AnthropicClient> {
    let key = config.get_api_key().ok_or_else(|| {
        anyhow!(
            "{} not set. Export it or run `surgeon setup`.",
            API_KEY_ENV
        )
    })?;
    AnthropicClient::new(key, config.request_timeout(), config.max_retries)
        .context("Failed to create HTTP client")
}

async fn run_map(config: &Config, args: MapArgs) -> Result<Value> {
    let client = client(config)?;
    let run = build_map(&client, config, &args.file, args.output.as_deref())
        .await
        .with_context(|| format!("Map generation failed for {}", args.file.display()))?;
    Ok(serde_json::to_value(&run.map)?)
}

async fn run_add(config: &Config, args: AddArgs) -> Result<Value> {
    let client = client(config)?;
    let request = AddRequest {
        input: args.file,
        feature: args.feature,
        map_path: args.map,
        sections: args
            .sections
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        output: args.output,
        dry_run: args.dry_run,
        force: args.force,
    };
    let report = add_feature(&client, config, &request).await?;
    Ok(serde_json::to_value(&report)?)
}

fn run_validate(args: ValidateArgs) -> Result<Value> {
    let report = validate_file(&args.file)?;
    Ok(serde_json::to_value(&report)?)
}

fn run_setup() -> Result<Value> {
    setup_api_key_interactive()?;
    Ok(json!({ "success": true, "config": Config::config_location() }))
}
