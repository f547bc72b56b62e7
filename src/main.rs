//! Sparkrun - survey analysis runs from declarative flows
//!
//! A CLI tool that analyses wave-based survey data and turns the results
//! into narrated run outputs for a chosen flow.
//!
//! Exit codes:
//!   0 - Success (completed run, or an auxiliary command)
//!   1 - Runtime error (config, dataset, database, etc.)
//!   2 - The run finished with status `failed` (unknown flow)

mod analysis;
mod cli;
mod config;
mod flows;
mod models;
mod report;
mod runner;
mod store;

use anyhow::{Context, Result};
use cli::{is_sqlite_path, Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use flows::FlowRegistry;
use models::{Run, RunStatus};
use runner::{FlowRunner, RunRequest};
use std::path::{Path, PathBuf};
use std::time::Instant;
use store::{Dataset, MemoryStore, RunStore, SqliteStore, SurveyStore};
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // The config file can raise verbosity, so it is read before logging starts
    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(args.log_level(config.general.verbose));

    info!("Sparkrun v{}", env!("CARGO_PKG_VERSION"));
    origin.log();
    debug!("Arguments: {:?}", args);

    match run(args, config) {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .sparkrun.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the dataset, flows directory, and analysis defaults.");
    Ok(())
}

/// Initialize logging at `level`. `RUST_LOG` wins when set.
fn init_logging(level: tracing::Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init()
        .expect("Failed to set tracing subscriber");
}

/// Dispatch the requested command. Returns the exit code.
fn run(args: Args, config: Config) -> Result<i32> {
    if let Err(e) = args.validate(config.data.dataset.as_deref()) {
        eprintln!("Error: {}", e);
        return Ok(1);
    }

    if args.list_flows {
        return handle_list_flows(&config);
    }
    if let Some(limit) = args.history {
        return handle_history(&config, limit);
    }
    if let Some(ref id) = args.show {
        return handle_show(&config, id);
    }

    // Validation guarantees a dataset from here on
    let dataset = config
        .data
        .dataset
        .clone()
        .context("No dataset configured")?;

    if let Some(ref import) = args.import {
        return handle_import(&dataset, import);
    }

    execute_flow(&args, &config, &dataset)
}

/// Execute one flow and write the rendered run. Returns 0, or 2 for a failed run.
fn execute_flow(args: &Args, config: &Config, dataset: &Path) -> Result<i32> {
    let start_time = Instant::now();

    let flows = load_flows(config)?;
    let survey = open_survey_store(dataset)?;

    let run_store = if args.no_persist {
        debug!("Persistence disabled");
        None
    } else {
        Some(open_runs_db(&config.data.runs_db)?)
    };

    let mut runner = FlowRunner::new(survey.as_ref(), &flows);
    if let Some(ref store) = run_store {
        runner = runner.with_run_store(store as &dyn RunStore);
    }

    let request = RunRequest {
        flow_id: args.flow.clone().unwrap_or_default(),
        brief: args.brief.clone(),
        config: (!config.analysis.is_empty()).then(|| config.analysis.clone()),
    };

    println!("🔬 Running flow '{}'...", request.flow_id);
    let run = runner
        .execute(request)
        .context("Failed to read survey data")?;

    let output_path = PathBuf::from(&config.general.output);
    let rendered = render(&run, config.general.format)?;
    std::fs::write(&output_path, &rendered)
        .with_context(|| format!("Failed to write run to {}", output_path.display()))?;

    print_summary(&run, start_time.elapsed().as_secs_f64());
    println!("\n✅ Run saved to: {}", output_path.display());
    if run_store.is_some() {
        println!("   Persisted to: {}", config.data.runs_db.display());
    }

    if run.status == RunStatus::Failed {
        eprintln!("\n⛔ Run failed: flow '{}' is not registered (exit code 2).", run.flow_id);
        return Ok(2);
    }

    Ok(0)
}

fn render(run: &Run, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => report::generate_json_report(run)?,
        OutputFormat::Markdown => report::generate_markdown_report(run),
    })
}

fn print_summary(run: &Run, duration: f64) {
    println!("\n📊 Run Summary:");
    println!("   Run: {}", run.id);
    println!("   Flow: {} ({})", run.flow_id, run.status);
    println!("   Outputs: {}", run.outputs.len());
    for output in &run.outputs {
        let matched = if output.data.is_some() { "" } else { " (unmatched)" };
        println!(
            "   - {} {} [{}]{}",
            output.output_type.emoji(),
            output.label,
            output.output_type,
            matched
        );
    }
    println!("   Duration: {:.2}s", duration);
}

/// Handle --list-flows: print the registry and exit.
fn handle_list_flows(config: &Config) -> Result<i32> {
    let flows = load_flows(config)?;

    if flows.is_empty() {
        println!("No flows registered.");
        return Ok(0);
    }

    println!("\n📋 Available flows ({}):\n", flows.len());
    for flow in flows.flows() {
        println!("   {} - {}", flow.id, flow.name);
        if !flow.description.is_empty() {
            println!("     {}", flow.description);
        }
        for (idx, step) in flow.steps.iter().enumerate() {
            println!("     {}. {} → {}", idx + 1, step.name, step.artifacts().join(", "));
        }
        println!();
    }
    Ok(0)
}

/// Handle --history: list recent persisted runs and exit.
fn handle_history(config: &Config, limit: usize) -> Result<i32> {
    let path = &config.data.runs_db;
    if !path.exists() {
        println!("No runs recorded yet ({} does not exist).", path.display());
        return Ok(0);
    }

    let store = open_runs_db(path)?;
    let records = store
        .recent_runs(limit)
        .context("Failed to read run history")?;

    if records.is_empty() {
        println!("No runs recorded yet.");
        return Ok(0);
    }

    println!("\n🕑 Recent runs ({}):\n", records.len());
    for record in records {
        let status = match record.status {
            RunStatus::Completed => "✅",
            RunStatus::Failed => "❌",
        };
        println!(
            "   {} {} {} [{}] {} outputs, {}",
            status,
            record.completed_at.format("%Y-%m-%d %H:%M:%S"),
            record.id,
            record.flow_id,
            record.output_count,
            if record.brief.is_empty() {
                "no brief".to_string()
            } else {
                format!("\"{}\"", record.brief)
            }
        );
    }
    Ok(0)
}

/// Handle --show: render one persisted run to stdout.
fn handle_show(config: &Config, id: &str) -> Result<i32> {
    let id = Uuid::parse_str(id).with_context(|| format!("Invalid run id: {}", id))?;
    let store = open_runs_db(&config.data.runs_db)?;

    match store.get_run(&id).context("Failed to read run")? {
        Some(run) => {
            println!("{}", render(&run, config.general.format)?);
            Ok(0)
        }
        None => {
            eprintln!("Run {} not found in {}", id, config.data.runs_db.display());
            Ok(1)
        }
    }
}

/// Handle --import: load a JSON dataset into the SQLite database.
fn handle_import(target: &Path, source: &Path) -> Result<i32> {
    println!("📥 Importing {} into {}", source.display(), target.display());

    let dataset = Dataset::load(source)
        .with_context(|| format!("Failed to load dataset {}", source.display()))?;
    let mut store = SqliteStore::open(target)
        .with_context(|| format!("Failed to open database {}", target.display()))?;
    let written = store
        .import_dataset(&dataset)
        .context("Failed to import dataset")?;

    println!(
        "✅ Imported {} waves and {} measurements.",
        dataset.waves.len(),
        written
    );
    Ok(0)
}

/// Built-in flows plus any found under the configured flows directory.
fn load_flows(config: &Config) -> Result<FlowRegistry> {
    let mut flows = FlowRegistry::builtin()?;

    if let Some(ref dir) = config.data.flows_dir {
        let loaded = flows.load_dir(dir)?;
        info!("Loaded {} flows from {}", loaded, dir.display());
    }

    Ok(flows)
}

fn open_survey_store(path: &Path) -> Result<Box<dyn SurveyStore>> {
    if is_sqlite_path(path) {
        info!("Reading survey data from SQLite: {}", path.display());
        let store = SqliteStore::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Ok(Box::new(store))
    } else {
        info!("Reading survey data from JSON: {}", path.display());
        let store = MemoryStore::load(path)
            .with_context(|| format!("Failed to load dataset {}", path.display()))?;
        Ok(Box::new(store))
    }
}

fn open_runs_db(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("Failed to open run database {}", path.display()))
}

/// Where the configuration came from. Logged once the subscriber is installed.
enum ConfigOrigin {
    Explicit(PathBuf),
    DefaultFile,
    Defaults,
    Unreadable(anyhow::Error),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::Explicit(path) => info!("Loaded config from: {}", path.display()),
            ConfigOrigin::DefaultFile => {
                info!("Loaded default config from {}", DEFAULT_CONFIG_FILE)
            }
            ConfigOrigin::Defaults => debug!("No config file found, using defaults"),
            ConfigOrigin::Unreadable(e) => warn!("Failed to load config: {:#}", e),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::Explicit(config_path.clone())));
    }

    // Try default location
    Ok(match Config::load_default() {
        Ok(Some(config)) => (config, ConfigOrigin::DefaultFile),
        Ok(None) => (Config::default(), ConfigOrigin::Defaults),
        Err(e) => (Config::default(), ConfigOrigin::Unreadable(e)),
    })
}
