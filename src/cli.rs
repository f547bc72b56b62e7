//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{AnalysisConfig, Granularity, RebaseMode, Timeframe};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Sparkrun - survey analysis runs from declarative flows
///
/// Analyse wave-based survey data and assemble the results into a run of
/// narrated outputs. Markdown/JSON reports, runs persisted to SQLite.
///
/// Examples:
///   sparkrun --flow audience-snapshot --brief "Gen Z streaming" --dataset survey.json
///   sparkrun --flow wave-tracker --dataset survey.db --timeframe quarterly --compare-waves
///   sparkrun --dataset survey.db --import survey.json
///   sparkrun --list-flows --flows-dir ./flows
///   sparkrun --history 10
///   sparkrun --show 6f1c2a9e-3b7d-4c55-9a0e-2f4d8b1e7c30
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Flow to execute
    #[arg(short, long, value_name = "ID")]
    pub flow: Option<String>,

    /// Free-text brief echoed into the run and its summaries
    #[arg(short, long, default_value = "", value_name = "TEXT")]
    pub brief: String,

    /// Survey dataset: a JSON file or a SQLite database (.db, .sqlite)
    #[arg(short, long, value_name = "PATH", env = "SPARKRUN_DATASET")]
    pub dataset: Option<PathBuf>,

    /// Directory of additional flow definitions (*.toml)
    #[arg(long, value_name = "DIR")]
    pub flows_dir: Option<PathBuf>,

    /// Bucket waves into periods of this size
    #[arg(long, value_name = "TIMEFRAME")]
    pub timeframe: Option<Timeframe>,

    /// Analysis granularity (dataset, question, datapoint)
    #[arg(long, value_name = "LEVEL")]
    pub granularity: Option<Granularity>,

    /// Crosstab rebase mode
    #[arg(long, value_name = "MODE")]
    pub rebase: Option<RebaseMode>,

    /// Restrict analysis to these wave ids (comma-separated)
    ///
    /// Example: --waves w1,w3
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub waves: Option<Vec<String>>,

    /// Compare each pair of consecutive waves
    #[arg(long)]
    pub compare_waves: bool,

    /// Output file path for the rendered run
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// SQLite database that receives persisted runs
    #[arg(long, value_name = "FILE")]
    pub runs_db: Option<PathBuf>,

    /// Do not persist the run
    #[arg(long)]
    pub no_persist: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .sparkrun.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .sparkrun.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// List the available flows and exit
    #[arg(long)]
    pub list_flows: bool,

    /// Import a JSON dataset into the SQLite database given by --dataset
    #[arg(long, value_name = "JSON")]
    pub import: Option<PathBuf>,

    /// Show the N most recent persisted runs and exit
    #[arg(long, value_name = "N")]
    pub history: Option<usize>,

    /// Render a persisted run by id and exit
    #[arg(long, value_name = "RUN_ID")]
    pub show: Option<String>,
}

/// Output format for the rendered run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// True when `path` names a SQLite database rather than a JSON dataset.
pub fn is_sqlite_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("db" | "sqlite" | "sqlite3")
    )
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    ///
    /// `dataset` is the dataset path after config-file defaults are applied.
    pub fn validate(&self, dataset: Option<&Path>) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // These never touch the dataset
        if self.init_config || self.list_flows || self.history.is_some() || self.show.is_some() {
            return Ok(());
        }

        let dataset = match dataset {
            Some(path) => path,
            None => {
                return Err(
                    "A dataset is required (--dataset, SPARKRUN_DATASET, or [data] dataset)"
                        .to_string(),
                )
            }
        };

        if let Some(ref import) = self.import {
            if !is_sqlite_path(dataset) {
                return Err(format!(
                    "--import needs a SQLite dataset (.db, .sqlite), got: {}",
                    dataset.display()
                ));
            }
            if !import.is_file() {
                return Err(format!("Import file does not exist: {}", import.display()));
            }
            return Ok(());
        }

        if self.flow.is_none() {
            return Err("--flow is required to execute a run".to_string());
        }

        if !dataset.exists() {
            return Err(format!("Dataset does not exist: {}", dataset.display()));
        }

        if let Some(ref waves) = self.waves {
            if waves.iter().any(|id| id.trim().is_empty()) {
                return Err("Wave ids must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is `[general] verbose` from the config file;
    /// `--quiet` wins over both.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Analysis settings given on the command line. Unset flags stay unset.
    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            timeframe: self.timeframe,
            granularity: self.granularity,
            rebase_mode: self.rebase,
            wave_ids: self
                .waves
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|id| id.trim().to_string())
                .collect(),
            compare_waves: self.compare_waves.then_some(true),
        }
    }
}
