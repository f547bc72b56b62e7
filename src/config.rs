//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.sparkrun.toml` files.

use crate::cli::{Args, OutputFormat};
use crate::models::AnalysisConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".sparkrun.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Data locations.
    #[serde(default)]
    pub data: DataConfig,

    /// Default analysis settings, overridden field by field from the CLI.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Rendering format for the run.
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            format: OutputFormat::default(),
        }
    }
}

fn default_output() -> String {
    "sparkrun_run.md".to_string()
}

/// Dataset, flow, and run storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// JSON dataset or SQLite database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<PathBuf>,

    /// Directory of extra flow definitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flows_dir: Option<PathBuf>,

    /// SQLite database receiving persisted runs.
    #[serde(default = "default_runs_db")]
    pub runs_db: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset: None,
            flows_dir: None,
            runs_db: default_runs_db(),
        }
    }
}

fn default_runs_db() -> PathBuf {
    PathBuf::from("sparkrun_runs.db")
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.general.format = format;
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if let Some(ref dataset) = args.dataset {
            self.data.dataset = Some(dataset.clone());
        }
        if let Some(ref flows_dir) = args.flows_dir {
            self.data.flows_dir = Some(flows_dir.clone());
        }
        if let Some(ref runs_db) = args.runs_db {
            self.data.runs_db = runs_db.clone();
        }

        self.analysis.overlay(&args.analysis_config());
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
