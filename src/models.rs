//! Data models for survey waves, analysis configuration, and flow runs.
//!
//! This module contains the core data structures shared by the analysis
//! engine, the run builder, and the stores.

use crate::analysis::AnalysisResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One fielded instance of a recurring survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    /// Unique wave identifier.
    pub id: String,
    /// Display name (e.g. "Q1 2024 Tracker").
    pub name: String,
    /// Identifier of the parent study.
    pub study_id: String,
    /// Display name of the parent study.
    pub study_name: String,
    /// Fielding year.
    pub year: i32,
    /// Fielding quarter (1-4), if the wave is quarterly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<u8>,
    /// First day of fieldwork.
    pub start_date: NaiveDate,
    /// Last day of fieldwork.
    pub end_date: NaiveDate,
    /// Number of respondents.
    pub sample_size: u32,
}

/// One observed statistic for a (wave, question, datapoint) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyMeasurement {
    pub wave_id: String,
    pub question_id: String,
    pub question_name: String,
    pub datapoint_id: String,
    pub datapoint_name: String,
    pub category: String,
    pub respondent_count: u32,
    pub percentage: f64,
    /// Index against the cross-sample average (100 = average).
    pub index_vs_avg: f64,
    /// Sample size of the owning wave. Filled in by the store join.
    #[serde(default)]
    pub sample_size: u32,
}

/// Time bucketing for time-series results.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Quarterly,
    Monthly,
    Weekly,
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Quarterly => write!(f, "quarterly"),
            Timeframe::Monthly => write!(f, "monthly"),
            Timeframe::Weekly => write!(f, "weekly"),
        }
    }
}

/// Level of detail the engine reports at.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Dataset,
    #[default]
    Question,
    Datapoint,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Dataset => write!(f, "dataset"),
            Granularity::Question => write!(f, "question"),
            Granularity::Datapoint => write!(f, "datapoint"),
        }
    }
}

/// Base a crosstab percentage is recomputed against.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RebaseMode {
    Column,
    Row,
    #[default]
    Total,
    #[value(name = "respondent_base")]
    RespondentBase,
}

impl fmt::Display for RebaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebaseMode::Column => write!(f, "column"),
            RebaseMode::Row => write!(f, "row"),
            RebaseMode::Total => write!(f, "total"),
            RebaseMode::RespondentBase => write!(f, "respondent_base"),
        }
    }
}

/// Input contract of the analysis engine. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebase_mode: Option<RebaseMode>,

    /// Explicit wave selection. Empty means every wave.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wave_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_waves: Option<bool>,
}

impl AnalysisConfig {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.timeframe.is_none()
            && self.granularity.is_none()
            && self.rebase_mode.is_none()
            && self.wave_ids.is_empty()
            && self.compare_waves.is_none()
    }

    /// Granularity with the default applied.
    pub fn effective_granularity(&self) -> Granularity {
        self.granularity.unwrap_or_default()
    }

    pub fn compares_waves(&self) -> bool {
        self.compare_waves.unwrap_or(false)
    }

    /// Overlay every field set in `other` onto this config.
    pub fn overlay(&mut self, other: &AnalysisConfig) {
        if other.timeframe.is_some() {
            self.timeframe = other.timeframe;
        }
        if other.granularity.is_some() {
            self.granularity = other.granularity;
        }
        if other.rebase_mode.is_some() {
            self.rebase_mode = other.rebase_mode;
        }
        if !other.wave_ids.is_empty() {
            self.wave_ids = other.wave_ids.clone();
        }
        if other.compare_waves.is_some() {
            self.compare_waves = other.compare_waves;
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified kind of a run output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Insight,
    Chart,
    Crosstab,
    Dashboard,
    Report,
    Deck,
    Alert,
    Dataset,
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputType::Insight => write!(f, "Insight"),
            OutputType::Chart => write!(f, "Chart"),
            OutputType::Crosstab => write!(f, "Crosstab"),
            OutputType::Dashboard => write!(f, "Dashboard"),
            OutputType::Report => write!(f, "Report"),
            OutputType::Deck => write!(f, "Deck"),
            OutputType::Alert => write!(f, "Alert"),
            OutputType::Dataset => write!(f, "Dataset"),
        }
    }
}

impl OutputType {
    /// Returns an emoji badge for the output type.
    pub fn emoji(&self) -> &'static str {
        match self {
            OutputType::Insight => "💡",
            OutputType::Chart => "📈",
            OutputType::Crosstab => "🧮",
            OutputType::Dashboard => "📊",
            OutputType::Report => "📝",
            OutputType::Deck => "🗂️",
            OutputType::Alert => "🚨",
            OutputType::Dataset => "🗃️",
        }
    }
}

/// Confidence attached to a citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

/// Source reference backing an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub text: String,
    pub source: String,
    pub confidence: Confidence,
}

/// One output produced by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub output_type: OutputType,
    pub summary: String,
    /// Analysis result the output was matched to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

/// The persisted result of executing a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub flow_id: String,
    pub status: RunStatus,
    pub brief: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AnalysisConfig>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outputs: Vec<RunOutput>,
}
