//! Typed analysis results.
//!
//! The engine emits a closed set of result shapes, each tagged by `type`
//! when serialized.

use crate::models::{RebaseMode, Timeframe};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One analysis result produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisResult {
    DatasetSummary(DatasetSummary),
    QuestionBreakdown(QuestionBreakdown),
    DatapointDetail(DatapointDetail),
    Crosstab(Crosstab),
    WaveComparison(WaveComparison),
    TimeSeries(TimeSeries),
}

/// Payload-free tag of an [`AnalysisResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    DatasetSummary,
    QuestionBreakdown,
    DatapointDetail,
    Crosstab,
    WaveComparison,
    TimeSeries,
}

impl AnalysisResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            AnalysisResult::DatasetSummary(_) => ResultKind::DatasetSummary,
            AnalysisResult::QuestionBreakdown(_) => ResultKind::QuestionBreakdown,
            AnalysisResult::DatapointDetail(_) => ResultKind::DatapointDetail,
            AnalysisResult::Crosstab(_) => ResultKind::Crosstab,
            AnalysisResult::WaveComparison(_) => ResultKind::WaveComparison,
            AnalysisResult::TimeSeries(_) => ResultKind::TimeSeries,
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ResultKind::DatasetSummary => "dataset_summary",
            ResultKind::QuestionBreakdown => "question_breakdown",
            ResultKind::DatapointDetail => "datapoint_detail",
            ResultKind::Crosstab => "crosstab",
            ResultKind::WaveComparison => "wave_comparison",
            ResultKind::TimeSeries => "time_series",
        };
        f.write_str(tag)
    }
}

/// Minimal wave reference carried inside results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveRef {
    pub id: String,
    pub name: String,
}

/// Wave reference with its sample size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveSample {
    pub id: String,
    pub name: String,
    pub sample_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub wave_count: usize,
    pub waves: Vec<WaveSample>,
    /// Sum of the sample sizes of every resolved wave.
    pub total_respondents: u64,
    pub question_count: usize,
    /// Distinct categories, sorted.
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBreakdown {
    pub question_id: String,
    pub question_name: String,
    pub category: String,
    pub wave_id: String,
    pub wave_name: String,
    pub sample_size: u32,
    /// Ordered by percentage, highest first.
    pub datapoints: Vec<DatapointShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointShare {
    pub datapoint_id: String,
    pub datapoint_name: String,
    pub percentage: f64,
    pub respondent_count: u32,
    pub index_vs_avg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointDetail {
    pub datapoint_id: String,
    pub datapoint_name: String,
    pub question_id: String,
    pub question_name: String,
    /// One point per wave, most recent first.
    pub trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub wave_id: String,
    pub wave_name: String,
    pub percentage: f64,
    pub respondent_count: u32,
    pub index_vs_avg: f64,
    pub sample_size: u32,
}

/// Aggregation level of a crosstab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrosstabLevel {
    Dataset,
    Question,
    Datapoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crosstab {
    pub level: CrosstabLevel,
    pub rows: Vec<CrosstabRow>,
    pub rebase_mode: RebaseMode,
    pub total_base: u64,
}

impl Crosstab {
    /// Number of rows classified exactly as [`Significance::High`].
    pub fn high_significance_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.significance == Significance::High)
            .count()
    }
}

/// One crosstab cell. Question and datapoint fields are absent for
/// category-level rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosstabRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datapoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datapoint_name: Option<String>,
    pub category: String,
    pub wave_id: String,
    pub wave_name: String,
    pub respondent_count: u64,
    pub percentage: f64,
    pub index_vs_avg: f64,
    pub sample_size: u32,
    pub rebased_percentage: f64,
    pub significance: Significance,
}

/// Significance band derived from the index vs. average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    High,
    Medium,
    Low,
    None,
}

impl fmt::Display for Significance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Significance::High => write!(f, "high"),
            Significance::Medium => write!(f, "medium"),
            Significance::Low => write!(f, "low"),
            Significance::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveComparison {
    pub wave_a: WaveRef,
    pub wave_b: WaveRef,
    /// Ordered by absolute difference, largest first.
    pub deltas: Vec<WaveDelta>,
}

impl WaveComparison {
    pub fn significant_count(&self) -> usize {
        self.deltas.iter().filter(|d| d.significant).count()
    }

    /// The rising delta with the largest value, if any.
    pub fn largest_gain(&self) -> Option<&WaveDelta> {
        self.deltas
            .iter()
            .filter(|d| d.direction == Direction::Up)
            .fold(None, |best: Option<&WaveDelta>, d| match best {
                Some(b) if b.delta >= d.delta => Some(b),
                _ => Some(d),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveDelta {
    pub question_id: String,
    pub question_name: String,
    pub datapoint_id: String,
    pub datapoint_name: String,
    pub percentage_a: f64,
    pub percentage_b: f64,
    pub delta: f64,
    pub direction: Direction,
    pub significant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub timeframe: Timeframe,
    /// Ordered by start date, oldest first.
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub label: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub wave_id: String,
    pub metrics: Vec<PeriodMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodMetric {
    pub question_id: String,
    pub question_name: String,
    pub datapoint_id: String,
    pub datapoint_name: String,
    pub percentage: f64,
    pub respondent_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(name: &str, value: f64, direction: Direction) -> WaveDelta {
        WaveDelta {
            question_id: "q1".to_string(),
            question_name: "Q".to_string(),
            datapoint_id: name.to_string(),
            datapoint_name: name.to_string(),
            percentage_a: 0.0,
            percentage_b: 0.0,
            delta: value,
            direction,
            significant: value.abs() > 3.0,
        }
    }

    #[test]
    fn test_result_tag_serialization() {
        let result = AnalysisResult::TimeSeries(TimeSeries {
            timeframe: Timeframe::Quarterly,
            periods: Vec::new(),
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "time_series");
        assert_eq!(json["timeframe"], "quarterly");
        assert_eq!(result.kind(), ResultKind::TimeSeries);
        assert_eq!(result.kind().to_string(), "time_series");

        let back: AnalysisResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_largest_gain_ignores_drops() {
        let comparison = WaveComparison {
            wave_a: WaveRef {
                id: "a".to_string(),
                name: "A".to_string(),
            },
            wave_b: WaveRef {
                id: "b".to_string(),
                name: "B".to_string(),
            },
            deltas: vec![
                delta("drop", -9.0, Direction::Down),
                delta("small", 2.0, Direction::Up),
                delta("big", 4.5, Direction::Up),
                delta("flat", 0.2, Direction::Flat),
            ],
        };

        assert_eq!(comparison.significant_count(), 2);
        assert_eq!(comparison.largest_gain().map(|d| d.datapoint_id.as_str()), Some("big"));
    }

    #[test]
    fn test_largest_gain_none_without_rises() {
        let comparison = WaveComparison {
            wave_a: WaveRef {
                id: "a".to_string(),
                name: "A".to_string(),
            },
            wave_b: WaveRef {
                id: "b".to_string(),
                name: "B".to_string(),
            },
            deltas: vec![delta("drop", -4.0, Direction::Down)],
        };
        assert!(comparison.largest_gain().is_none());
    }
}
