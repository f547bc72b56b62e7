//! Human-readable summaries for run outputs.

use crate::analysis::AnalysisResult;
use crate::models::AnalysisConfig;

/// Convert an artifact id such as `dashboard_summary` to `Dashboard Summary`.
pub fn title_case(artifact: &str) -> String {
    artifact
        .split(['_', '-'])
        .filter(|token| !token.is_empty())
        .map(|token| {
            let mut chars = token.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Bracketed description of the config fields that are set, or `None`.
pub fn filter_description(config: Option<&AnalysisConfig>) -> Option<String> {
    let config = config?;
    let mut parts = Vec::new();

    if let Some(timeframe) = config.timeframe {
        parts.push(format!("timeframe: {}", timeframe));
    }
    if let Some(granularity) = config.granularity {
        parts.push(format!("granularity: {}", granularity));
    }
    if let Some(rebase) = config.rebase_mode {
        parts.push(format!("rebase: {}", rebase));
    }
    if !config.wave_ids.is_empty() {
        parts.push(format!("waves: {}", config.wave_ids.len()));
    }
    if config.compares_waves() {
        parts.push("wave comparison enabled".to_string());
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!("[Filters: {}]", parts.join(", ")))
    }
}

/// Summary used when no analysis result backs an output.
pub fn generic_summary(step_name: &str, label: &str, brief: &str) -> String {
    format!("{} produced {} for \"{}\".", step_name, label, brief)
}

/// Append the filter clause, if any.
pub fn with_filters(summary: String, filters: Option<&str>) -> String {
    match filters {
        Some(clause) => format!("{} {}", summary, clause),
        None => summary,
    }
}

/// Narrative for a matched analysis result.
pub fn narrate(result: &AnalysisResult) -> String {
    match result {
        AnalysisResult::DatasetSummary(summary) => {
            let categories = if summary.categories.is_empty() {
                "no categories".to_string()
            } else {
                summary.categories.join(", ")
            };
            format!(
                "Analysed {} respondents across {} waves covering {}. {} questions in scope.",
                summary.total_respondents, summary.wave_count, categories, summary.question_count
            )
        }
        AnalysisResult::QuestionBreakdown(breakdown) => match breakdown.datapoints.first() {
            Some(top) => format!(
                "{}: \"{}\" leads at {}% (index {}) in {} (n={}).",
                breakdown.question_name,
                top.datapoint_name,
                top.percentage,
                top.index_vs_avg,
                breakdown.wave_name,
                breakdown.sample_size
            ),
            None => format!(
                "{}: no responses recorded in {} (n={}).",
                breakdown.question_name, breakdown.wave_name, breakdown.sample_size
            ),
        },
        AnalysisResult::Crosstab(crosstab) => format!(
            "Crosstab of {} cells rebased by {} on a base of {}; {} cells show high significance.",
            crosstab.rows.len(),
            crosstab.rebase_mode,
            crosstab.total_base,
            crosstab.high_significance_count()
        ),
        AnalysisResult::WaveComparison(comparison) => {
            let mut text = format!(
                "{} vs {}: {} significant shifts.",
                comparison.wave_a.name,
                comparison.wave_b.name,
                comparison.significant_count()
            );
            if let Some(gain) = comparison.largest_gain() {
                text.push_str(&format!(
                    " Largest gain: {} / {} (+{} pts).",
                    gain.question_name, gain.datapoint_name, gain.delta
                ));
            }
            text
        }
        AnalysisResult::TimeSeries(series) => format!(
            "{} trend across {} periods.",
            title_case(&series.timeframe.to_string()),
            series.periods.len()
        ),
        AnalysisResult::DatapointDetail(detail) => {
            let mut text = format!("{} ({})", detail.datapoint_name, detail.question_name);
            if detail.trend.len() > 1 {
                let trend = detail
                    .trend
                    .iter()
                    .map(|point| format!("{}: {}%", point.wave_name, point.percentage))
                    .collect::<Vec<_>>()
                    .join(" → ");
                text.push_str(": ");
                text.push_str(&trend);
            }
            text.push('.');
            text
        }
    }
}
