//! Run output assembly.
//!
//! Maps every (step, artifact) pair of a flow onto an output: the artifact
//! is classified into an output type, matched to an analysis result, and
//! given a narrative summary, structured data, and citations.

use super::narrative::{filter_description, generic_summary, narrate, title_case, with_filters};
use crate::analysis::{AnalysisResult, ResultKind};
use crate::flows::Flow;
use crate::models::{AnalysisConfig, Citation, Confidence, OutputType, RunOutput};
use std::collections::HashMap;
use tracing::debug;

/// One artifact classification rule: any keyword match selects the type.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactRule {
    pub keywords: &'static [&'static str],
    pub output_type: OutputType,
}

/// Classification rules in priority order. First match wins.
pub const ARTIFACT_RULES: &[ArtifactRule] = &[
    ArtifactRule {
        keywords: &["dashboard"],
        output_type: OutputType::Dashboard,
    },
    ArtifactRule {
        keywords: &["deck"],
        output_type: OutputType::Deck,
    },
    ArtifactRule {
        keywords: &["chart"],
        output_type: OutputType::Chart,
    },
    ArtifactRule {
        keywords: &["crosstab", "significance", "lift"],
        output_type: OutputType::Crosstab,
    },
    ArtifactRule {
        keywords: &["dataset", "data"],
        output_type: OutputType::Dataset,
    },
    ArtifactRule {
        keywords: &["alert"],
        output_type: OutputType::Alert,
    },
    ArtifactRule {
        keywords: &["report", "validation", "citation"],
        output_type: OutputType::Report,
    },
];

/// Label of the output produced when a flow id is unknown.
pub const FLOW_ERROR_LABEL: &str = "Flow Error";

/// Classify an artifact id by substring rules, defaulting to insight.
pub fn classify_artifact(artifact: &str) -> OutputType {
    let artifact = artifact.to_lowercase();
    ARTIFACT_RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| artifact.contains(k)))
        .map_or(OutputType::Insight, |rule| rule.output_type)
}

/// Result kinds that can back an output type, most preferred first.
pub fn preferred_kinds(output_type: OutputType) -> &'static [ResultKind] {
    match output_type {
        OutputType::Crosstab => &[ResultKind::Crosstab, ResultKind::WaveComparison],
        OutputType::Dataset => &[ResultKind::DatasetSummary],
        OutputType::Chart | OutputType::Dashboard => {
            &[ResultKind::TimeSeries, ResultKind::QuestionBreakdown]
        }
        OutputType::Insight => &[ResultKind::QuestionBreakdown, ResultKind::DatasetSummary],
        OutputType::Report | OutputType::Deck | OutputType::Alert => &[],
    }
}

/// Analysis results grouped by kind, keeping emission order within a kind.
#[derive(Debug, Default)]
pub struct ResultIndex<'a> {
    by_kind: HashMap<ResultKind, Vec<&'a AnalysisResult>>,
}

impl<'a> ResultIndex<'a> {
    pub fn new(results: &'a [AnalysisResult]) -> Self {
        let mut by_kind: HashMap<ResultKind, Vec<&'a AnalysisResult>> = HashMap::new();
        for result in results {
            by_kind.entry(result.kind()).or_default().push(result);
        }
        Self { by_kind }
    }

    pub fn first(&self, kind: ResultKind) -> Option<&'a AnalysisResult> {
        self.by_kind.get(&kind).and_then(|v| v.first().copied())
    }

    #[cfg(test)]
    pub fn count(&self, kind: ResultKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Best available result for an output type.
    pub fn select(&self, output_type: OutputType) -> Option<&'a AnalysisResult> {
        preferred_kinds(output_type)
            .iter()
            .find_map(|kind| self.first(*kind))
    }
}

/// Citations for results that carry source data; `None` otherwise.
pub fn citations_for(result: &AnalysisResult) -> Option<Vec<Citation>> {
    match result {
        AnalysisResult::DatasetSummary(summary) => Some(
            summary
                .waves
                .iter()
                .map(|wave| Citation {
                    text: format!("{} (n={})", wave.name, wave.sample_size),
                    source: format!("Wave {} [{}]", wave.name, wave.id),
                    confidence: Confidence::High,
                })
                .collect(),
        ),
        AnalysisResult::Crosstab(crosstab) => Some(vec![Citation {
            text: format!(
                "Crosstab rebased by {} on a total base of {}",
                crosstab.rebase_mode, crosstab.total_base
            ),
            source: "Survey crosstab".to_string(),
            confidence: Confidence::High,
        }]),
        AnalysisResult::QuestionBreakdown(_)
        | AnalysisResult::DatapointDetail(_)
        | AnalysisResult::WaveComparison(_)
        | AnalysisResult::TimeSeries(_) => None,
    }
}

/// Build the ordered outputs for one run of `flow`.
///
/// `results` is `None` when no analysis was run; every output then uses the
/// generic summary.
pub fn build_outputs(
    flow: &Flow,
    brief: &str,
    config: Option<&AnalysisConfig>,
    results: Option<&[AnalysisResult]>,
) -> Vec<RunOutput> {
    let index = results.map(ResultIndex::new).unwrap_or_default();
    let filters = filter_description(config);

    let mut outputs = Vec::new();
    for (step_idx, step) in flow.steps.iter().enumerate() {
        for (artifact_idx, artifact) in step.artifacts().into_iter().enumerate() {
            let output_type = classify_artifact(artifact);
            let matched = index.select(output_type);
            let label = title_case(artifact);

            debug!(
                "Step '{}' artifact '{}' -> {} ({})",
                step.name,
                artifact,
                output_type,
                matched.map_or("unmatched".to_string(), |r| r.kind().to_string())
            );

            let summary = match matched {
                Some(result) => narrate(result),
                None => generic_summary(&step.name, &label, brief),
            };

            outputs.push(RunOutput {
                id: format!("{}.{}:{}", step_idx + 1, artifact_idx + 1, artifact),
                label,
                output_type,
                summary: with_filters(summary, filters.as_deref()),
                data: matched.cloned(),
                citations: matched.and_then(citations_for),
            });
        }
    }

    outputs
}

/// The single output of a run whose flow could not be found.
pub fn flow_error_output(flow_id: &str) -> RunOutput {
    RunOutput {
        id: "flow-error".to_string(),
        label: FLOW_ERROR_LABEL.to_string(),
        output_type: OutputType::Alert,
        summary: format!(
            "Flow \"{}\" was not found in the registry. No analysis was run.",
            flow_id
        ),
        data: None,
        citations: None,
    }
}
