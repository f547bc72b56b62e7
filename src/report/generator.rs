//! Run rendering.
//!
//! This module renders a finished run as a Markdown document or as JSON.

use super::narrative::filter_description;
use crate::models::{Citation, Run, RunOutput, RunStatus};
use anyhow::Result;
use serde::Serialize;
use tracing::warn;

/// Generate a complete Markdown document for a run.
pub fn generate_markdown_report(run: &Run) -> String {
    let mut output = String::new();

    output.push_str("# Sparkrun Report\n\n");
    output.push_str(&generate_metadata_section(run));
    output.push_str(&generate_table_of_contents(run));
    output.push_str(&generate_outputs_section(&run.outputs));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(run: &Run) -> String {
    let mut section = String::new();

    let status = match run.status {
        RunStatus::Completed => "✅ completed",
        RunStatus::Failed => "❌ failed",
    };

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Run:** `{}`\n", run.id));
    section.push_str(&format!("- **Flow:** `{}`\n", run.flow_id));
    section.push_str(&format!("- **Status:** {}\n", status));
    if !run.brief.is_empty() {
        section.push_str(&format!("- **Brief:** {}\n", run.brief));
    }
    section.push_str(&format!(
        "- **Started:** {}\n",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Completed:** {}\n",
        run.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(filters) = filter_description(run.config.as_ref()) {
        section.push_str(&format!("- **Filters:** {}\n", filters));
    }
    section.push_str(&format!("- **Outputs:** {}\n", run.outputs.len()));
    section.push('\n');

    section
}

fn anchor(output: &RunOutput) -> String {
    output
        .id
        .replace(['.', ':', '_', ' '], "-")
        .to_lowercase()
}

/// Generate the table of contents.
fn generate_table_of_contents(run: &Run) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Outputs](#outputs)\n");
    for output in &run.outputs {
        toc.push_str(&format!("  - [{}](#{})\n", output.label, anchor(output)));
    }
    toc.push('\n');

    toc
}

/// Generate the outputs section.
fn generate_outputs_section(outputs: &[RunOutput]) -> String {
    let mut section = String::new();

    section.push_str("## Outputs\n\n");

    if outputs.is_empty() {
        section.push_str("This flow declares no steps, so no outputs were produced.\n\n");
        return section;
    }

    for output in outputs {
        section.push_str(&generate_output_block(output));
    }

    section
}

/// Generate a single output block.
fn generate_output_block(output: &RunOutput) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "### {} {} {{#{}}}\n\n",
        output.output_type.emoji(),
        output.label,
        anchor(output)
    ));
    block.push_str(&format!("*Type: {}*\n\n", output.output_type));
    block.push_str(&format!("{}\n\n", output.summary));

    if let Some(ref citations) = output.citations {
        block.push_str(&generate_citations(citations));
    }

    if let Some(ref data) = output.data {
        block.push_str(&generate_data_details(data));
    }

    block.push_str("---\n\n");

    block
}

/// Collapsible JSON dump of an output's data, or a visible note when it
/// cannot be serialized.
fn generate_data_details<T: Serialize>(data: &T) -> String {
    match serde_json::to_string_pretty(data) {
        Ok(json) => format!(
            "<details>\n<summary>View Data</summary>\n\n```json\n{}\n```\n</details>\n\n",
            json
        ),
        Err(e) => {
            warn!("Failed to serialize output data: {}", e);
            format!("*Data unavailable: {}*\n\n", e)
        }
    }
}

fn generate_citations(citations: &[Citation]) -> String {
    let mut list = String::from("**Sources:**\n\n");
    for citation in citations {
        list.push_str(&format!(
            "- {} ({}, confidence: {})\n",
            citation.text, citation.source, citation.confidence
        ));
    }
    list.push('\n');
    list
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by Sparkrun*\n".to_string()
}

/// Generate a JSON document for a run.
pub fn generate_json_report(run: &Run) -> Result<String> {
    serde_json::to_string_pretty(run).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisResult, TimeSeries};
    use crate::models::{AnalysisConfig, Confidence, OutputType, Timeframe};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn create_test_run() -> Run {
        Run {
            id: Uuid::new_v4(),
            flow_id: "wave-tracker".to_string(),
            status: RunStatus::Completed,
            brief: "Streaming momentum".to_string(),
            config: Some(AnalysisConfig {
                timeframe: Some(Timeframe::Quarterly),
                ..Default::default()
            }),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            outputs: vec![
                RunOutput {
                    id: "1.1:trend_chart".to_string(),
                    label: "Trend Chart".to_string(),
                    output_type: OutputType::Chart,
                    summary: "Quarterly trend across 3 periods.".to_string(),
                    data: Some(AnalysisResult::TimeSeries(TimeSeries {
                        timeframe: Timeframe::Quarterly,
                        periods: Vec::new(),
                    })),
                    citations: None,
                },
                RunOutput {
                    id: "2.1:dataset_overview".to_string(),
                    label: "Dataset Overview".to_string(),
                    output_type: OutputType::Dataset,
                    summary: "Analysed 3000 respondents.".to_string(),
                    data: None,
                    citations: Some(vec![Citation {
                        text: "Q3 2024 (n=1200)".to_string(),
                        source: "Wave Q3 2024 [w3]".to_string(),
                        confidence: Confidence::High,
                    }]),
                },
            ],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let run = create_test_run();
        let markdown = generate_markdown_report(&run);

        assert!(markdown.contains("# Sparkrun Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Outputs"));
        assert!(markdown.contains("Trend Chart"));
        assert!(markdown.contains("[Filters: timeframe: quarterly]"));
        assert!(markdown.contains("\"type\": \"time_series\""));
        assert!(markdown.contains("Q3 2024 (n=1200)"));
    }

    #[test]
    fn test_citation_confidence_is_lowercase() {
        let citations = vec![Citation {
            text: "Q3 2024 (n=1200)".to_string(),
            source: "Wave Q3 2024 [w3]".to_string(),
            confidence: Confidence::Medium,
        }];
        let list = generate_citations(&citations);

        assert!(list.contains("(Wave Q3 2024 [w3], confidence: medium)"));
        assert!(!list.contains("Medium"));

        let markdown = generate_markdown_report(&create_test_run());
        assert!(markdown.contains("confidence: high"));
    }

    #[test]
    fn test_unserializable_data_leaves_a_note() {
        // JSON objects need string keys
        let mut data: HashMap<(i32, i32), i32> = HashMap::new();
        data.insert((1, 2), 3);
        let block = generate_data_details(&data);

        assert!(!block.contains("```json"));
        assert!(block.starts_with("*Data unavailable: "));

        let block = generate_data_details(&vec![1, 2]);
        assert!(block.contains("```json"));
    }

    #[test]
    fn test_anchor_links() {
        let run = create_test_run();
        let toc = generate_table_of_contents(&run);
        assert!(toc.contains("(#1-1-trend-chart)"));
        assert!(toc.contains("(#2-1-dataset-overview)"));
    }

    #[test]
    fn test_failed_run_metadata() {
        let mut run = create_test_run();
        run.status = RunStatus::Failed;
        run.config = None;
        let section = generate_metadata_section(&run);

        assert!(section.contains("failed"));
        assert!(!section.contains("Filters"));
    }

    #[test]
    fn test_generate_json_report() {
        let run = create_test_run();
        let json = generate_json_report(&run).unwrap();

        assert!(json.contains("\"flow_id\""));
        assert!(json.contains("\"outputs\""));
        assert!(json.contains("\"type\": \"chart\""));
    }
}
