//! Flow registry.
//!
//! Flows are declarative step sequences defined in TOML. A handful ship
//! with the binary; more can be loaded from a directory of `*.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Artifact assumed for steps that declare none.
pub const IMPLICIT_ARTIFACT: &str = "insight_summary";

/// A named sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
}

/// One step of a flow and the artifacts it is expected to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Declared output artifact identifiers (e.g. `dashboard_summary`).
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl FlowStep {
    /// Declared artifacts, or the implicit one when none are declared.
    pub fn artifacts(&self) -> Vec<&str> {
        if self.outputs.is_empty() {
            vec![IMPLICIT_ARTIFACT]
        } else {
            self.outputs.iter().map(String::as_str).collect()
        }
    }
}

/// On-disk layout of a flow file.
#[derive(Debug, Deserialize)]
struct FlowFile {
    #[serde(default)]
    flows: Vec<Flow>,
}

const BUILTIN_FLOWS: &str = r#"
[[flows]]
id = "audience-snapshot"
name = "Audience Snapshot"
description = "Profile the dataset and surface the strongest question-level signals."

[[flows.steps]]
name = "Profile dataset"
description = "Summarise waves, respondents, and categories."
outputs = ["dataset_overview"]

[[flows.steps]]
name = "Break down questions"
description = "Rank answers for the leading questions."
outputs = ["insight_summary", "question_chart"]

[[flows.steps]]
name = "Check significance"
description = "Flag cells that index well above or below average."
outputs = ["significance_report"]

[[flows]]
id = "wave-tracker"
name = "Wave Tracker"
description = "Follow metrics across waves and flag meaningful shifts."

[[flows.steps]]
name = "Trend metrics"
description = "Bucket waves into periods."
outputs = ["trend_chart", "dashboard_summary"]

[[flows.steps]]
name = "Compare waves"
description = "Measure wave-over-wave lift."
outputs = ["wave_lift"]

[[flows.steps]]
name = "Raise alerts"
description = "Notify owners about significant movement."
outputs = ["shift_alert"]

[[flows]]
id = "spark-deck"
name = "Spark Deck"
description = "Turn a brief into a presentation-ready narrative."

[[flows.steps]]
name = "Draft findings"
description = "Write the headline insight."

[[flows.steps]]
name = "Assemble deck"
description = "Lay findings out as slides."
outputs = ["findings_deck"]

[[flows.steps]]
name = "Validate sources"
description = "Attach citations to every claim."
outputs = ["citation_validation", "crosstab_appendix"]
"#;

/// Lookup table of flows by id.
#[derive(Debug, Clone, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, Flow>,
}

impl FlowRegistry {
    /// Registry containing the flows that ship with the binary.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::default();
        registry.load_str(BUILTIN_FLOWS, "built-in flows")?;
        Ok(registry)
    }

    /// Parse flows from TOML text. Returns how many were registered.
    pub fn load_str(&mut self, content: &str, origin: &str) -> Result<usize> {
        let file: FlowFile =
            toml::from_str(content).with_context(|| format!("Failed to parse {}", origin))?;
        let count = file.flows.len();
        for flow in file.flows {
            self.insert(flow);
        }
        Ok(count)
    }

    /// Load a single flow file.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read flow file: {}", path.display()))?;
        self.load_str(&content, &path.display().to_string())
    }

    /// Load every `*.toml` file under `dir`, recursively, in path order.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            anyhow::bail!("Flows directory not found: {}", dir.display());
        }

        let mut total = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            let path = entry.path();
            let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
            if entry.file_type().is_file() && is_toml {
                total += self.load_file(path)?;
            }
        }

        debug!("Loaded {} flows from {}", total, dir.display());
        Ok(total)
    }

    /// Register a flow, replacing any flow with the same id.
    pub fn insert(&mut self, flow: Flow) {
        if self.flows.contains_key(&flow.id) {
            debug!("Replacing flow definition: {}", flow.id);
        }
        self.flows.insert(flow.id.clone(), flow);
    }

    pub fn get(&self, id: &str) -> Option<&Flow> {
        self.flows.get(id)
    }

    /// All flows, ordered by id.
    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
