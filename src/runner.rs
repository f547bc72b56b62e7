//! Flow execution.
//!
//! Ties the flow registry, the analysis engine, and the run builder together
//! and hands the finished run to the run store.

use crate::analysis::AnalysisEngine;
use crate::flows::FlowRegistry;
use crate::models::{AnalysisConfig, Run, RunStatus};
use crate::report::{build_outputs, flow_error_output};
use crate::store::{RunStore, StoreError, SurveyStore};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

/// One run invocation.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub flow_id: String,
    pub brief: String,
    pub config: Option<AnalysisConfig>,
}

/// Executes flows against a survey store.
pub struct FlowRunner<'a> {
    survey: &'a dyn SurveyStore,
    flows: &'a FlowRegistry,
    runs: Option<&'a dyn RunStore>,
}

impl<'a> FlowRunner<'a> {
    pub fn new(survey: &'a dyn SurveyStore, flows: &'a FlowRegistry) -> Self {
        Self {
            survey,
            flows,
            runs: None,
        }
    }

    /// Persist finished runs to `store`.
    pub fn with_run_store(mut self, store: &'a dyn RunStore) -> Self {
        self.runs = Some(store);
        self
    }

    /// Execute one run.
    ///
    /// An unknown flow yields a `failed` run rather than an error. Store
    /// read failures abort the run and are returned to the caller.
    pub fn execute(&self, request: RunRequest) -> Result<Run, StoreError> {
        let started_at = Utc::now();

        let (status, outputs) = match self.flows.get(&request.flow_id) {
            Some(flow) => {
                info!("Executing flow '{}' ({} steps)", flow.id, flow.steps.len());

                let results = match request.config.as_ref() {
                    Some(config) if !config.is_empty() => {
                        Some(AnalysisEngine::new(self.survey).run(config)?)
                    }
                    _ => None,
                };

                let outputs = build_outputs(
                    flow,
                    &request.brief,
                    request.config.as_ref(),
                    results.as_deref(),
                );
                (RunStatus::Completed, outputs)
            }
            None => {
                warn!("Flow '{}' not found", request.flow_id);
                (RunStatus::Failed, vec![flow_error_output(&request.flow_id)])
            }
        };

        let run = Run {
            id: Uuid::new_v4(),
            flow_id: request.flow_id,
            status,
            brief: request.brief,
            config: request.config,
            started_at,
            completed_at: Utc::now(),
            outputs,
        };

        if let Some(store) = self.runs {
            store.append_run(&run)?;
            info!("Persisted run {}", run.id);
        }

        Ok(run)
    }
}
