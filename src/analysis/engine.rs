//! Survey analysis engine.
//!
//! Resolves the wave set for a configuration and produces the ordered list
//! of analysis results. The engine holds no state beyond a borrowed store;
//! every call recomputes from the data it reads.

use super::aggregator::{
    aggregate_by_category_wave, classify_significance, distinct_sorted, is_significant_shift,
    period_label, rebase_percentage, round2, shift_direction, total_sample_size, RebaseInput,
};
use super::results::*;
use crate::models::{AnalysisConfig, Granularity, RebaseMode, SurveyMeasurement, Timeframe, Wave};
use crate::store::{MeasurementOrder, MeasurementQuery, StoreError, SurveyStore};
use std::collections::HashMap;
use tracing::{debug, info};

/// Questions broken down at question granularity.
const QUESTION_LIMIT: usize = 5;
/// Questions broken down at datapoint granularity.
const DETAIL_QUESTION_LIMIT: usize = 3;
/// Datapoints detailed per question at datapoint granularity.
const DETAIL_DATAPOINT_LIMIT: usize = 3;
/// Row cap for question- and datapoint-level crosstabs.
const CROSSTAB_ROW_LIMIT: usize = 100;
/// Metrics reported per time-series period.
const PERIOD_METRIC_LIMIT: usize = 20;
/// Shared pairs reported per wave comparison.
const COMPARISON_LIMIT: usize = 50;

/// Stateless analysis over a survey store.
pub struct AnalysisEngine<'a> {
    store: &'a dyn SurveyStore,
}

impl<'a> AnalysisEngine<'a> {
    pub fn new(store: &'a dyn SurveyStore) -> Self {
        Self { store }
    }

    /// Run the full analysis for `config`.
    ///
    /// The first result is always the dataset summary, followed by the
    /// granularity-specific results, the time series, and wave comparisons.
    pub fn run(&self, config: &AnalysisConfig) -> Result<Vec<AnalysisResult>, StoreError> {
        let waves = self.resolve_waves(&config.wave_ids)?;
        info!("Resolved {} waves", waves.len());

        let all_rows = self.store.measurements(
            &MeasurementQuery::for_waves(wave_ids(&waves)).order_by(MeasurementOrder::Natural),
        )?;

        let mut results = vec![AnalysisResult::DatasetSummary(summarize(&waves, &all_rows))];

        let question_ids = distinct_sorted(all_rows.iter().map(|r| r.question_id.as_str()));

        match config.effective_granularity() {
            Granularity::Dataset => {
                results.push(AnalysisResult::Crosstab(self.crosstab(
                    &waves,
                    config.rebase_mode,
                    CrosstabLevel::Dataset,
                )?));
            }
            Granularity::Question => {
                for question_id in question_ids.iter().take(QUESTION_LIMIT) {
                    results.push(AnalysisResult::QuestionBreakdown(
                        self.question_breakdown(question_id, &waves)?,
                    ));
                }
                results.push(AnalysisResult::Crosstab(self.crosstab(
                    &waves,
                    config.rebase_mode,
                    CrosstabLevel::Question,
                )?));
            }
            Granularity::Datapoint => {
                for question_id in question_ids.iter().take(DETAIL_QUESTION_LIMIT) {
                    results.push(AnalysisResult::QuestionBreakdown(
                        self.question_breakdown(question_id, &waves)?,
                    ));

                    let datapoint_ids = distinct_sorted(
                        all_rows
                            .iter()
                            .filter(|r| r.question_id == *question_id)
                            .map(|r| r.datapoint_id.as_str()),
                    );
                    for datapoint_id in datapoint_ids.iter().take(DETAIL_DATAPOINT_LIMIT) {
                        results.push(AnalysisResult::DatapointDetail(
                            self.datapoint_detail(datapoint_id, &waves)?,
                        ));
                    }
                }
                results.push(AnalysisResult::Crosstab(self.crosstab(
                    &waves,
                    config.rebase_mode,
                    CrosstabLevel::Datapoint,
                )?));
            }
        }

        if let Some(timeframe) = config.timeframe {
            if waves.len() >= 2 {
                results.push(AnalysisResult::TimeSeries(self.time_series(&waves, timeframe)?));
            }
        }

        if config.compares_waves() && waves.len() >= 2 {
            for pair in waves.windows(2) {
                results.push(AnalysisResult::WaveComparison(
                    self.compare_waves(&pair[0], &pair[1])?,
                ));
            }
        }

        info!("Analysis produced {} results", results.len());
        Ok(results)
    }

    /// Waves for the requested ids (all waves when empty), most recent first.
    pub fn resolve_waves(&self, ids: &[String]) -> Result<Vec<Wave>, StoreError> {
        if ids.is_empty() {
            self.store.waves(None)
        } else {
            let waves = self.store.waves(Some(ids))?;
            if waves.len() < ids.len() {
                debug!("Dropped {} unknown wave ids", ids.len() - waves.len());
            }
            Ok(waves)
        }
    }

    /// Datapoint ranking for one question in the most recent resolved wave.
    pub fn question_breakdown(
        &self,
        question_id: &str,
        waves: &[Wave],
    ) -> Result<QuestionBreakdown, StoreError> {
        let primary = waves.first();
        let rows = match primary {
            Some(wave) => self.store.measurements(
                &MeasurementQuery::for_waves([wave.id.as_str()])
                    .question(question_id)
                    .order_by(MeasurementOrder::PercentageDesc),
            )?,
            None => Vec::new(),
        };

        let first = rows.first();
        Ok(QuestionBreakdown {
            question_id: question_id.to_string(),
            question_name: first
                .map(|r| r.question_name.clone())
                .unwrap_or_else(|| question_id.to_string()),
            category: first
                .map(|r| r.category.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            wave_id: primary.map(|w| w.id.clone()).unwrap_or_default(),
            wave_name: primary.map(|w| w.name.clone()).unwrap_or_default(),
            sample_size: primary.map_or(0, |w| w.sample_size),
            datapoints: rows
                .iter()
                .map(|r| DatapointShare {
                    datapoint_id: r.datapoint_id.clone(),
                    datapoint_name: r.datapoint_name.clone(),
                    percentage: r.percentage,
                    respondent_count: r.respondent_count,
                    index_vs_avg: r.index_vs_avg,
                })
                .collect(),
        })
    }

    /// Trend of one datapoint across the resolved waves, most recent first.
    pub fn datapoint_detail(
        &self,
        datapoint_id: &str,
        waves: &[Wave],
    ) -> Result<DatapointDetail, StoreError> {
        let rows = self.store.measurements(
            &MeasurementQuery::for_waves(wave_ids(waves))
                .datapoint(datapoint_id)
                .order_by(MeasurementOrder::WaveStartDesc),
        )?;
        let names = wave_names(waves);

        let first = rows.first();
        Ok(DatapointDetail {
            datapoint_id: datapoint_id.to_string(),
            datapoint_name: first
                .map(|r| r.datapoint_name.clone())
                .unwrap_or_else(|| datapoint_id.to_string()),
            question_id: first.map(|r| r.question_id.clone()).unwrap_or_default(),
            question_name: first.map(|r| r.question_name.clone()).unwrap_or_default(),
            trend: rows
                .iter()
                .map(|r| TrendPoint {
                    wave_id: r.wave_id.clone(),
                    wave_name: names.get(r.wave_id.as_str()).cloned().unwrap_or_default(),
                    percentage: r.percentage,
                    respondent_count: r.respondent_count,
                    index_vs_avg: r.index_vs_avg,
                    sample_size: r.sample_size,
                })
                .collect(),
        })
    }

    /// Rebased, significance-annotated crosstab at the given level.
    pub fn crosstab(
        &self,
        waves: &[Wave],
        rebase_mode: Option<RebaseMode>,
        level: CrosstabLevel,
    ) -> Result<Crosstab, StoreError> {
        let mode = rebase_mode.unwrap_or_default();
        let total_base = total_sample_size(waves);
        let names = wave_names(waves);
        let wave_name = |id: &str| names.get(id).cloned().unwrap_or_default();

        let rows: Vec<CrosstabRow> = match level {
            CrosstabLevel::Dataset => {
                let measurements = self
                    .store
                    .measurements(&MeasurementQuery::for_waves(wave_ids(waves)))?;
                aggregate_by_category_wave(&measurements, waves)
                    .into_iter()
                    .map(|agg| CrosstabRow {
                        question_id: None,
                        question_name: None,
                        datapoint_id: None,
                        datapoint_name: None,
                        wave_name: wave_name(&agg.wave_id),
                        category: agg.category,
                        wave_id: agg.wave_id,
                        respondent_count: agg.respondent_count,
                        percentage: agg.avg_percentage,
                        index_vs_avg: agg.avg_index,
                        sample_size: agg.sample_size,
                        rebased_percentage: 0.0,
                        significance: Significance::None,
                    })
                    .collect()
            }
            CrosstabLevel::Question | CrosstabLevel::Datapoint => self
                .store
                .measurements(
                    &MeasurementQuery::for_waves(wave_ids(waves))
                        .order_by(MeasurementOrder::QuestionNameThenPercentage)
                        .limit(CROSSTAB_ROW_LIMIT),
                )?
                .into_iter()
                .map(|m| CrosstabRow {
                    question_id: Some(m.question_id),
                    question_name: Some(m.question_name),
                    datapoint_id: Some(m.datapoint_id),
                    datapoint_name: Some(m.datapoint_name),
                    category: m.category,
                    wave_name: wave_name(&m.wave_id),
                    wave_id: m.wave_id,
                    respondent_count: u64::from(m.respondent_count),
                    percentage: m.percentage,
                    index_vs_avg: m.index_vs_avg,
                    sample_size: m.sample_size,
                    rebased_percentage: 0.0,
                    significance: Significance::None,
                })
                .collect(),
        };

        let row_count = rows.len();
        let rows = rows
            .into_iter()
            .map(|row| CrosstabRow {
                rebased_percentage: rebase_percentage(
                    mode,
                    RebaseInput {
                        respondent_count: row.respondent_count,
                        wave_sample_size: row.sample_size,
                        total_base,
                        row_count,
                        raw_percentage: row.percentage,
                    },
                ),
                significance: classify_significance(row.index_vs_avg),
                ..row
            })
            .collect();

        Ok(Crosstab {
            level,
            rows,
            rebase_mode: mode,
            total_base,
        })
    }

    /// One period per wave, oldest first, with each wave's top metrics.
    pub fn time_series(
        &self,
        waves: &[Wave],
        timeframe: Timeframe,
    ) -> Result<TimeSeries, StoreError> {
        let mut ordered: Vec<&Wave> = waves.iter().collect();
        ordered.sort_by(|a, b| a.start_date.cmp(&b.start_date));

        let mut periods = Vec::with_capacity(ordered.len());
        for wave in ordered {
            let metrics = self
                .store
                .measurements(
                    &MeasurementQuery::for_waves([wave.id.as_str()])
                        .order_by(MeasurementOrder::PercentageDesc)
                        .limit(PERIOD_METRIC_LIMIT),
                )?
                .into_iter()
                .map(|m| PeriodMetric {
                    question_id: m.question_id,
                    question_name: m.question_name,
                    datapoint_id: m.datapoint_id,
                    datapoint_name: m.datapoint_name,
                    percentage: m.percentage,
                    respondent_count: m.respondent_count,
                })
                .collect();

            periods.push(Period {
                label: period_label(timeframe, wave),
                start_date: wave.start_date,
                end_date: wave.end_date,
                wave_id: wave.id.clone(),
                metrics,
            });
        }

        Ok(TimeSeries { timeframe, periods })
    }

    /// Shifts for every (question, datapoint) pair present in both waves.
    pub fn compare_waves(&self, a: &Wave, b: &Wave) -> Result<WaveComparison, StoreError> {
        let rows_a = self
            .store
            .measurements(&MeasurementQuery::for_waves([a.id.as_str()]))?;
        let rows_b = self
            .store
            .measurements(&MeasurementQuery::for_waves([b.id.as_str()]))?;

        let lookup_b: HashMap<(&str, &str), &SurveyMeasurement> = rows_b
            .iter()
            .map(|r| ((r.question_id.as_str(), r.datapoint_id.as_str()), r))
            .collect();

        let mut shared: Vec<(&SurveyMeasurement, &SurveyMeasurement)> = rows_a
            .iter()
            .filter_map(|ra| {
                lookup_b
                    .get(&(ra.question_id.as_str(), ra.datapoint_id.as_str()))
                    .map(|rb| (ra, *rb))
            })
            .collect();

        shared.sort_by(|(a1, b1), (a2, b2)| {
            let d1 = (a1.percentage - b1.percentage).abs();
            let d2 = (a2.percentage - b2.percentage).abs();
            d2.total_cmp(&d1)
                .then_with(|| a1.question_id.cmp(&a2.question_id))
                .then_with(|| a1.datapoint_id.cmp(&a2.datapoint_id))
        });
        shared.truncate(COMPARISON_LIMIT);

        let deltas = shared
            .into_iter()
            .map(|(ra, rb)| {
                let delta = round2(ra.percentage - rb.percentage);
                WaveDelta {
                    question_id: ra.question_id.clone(),
                    question_name: ra.question_name.clone(),
                    datapoint_id: ra.datapoint_id.clone(),
                    datapoint_name: ra.datapoint_name.clone(),
                    percentage_a: ra.percentage,
                    percentage_b: rb.percentage,
                    delta,
                    direction: shift_direction(delta),
                    significant: is_significant_shift(delta),
                }
            })
            .collect();

        Ok(WaveComparison {
            wave_a: WaveRef {
                id: a.id.clone(),
                name: a.name.clone(),
            },
            wave_b: WaveRef {
                id: b.id.clone(),
                name: b.name.clone(),
            },
            deltas,
        })
    }
}

/// Dataset summary over the resolved waves and their measurements.
fn summarize(waves: &[Wave], rows: &[SurveyMeasurement]) -> DatasetSummary {
    DatasetSummary {
        wave_count: waves.len(),
        waves: waves
            .iter()
            .map(|w| WaveSample {
                id: w.id.clone(),
                name: w.name.clone(),
                sample_size: w.sample_size,
            })
            .collect(),
        total_respondents: total_sample_size(waves),
        question_count: distinct_sorted(rows.iter().map(|r| r.question_id.as_str())).len(),
        categories: distinct_sorted(rows.iter().map(|r| r.category.as_str())),
    }
}

fn wave_ids(waves: &[Wave]) -> Vec<&str> {
    waves.iter().map(|w| w.id.as_str()).collect()
}

fn wave_names(waves: &[Wave]) -> HashMap<&str, String> {
    waves.iter().map(|w| (w.id.as_str(), w.name.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::sample_dataset;
    use crate::store::{Dataset, MemoryStore};

    fn store() -> MemoryStore {
        MemoryStore::new(sample_dataset())
    }

    fn kinds(results: &[AnalysisResult]) -> Vec<ResultKind> {
        results.iter().map(AnalysisResult::kind).collect()
    }

    /// 8 questions x 9 datapoints x 3 waves, one category per datapoint.
    fn wide_dataset() -> Dataset {
        let waves: Vec<Wave> = [("w1", 1u32), ("w2", 4), ("w3", 7)]
            .into_iter()
            .enumerate()
            .map(|(idx, (id, month))| {
                let start = chrono::NaiveDate::from_ymd_opt(2024, month, 1).unwrap();
                Wave {
                    id: id.to_string(),
                    name: format!("Wave {}", id),
                    study_id: "study-wide".to_string(),
                    study_name: "Wide Tracker".to_string(),
                    year: 2024,
                    quarter: Some(idx as u8 + 1),
                    start_date: start,
                    end_date: start + chrono::Duration::days(27),
                    sample_size: 1000,
                }
            })
            .collect();

        let mut measurements = Vec::new();
        for (wave_idx, wave) in waves.iter().enumerate() {
            for q in 1..=8 {
                for d in 1..=9 {
                    measurements.push(SurveyMeasurement {
                        wave_id: wave.id.clone(),
                        question_id: format!("q{:02}", q),
                        question_name: format!("Question {:02}", q),
                        datapoint_id: format!("q{:02}-d{}", q, d),
                        datapoint_name: format!("Answer {}", d),
                        category: format!("Category {:02}-{}", q, d),
                        respondent_count: 10 * d,
                        percentage: (q * 9 + d) as f64 / 2.0 + wave_idx as f64 * d as f64,
                        index_vs_avg: 100.0,
                        sample_size: 0,
                    });
                }
            }
        }

        Dataset { waves, measurements }
    }

    #[test]
    fn test_output_caps_on_wide_dataset() {
        let store = MemoryStore::new(wide_dataset());
        let engine = AnalysisEngine::new(&store);

        let config = AnalysisConfig {
            timeframe: Some(Timeframe::Quarterly),
            compare_waves: Some(true),
            ..Default::default()
        };
        let results = engine.run(&config).unwrap();
        let count = |kind: ResultKind| kinds(&results).into_iter().filter(|k| *k == kind).count();
        assert_eq!(count(ResultKind::QuestionBreakdown), 5);
        assert_eq!(count(ResultKind::WaveComparison), 2);

        for result in &results {
            match result {
                AnalysisResult::Crosstab(crosstab) => assert_eq!(crosstab.rows.len(), 100),
                AnalysisResult::TimeSeries(series) => {
                    assert_eq!(series.periods.len(), 3);
                    assert!(series.periods.iter().all(|p| p.metrics.len() == 20));
                }
                AnalysisResult::WaveComparison(comparison) => {
                    assert_eq!(comparison.deltas.len(), 50)
                }
                _ => {}
            }
        }

        let detailed = AnalysisConfig {
            granularity: Some(Granularity::Datapoint),
            ..Default::default()
        };
        let results = engine.run(&detailed).unwrap();
        let emitted = kinds(&results);
        assert_eq!(
            emitted.iter().filter(|k| **k == ResultKind::QuestionBreakdown).count(),
            3
        );
        assert_eq!(
            emitted.iter().filter(|k| **k == ResultKind::DatapointDetail).count(),
            9
        );
        let Some(AnalysisResult::Crosstab(crosstab)) = results.last() else {
            panic!("expected a trailing crosstab");
        };
        assert_eq!(crosstab.rows.len(), 100);
    }

    #[test]
    fn test_dataset_crosstab_is_not_capped() {
        let store = MemoryStore::new(wide_dataset());
        let config = AnalysisConfig {
            granularity: Some(Granularity::Dataset),
            ..Default::default()
        };
        let results = AnalysisEngine::new(&store).run(&config).unwrap();

        let AnalysisResult::Crosstab(crosstab) = &results[1] else {
            panic!("expected a crosstab");
        };
        assert_eq!(crosstab.level, CrosstabLevel::Dataset);
        assert_eq!(crosstab.rows.len(), 8 * 9 * 3);
    }

    // Calling the engine directly; `FlowRunner::execute` never does this for
    // an empty config and falls back to generic summaries instead.
    #[test]
    fn test_empty_config_defaults_to_question_granularity() {
        let store = store();
        let results = AnalysisEngine::new(&store)
            .run(&AnalysisConfig::default())
            .unwrap();

        assert_eq!(
            kinds(&results),
            vec![
                ResultKind::DatasetSummary,
                ResultKind::QuestionBreakdown,
                ResultKind::QuestionBreakdown,
                ResultKind::QuestionBreakdown,
                ResultKind::Crosstab,
            ]
        );
    }

    #[test]
    fn test_dataset_summary() {
        let store = store();
        let results = AnalysisEngine::new(&store)
            .run(&AnalysisConfig::default())
            .unwrap();

        let AnalysisResult::DatasetSummary(summary) = &results[0] else {
            panic!("first result must be a dataset summary");
        };
        assert_eq!(summary.wave_count, 3);
        assert_eq!(summary.total_respondents, 3000);
        assert_eq!(summary.question_count, 3);
        assert_eq!(summary.categories, vec!["Brands", "Media"]);
        assert_eq!(summary.waves[0].id, "w3");
    }

    #[test]
    fn test_zero_waves_yield_zero_values() {
        let store = MemoryStore::new(Dataset::default());
        let config = AnalysisConfig {
            granularity: Some(Granularity::Dataset),
            timeframe: Some(Timeframe::Monthly),
            compare_waves: Some(true),
            ..Default::default()
        };
        let results = AnalysisEngine::new(&store).run(&config).unwrap();

        assert_eq!(kinds(&results), vec![ResultKind::DatasetSummary, ResultKind::Crosstab]);
        let AnalysisResult::DatasetSummary(summary) = &results[0] else {
            panic!("expected summary");
        };
        assert_eq!(summary.total_respondents, 0);
        assert!(summary.categories.is_empty());

        let AnalysisResult::Crosstab(crosstab) = &results[1] else {
            panic!("expected crosstab");
        };
        assert_eq!(crosstab.total_base, 0);
        assert!(crosstab.rows.is_empty());
    }

    #[test]
    fn test_unknown_wave_ids_resolve_to_empty() {
        let store = store();
        let config = AnalysisConfig {
            wave_ids: vec!["nope".to_string()],
            ..Default::default()
        };
        let results = AnalysisEngine::new(&store).run(&config).unwrap();
        assert_eq!(kinds(&results), vec![ResultKind::DatasetSummary, ResultKind::Crosstab]);
    }

    #[test]
    fn test_question_breakdown_uses_most_recent_wave() {
        let store = store();
        let engine = AnalysisEngine::new(&store);
        let waves = engine.resolve_waves(&[]).unwrap();
        let breakdown = engine.question_breakdown("q1", &waves).unwrap();

        assert_eq!(breakdown.wave_id, "w3");
        assert_eq!(breakdown.sample_size, 1200);
        assert_eq!(breakdown.category, "Media");
        assert_eq!(breakdown.datapoints[0].datapoint_name, "Netflix");
        assert_eq!(breakdown.datapoints[0].percentage, 56.0);
    }

    #[test]
    fn test_question_breakdown_fallbacks() {
        let store = store();
        let engine = AnalysisEngine::new(&store);
        let waves = engine.resolve_waves(&["w1".to_string()]).unwrap();
        // q3 was only fielded in w3.
        let breakdown = engine.question_breakdown("q3", &waves).unwrap();

        assert_eq!(breakdown.question_name, "q3");
        assert_eq!(breakdown.category, "Unknown");
        assert!(breakdown.datapoints.is_empty());
    }

    #[test]
    fn test_datapoint_granularity() {
        let store = store();
        let config = AnalysisConfig {
            granularity: Some(Granularity::Datapoint),
            ..Default::default()
        };
        let results = AnalysisEngine::new(&store).run(&config).unwrap();

        assert_eq!(
            kinds(&results),
            vec![
                ResultKind::DatasetSummary,
                ResultKind::QuestionBreakdown,
                ResultKind::DatapointDetail,
                ResultKind::DatapointDetail,
                ResultKind::QuestionBreakdown,
                ResultKind::DatapointDetail,
                ResultKind::DatapointDetail,
                ResultKind::QuestionBreakdown,
                ResultKind::DatapointDetail,
                ResultKind::Crosstab,
            ]
        );

        let AnalysisResult::DatapointDetail(detail) = &results[2] else {
            panic!("expected detail");
        };
        assert_eq!(detail.datapoint_id, "d1");
        assert_eq!(detail.question_name, "Streaming services");
        let trend: Vec<_> = detail.trend.iter().map(|t| t.wave_name.as_str()).collect();
        assert_eq!(trend, vec!["Q3 2024", "Q2 2024", "Q1 2024"]);
    }

    #[test]
    fn test_datapoint_detail_without_rows() {
        let store = store();
        let engine = AnalysisEngine::new(&store);
        let detail = engine.datapoint_detail("ghost", &[]).unwrap();
        assert_eq!(detail.datapoint_name, "ghost");
        assert_eq!(detail.question_name, "");
        assert!(detail.trend.is_empty());
    }

    #[test]
    fn test_dataset_crosstab_groups_by_category_and_wave() {
        let store = store();
        let engine = AnalysisEngine::new(&store);
        let waves = engine.resolve_waves(&[]).unwrap();
        let crosstab = engine
            .crosstab(&waves, None, CrosstabLevel::Dataset)
            .unwrap();

        assert_eq!(crosstab.rebase_mode, RebaseMode::Total);
        assert_eq!(crosstab.total_base, 3000);
        // Two categories across three waves.
        assert_eq!(crosstab.rows.len(), 6);
        assert!(crosstab.rows.iter().all(|r| r.question_id.is_none()));

        let brands_w3 = &crosstab.rows[0];
        assert_eq!(brands_w3.category, "Brands");
        assert_eq!(brands_w3.wave_id, "w3");
        assert_eq!(brands_w3.respondent_count, 400);
        assert_eq!(brands_w3.rebased_percentage, 13.33);
    }

    #[test]
    fn test_question_crosstab_rebase_and_significance() {
        let store = store();
        let engine = AnalysisEngine::new(&store);
        let waves = engine.resolve_waves(&[]).unwrap();
        let crosstab = engine
            .crosstab(&waves, Some(RebaseMode::Column), CrosstabLevel::Question)
            .unwrap();

        assert_eq!(crosstab.rows.len(), 13);
        // Ordered by question name: "Coffee brands" first, highest share first.
        let first = &crosstab.rows[0];
        assert_eq!(first.question_name.as_deref(), Some("Coffee brands"));
        assert_eq!(first.datapoint_name.as_deref(), Some("Starbucks"));
        assert_eq!(first.significance, Significance::Medium);

        for row in &crosstab.rows {
            let expected = round2(row.respondent_count as f64 / row.sample_size as f64 * 100.0);
            assert_eq!(row.rebased_percentage, expected);
            assert!((0.0..=100.0).contains(&row.rebased_percentage));
        }

        // Netflix (135) and Dunkin (65) rows are high in every wave.
        assert_eq!(crosstab.high_significance_count(), 6);
    }

    #[test]
    fn test_row_rebase_scales_by_row_count() {
        let store = store();
        let engine = AnalysisEngine::new(&store);
        let waves = engine.resolve_waves(&["w3".to_string()]).unwrap();
        let crosstab = engine
            .crosstab(&waves, Some(RebaseMode::Row), CrosstabLevel::Question)
            .unwrap();

        assert_eq!(crosstab.rows.len(), 5);
        for row in &crosstab.rows {
            let expected = round2(row.respondent_count as f64 / 1200.0 * 100.0 * 5.0);
            assert_eq!(row.rebased_percentage, expected);
        }
    }

    #[test]
    fn test_time_series_requires_two_waves() {
        let store = store();
        let config = AnalysisConfig {
            timeframe: Some(Timeframe::Quarterly),
            wave_ids: vec!["w2".to_string()],
            ..Default::default()
        };
        let results = AnalysisEngine::new(&store).run(&config).unwrap();
        assert!(!kinds(&results).contains(&ResultKind::TimeSeries));
    }

    #[test]
    fn test_time_series_oldest_first() {
        let store = store();
        let config = AnalysisConfig {
            timeframe: Some(Timeframe::Quarterly),
            ..Default::default()
        };
        let results = AnalysisEngine::new(&store).run(&config).unwrap();

        let Some(AnalysisResult::TimeSeries(series)) = results.last() else {
            panic!("time series should close the list");
        };
        let labels: Vec<_> = series.periods.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["Q1 2024", "Q2 2024", "Q3 2024"]);
        assert_eq!(series.periods[2].metrics.len(), 5);
        assert_eq!(series.periods[2].metrics[0].datapoint_name, "Netflix");
    }

    #[test]
    fn test_wave_comparisons_for_adjacent_pairs() {
        let store = store();
        let config = AnalysisConfig {
            compare_waves: Some(true),
            timeframe: Some(Timeframe::Weekly),
            ..Default::default()
        };
        let results = AnalysisEngine::new(&store).run(&config).unwrap();
        let kinds = kinds(&results);

        let n = kinds.len();
        assert_eq!(kinds[n - 3], ResultKind::TimeSeries);
        assert_eq!(kinds[n - 2], ResultKind::WaveComparison);
        assert_eq!(kinds[n - 1], ResultKind::WaveComparison);

        let AnalysisResult::WaveComparison(first) = &results[n - 2] else {
            panic!("expected comparison");
        };
        assert_eq!(first.wave_a.id, "w3");
        assert_eq!(first.wave_b.id, "w2");
        // q3 exists only in w3, so four shared pairs.
        assert_eq!(first.deltas.len(), 4);

        let top = &first.deltas[0];
        assert_eq!(top.delta.abs(), 4.0);
        assert!(top.significant);

        let netflix = first.deltas.iter().find(|d| d.datapoint_id == "d1").unwrap();
        assert_eq!(netflix.delta, 4.0);
        assert_eq!(netflix.direction, Direction::Up);

        let starbucks = first.deltas.iter().find(|d| d.datapoint_id == "d3").unwrap();
        assert_eq!(starbucks.direction, Direction::Flat);
        assert!(!starbucks.significant);
    }

    #[test]
    fn test_compare_waves_example() {
        let mut dataset = sample_dataset();
        dataset.measurements.retain(|m| m.datapoint_id == "d1" && m.wave_id != "w2");
        for m in dataset.measurements.iter_mut() {
            m.percentage = if m.wave_id == "w3" { 50.0 } else { 44.0 };
        }
        let store = MemoryStore::new(dataset);
        let engine = AnalysisEngine::new(&store);
        let waves = engine
            .resolve_waves(&["w3".to_string(), "w1".to_string()])
            .unwrap();

        let comparison = engine.compare_waves(&waves[0], &waves[1]).unwrap();
        let delta = &comparison.deltas[0];
        assert_eq!(delta.delta, 6.0);
        assert_eq!(delta.direction, Direction::Up);
        assert!(delta.significant);
    }

    #[test]
    fn test_run_is_idempotent() {
        let store = store();
        let engine = AnalysisEngine::new(&store);
        let config = AnalysisConfig {
            granularity: Some(Granularity::Datapoint),
            timeframe: Some(Timeframe::Monthly),
            rebase_mode: Some(RebaseMode::Row),
            compare_waves: Some(true),
            ..Default::default()
        };
        assert_eq!(engine.run(&config).unwrap(), engine.run(&config).unwrap());
    }
}
