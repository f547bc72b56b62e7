//! In-memory survey store backed by a JSON dataset.

use super::{sort_measurements, MeasurementQuery, RunStore, StoreError, SurveyStore};
use crate::models::{Run, SurveyMeasurement, Wave};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A complete survey dataset: wave metadata plus measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub waves: Vec<Wave>,
    #[serde(default)]
    pub measurements: Vec<SurveyMeasurement>,
}

impl Dataset {
    /// Load a dataset from a JSON file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset: Dataset = serde_json::from_str(&content)?;
        debug!(
            "Loaded dataset {}: {} waves, {} measurements",
            path.display(),
            dataset.waves.len(),
            dataset.measurements.len()
        );
        Ok(dataset)
    }
}

/// Survey and run store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    dataset: Dataset,
    runs: RefCell<Vec<Run>>,
}

impl MemoryStore {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            runs: RefCell::new(Vec::new()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Dataset::load(path)?))
    }

    /// Runs appended so far.
    pub fn runs(&self) -> Vec<Run> {
        self.runs.borrow().clone()
    }

    fn wave_starts(&self) -> HashMap<String, NaiveDate> {
        self.dataset
            .waves
            .iter()
            .map(|w| (w.id.clone(), w.start_date))
            .collect()
    }
}

impl SurveyStore for MemoryStore {
    fn waves(&self, ids: Option<&[String]>) -> Result<Vec<Wave>, StoreError> {
        let mut waves: Vec<Wave> = self
            .dataset
            .waves
            .iter()
            .filter(|w| ids.map_or(true, |ids| ids.contains(&w.id)))
            .cloned()
            .collect();
        waves.sort_by(|a, b| b.start_date.cmp(&a.start_date).then_with(|| a.id.cmp(&b.id)));
        Ok(waves)
    }

    fn measurements(
        &self,
        query: &MeasurementQuery,
    ) -> Result<Vec<SurveyMeasurement>, StoreError> {
        if query.wave_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sample_sizes: HashMap<&str, u32> = self
            .dataset
            .waves
            .iter()
            .map(|w| (w.id.as_str(), w.sample_size))
            .collect();

        // Inner join: rows whose wave is unknown are skipped.
        let mut rows: Vec<SurveyMeasurement> = self
            .dataset
            .measurements
            .iter()
            .filter(|m| query.matches(m))
            .filter_map(|m| {
                sample_sizes.get(m.wave_id.as_str()).map(|&sample_size| SurveyMeasurement {
                    sample_size,
                    ..m.clone()
                })
            })
            .collect();

        sort_measurements(&mut rows, query.order, &self.wave_starts());

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }
}

impl RunStore for MemoryStore {
    fn append_run(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.borrow_mut().push(run.clone());
        Ok(())
    }
}

/// Shared fixture for tests across the crate.
///
/// Three quarterly waves (w3 most recent), two categories, three questions.
#[cfg(test)]
pub(crate) fn sample_dataset() -> Dataset {
    fn wave(id: &str, name: &str, year: i32, quarter: u8, month: u32, sample: u32) -> Wave {
        let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        Wave {
            id: id.to_string(),
            name: name.to_string(),
            study_id: "study-1".to_string(),
            study_name: "Brand Tracker".to_string(),
            year,
            quarter: Some(quarter),
            start_date: start,
            end_date: start + chrono::Duration::days(27),
            sample_size: sample,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn m(
        wave: &str,
        question: &str,
        question_name: &str,
        datapoint: &str,
        datapoint_name: &str,
        category: &str,
        respondents: u32,
        pct: f64,
        index: f64,
    ) -> SurveyMeasurement {
        SurveyMeasurement {
            wave_id: wave.to_string(),
            question_id: question.to_string(),
            question_name: question_name.to_string(),
            datapoint_id: datapoint.to_string(),
            datapoint_name: datapoint_name.to_string(),
            category: category.to_string(),
            respondent_count: respondents,
            percentage: pct,
            index_vs_avg: index,
            sample_size: 0,
        }
    }

    let waves = vec![
        wave("w1", "Q1 2024", 2024, 1, 1, 1000),
        wave("w2", "Q2 2024", 2024, 2, 4, 800),
        wave("w3", "Q3 2024", 2024, 3, 7, 1200),
    ];

    let mut measurements = Vec::new();
    for (wave_id, shift) in [("w1", 0.0), ("w2", 2.0), ("w3", 6.0)] {
        measurements.push(m(wave_id, "q1", "Streaming services", "d1", "Netflix", "Media", 500, 50.0 + shift, 135.0));
        measurements.push(m(wave_id, "q1", "Streaming services", "d2", "Hulu", "Media", 200, 20.0 - shift, 85.0));
        measurements.push(m(wave_id, "q2", "Coffee brands", "d3", "Starbucks", "Brands", 300, 30.0, 115.0));
        measurements.push(m(wave_id, "q2", "Coffee brands", "d4", "Dunkin", "Brands", 100, 10.0 - shift / 2.0, 65.0));
    }
    // Only fielded in the latest wave.
    measurements.push(m("w3", "q3", "Social platforms", "d5", "TikTok", "Media", 420, 35.0, 100.0));

    Dataset { waves, measurements }
}
