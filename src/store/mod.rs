//! Survey data and run storage.
//!
//! The analysis engine reads through [`SurveyStore`]; finished runs are
//! appended through [`RunStore`]. Two backends are provided: an in-memory
//! dataset loaded from JSON and a SQLite database.

pub mod memory;
pub mod sqlite;

pub use memory::{Dataset, MemoryStore};
pub use sqlite::{RunRecord, SqliteStore};

use crate::models::{Run, SurveyMeasurement, Wave};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Sort order for measurement queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MeasurementOrder {
    /// Question id, datapoint id, then most recent wave first.
    #[default]
    Natural,
    /// Highest percentage first.
    PercentageDesc,
    /// Most recent wave first.
    WaveStartDesc,
    /// Question name ascending, then highest percentage first.
    QuestionNameThenPercentage,
}

/// Filter, ordering, and limit for a measurement read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementQuery {
    /// Waves to read from. An empty set matches nothing.
    pub wave_ids: Vec<String>,
    pub question_id: Option<String>,
    pub datapoint_id: Option<String>,
    pub order: MeasurementOrder,
    pub limit: Option<usize>,
}

impl MeasurementQuery {
    pub fn for_waves<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            wave_ids: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn question(mut self, question_id: &str) -> Self {
        self.question_id = Some(question_id.to_string());
        self
    }

    pub fn datapoint(mut self, datapoint_id: &str) -> Self {
        self.datapoint_id = Some(datapoint_id.to_string());
        self
    }

    pub fn order_by(mut self, order: MeasurementOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a measurement passes this query's filters.
    pub fn matches(&self, row: &SurveyMeasurement) -> bool {
        self.wave_ids.iter().any(|id| *id == row.wave_id)
            && self
                .question_id
                .as_ref()
                .map_or(true, |q| *q == row.question_id)
            && self
                .datapoint_id
                .as_ref()
                .map_or(true, |d| *d == row.datapoint_id)
    }
}

/// Read contract for survey data.
pub trait SurveyStore {
    /// Waves ordered by start date, most recent first.
    ///
    /// `None` selects every wave; unknown ids in `Some` are dropped.
    fn waves(&self, ids: Option<&[String]>) -> Result<Vec<Wave>, StoreError>;

    /// Measurements joined to their wave's sample size.
    fn measurements(&self, query: &MeasurementQuery)
        -> Result<Vec<SurveyMeasurement>, StoreError>;
}

/// Append-only contract for finished runs.
pub trait RunStore {
    fn append_run(&self, run: &Run) -> Result<(), StoreError>;
}

/// Sort measurements in place. `wave_starts` maps wave ids to start dates.
pub fn sort_measurements(
    rows: &mut [SurveyMeasurement],
    order: MeasurementOrder,
    wave_starts: &HashMap<String, NaiveDate>,
) {
    let start = |row: &SurveyMeasurement| wave_starts.get(&row.wave_id).copied();

    match order {
        MeasurementOrder::Natural => rows.sort_by(|a, b| {
            a.question_id
                .cmp(&b.question_id)
                .then_with(|| a.datapoint_id.cmp(&b.datapoint_id))
                .then_with(|| start(b).cmp(&start(a)))
        }),
        MeasurementOrder::PercentageDesc => rows.sort_by(|a, b| {
            b.percentage
                .total_cmp(&a.percentage)
                .then_with(|| a.question_id.cmp(&b.question_id))
                .then_with(|| a.datapoint_id.cmp(&b.datapoint_id))
        }),
        MeasurementOrder::WaveStartDesc => rows.sort_by(|a, b| {
            start(b)
                .cmp(&start(a))
                .then_with(|| a.wave_id.cmp(&b.wave_id))
        }),
        MeasurementOrder::QuestionNameThenPercentage => rows.sort_by(|a, b| {
            a.question_name
                .cmp(&b.question_name)
                .then_with(|| b.percentage.total_cmp(&a.percentage))
                .then_with(|| a.datapoint_id.cmp(&b.datapoint_id))
                .then_with(|| start(b).cmp(&start(a)))
        }),
    }
}
