//! Measurement aggregation and statistics.
//!
//! This module provides the pure arithmetic behind the engine: rebasing,
//! significance bands, wave-to-wave shifts, and category roll-ups.

use super::results::{Direction, Significance};
use crate::models::{RebaseMode, SurveyMeasurement, Timeframe, Wave};
use std::collections::{BTreeSet, HashMap};

/// Index at or above which a cell is highly significant.
const HIGH_INDEX: f64 = 130.0;
/// Index at or above which a cell is moderately significant.
const MEDIUM_INDEX: f64 = 110.0;
/// Index at or below which an under-indexing cell is highly significant.
const LOW_HIGH_INDEX: f64 = 70.0;
/// Index at or below which a cell is weakly significant.
const LOW_INDEX: f64 = 90.0;

/// Percentage-point change beyond which a shift has a direction.
const FLAT_BAND: f64 = 0.5;
/// Percentage-point change beyond which a shift is significant.
const SIGNIFICANT_SHIFT: f64 = 3.0;

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Classify an index vs. average into a significance band.
///
/// The bands are asymmetric: over-indexing splits at 130/110 while
/// under-indexing splits at 70/90.
pub fn classify_significance(index_vs_avg: f64) -> Significance {
    if index_vs_avg >= HIGH_INDEX {
        Significance::High
    } else if index_vs_avg >= MEDIUM_INDEX {
        Significance::Medium
    } else if index_vs_avg <= LOW_HIGH_INDEX {
        Significance::High
    } else if index_vs_avg <= LOW_INDEX {
        Significance::Low
    } else {
        Significance::None
    }
}

/// Inputs to a single rebase computation.
#[derive(Debug, Clone, Copy)]
pub struct RebaseInput {
    pub respondent_count: u64,
    pub wave_sample_size: u32,
    pub total_base: u64,
    pub row_count: usize,
    pub raw_percentage: f64,
}

/// Recompute a percentage against the base selected by `mode`, rounded to
/// two decimals. Zero bases never divide.
pub fn rebase_percentage(mode: RebaseMode, input: RebaseInput) -> f64 {
    let respondents = input.respondent_count as f64;
    let value = match mode {
        RebaseMode::Column | RebaseMode::RespondentBase => {
            if input.wave_sample_size == 0 {
                0.0
            } else {
                respondents / input.wave_sample_size as f64 * 100.0
            }
        }
        // Scales by the row count of the whole crosstab.
        RebaseMode::Row => {
            if input.total_base > 0 {
                respondents / input.total_base as f64 * 100.0 * input.row_count as f64
            } else {
                input.raw_percentage
            }
        }
        RebaseMode::Total => {
            if input.total_base > 0 {
                respondents / input.total_base as f64 * 100.0
            } else {
                input.raw_percentage
            }
        }
    };
    round2(value)
}

/// Direction of a wave-to-wave delta.
pub fn shift_direction(delta: f64) -> Direction {
    if delta > FLAT_BAND {
        Direction::Up
    } else if delta < -FLAT_BAND {
        Direction::Down
    } else {
        Direction::Flat
    }
}

pub fn is_significant_shift(delta: f64) -> bool {
    delta.abs() > SIGNIFICANT_SHIFT
}

/// Sum of sample sizes across waves.
pub fn total_sample_size(waves: &[Wave]) -> u64 {
    waves.iter().map(|w| u64::from(w.sample_size)).sum()
}

/// Distinct values in ascending order.
pub fn distinct_sorted<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(String::from)
        .collect()
}

/// A (category, wave) roll-up of measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryAggregate {
    pub category: String,
    pub wave_id: String,
    pub respondent_count: u64,
    pub avg_percentage: f64,
    pub avg_index: f64,
    pub sample_size: u32,
}

/// Group measurements by (category, wave), averaging percentage and index
/// and summing respondents. Output is ordered by category, then by the
/// position of the wave in `waves`.
pub fn aggregate_by_category_wave(
    rows: &[SurveyMeasurement],
    waves: &[Wave],
) -> Vec<CategoryAggregate> {
    let wave_rank: HashMap<&str, usize> = waves
        .iter()
        .enumerate()
        .map(|(i, w)| (w.id.as_str(), i))
        .collect();

    struct Acc {
        respondents: u64,
        pct_sum: f64,
        index_sum: f64,
        count: usize,
        sample_size: u32,
    }

    let mut grouped: HashMap<(&str, &str), Acc> = HashMap::new();
    for row in rows {
        let acc = grouped
            .entry((row.category.as_str(), row.wave_id.as_str()))
            .or_insert(Acc {
                respondents: 0,
                pct_sum: 0.0,
                index_sum: 0.0,
                count: 0,
                sample_size: row.sample_size,
            });
        acc.respondents += u64::from(row.respondent_count);
        acc.pct_sum += row.percentage;
        acc.index_sum += row.index_vs_avg;
        acc.count += 1;
    }

    let mut aggregates: Vec<CategoryAggregate> = grouped
        .into_iter()
        .map(|((category, wave_id), acc)| CategoryAggregate {
            category: category.to_string(),
            wave_id: wave_id.to_string(),
            respondent_count: acc.respondents,
            avg_percentage: round2(acc.pct_sum / acc.count as f64),
            avg_index: round2(acc.index_sum / acc.count as f64),
            sample_size: acc.sample_size,
        })
        .collect();

    aggregates.sort_by(|a, b| {
        a.category.cmp(&b.category).then_with(|| {
            let ra = wave_rank.get(a.wave_id.as_str()).copied().unwrap_or(usize::MAX);
            let rb = wave_rank.get(b.wave_id.as_str()).copied().unwrap_or(usize::MAX);
            ra.cmp(&rb)
        })
    });

    aggregates
}

/// Label for a time-series period.
pub fn period_label(timeframe: Timeframe, wave: &Wave) -> String {
    match timeframe {
        Timeframe::Quarterly => match wave.quarter {
            Some(q) => format!("Q{} {}", q, wave.year),
            None => wave.name.clone(),
        },
        Timeframe::Monthly => wave.start_date.format("%b %Y").to_string(),
        Timeframe::Weekly => format!("Week of {}", wave.start_date),
    }
}
