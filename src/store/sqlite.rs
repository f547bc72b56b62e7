//! SQLite database for survey data and persisted runs.
//!
//! # Database Schema
//!
//! 1. **waves** - wave metadata (study, year, quarter, dates, sample size)
//! 2. **survey_data** - one row per (wave, question, datapoint) measurement
//! 3. **runs** - append-only run records with config and outputs as JSON
//! 4. **schema_version** - schema version for migrations

use super::{Dataset, MeasurementOrder, MeasurementQuery, RunStore, StoreError, SurveyStore};
use crate::models::{AnalysisConfig, Run, RunOutput, RunStatus, SurveyMeasurement, Wave};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed survey and run store.
pub struct SqliteStore {
    conn: Connection,
}

/// Summary row of a persisted run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: Uuid,
    pub flow_id: String,
    pub status: RunStatus,
    pub brief: String,
    pub completed_at: DateTime<Utc>,
    pub output_count: usize,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self { conn };
        store.initialize_schema()?;
        debug!(
            "Opened {} (schema v{})",
            path.display(),
            store.schema_version()?
        );
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create all tables and indexes.
    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS waves (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                study_id TEXT NOT NULL,
                study_name TEXT NOT NULL,
                year INTEGER NOT NULL,
                quarter INTEGER,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                sample_size INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_waves_start_date ON waves(start_date DESC);

            CREATE TABLE IF NOT EXISTS survey_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                wave_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                question_name TEXT NOT NULL,
                datapoint_id TEXT NOT NULL,
                datapoint_name TEXT NOT NULL,
                category TEXT NOT NULL,
                respondent_count INTEGER NOT NULL,
                percentage REAL NOT NULL,
                index_vs_avg REAL NOT NULL,

                FOREIGN KEY(wave_id) REFERENCES waves(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_survey_data_wave ON survey_data(wave_id, question_id);
            CREATE INDEX IF NOT EXISTS idx_survey_data_datapoint ON survey_data(datapoint_id);

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                brief TEXT NOT NULL,
                config TEXT,
                outputs TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_completed_at ON runs(completed_at DESC);

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        let version: i32 =
            self.conn
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version)
    }

    /// Load a dataset in one transaction, replacing waves with the same id.
    ///
    /// Returns the number of measurements written.
    pub fn import_dataset(&mut self, dataset: &Dataset) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;

        for wave in &dataset.waves {
            tx.execute("DELETE FROM survey_data WHERE wave_id = ?1", params![wave.id])?;
            tx.execute(
                r#"
                INSERT OR REPLACE INTO waves (
                    id, name, study_id, study_name, year, quarter,
                    start_date, end_date, sample_size
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    wave.id,
                    wave.name,
                    wave.study_id,
                    wave.study_name,
                    wave.year,
                    wave.quarter,
                    wave.start_date.to_string(),
                    wave.end_date.to_string(),
                    wave.sample_size,
                ],
            )?;
        }

        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO survey_data (
                    wave_id, question_id, question_name, datapoint_id, datapoint_name,
                    category, respondent_count, percentage, index_vs_avg
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for m in &dataset.measurements {
                stmt.execute(params![
                    m.wave_id,
                    m.question_id,
                    m.question_name,
                    m.datapoint_id,
                    m.datapoint_name,
                    m.category,
                    m.respondent_count,
                    m.percentage,
                    m.index_vs_avg,
                ])?;
                written += 1;
            }
        }

        tx.commit()?;
        info!(
            "Imported {} waves and {} measurements",
            dataset.waves.len(),
            written
        );
        Ok(written)
    }

    /// Fetch a persisted run by id.
    pub fn get_run(&self, id: &Uuid) -> Result<Option<Run>, StoreError> {
        let raw = self
            .conn
            .query_row(
                r#"
                SELECT id, flow_id, status, brief, config, outputs, started_at, completed_at
                FROM runs WHERE id = ?1
                "#,
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, flow_id, status, brief, config, outputs, started_at, completed_at)) = raw
        else {
            return Ok(None);
        };

        let config: Option<AnalysisConfig> = match config {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        let outputs: Vec<RunOutput> = serde_json::from_str(&outputs)?;

        Ok(Some(Run {
            id: parse_uuid(&id)?,
            flow_id,
            status: parse_status(&status)?,
            brief,
            config,
            started_at: parse_timestamp(&started_at)?,
            completed_at: parse_timestamp(&completed_at)?,
            outputs,
        }))
    }

    /// Most recently completed runs, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, flow_id, status, brief, completed_at, json_array_length(outputs)
            FROM runs
            ORDER BY completed_at DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, flow_id, status, brief, completed_at, output_count) = row?;
            records.push(RunRecord {
                id: parse_uuid(&id)?,
                flow_id,
                status: parse_status(&status)?,
                brief,
                completed_at: parse_timestamp(&completed_at)?,
                output_count: output_count.max(0) as usize,
            });
        }

        Ok(records)
    }
}

impl SurveyStore for SqliteStore {
    fn waves(&self, ids: Option<&[String]>) -> Result<Vec<Wave>, StoreError> {
        let mut sql = String::from(
            r#"
            SELECT id, name, study_id, study_name, year, quarter, start_date, end_date, sample_size
            FROM waves
            "#,
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" WHERE id IN ({})", placeholders(1, ids.len())));
            values.extend(ids.iter().map(|id| Value::Text(id.clone())));
        }
        sql.push_str(" ORDER BY start_date DESC, id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let waves = stmt
            .query_map(params_from_iter(values.iter()), map_wave_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(waves)
    }

    fn measurements(
        &self,
        query: &MeasurementQuery,
    ) -> Result<Vec<SurveyMeasurement>, StoreError> {
        if query.wave_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut values: Vec<Value> = query
            .wave_ids
            .iter()
            .map(|id| Value::Text(id.clone()))
            .collect();

        let mut sql = format!(
            r#"
            SELECT d.wave_id, d.question_id, d.question_name, d.datapoint_id, d.datapoint_name,
                   d.category, d.respondent_count, d.percentage, d.index_vs_avg, w.sample_size
            FROM survey_data d
            JOIN waves w ON w.id = d.wave_id
            WHERE d.wave_id IN ({})
            "#,
            placeholders(1, values.len())
        );

        if let Some(ref question_id) = query.question_id {
            values.push(Value::Text(question_id.clone()));
            sql.push_str(&format!(" AND d.question_id = ?{}", values.len()));
        }
        if let Some(ref datapoint_id) = query.datapoint_id {
            values.push(Value::Text(datapoint_id.clone()));
            sql.push_str(&format!(" AND d.datapoint_id = ?{}", values.len()));
        }

        sql.push_str(order_clause(query.order));

        if let Some(limit) = query.limit {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        debug!("Measurement query: {}", sql.trim());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), map_measurement_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

impl RunStore for SqliteStore {
    fn append_run(&self, run: &Run) -> Result<(), StoreError> {
        let config = run.config.as_ref().map(serde_json::to_string).transpose()?;
        let outputs = serde_json::to_string(&run.outputs)?;

        self.conn.execute(
            r#"
            INSERT INTO runs (
                id, flow_id, status, brief, config, outputs, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                run.id.to_string(),
                run.flow_id,
                run.status.as_str(),
                run.brief,
                config,
                outputs,
                run.started_at.to_rfc3339(),
                run.completed_at.to_rfc3339(),
            ],
        )?;

        debug!("Persisted run {} ({})", run.id, run.status);
        Ok(())
    }
}

/// `?start, ?start+1, ...` for `count` parameters.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// ORDER BY clause matching [`super::sort_measurements`].
fn order_clause(order: MeasurementOrder) -> &'static str {
    match order {
        MeasurementOrder::Natural => {
            " ORDER BY d.question_id ASC, d.datapoint_id ASC, w.start_date DESC"
        }
        MeasurementOrder::PercentageDesc => {
            " ORDER BY d.percentage DESC, d.question_id ASC, d.datapoint_id ASC"
        }
        MeasurementOrder::WaveStartDesc => " ORDER BY w.start_date DESC, d.wave_id ASC",
        MeasurementOrder::QuestionNameThenPercentage => {
            " ORDER BY d.question_name ASC, d.percentage DESC, d.datapoint_id ASC, w.start_date DESC"
        }
    }
}

fn map_wave_row(row: &Row) -> rusqlite::Result<Wave> {
    Ok(Wave {
        id: row.get(0)?,
        name: row.get(1)?,
        study_id: row.get(2)?,
        study_name: row.get(3)?,
        year: row.get(4)?,
        quarter: row.get(5)?,
        start_date: get_date(row, 6)?,
        end_date: get_date(row, 7)?,
        sample_size: row.get(8)?,
    })
}

fn map_measurement_row(row: &Row) -> rusqlite::Result<SurveyMeasurement> {
    Ok(SurveyMeasurement {
        wave_id: row.get(0)?,
        question_id: row.get(1)?,
        question_name: row.get(2)?,
        datapoint_id: row.get(3)?,
        datapoint_name: row.get(4)?,
        category: row.get(5)?,
        respondent_count: row.get(6)?,
        percentage: row.get(7)?,
        index_vs_avg: row.get(8)?,
        sample_size: row.get(9)?,
    })
}

fn get_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("run id {}: {}", raw, e)))
}

fn parse_status(raw: &str) -> Result<RunStatus, StoreError> {
    RunStatus::from_str(raw).ok_or_else(|| StoreError::Corrupt(format!("run status {}", raw)))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputType;
    use crate::store::memory::sample_dataset;
    use crate::store::MemoryStore;

    fn loaded_store() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.import_dataset(&sample_dataset()).unwrap();
        store
    }

    fn sample_run(flow_id: &str, status: RunStatus) -> Run {
        let now = Utc::now();
        Run {
            id: Uuid::new_v4(),
            flow_id: flow_id.to_string(),
            status,
            brief: "Who streams?".to_string(),
            config: Some(AnalysisConfig {
                compare_waves: Some(true),
                ..Default::default()
            }),
            started_at: now,
            completed_at: now,
            outputs: vec![RunOutput {
                id: "1.1:insight_summary".to_string(),
                label: "Insight Summary".to_string(),
                output_type: OutputType::Insight,
                summary: "Done.".to_string(),
                data: None,
                citations: None,
            }],
        }
    }

    #[test]
    fn test_schema_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_import_counts_measurements() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let dataset = sample_dataset();
        assert_eq!(store.import_dataset(&dataset).unwrap(), dataset.measurements.len());

        // Re-importing the same waves replaces rather than duplicates.
        store.import_dataset(&dataset).unwrap();
        let rows = store
            .measurements(&MeasurementQuery::for_waves(["w1", "w2", "w3"]))
            .unwrap();
        assert_eq!(rows.len(), dataset.measurements.len());
    }

    #[test]
    fn test_waves_match_memory_store() {
        let sqlite = loaded_store();
        let memory = MemoryStore::new(sample_dataset());

        assert_eq!(sqlite.waves(None).unwrap(), memory.waves(None).unwrap());

        let ids = vec!["w1".to_string(), "nope".to_string()];
        assert_eq!(
            sqlite.waves(Some(&ids)).unwrap(),
            memory.waves(Some(&ids)).unwrap()
        );
    }

    #[test]
    fn test_measurements_match_memory_store() {
        let sqlite = loaded_store();
        let memory = MemoryStore::new(sample_dataset());

        let queries = [
            MeasurementQuery::for_waves(["w1", "w2", "w3"]),
            MeasurementQuery::for_waves(["w3", "w1"])
                .order_by(MeasurementOrder::QuestionNameThenPercentage)
                .limit(5),
            MeasurementQuery::for_waves(["w2"])
                .question("q2")
                .order_by(MeasurementOrder::PercentageDesc),
            MeasurementQuery::for_waves(["w1", "w2", "w3"])
                .datapoint("d1")
                .order_by(MeasurementOrder::WaveStartDesc),
        ];

        for query in &queries {
            assert_eq!(
                sqlite.measurements(query).unwrap(),
                memory.measurements(query).unwrap(),
                "query {:?}",
                query
            );
        }
    }

    #[test]
    fn test_append_and_read_back_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run = sample_run("audience-snapshot", RunStatus::Completed);
        store.append_run(&run).unwrap();

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.flow_id, run.flow_id);
        assert_eq!(loaded.config, run.config);
        assert_eq!(loaded.outputs, run.outputs);
        assert_eq!(loaded.started_at.timestamp(), run.started_at.timestamp());

        assert!(store.get_run(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_runs_are_append_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run = sample_run("audience-snapshot", RunStatus::Completed);
        store.append_run(&run).unwrap();
        assert!(store.append_run(&run).is_err());
    }

    #[test]
    fn test_recent_runs() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .append_run(&sample_run("audience-snapshot", RunStatus::Completed))
            .unwrap();
        store
            .append_run(&sample_run("does-not-exist", RunStatus::Failed))
            .unwrap();

        let records = store.recent_runs(10).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.output_count == 1));
        assert_eq!(store.recent_runs(1).unwrap().len(), 1);
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runs.db");
        let store = SqliteStore::open(&path).unwrap();
        store
            .append_run(&sample_run("wave-tracker", RunStatus::Completed))
            .unwrap();
        assert!(path.exists());
    }
}
