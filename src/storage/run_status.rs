//! Run status persistence.
//!
//! Runs are fire-and-forget; their terminal state is read back from here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::database::{SharedDatabase, run_blocking};
use crate::types::{ForgeError, Result, ResultExt, StageIdentity};

/// Persisted lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ForgeError::Storage(format!("Unknown run status: {}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusRecord {
    pub run_id: String,
    pub company: String,
    pub industry: String,
    pub status: RunStatus,
    /// Serialized `PipelineResult` for completed runs
    pub result: Option<Value>,
    pub error_stage: Option<String>,
    pub error_detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunStatusRecord {
    pub fn running(run_id: impl Into<String>, identity: &StageIdentity) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            company: identity.company.clone(),
            industry: identity.industry.clone(),
            status: RunStatus::Running,
            result: None,
            error_stage: None,
            error_detail: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn completed(mut self, result: Value) -> Self {
        self.status = RunStatus::Completed;
        self.result = Some(result);
        self.updated_at = Utc::now();
        self
    }

    pub fn failed(mut self, stage: Option<String>, detail: impl Into<String>) -> Self {
        self.status = RunStatus::Failed;
        self.error_stage = stage;
        self.error_detail = Some(detail.into());
        self.updated_at = Utc::now();
        self
    }
}

/// Persistence collaborator for run state
#[async_trait]
pub trait RunStatusStore: Send + Sync {
    async fn load_run_status(&self, run_id: &str) -> Result<Option<RunStatusRecord>>;

    /// Upsert. `started_at` of an existing row is kept.
    async fn save_run_status(&self, record: &RunStatusRecord) -> Result<()>;

    /// Most recently updated runs first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunStatusRecord>>;
}

pub type SharedRunStatus = Arc<dyn RunStatusStore>;

// =============================================================================
// SQLite
// =============================================================================

pub struct SqliteRunStatusStore {
    db: SharedDatabase,
}

impl SqliteRunStatusStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

type RunRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ForgeError::Storage(format!("Invalid timestamp {}: {}", raw, e)))
}

fn into_record(row: RunRow) -> Result<RunStatusRecord> {
    let (run_id, company, industry, status, result, error_stage, error_detail, started, updated) =
        row;
    Ok(RunStatusRecord {
        run_id,
        company,
        industry,
        status: RunStatus::parse(&status)?,
        result: result
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        error_stage,
        error_detail,
        started_at: parse_time(&started)?,
        updated_at: parse_time(&updated)?,
    })
}

const SELECT_COLUMNS: &str = "SELECT id, company, industry, status, result_json, error_stage, \
     error_detail, started_at, updated_at FROM pipeline_runs";

#[async_trait]
impl RunStatusStore for SqliteRunStatusStore {
    async fn load_run_status(&self, run_id: &str) -> Result<Option<RunStatusRecord>> {
        let run_id = run_id.to_string();
        run_blocking(&self.db, move |db| {
            let conn = db.connection()?;
            let row = conn
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    params![run_id],
                    map_row,
                )
                .optional()
                .with_context("Failed to load run status")?;
            row.map(into_record).transpose()
        })
        .await
    }

    async fn save_run_status(&self, record: &RunStatusRecord) -> Result<()> {
        let record = record.clone();
        run_blocking(&self.db, move |db| {
            let result_json = record
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            db.connection()?
                .execute(
                    "INSERT INTO pipeline_runs
                     (id, company, industry, status, result_json, error_stage, error_detail,
                      started_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                        status = excluded.status,
                        result_json = excluded.result_json,
                        error_stage = excluded.error_stage,
                        error_detail = excluded.error_detail,
                        updated_at = excluded.updated_at",
                    params![
                        record.run_id,
                        record.company,
                        record.industry,
                        record.status.as_str(),
                        result_json,
                        record.error_stage,
                        record.error_detail,
                        record.started_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                    ],
                )
                .with_context("Failed to save run status")?;
            Ok(())
        })
        .await
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunStatusRecord>> {
        run_blocking(&self.db, move |db| {
            let conn = db.connection()?;
            let mut stmt = conn
                .prepare(&format!(
                    "{} ORDER BY updated_at DESC LIMIT ?1",
                    SELECT_COLUMNS
                ))
                .with_context("Failed to prepare run listing")?;
            let rows = stmt
                .query_map(params![limit as i64], map_row)
                .with_context("Failed to list runs")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_context("Failed to read run rows")?;
            rows.into_iter().map(into_record).collect()
        })
        .await
    }
}

// =============================================================================
// In-Memory
// =============================================================================

#[derive(Default)]
pub struct MemoryRunStatusStore {
    runs: DashMap<String, RunStatusRecord>,
}

impl MemoryRunStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStatusStore for MemoryRunStatusStore {
    async fn load_run_status(&self, run_id: &str) -> Result<Option<RunStatusRecord>> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn save_run_status(&self, record: &RunStatusRecord) -> Result<()> {
        let mut record = record.clone();
        if let Some(existing) = self.runs.get(&record.run_id) {
            record.started_at = existing.started_at;
        }
        self.runs.insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunStatusRecord>> {
        let mut runs: Vec<RunStatusRecord> = self.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
