//! SQLite store implementation.
//!
//! Records are rows in the `executions` table; the transition CAS is a
//! conditional `UPDATE ... WHERE execution_id = ? AND status = ?`, so a
//! writer whose view of the record went stale affects zero rows and gets
//! `InvalidTransition` instead of clobbering a concurrent update.
//! Timestamps are stored as RFC 3339 text, JSON payloads as text columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use super::{ExecutionCounts, ExecutionStore};
use crate::domain::{
    ExecutionId, ExecutionRecord, ExecutionStatus, FailureInfo, FlowId, Transition,
    WorkflowDefinition,
};
use crate::error::ConveyorError;

/// Open a WAL-mode pool on the given `sqlite://` URL, creating the file
/// if needed. Shared by the store and the sqlite broker.
pub async fn connect_pool(database_url: &str) -> Result<SqlitePool, ConveyorError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create all tables if they do not exist. Runs at process start.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), ConveyorError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS executions ( \
             execution_id     TEXT PRIMARY KEY, \
             flow_id          TEXT NOT NULL, \
             status           TEXT NOT NULL, \
             submitted_at     TEXT NOT NULL, \
             started_at       TEXT, \
             completed_at     TEXT, \
             result           TEXT, \
             error            TEXT, \
             attempt_count    INTEGER NOT NULL DEFAULT 0, \
             cancel_requested INTEGER NOT NULL DEFAULT 0 \
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS flows ( \
             flow_id    TEXT PRIMARY KEY, \
             version    TEXT NOT NULL, \
             steps      TEXT NOT NULL, \
             created_at TEXT NOT NULL \
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS queue_messages ( \
             id             INTEGER PRIMARY KEY AUTOINCREMENT, \
             queue          TEXT NOT NULL, \
             body           TEXT NOT NULL, \
             available_at   INTEGER NOT NULL, \
             delivery_count INTEGER NOT NULL DEFAULT 0, \
             locked_at      INTEGER \
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_messages_claim \
         ON queue_messages (queue, locked_at, available_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

const EXECUTION_COLUMNS: &str = "execution_id, flow_id, status, submitted_at, started_at, \
     completed_at, result, error, attempt_count, cancel_requested";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<ExecutionRecord>, ConveyorError> {
        let query = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE execution_id = ?1");
        let row = sqlx::query(&query)
            .bind(execution_id.as_ulid().to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), ConveyorError> {
        let result = sqlx::query(
            "INSERT INTO executions \
                 (execution_id, flow_id, status, submitted_at, started_at, completed_at, \
                  result, error, attempt_count, cancel_requested) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(record.execution_id.as_ulid().to_string())
        .bind(record.flow_id.as_str())
        .bind(record.status.as_str())
        .bind(record.submitted_at.to_rfc3339())
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(json_opt(&record.result)?)
        .bind(error_opt(&record.error)?)
        .bind(record.attempt_count as i64)
        .bind(record.cancel_requested as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                ConveyorError::Store(format!("duplicate execution_id {}", record.execution_id)),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn apply(
        &self,
        execution_id: ExecutionId,
        transition: Transition,
    ) -> Result<ExecutionRecord, ConveyorError> {
        let mut record = self
            .fetch(execution_id)
            .await?
            .ok_or(ConveyorError::UnknownExecution(execution_id))?;

        let expected_status = record.status;
        record.apply(&transition)?;

        let updated = sqlx::query(
            "UPDATE executions \
             SET status = ?1, started_at = ?2, completed_at = ?3, \
                 result = ?4, error = ?5, attempt_count = ?6 \
             WHERE execution_id = ?7 AND status = ?8",
        )
        .bind(record.status.as_str())
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(json_opt(&record.result)?)
        .bind(error_opt(&record.error)?)
        .bind(record.attempt_count as i64)
        .bind(execution_id.as_ulid().to_string())
        .bind(expected_status.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            // A concurrent writer moved the record between our read and
            // write. Report the transition against what is there now.
            let current = self
                .fetch(execution_id)
                .await?
                .ok_or(ConveyorError::UnknownExecution(execution_id))?;
            return Err(ConveyorError::InvalidTransition {
                execution_id,
                from: current.status,
                attempted: transition.name(),
            });
        }

        Ok(record)
    }

    async fn get(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, ConveyorError> {
        self.fetch(execution_id)
            .await?
            .ok_or(ConveyorError::UnknownExecution(execution_id))
    }

    async fn request_cancel(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionRecord, ConveyorError> {
        sqlx::query(
            "UPDATE executions SET cancel_requested = 1 \
             WHERE execution_id = ?1 AND status = ?2",
        )
        .bind(execution_id.as_ulid().to_string())
        .bind(ExecutionStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        self.get(execution_id).await
    }

    async fn counts(&self) -> Result<ExecutionCounts, ConveyorError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM executions GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = ExecutionCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let n = n as usize;
            match status.parse::<ExecutionStatus>() {
                Ok(ExecutionStatus::Pending) => counts.pending = n,
                Ok(ExecutionStatus::Queued) => counts.queued = n,
                Ok(ExecutionStatus::Running) => counts.running = n,
                Ok(ExecutionStatus::Succeeded) => counts.succeeded = n,
                Ok(ExecutionStatus::Failed) => counts.failed = n,
                Ok(ExecutionStatus::Cancelled) => counts.cancelled = n,
                Err(err) => return Err(ConveyorError::Store(err)),
            }
        }
        Ok(counts)
    }

    async fn put_flow(&self, definition: &WorkflowDefinition) -> Result<(), ConveyorError> {
        let result = sqlx::query(
            "INSERT INTO flows (flow_id, version, steps, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(definition.flow_id.as_str())
        .bind(&definition.version)
        .bind(serde_json::to_string(&definition.steps)?)
        .bind(definition.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                ConveyorError::FlowAlreadyRegistered(definition.flow_id.clone()),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_flow(&self, flow_id: &FlowId) -> Result<WorkflowDefinition, ConveyorError> {
        let row = sqlx::query(
            "SELECT flow_id, version, steps, created_at FROM flows WHERE flow_id = ?1",
        )
        .bind(flow_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => flow_from_row(&row),
            None => Err(ConveyorError::UnknownFlow(flow_id.clone())),
        }
    }

    async fn list_flows(&self) -> Result<Vec<WorkflowDefinition>, ConveyorError> {
        let rows =
            sqlx::query("SELECT flow_id, version, steps, created_at FROM flows ORDER BY flow_id")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(flow_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord, ConveyorError> {
    let execution_id: String = row.try_get("execution_id")?;
    let flow_id: String = row.try_get("flow_id")?;
    let status: String = row.try_get("status")?;
    let submitted_at: String = row.try_get("submitted_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let result: Option<String> = row.try_get("result")?;
    let error: Option<String> = row.try_get("error")?;
    let attempt_count: i64 = row.try_get("attempt_count")?;
    let cancel_requested: i64 = row.try_get("cancel_requested")?;

    Ok(ExecutionRecord {
        execution_id: execution_id
            .parse()
            .map_err(|_| ConveyorError::Store(format!("invalid execution_id: {execution_id}")))?,
        flow_id: FlowId::new(flow_id),
        status: status.parse().map_err(ConveyorError::Store)?,
        submitted_at: parse_datetime(&submitted_at)?,
        started_at: started_at.as_deref().map(parse_datetime).transpose()?,
        completed_at: completed_at.as_deref().map(parse_datetime).transpose()?,
        result: result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| ConveyorError::Store(format!("invalid result JSON: {e}")))?,
        error: error
            .as_deref()
            .map(serde_json::from_str::<FailureInfo>)
            .transpose()
            .map_err(|e| ConveyorError::Store(format!("invalid error JSON: {e}")))?,
        attempt_count: attempt_count as u32,
        cancel_requested: cancel_requested != 0,
    })
}

fn flow_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowDefinition, ConveyorError> {
    let flow_id: String = row.try_get("flow_id")?;
    let version: String = row.try_get("version")?;
    let steps: String = row.try_get("steps")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(WorkflowDefinition {
        flow_id: FlowId::new(flow_id),
        version,
        steps: serde_json::from_str(&steps)
            .map_err(|e| ConveyorError::Store(format!("invalid steps JSON: {e}")))?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ConveyorError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConveyorError::Store(format!("invalid timestamp \"{s}\": {e}")))
}

fn json_opt(value: &Option<serde_json::Value>) -> Result<Option<String>, ConveyorError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(ConveyorError::from))
        .transpose()
}

fn error_opt(value: &Option<FailureInfo>) -> Result<Option<String>, ConveyorError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(ConveyorError::from))
        .transpose()
}
