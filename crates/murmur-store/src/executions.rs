//! Execution-log operations for the task-execution branch.
//!
//! Observability only: dedup decisions always come from the ledger, never
//! from this table.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::params;

use crate::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle of one execution attempt: pending → running → completed|failed.
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => bail!("unknown execution status '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
/// One row of the execution log.
pub struct TaskExecutionRecord {
    pub id: i64,
    pub source_id: String,
    pub fingerprint: String,
    pub task_text: String,
    pub timestamp: String,
    pub status: ExecutionStatus,
    pub execution_report: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl Store {
    /// Insert a pending execution row and return its id.
    pub fn create_execution(
        &self,
        source_id: &str,
        fingerprint: &str,
        task_text: &str,
        timestamp: &str,
    ) -> Result<i64> {
        let connection = self.conn()?;
        let now = Utc::now().to_rfc3339();
        connection
            .execute(
                r#"
                INSERT INTO task_executions
                    (source_id, fingerprint, task_text, timestamp, status, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)
                "#,
                params![source_id, fingerprint, task_text, timestamp, now],
            )
            .context("failed to create execution row")?;
        Ok(connection.last_insert_rowid())
    }

    pub fn mark_execution_running(&self, id: i64) -> Result<()> {
        let connection = self.conn()?;
        let now = Utc::now().to_rfc3339();
        connection
            .execute(
                r#"
                UPDATE task_executions
                SET status = 'running', started_at = ?2, updated_at = ?2
                WHERE id = ?1
                "#,
                params![id, now],
            )
            .context("failed to mark execution running")?;
        Ok(())
    }

    pub fn complete_execution(&self, id: i64, report: &str) -> Result<()> {
        let connection = self.conn()?;
        let now = Utc::now().to_rfc3339();
        connection
            .execute(
                r#"
                UPDATE task_executions
                SET status = 'completed', execution_report = ?2,
                    completed_at = ?3, updated_at = ?3
                WHERE id = ?1
                "#,
                params![id, report, now],
            )
            .context("failed to complete execution")?;
        Ok(())
    }

    pub fn fail_execution(&self, id: i64, error_message: &str, retry_count: u32) -> Result<()> {
        let connection = self.conn()?;
        let now = Utc::now().to_rfc3339();
        connection
            .execute(
                r#"
                UPDATE task_executions
                SET status = 'failed', error_message = ?2, retry_count = ?3,
                    completed_at = ?4, updated_at = ?4
                WHERE id = ?1
                "#,
                params![id, error_message, retry_count, now],
            )
            .context("failed to mark execution failed")?;
        Ok(())
    }

    /// Most recent executions, newest first.
    pub fn recent_executions(&self, limit: u32) -> Result<Vec<TaskExecutionRecord>> {
        self.query_executions(
            r#"
            SELECT id, source_id, fingerprint, task_text, timestamp, status,
                   execution_report, error_message, retry_count
            FROM task_executions
            ORDER BY id DESC
            LIMIT ?1
            "#,
            limit,
        )
    }

    /// Failed executions, newest first.
    pub fn failed_executions(&self, limit: u32) -> Result<Vec<TaskExecutionRecord>> {
        self.query_executions(
            r#"
            SELECT id, source_id, fingerprint, task_text, timestamp, status,
                   execution_report, error_message, retry_count
            FROM task_executions
            WHERE status = 'failed'
            ORDER BY id DESC
            LIMIT ?1
            "#,
            limit,
        )
    }

    pub fn count_running_executions(&self) -> Result<u64> {
        let connection = self.conn()?;
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(1) FROM task_executions WHERE status = 'running'",
                [],
                |row| row.get(0),
            )
            .context("failed to count running executions")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn query_executions(&self, sql: &str, limit: u32) -> Result<Vec<TaskExecutionRecord>> {
        let connection = self.conn()?;
        let mut statement = connection
            .prepare(sql)
            .context("failed to prepare execution query")?;
        let mut rows = statement.query(params![limit])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let status_raw: String = row.get(5)?;
            records.push(TaskExecutionRecord {
                id: row.get(0)?,
                source_id: row.get(1)?,
                fingerprint: row.get(2)?,
                task_text: row.get(3)?,
                timestamp: row.get(4)?,
                status: ExecutionStatus::parse(&status_raw)?,
                execution_report: row.get(6)?,
                error_message: row.get(7)?,
                retry_count: row.get(8)?,
            });
        }
        Ok(records)
    }
}
