//! SQLite persistence for the murmur pipeline.
//!
//! Three tables back the processing loop: a singleton cursor row recording
//! the latest committed lifelog end time, the append-only processed-task
//! ledger keyed by `(source_id, fingerprint)`, and an execution log for the
//! optional task-execution branch. The cycle is the only writer; this crate
//! exposes storage operations with no policy of its own. Idempotency lives
//! in the SQL (`ON CONFLICT` upsert / do-nothing insert), not in locks.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

mod executions;

pub use executions::{ExecutionStatus, TaskExecutionRecord};

const CURSOR_ID: &str = "latest";

/// Handle over the bot's SQLite database. Cheap to share behind an `Arc`;
/// all access serializes on an internal mutex, which matches the
/// single-writer workload.
pub struct Store {
    connection: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the store at `path` and initialize the
    /// schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory {}", parent.display())
                })?;
            }
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open task store {}", path.display()))?;
        connection.busy_timeout(std::time::Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        initialize_schema(&connection)?;
        tracing::debug!(path = %path.display(), "task store opened");
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow!("task store mutex poisoned"))
    }

    /// Read the cursor watermark. Returns `None` on first run, before any
    /// cycle has committed.
    pub fn latest_end_time(&self) -> Result<Option<DateTime<Utc>>> {
        let connection = self.conn()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT latest_end_time FROM lifelog_cursor WHERE id = ?1",
                params![CURSOR_ID],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read cursor row")?;

        match raw {
            Some(value) => {
                let parsed = DateTime::parse_from_rfc3339(&value)
                    .with_context(|| format!("corrupt cursor timestamp '{value}'"))?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    /// Insert-or-update the cursor watermark. Callers must pass the maximum
    /// end time of the batch they just committed; the store does not reject
    /// a regressing value.
    pub fn upsert_latest_end_time(&self, latest_end_time: DateTime<Utc>) -> Result<()> {
        let connection = self.conn()?;
        connection
            .execute(
                r#"
                INSERT INTO lifelog_cursor (id, latest_end_time, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    latest_end_time = excluded.latest_end_time,
                    updated_at = excluded.updated_at
                "#,
                params![
                    CURSOR_ID,
                    latest_end_time.to_rfc3339(),
                    Utc::now().to_rfc3339()
                ],
            )
            .context("failed to upsert cursor row")?;
        Ok(())
    }

    /// Point lookup on the ledger's composite key.
    pub fn has_processed(&self, source_id: &str, fingerprint: &str) -> Result<bool> {
        let connection = self.conn()?;
        let found: Option<i64> = connection
            .query_row(
                r#"
                SELECT 1 FROM processed_tasks
                WHERE source_id = ?1 AND fingerprint = ?2
                LIMIT 1
                "#,
                params![source_id, fingerprint],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query processed-task ledger")?;
        Ok(found.is_some())
    }

    /// Append a ledger row. Idempotent: a duplicate `(source_id,
    /// fingerprint)` pair is silently ignored, so retried or overlapping
    /// cycles can record the same task without error.
    pub fn record_processed(
        &self,
        source_id: &str,
        fingerprint: &str,
        task_text: &str,
        timestamp: &str,
    ) -> Result<()> {
        let connection = self.conn()?;
        connection
            .execute(
                r#"
                INSERT INTO processed_tasks (source_id, fingerprint, task_text, timestamp, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(source_id, fingerprint) DO NOTHING
                "#,
                params![
                    source_id,
                    fingerprint,
                    task_text,
                    timestamp,
                    Utc::now().to_rfc3339()
                ],
            )
            .context("failed to record processed task")?;
        Ok(())
    }
}

fn initialize_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS lifelog_cursor (
                id TEXT PRIMARY KEY,
                latest_end_time TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS processed_tasks (
                source_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                task_text TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (source_id, fingerprint)
            );
            CREATE TABLE IF NOT EXISTS task_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                task_text TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                execution_report TEXT NULL,
                error_message TEXT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NULL,
                completed_at TEXT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_executions_status
                ON task_executions(status);
            "#,
        )
        .context("failed to initialize task store schema")?;
    Ok(())
}
