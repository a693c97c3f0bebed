//! The processing core: one cycle of fetch → filter → extract → dedup →
//! (execute) → notify → record → advance.
//!
//! Ordering here is load-bearing. A task is recorded in the ledger only
//! after its notification attempt completed without error, and the cursor
//! advances strictly last. A crash between notify and record means the next
//! cycle re-extracts the same window and at worst double-notifies; a crash
//! between record and cursor advance costs only redundant fetch/extract
//! work, because the ledger filters the task out on retry. The ledger is
//! the delivery guard; the cursor is only a fetch-window optimization.

pub mod schedule;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_core::{task_fingerprint, truncate_chars};
use murmur_lifelog::Lifelog;
use murmur_store::Store;
use murmur_tasks::{
    is_no_suitable_tool_report, CandidateTask, ExecutionFailure, ExecutionReport,
    NotificationContext,
};

/// Bound applied to error text quoted in failure notifications.
const FAILURE_TEXT_MAX_CHARS: usize = 600;

#[async_trait]
/// Source of lifelog records. `since` is a fetch-size hint; the cycle
/// re-filters locally.
pub trait LifelogSource: Send + Sync {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Lifelog>>;
}

#[async_trait]
/// Turns a record batch into candidate tasks. An empty list is a valid
/// outcome.
pub trait TaskExtraction: Send + Sync {
    async fn extract(&self, records: &[Lifelog]) -> Result<Vec<CandidateTask>>;
}

#[async_trait]
/// Delivers task notifications. A returned error aborts the cycle at the
/// point of delivery.
pub trait TaskNotifier: Send + Sync {
    async fn notify(&self, tasks: &[CandidateTask], context: &NotificationContext) -> Result<()>;
}

#[async_trait]
/// Executes one task through the agent. Failures are per-task and never
/// abort the batch.
pub trait TaskRunner: Send + Sync {
    async fn execute(&self, task: &CandidateTask) -> Result<ExecutionReport, ExecutionFailure>;
}

/// Capability switch for the execution branch, resolved once at startup
/// from configuration.
pub enum ExecutionMode<'a> {
    Disabled,
    Enabled { runner: &'a dyn TaskRunner },
}

/// Observer fed the fresh records of each cycle (the daily-archive
/// buffer). Must not fail; it has no say in the cycle's outcome.
pub trait RecordSink: Send + Sync {
    fn buffer_records(&self, records: &[Lifelog]);
}

/// Collaborators for one cycle. The cycle owns every cursor and ledger
/// write; nothing else mutates persisted state.
pub struct CycleDeps<'a> {
    pub store: &'a Store,
    pub source: &'a dyn LifelogSource,
    pub extraction: &'a dyn TaskExtraction,
    pub notifier: &'a dyn TaskNotifier,
    pub execution: ExecutionMode<'a>,
    pub archive: Option<&'a dyn RecordSink>,
}

#[derive(Debug, Default, Clone, PartialEq)]
/// What one cycle did, for logging and tests.
pub struct CycleReport {
    pub fetched: usize,
    pub fresh: usize,
    pub extracted: usize,
    pub unique: usize,
    pub notifications_sent: usize,
    /// Cursor value committed by this cycle, when it made progress.
    pub committed_cursor: Option<DateTime<Utc>>,
}

/// Run exactly one processing pass.
pub async fn run_cycle(deps: &CycleDeps<'_>) -> Result<CycleReport> {
    let mut report = CycleReport::default();

    let last_processed = deps
        .store
        .latest_end_time()
        .context("failed to read cursor")?;

    let records = deps.source.fetch(last_processed).await?;
    report.fetched = records.len();

    // The local filter is the source of truth: the upstream `start`
    // parameter may be boundary-inclusive or return stale records.
    let fresh: Vec<Lifelog> = records
        .into_iter()
        .filter(|record| match last_processed {
            Some(cursor) => record.end_time > cursor,
            None => true,
        })
        .collect();
    report.fresh = fresh.len();

    if fresh.is_empty() {
        tracing::info!("no new lifelogs to process");
        return Ok(report);
    }
    tracing::info!(count = fresh.len(), "processing lifelog records");

    if let Some(sink) = deps.archive {
        sink.buffer_records(&fresh);
    }

    // Known for the rest of the cycle; `fresh` is non-empty here.
    let latest_end_time = fresh
        .iter()
        .map(|record| record.end_time)
        .max()
        .context("non-empty batch must have a max end time")?;

    let candidates = deps.extraction.extract(&fresh).await?;
    report.extracted = candidates.len();
    if candidates.is_empty() {
        // Still advance: otherwise the next cycle refetches the same
        // taskless records forever.
        tracing::info!("no tasks extracted");
        deps.store.upsert_latest_end_time(latest_end_time)?;
        report.committed_cursor = Some(latest_end_time);
        return Ok(report);
    }

    let mut unique: Vec<(CandidateTask, String)> = Vec::new();
    for task in candidates {
        let fingerprint = task_fingerprint(&task.source_id, &task.text, &task.timestamp);
        if deps.store.has_processed(&task.source_id, &fingerprint)? {
            continue;
        }
        unique.push((task, fingerprint));
    }
    report.unique = unique.len();

    if unique.is_empty() {
        // Real candidates, but all delivered by an earlier (overlapping)
        // cycle. Progress must still persist; no duplicate notification.
        tracing::info!("no new unique tasks to notify");
        deps.store.upsert_latest_end_time(latest_end_time)?;
        report.committed_cursor = Some(latest_end_time);
        return Ok(report);
    }

    match &deps.execution {
        ExecutionMode::Enabled { runner } => {
            run_execution_branch(deps, *runner, &unique, latest_end_time, &mut report).await?;
        }
        ExecutionMode::Disabled => {
            let tasks: Vec<CandidateTask> =
                unique.iter().map(|(task, _)| task.clone()).collect();
            let context = NotificationContext {
                latest_end_time: Some(latest_end_time.to_rfc3339()),
                total_tasks: tasks.len(),
                execution_report: None,
            };
            deps.notifier.notify(&tasks, &context).await?;
            report.notifications_sent += 1;
            for (task, fingerprint) in &unique {
                deps.store
                    .record_processed(&task.source_id, fingerprint, &task.text, &task.timestamp)?;
            }
        }
    }

    deps.store.upsert_latest_end_time(latest_end_time)?;
    report.committed_cursor = Some(latest_end_time);
    tracing::info!(
        notified = report.notifications_sent,
        unique = report.unique,
        "cycle completed"
    );
    Ok(report)
}

/// Sequential per-task branch: execute → decide skip-or-send → send →
/// record. Recording is unconditional once the notification attempt for
/// the task has returned without error, whether execution succeeded or
/// failed; only a notification error aborts the loop (and the cycle),
/// leaving later tasks unrecorded for the next tick.
async fn run_execution_branch(
    deps: &CycleDeps<'_>,
    runner: &dyn TaskRunner,
    unique: &[(CandidateTask, String)],
    latest_end_time: DateTime<Utc>,
    report: &mut CycleReport,
) -> Result<()> {
    tracing::info!(count = unique.len(), "executing tasks");

    for (task, fingerprint) in unique {
        let execution_id = deps.store.create_execution(
            &task.source_id,
            fingerprint,
            &task.text,
            &task.timestamp,
        )?;
        deps.store.mark_execution_running(execution_id)?;

        let outcome = runner.execute(task).await;
        let context = |execution_report: String| NotificationContext {
            latest_end_time: Some(latest_end_time.to_rfc3339()),
            total_tasks: 1,
            execution_report: Some(execution_report),
        };

        match outcome {
            Ok(ExecutionReport { report: text }) => {
                deps.store.complete_execution(execution_id, &text)?;
                if is_no_suitable_tool_report(&text) {
                    // Suppressed to keep "could not do X" noise out of the
                    // channel; the task still counts as handled.
                    tracing::info!(task = %task.text, "suppressing no-suitable-tool report");
                } else {
                    deps.notifier
                        .notify(std::slice::from_ref(task), &context(text))
                        .await?;
                    report.notifications_sent += 1;
                }
            }
            Err(failure) => {
                tracing::warn!(task = %task.text, error = %failure, "task execution failed");
                deps.store.fail_execution(
                    execution_id,
                    &failure.error.to_string(),
                    failure.retries,
                )?;
                let text = format!(
                    "Task execution failed: {}",
                    truncate_chars(&failure.error.to_string(), FAILURE_TEXT_MAX_CHARS)
                );
                deps.notifier
                    .notify(std::slice::from_ref(task), &context(text))
                    .await?;
                report.notifications_sent += 1;
            }
        }

        deps.store
            .record_processed(&task.source_id, fingerprint, &task.text, &task.timestamp)?;
    }

    Ok(())
}
