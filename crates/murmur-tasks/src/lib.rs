//! Task adapters: extraction from lifelog transcripts and agent-backed
//! execution.

pub mod executor;
pub mod extractor;

use serde::{Deserialize, Serialize};

pub use executor::{
    is_no_suitable_tool_report, ExecutionFailure, ExecutionReport, ExecutorError, TaskExecutor,
    MAX_TOOL_ITERATIONS, TRANSIENT_RETRY_DELAYS,
};
pub use extractor::{sanitize_json_output, TaskExtractor};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A to-do item extracted from a source record. Transient: it only gains
/// identity once the pipeline fingerprints it against the ledger.
pub struct CandidateTask {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    #[serde(rename = "task")]
    pub text: String,
    /// ISO-8601 with offset, as produced by the extraction model.
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Cycle metadata attached to outbound task notifications.
pub struct NotificationContext {
    /// RFC 3339 end time of the newest record in the batch, when known.
    pub latest_end_time: Option<String>,
    pub total_tasks: usize,
    /// Present in execution mode: the agent's outcome report for the task.
    pub execution_report: Option<String>,
}
