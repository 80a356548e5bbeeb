// crates/core/src/progress.rs
//! Progress snapshots emitted while a job runs.
//!
//! [`SubTaskLog`] is the file-level notification a subtask hands to its
//! owning job; [`TaskLog`] is the aggregated job-level snapshot delivered
//! to stream subscribers, carrying the per-file changes accumulated since
//! the previous snapshot.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::ProcessingStatus;

/// One per-file status change, batched into [`TaskLog::task_statuses`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFileStatus {
    pub file_id: Uuid,
    pub status: ProcessingStatus,
    /// Transcript text, present once the file completed.
    pub content: Option<String>,
}

/// Job-level progress snapshot pushed to subscriber queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub project_id: Uuid,
    pub status: ProcessingStatus,
    /// Subtasks that reached a terminal state (completed or error).
    pub completed_tasks: usize,
    pub total_tasks: usize,
    #[serde(default)]
    pub message: String,
    pub error: Option<u16>,
    /// Per-file changes since the previous snapshot.
    #[serde(default)]
    pub task_statuses: Vec<ChangedFileStatus>,
    /// Terminal marker: no further logs follow and streams should close.
    #[serde(default)]
    pub stop: bool,
}

/// File-level progress notification, internal to the job engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskLog {
    pub file_id: Uuid,
    pub status: ProcessingStatus,
    pub progress: Option<f32>,
    #[serde(default)]
    pub message: String,
    pub error: Option<u16>,
}

impl std::fmt::Display for SubTaskLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.error {
            Some(code) => write!(
                f,
                "file {} errored ({code}). {}",
                self.file_id, self.message
            ),
            None => write!(
                f,
                "file {} status={}. {}",
                self.file_id, self.status, self.message
            ),
        }
    }
}
