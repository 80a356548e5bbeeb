// crates/server/src/jobs/mod.rs
//! Job orchestration engine.
//!
//! Provides:
//! - `JobRegistry` — process-wide map of active jobs, one per project
//! - `ProcessingJob` — runs one project's files under a concurrency limit
//! - `SubTask` — owns one file's transcription lifecycle
//! - `JobConfig` — concurrency limit, coalescing window, queue capacity

pub mod job;
pub mod registry;
pub mod subtask;

pub use job::{JobConfig, ProcessingJob};
pub use registry::JobRegistry;
pub use subtask::{SubTask, SubTaskListener};

use thiserror::Error;

use scribeflow_db::StoreError;

/// Errors surfaced by the job engine.
///
/// Provider failures are deliberately absent: they are per-file data
/// (recorded on the `AudioFile`), never an error of the run itself.
#[derive(Debug, Error)]
pub enum JobError {
    /// Project not eligible to start, or a job already exists for it.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No active job registered for the requested project.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lifecycle transition was attempted from the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Persistence failure inside the orchestration loop (fatal to the run).
    #[error(transparent)]
    Store(#[from] StoreError),
}
