// crates/core/src/lib.rs
//! Domain value types for scribeflow.
//!
//! This crate holds the plain data model shared by every other crate:
//! processing statuses, project/file records, transcription results, and
//! the progress log types that feed live streams. No I/O lives here.

pub mod progress;
pub mod project;
pub mod status;
pub mod transcription;

pub use progress::{ChangedFileStatus, SubTaskLog, TaskLog};
pub use project::{AudioFile, Project};
pub use status::{ParseStatusError, ProcessingStatus};
pub use transcription::{TranscriptionResult, TRANSCRIBE_SUCCESS};
