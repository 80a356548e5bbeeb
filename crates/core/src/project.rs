// crates/core/src/project.rs
//! Project and audio file records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::ProcessingStatus;

/// A batch of audio files owned by one user, processed as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ProcessingStatus,
    /// Object-storage prefix the raw files were uploaded under.
    pub project_path: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub files: Vec<AudioFile>,
}

impl Project {
    /// Minimal constructor used by tests and seeding; timestamps default
    /// to now and the file list starts empty.
    pub fn new(name: impl Into<String>, created_by: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            status: ProcessingStatus::Loading,
            project_path: String::new(),
            created_by,
            created_at: now,
            updated_at: now,
            files: Vec::new(),
        }
    }

    /// Number of files attached to this project.
    pub fn num_of_files(&self) -> usize {
        self.files.len()
    }
}

/// One uploaded audio file and its transcription state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFile {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_name: String,
    /// Storage path of the raw audio, handed to the transcription provider.
    pub file_path_raw: String,
    pub transcription_status: ProcessingStatus,
    pub transcription_content: Option<String>,
    /// Provider status code recorded when transcription failed.
    pub error_code: Option<u16>,
    pub created_by: Uuid,
}

impl AudioFile {
    /// A fresh pending file belonging to `project_id`.
    pub fn new(
        project_id: Uuid,
        file_name: impl Into<String>,
        file_path_raw: impl Into<String>,
        created_by: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            file_name: file_name.into(),
            file_path_raw: file_path_raw.into(),
            transcription_status: ProcessingStatus::Pending,
            transcription_content: None,
            error_code: None,
            created_by,
        }
    }
}
