// crates/events/src/domain.rs
//! Domain events published outside the job engine's own progress stream.
//!
//! Collaborators such as a UI feed consume these; delivery is
//! fire-and-forget via the [`EventBus`](crate::bus::EventBus).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scribeflow_core::{AudioFile, ProcessingStatus, Project};

/// What happened to the source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// Project-level domain event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEvent {
    pub project_id: Uuid,
    pub kind: EventKind,
    pub name: String,
    pub status: ProcessingStatus,
    pub num_of_files: usize,
    pub time: DateTime<Utc>,
}

impl ProjectEvent {
    pub fn from_project(project: &Project, kind: EventKind) -> Self {
        Self {
            project_id: project.id,
            kind,
            name: project.name.clone(),
            status: project.status,
            num_of_files: project.num_of_files(),
            time: Utc::now(),
        }
    }
}

/// File-level domain event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFileEvent {
    pub file_id: Uuid,
    pub project_id: Uuid,
    pub kind: EventKind,
    pub file_name: String,
    pub transcription_status: ProcessingStatus,
    pub transcription_content: Option<String>,
    pub time: DateTime<Utc>,
}

impl AudioFileEvent {
    pub fn from_file(file: &AudioFile, kind: EventKind) -> Self {
        Self {
            file_id: file.id,
            project_id: file.project_id,
            kind,
            file_name: file.file_name.clone(),
            transcription_status: file.transcription_status,
            transcription_content: file.transcription_content.clone(),
            time: Utc::now(),
        }
    }
}

/// Union published on the application-wide bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DomainEvent {
    ProjectUpdated(ProjectEvent),
    FileUpdated(AudioFileEvent),
}

impl DomainEvent {
    /// The project this event belongs to, for per-project stream filters.
    pub fn project_id(&self) -> Uuid {
        match self {
            Self::ProjectUpdated(e) => e.project_id,
            Self::FileUpdated(e) => e.project_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn project_event_captures_snapshot() {
        let mut project = Project::new("demo", Uuid::new_v4());
        project.status = ProcessingStatus::Processing;
        project
            .files
            .push(AudioFile::new(project.id, "a.wav", "raw/a.wav", project.created_by));

        let event = ProjectEvent::from_project(&project, EventKind::Updated);
        assert_eq!(event.project_id, project.id);
        assert_eq!(event.status, ProcessingStatus::Processing);
        assert_eq!(event.num_of_files, 1);
    }

    #[test]
    fn domain_event_exposes_project_id() {
        let file = AudioFile::new(Uuid::new_v4(), "a.wav", "raw/a.wav", Uuid::new_v4());
        let event = DomainEvent::FileUpdated(AudioFileEvent::from_file(&file, EventKind::Updated));
        assert_eq!(event.project_id(), file.project_id);
    }

    #[test]
    fn serializes_with_event_type_tag() {
        let file = AudioFile::new(Uuid::new_v4(), "a.wav", "raw/a.wav", Uuid::new_v4());
        let event = DomainEvent::FileUpdated(AudioFileEvent::from_file(&file, EventKind::Updated));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "file_updated");
        assert_eq!(value["file_id"], file.id.to_string());
    }
}
