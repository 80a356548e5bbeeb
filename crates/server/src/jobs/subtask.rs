// crates/server/src/jobs/subtask.rs
//! One file's transcription lifecycle.

use uuid::Uuid;

use scribeflow_core::{AudioFile, ProcessingStatus, SubTaskLog, TranscriptionResult};
use scribeflow_db::{ProjectStore, StoreResult};
use scribeflow_events::{AudioFileEvent, DomainEvent, EventBus, EventKind};
use scribeflow_stt::Transcriber;

use super::JobError;

/// Receives a notification on every subtask status transition.
///
/// The owning job implements this; the notification is delivered before
/// the subtask's next transition begins.
pub trait SubTaskListener: Send + Sync {
    fn on_subtask_update(&self, log: SubTaskLog, task: &SubTask);
}

/// Runtime wrapper binding one [`AudioFile`] to its in-run state.
///
/// Identity is the file id. Created when the owning job begins a run,
/// dropped when the run finishes.
pub struct SubTask {
    file: AudioFile,
    status: ProcessingStatus,
    content: Option<String>,
    error: Option<u16>,
    result: Option<TranscriptionResult>,
}

impl SubTask {
    pub fn new(file: AudioFile) -> Self {
        let status = file.transcription_status;
        let content = file.transcription_content.clone();
        let error = file.error_code;
        Self {
            file,
            status,
            content,
            error,
            result: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.file.id
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn error_code(&self) -> Option<u16> {
        self.error
    }

    /// Raw result from the provider, once the subtask ran.
    pub fn result(&self) -> Option<&TranscriptionResult> {
        self.result.as_ref()
    }

    fn notify(&self, listener: &dyn SubTaskListener, message: String, error: Option<u16>) {
        let log = SubTaskLog {
            file_id: self.id(),
            status: self.status,
            progress: None,
            message,
            error,
        };
        if error.is_some() {
            tracing::warn!(subtask = %log, "subtask transition");
        } else {
            tracing::debug!(subtask = %log, "subtask transition");
        }
        listener.on_subtask_update(log, self);
    }

    /// Run the transcription for this file.
    ///
    /// Only legal from `Pending`; any other state fails with
    /// [`JobError::InvalidState`] and leaves the subtask untouched.
    /// Provider failures (non-201 status or transport errors) are recorded
    /// as a per-file `Error` state and never propagate.
    pub async fn start(
        &mut self,
        stt: &dyn Transcriber,
        listener: &dyn SubTaskListener,
    ) -> Result<(), JobError> {
        if self.status != ProcessingStatus::Pending {
            return Err(JobError::InvalidState(format!(
                "cannot process already started file {} (current {})",
                self.id(),
                self.status
            )));
        }

        self.status = ProcessingStatus::Processing;
        self.notify(listener, format!("File {} started", self.file.file_name), None);

        match stt.transcribe(&self.file.file_path_raw).await {
            Ok(result) if result.is_success() => {
                self.status = ProcessingStatus::Completed;
                self.content = Some(result.transcription.clone());
                self.result = Some(result);
                self.notify(
                    listener,
                    format!("File {} finished", self.file.file_name),
                    None,
                );
            }
            Ok(result) => {
                self.status = ProcessingStatus::Error;
                self.error = Some(result.status_code);
                self.result = Some(result);
                self.notify(
                    listener,
                    format!("File {} failed", self.file.file_name),
                    self.error,
                );
            }
            Err(e) => {
                // Transport-level failure: downgraded to a per-file error.
                tracing::warn!(file_id = %self.id(), error = %e, "transcription call failed");
                self.status = ProcessingStatus::Error;
                self.error = Some(500);
                self.notify(
                    listener,
                    format!("File {} failed", self.file.file_name),
                    self.error,
                );
            }
        }

        Ok(())
    }

    /// Copy the final state back onto the file, publish a file-updated
    /// event, and merge the file via the store.
    ///
    /// Called by the owning job after all subtasks settle, before the
    /// project's final persistence step.
    pub async fn commit(
        &self,
        store: &dyn ProjectStore,
        bus: &EventBus<DomainEvent>,
    ) -> StoreResult<AudioFile> {
        let mut file = self.file.clone();
        file.transcription_status = self.status;
        file.transcription_content = self.content.clone();
        file.error_code = self.error;

        bus.publish(&DomainEvent::FileUpdated(AudioFileEvent::from_file(
            &file,
            EventKind::Updated,
        )));
        store.merge_file(&file).await?;
        Ok(file)
    }
}

impl PartialEq for SubTask {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SubTask {}

impl std::hash::Hash for SubTask {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scribeflow_db::MemoryStore;
    use scribeflow_stt::{MockTranscriber, MOCK_FAILURE_CODE};
    use scribeflow_core::Project;
    use std::sync::Mutex;

    /// Records every notification for assertions.
    #[derive(Default)]
    struct RecordingListener {
        logs: Mutex<Vec<SubTaskLog>>,
    }

    impl SubTaskListener for RecordingListener {
        fn on_subtask_update(&self, log: SubTaskLog, _task: &SubTask) {
            self.logs.lock().unwrap().push(log);
        }
    }

    fn pending_file() -> AudioFile {
        AudioFile::new(Uuid::new_v4(), "a.wav", "raw/a.wav", Uuid::new_v4())
    }

    #[tokio::test]
    async fn success_transitions_through_processing_to_completed() {
        let mut task = SubTask::new(pending_file());
        let stt = MockTranscriber::default().with_transcript("hello");
        let listener = RecordingListener::default();

        task.start(&stt, &listener).await.unwrap();

        assert_eq!(task.status(), ProcessingStatus::Completed);
        assert_eq!(task.content(), Some("hello"));
        assert_eq!(task.error_code(), None);

        let logs = listener.logs.lock().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, ProcessingStatus::Processing);
        assert_eq!(logs[1].status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn provider_failure_becomes_file_error() {
        let mut task = SubTask::new(pending_file());
        let stt = MockTranscriber::default();
        stt.fail_path("raw/a.wav");
        let listener = RecordingListener::default();

        task.start(&stt, &listener).await.unwrap();

        assert_eq!(task.status(), ProcessingStatus::Error);
        assert_eq!(task.error_code(), Some(MOCK_FAILURE_CODE));
        assert!(task.content().is_none());

        let logs = listener.logs.lock().unwrap();
        assert_eq!(logs[1].error, Some(MOCK_FAILURE_CODE));
    }

    #[tokio::test]
    async fn second_start_is_invalid_and_leaves_state_untouched() {
        let mut task = SubTask::new(pending_file());
        let stt = MockTranscriber::default().with_transcript("hello");
        let listener = RecordingListener::default();

        task.start(&stt, &listener).await.unwrap();
        let before = task.status();
        let err = task.start(&stt, &listener).await.unwrap_err();

        assert!(matches!(err, JobError::InvalidState(_)));
        assert_eq!(task.status(), before);
        assert_eq!(task.content(), Some("hello"));
        // No extra notifications from the refused start.
        assert_eq!(listener.logs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn start_from_terminal_state_is_invalid() {
        let mut file = pending_file();
        file.transcription_status = ProcessingStatus::Completed;
        let mut task = SubTask::new(file);
        let listener = RecordingListener::default();

        let err = task
            .start(&MockTranscriber::default(), &listener)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidState(_)));
        assert!(listener.logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_merges_final_state_and_publishes_event() {
        let owner = Uuid::new_v4();
        let mut project = Project::new("p", owner);
        let file = AudioFile::new(project.id, "a.wav", "raw/a.wav", owner);
        project.files.push(file.clone());
        let store = MemoryStore::new();
        store.insert(project.clone());

        let bus = EventBus::new();
        let (sink, mut rx) = scribeflow_events::QueueSink::bounded(8);
        bus.subscribe(sink);

        let mut task = SubTask::new(file.clone());
        task.start(&MockTranscriber::default().with_transcript("text"), &NoopListener)
            .await
            .unwrap();
        let committed = task.commit(&store, &bus).await.unwrap();

        assert_eq!(committed.transcription_status, ProcessingStatus::Completed);
        assert_eq!(committed.transcription_content.as_deref(), Some("text"));

        let event = rx.try_recv().unwrap();
        match event {
            DomainEvent::FileUpdated(e) => {
                assert_eq!(e.file_id, file.id);
                assert_eq!(e.transcription_status, ProcessingStatus::Completed);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let fetched = store.get_by_id(project.id, owner).await.unwrap();
        assert_eq!(
            fetched.files[0].transcription_content.as_deref(),
            Some("text")
        );
    }

    struct NoopListener;
    impl SubTaskListener for NoopListener {
        fn on_subtask_update(&self, _log: SubTaskLog, _task: &SubTask) {}
    }
}
