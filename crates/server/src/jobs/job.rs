// crates/server/src/jobs/job.rs
//! One project's processing run.
//!
//! A [`ProcessingJob`] fans its project's pending files out as
//! [`SubTask`]s under a semaphore, aggregates their status transitions
//! into batched [`TaskLog`] snapshots, and delivers those to subscriber
//! queues. Change notifications are coalesced: the first change arms a
//! dirty signal, a flusher task sleeps one debounce window, then drains
//! everything that accumulated into a single log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scribeflow_core::{ChangedFileStatus, ProcessingStatus, Project, SubTaskLog, TaskLog};
use scribeflow_db::ProjectStore;
use scribeflow_events::{DomainEvent, EventBus, EventKind, EventSink, ProjectEvent, SinkId};
use scribeflow_stt::Transcriber;

use super::subtask::{SubTask, SubTaskListener};
use super::JobError;

/// Tunables for one processing run.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Maximum simultaneously in-flight transcription calls.
    pub max_concurrency: usize,
    /// Coalescing window between a change arriving and the aggregated
    /// log being flushed to subscribers.
    pub debounce: Duration,
    /// Capacity of each subscriber queue.
    pub subscriber_capacity: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            debounce: Duration::from_secs(1),
            subscriber_capacity: 64,
        }
    }
}

/// Orchestrates one project's full processing run.
///
/// Owned by the [`JobRegistry`](super::JobRegistry) for the duration of
/// the run; mutated concurrently by its own subtasks' callbacks and its
/// flusher task. All interior state uses `std::sync::Mutex` and is never
/// held across an `.await`.
pub struct ProcessingJob {
    project_id: Uuid,
    owner_id: Uuid,
    project: Mutex<Project>,
    /// Last known status per file, including files skipped as already
    /// terminal at run start.
    statuses: Mutex<HashMap<Uuid, ProcessingStatus>>,
    /// Per-file changes not yet delivered to subscribers.
    changes: Mutex<Vec<ChangedFileStatus>>,
    /// Message/error of the most recent subtask notification, used as the
    /// headline of the next flushed log.
    last_note: Mutex<(String, Option<u16>)>,
    /// Headline of the terminal log, set when the run settles and
    /// consumed by [`emit_terminal`](Self::emit_terminal).
    terminal_message: Mutex<Option<String>>,
    /// Armed by subtask callbacks, consumed by the flusher.
    dirty: Notify,
    listeners: EventBus<TaskLog>,
    store: Arc<dyn ProjectStore>,
    stt: Arc<dyn Transcriber>,
    bus: Arc<EventBus<DomainEvent>>,
    config: JobConfig,
}

impl ProcessingJob {
    pub fn new(
        project: Project,
        store: Arc<dyn ProjectStore>,
        stt: Arc<dyn Transcriber>,
        bus: Arc<EventBus<DomainEvent>>,
        config: JobConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            project_id: project.id,
            owner_id: project.created_by,
            project: Mutex::new(project),
            statuses: Mutex::new(HashMap::new()),
            changes: Mutex::new(Vec::new()),
            last_note: Mutex::new((String::new(), None)),
            terminal_message: Mutex::new(None),
            dirty: Notify::new(),
            listeners: EventBus::new(),
            store,
            stt,
            bus,
            config,
        })
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Register a subscriber sink for aggregated progress logs.
    pub fn subscribe(&self, sink: Arc<dyn EventSink<TaskLog>>) -> SinkId {
        self.listeners.subscribe(sink)
    }

    /// Remove a subscriber. Idempotent.
    pub fn unsubscribe(&self, id: SinkId) {
        self.listeners.unsubscribe(id)
    }

    /// Build an aggregated snapshot, draining the pending-change buffer.
    fn build_log(&self, message: String, error: Option<u16>, stop: bool) -> TaskLog {
        let status = self.project.lock().expect("job lock poisoned").status;
        let (completed_tasks, total_tasks) = {
            let statuses = self.statuses.lock().expect("job lock poisoned");
            (
                statuses.values().filter(|s| s.is_terminal()).count(),
                statuses.len(),
            )
        };
        let task_statuses =
            std::mem::take(&mut *self.changes.lock().expect("job lock poisoned"));
        TaskLog {
            project_id: self.project_id,
            status,
            completed_tasks,
            total_tasks,
            message,
            error,
            task_statuses,
            stop,
        }
    }

    fn notify_listeners(&self, message: String, error: Option<u16>, stop: bool) {
        let log = self.build_log(message, error, stop);
        self.listeners.publish(&log);
    }

    /// Deliver the terminal log for a settled run. Called by the
    /// registry's supervisor *after* deregistration, so a consumer can
    /// never subscribe to a job that already said its last word.
    pub(crate) fn emit_terminal(&self) {
        let message = self
            .terminal_message
            .lock()
            .expect("job lock poisoned")
            .take()
            .unwrap_or_else(|| "Finished".to_string());
        self.notify_listeners(message, None, true);
    }

    /// Deliver a terminal log on the fatal path so subscribed streams
    /// never hang. Called by the registry's supervisor after
    /// deregistration.
    pub(crate) fn emit_terminal_error(&self, error: &JobError) {
        self.notify_listeners(format!("Processing failed: {error}"), Some(500), true);
    }

    /// Timer-driven flush of the coalescing buffer.
    ///
    /// Waits for the dirty signal, sleeps one debounce window so changes
    /// arriving in quick succession merge into a single log, then
    /// publishes. Changes landing exactly at the flush boundary re-arm
    /// the signal and go out with the next cycle.
    async fn flush_loop(&self, stop: CancellationToken) {
        loop {
            tokio::select! {
                _ = self.dirty.notified() => {}
                _ = stop.cancelled() => return,
            }
            tokio::time::sleep(self.config.debounce).await;
            if self.changes.lock().expect("job lock poisoned").is_empty() {
                continue;
            }
            let (message, error) = self.last_note.lock().expect("job lock poisoned").clone();
            self.notify_listeners(message, error, false);
        }
    }

    /// Execute the run: verify eligibility, fan out, aggregate, commit.
    ///
    /// Individual file failures never fail the run; only orchestration
    /// level errors (persistence, ineligible state) do. The terminal log
    /// is not published here: the caller deregisters the job first and
    /// then calls [`emit_terminal`](Self::emit_terminal) (or
    /// [`emit_terminal_error`](Self::emit_terminal_error) on the error
    /// path), so no consumer can subscribe after the final log went out.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), JobError> {
        let started = Instant::now();

        // Re-check eligibility against a race with the registry's check.
        let mut project = self.store.get_by_id(self.project_id, self.owner_id).await?;
        if project.status != ProcessingStatus::Pending {
            return Err(JobError::InvalidState(format!(
                "cannot start non-pending project {} (current {})",
                self.project_id, project.status
            )));
        }
        tracing::info!(project_id = %self.project_id, files = project.files.len(), "processing started");

        project.status = ProcessingStatus::Processing;
        let stored = self.store.replace(&project, self.owner_id).await?;
        self.bus.publish(&DomainEvent::ProjectUpdated(ProjectEvent::from_project(
            &stored,
            EventKind::Updated,
        )));

        // Seed the status map; only pending files become runnable subtasks.
        let mut runnable = Vec::new();
        {
            let mut statuses = self.statuses.lock().expect("job lock poisoned");
            for file in &stored.files {
                statuses.insert(file.id, file.transcription_status);
                if file.transcription_status == ProcessingStatus::Pending {
                    runnable.push(SubTask::new(file.clone()));
                }
            }
        }
        *self.project.lock().expect("job lock poisoned") = stored;

        let flusher_stop = CancellationToken::new();
        let flusher = tokio::spawn({
            let job = Arc::clone(&self);
            let stop = flusher_stop.clone();
            async move { job.flush_loop(stop).await }
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut in_flight: JoinSet<SubTask> = JoinSet::new();
        for mut task in runnable {
            let job = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            in_flight.spawn(async move {
                // Cooperative cancellation: not-yet-started files stay
                // pending; an acquired permit means the provider call
                // runs to completion.
                if cancel.is_cancelled() {
                    return task;
                }
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("job semaphore closed");
                if cancel.is_cancelled() {
                    return task;
                }
                let t0 = Instant::now();
                if let Err(e) = task.start(job.stt.as_ref(), job.as_listener()).await {
                    tracing::error!(file_id = %task.id(), error = %e, "subtask refused to start");
                }
                tracing::debug!(
                    file_id = %task.id(),
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "transcription call finished"
                );
                task
            });
        }

        let mut settled = Vec::new();
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(task) => settled.push(task),
                Err(e) => tracing::error!(project_id = %self.project_id, error = %e, "subtask panicked"),
            }
        }

        // Stop the flusher before the terminal snapshot so the remaining
        // changes are drained exactly once, into the terminal log.
        flusher_stop.cancel();
        let _ = flusher.await;

        // Fold each committed file back into the job snapshot so the
        // final replace below writes current rows, not the ones fetched
        // at run start.
        for task in &settled {
            let merged = task.commit(self.store.as_ref(), self.bus.as_ref()).await?;
            let mut project = self.project.lock().expect("job lock poisoned");
            if let Some(file) = project.files.iter_mut().find(|f| f.id == merged.id) {
                *file = merged;
            }
        }

        let cancelled = cancel.is_cancelled();
        let mut project = self.project.lock().expect("job lock poisoned").clone();
        project.status = if cancelled {
            // Untouched files are still pending; the project may be
            // restarted later.
            ProcessingStatus::Pending
        } else {
            ProcessingStatus::Completed
        };
        let stored = self.store.replace(&project, self.owner_id).await?;
        *self.project.lock().expect("job lock poisoned") = stored.clone();
        self.bus.publish(&DomainEvent::ProjectUpdated(ProjectEvent::from_project(
            &stored,
            EventKind::Updated,
        )));

        let message = if cancelled { "Cancelled" } else { "Finished" };
        *self.terminal_message.lock().expect("job lock poisoned") = Some(message.to_string());
        tracing::info!(
            project_id = %self.project_id,
            cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "processing finished"
        );
        Ok(())
    }

    fn as_listener(&self) -> &dyn SubTaskListener {
        self
    }
}

impl SubTaskListener for ProcessingJob {
    fn on_subtask_update(&self, log: SubTaskLog, task: &SubTask) {
        self.statuses
            .lock()
            .expect("job lock poisoned")
            .insert(log.file_id, log.status);
        self.changes
            .lock()
            .expect("job lock poisoned")
            .push(ChangedFileStatus {
                file_id: log.file_id,
                status: log.status,
                content: task.content().map(str::to_string),
            });
        *self.last_note.lock().expect("job lock poisoned") = (log.message, log.error);
        self.dirty.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use scribeflow_db::MemoryStore;
    use scribeflow_events::QueueSink;
    use scribeflow_stt::{MockTranscriber, SttError, MOCK_FAILURE_CODE};
    use scribeflow_core::{AudioFile, TranscriptionResult, TRANSCRIBE_SUCCESS};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    fn test_config() -> JobConfig {
        JobConfig {
            max_concurrency: 4,
            debounce: Duration::from_millis(20),
            subscriber_capacity: 64,
        }
    }

    fn seeded_project(store: &MemoryStore, files: usize) -> Project {
        let owner = Uuid::new_v4();
        let mut project = Project::new("p", owner);
        project.status = ProcessingStatus::Pending;
        for i in 0..files {
            project.files.push(AudioFile::new(
                project.id,
                format!("{i}.wav"),
                format!("raw/{i}.wav"),
                owner,
            ));
        }
        store.insert(project.clone());
        project
    }

    fn spawn_job(
        project: Project,
        store: Arc<MemoryStore>,
        stt: Arc<dyn Transcriber>,
        config: JobConfig,
    ) -> (Arc<ProcessingJob>, mpsc::Receiver<TaskLog>, CancellationToken) {
        let bus = Arc::new(EventBus::new());
        let job = ProcessingJob::new(project, store, stt, bus, config);
        let (sink, rx) = QueueSink::bounded(64);
        job.subscribe(sink);
        let cancel = CancellationToken::new();
        (job, rx, cancel)
    }

    async fn drain_to_terminal(rx: &mut mpsc::Receiver<TaskLog>) -> Vec<TaskLog> {
        let mut logs = Vec::new();
        loop {
            let log = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for a log")
                .expect("log channel closed before terminal log");
            let stop = log.stop;
            logs.push(log);
            if stop {
                return logs;
            }
        }
    }

    #[tokio::test]
    async fn partial_failure_still_completes_the_project() {
        let store = Arc::new(MemoryStore::new());
        let owner_project = seeded_project(&store, 3);
        let owner = owner_project.created_by;

        let stt = MockTranscriber::default().with_transcript("text");
        stt.fail_path("raw/1.wav");
        let mut config = test_config();
        config.max_concurrency = 2;

        let (job, mut rx, cancel) =
            spawn_job(owner_project.clone(), Arc::clone(&store), Arc::new(stt), config);
        Arc::clone(&job).run(cancel).await.unwrap();
        job.emit_terminal();

        let logs = drain_to_terminal(&mut rx).await;
        let terminal = logs.last().unwrap();
        assert_eq!(terminal.status, ProcessingStatus::Completed);
        assert_eq!(terminal.total_tasks, 3);
        assert!(logs.iter().any(|l| l.completed_tasks == 3));

        let stored = store.get_by_id(owner_project.id, owner).await.unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        let by_name = |n: &str| stored.files.iter().find(|f| f.file_name == n).unwrap();
        assert_eq!(by_name("0.wav").transcription_status, ProcessingStatus::Completed);
        assert_eq!(by_name("0.wav").transcription_content.as_deref(), Some("text"));
        assert_eq!(by_name("1.wav").transcription_status, ProcessingStatus::Error);
        assert_eq!(by_name("1.wav").error_code, Some(MOCK_FAILURE_CODE));
        assert_eq!(by_name("2.wav").transcription_status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn empty_project_completes_immediately() {
        let store = Arc::new(MemoryStore::new());
        let project = seeded_project(&store, 0);

        let (job, mut rx, cancel) = spawn_job(
            project,
            Arc::clone(&store),
            Arc::new(MockTranscriber::default()),
            test_config(),
        );
        Arc::clone(&job).run(cancel).await.unwrap();
        job.emit_terminal();

        let logs = drain_to_terminal(&mut rx).await;
        let terminal = logs.last().unwrap();
        assert_eq!(terminal.completed_tasks, 0);
        assert_eq!(terminal.total_tasks, 0);
        assert_eq!(terminal.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn run_refuses_non_pending_project() {
        let store = Arc::new(MemoryStore::new());
        let mut project = seeded_project(&store, 1);
        project.status = ProcessingStatus::Processing;
        store.replace(&project, project.created_by).await.unwrap();

        let (job, _rx, cancel) = spawn_job(
            project,
            Arc::clone(&store),
            Arc::new(MockTranscriber::default()),
            test_config(),
        );
        let err = Arc::clone(&job).run(cancel).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidState(_)));
    }

    /// Transcriber that records the maximum number of concurrent calls.
    struct CountingTranscriber {
        current: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl CountingTranscriber {
        fn new(delay: Duration) -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn transcribe(&self, raw_path: &str) -> Result<TranscriptionResult, SttError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(TranscriptionResult {
                status_code: TRANSCRIBE_SUCCESS,
                transcription: "t".into(),
                audio_filename: raw_path.to_string(),
                model_used: "counting".into(),
            })
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_limit() {
        let store = Arc::new(MemoryStore::new());
        let project = seeded_project(&store, 8);
        let stt = Arc::new(CountingTranscriber::new(Duration::from_millis(30)));
        let mut config = test_config();
        config.max_concurrency = 2;

        let (job, mut rx, cancel) =
            spawn_job(project, Arc::clone(&store), stt.clone(), config);
        Arc::clone(&job).run(cancel).await.unwrap();
        job.emit_terminal();
        drain_to_terminal(&mut rx).await;

        assert!(stt.peak.load(Ordering::SeqCst) <= 2);
        assert!(stt.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn every_change_is_delivered_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let project = seeded_project(&store, 5);

        let (job, mut rx, cancel) = spawn_job(
            project,
            Arc::clone(&store),
            Arc::new(MockTranscriber::default()),
            test_config(),
        );
        Arc::clone(&job).run(cancel).await.unwrap();
        job.emit_terminal();

        let logs = drain_to_terminal(&mut rx).await;
        let changes: Vec<_> = logs.iter().flat_map(|l| l.task_statuses.clone()).collect();

        // Each file produces exactly one processing change and one
        // terminal change, and nothing is duplicated or lost.
        assert_eq!(changes.len(), 10);
        let mut per_file: HashMap<Uuid, Vec<ProcessingStatus>> = HashMap::new();
        for change in changes {
            per_file.entry(change.file_id).or_default().push(change.status);
        }
        assert_eq!(per_file.len(), 5);
        for statuses in per_file.values() {
            assert_eq!(statuses.len(), 2);
            assert_eq!(statuses[0], ProcessingStatus::Processing);
            assert_eq!(statuses[1], ProcessingStatus::Completed);
        }
    }

    #[tokio::test]
    async fn already_terminal_files_are_skipped_not_rerun() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let mut project = Project::new("p", owner);
        project.status = ProcessingStatus::Pending;
        let mut done = AudioFile::new(project.id, "done.wav", "raw/done.wav", owner);
        done.transcription_status = ProcessingStatus::Completed;
        done.transcription_content = Some("already".into());
        project.files.push(done);
        project
            .files
            .push(AudioFile::new(project.id, "new.wav", "raw/new.wav", owner));
        store.insert(project.clone());

        let calls = Arc::new(CountingTranscriber::new(Duration::from_millis(1)));
        let (job, mut rx, cancel) = spawn_job(
            project.clone(),
            Arc::clone(&store),
            calls.clone(),
            test_config(),
        );
        Arc::clone(&job).run(cancel).await.unwrap();
        job.emit_terminal();
        let logs = drain_to_terminal(&mut rx).await;

        // Only the pending file hit the provider; totals count both.
        assert_eq!(calls.peak.load(Ordering::SeqCst), 1);
        let terminal = logs.last().unwrap();
        assert_eq!(terminal.total_tasks, 2);
        assert_eq!(terminal.completed_tasks, 2);

        let stored = store.get_by_id(project.id, owner).await.unwrap();
        let done = stored.files.iter().find(|f| f.file_name == "done.wav").unwrap();
        assert_eq!(done.transcription_content.as_deref(), Some("already"));
    }

    #[tokio::test]
    async fn cancellation_leaves_untouched_files_pending() {
        let store = Arc::new(MemoryStore::new());
        let project = seeded_project(&store, 6);
        let owner = project.created_by;
        let stt = Arc::new(CountingTranscriber::new(Duration::from_millis(50)));
        let mut config = test_config();
        config.max_concurrency = 1;

        let (job, mut rx, cancel) =
            spawn_job(project.clone(), Arc::clone(&store), stt.clone(), config);
        let run = tokio::spawn(Arc::clone(&job).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();
        job.emit_terminal();

        let logs = drain_to_terminal(&mut rx).await;
        let terminal = logs.last().unwrap();
        assert_eq!(terminal.message, "Cancelled");
        assert_eq!(terminal.status, ProcessingStatus::Pending);
        assert!(terminal.completed_tasks < 6);

        let stored = store.get_by_id(project.id, owner).await.unwrap();
        assert_eq!(stored.status, ProcessingStatus::Pending);
        assert!(stored
            .files
            .iter()
            .any(|f| f.transcription_status == ProcessingStatus::Pending));
    }
}
