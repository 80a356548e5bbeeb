// crates/server/src/jobs/registry.rs
//! Registry of in-flight processing jobs.
//!
//! One [`JobRegistry`] per process, held in application state. It owns
//! the project-id → job map, enforces the single-active-job-per-project
//! rule, spawns each job under a supervisor that guarantees
//! deregistration and a terminal log on every exit path, and hands out
//! per-subscriber progress streams of serialized wire payloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::Stream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scribeflow_core::{ProcessingStatus, Project, TaskLog};
use scribeflow_db::ProjectStore;
use scribeflow_events::{DomainEvent, EventBus, QueueSink, SinkId};
use scribeflow_stt::Transcriber;

use super::job::{JobConfig, ProcessingJob};
use super::JobError;

struct JobEntry {
    job: Arc<ProcessingJob>,
    cancel: CancellationToken,
    #[allow(dead_code)]
    supervisor: JoinHandle<()>,
}

pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    store: Arc<dyn ProjectStore>,
    stt: Arc<dyn Transcriber>,
    bus: Arc<EventBus<DomainEvent>>,
    config: JobConfig,
}

impl JobRegistry {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        stt: Arc<dyn Transcriber>,
        bus: Arc<EventBus<DomainEvent>>,
        config: JobConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            store,
            stt,
            bus,
            config,
        })
    }

    /// Start processing `project`, rejecting duplicates and ineligible
    /// states before anything is spawned.
    pub fn start(self: &Arc<Self>, project: Project) -> Result<(), JobError> {
        match project.status {
            ProcessingStatus::Pending => {}
            ProcessingStatus::Loading => {
                return Err(JobError::Conflict(format!(
                    "project {} is still uploading",
                    project.id
                )));
            }
            other => {
                return Err(JobError::Conflict(format!(
                    "project {} is {other}, only pending projects can be processed",
                    project.id
                )));
            }
        }

        let project_id = project.id;
        let mut jobs = self.jobs.lock().expect("registry lock poisoned");
        if jobs.contains_key(&project_id) {
            return Err(JobError::Conflict(format!(
                "project {project_id} is already being processed"
            )));
        }

        let job = ProcessingJob::new(
            project,
            Arc::clone(&self.store),
            Arc::clone(&self.stt),
            Arc::clone(&self.bus),
            self.config.clone(),
        );
        let cancel = CancellationToken::new();
        let supervisor = tokio::spawn(supervise(
            Arc::clone(self),
            Arc::clone(&job),
            cancel.clone(),
        ));
        jobs.insert(
            project_id,
            JobEntry {
                job,
                cancel,
                supervisor,
            },
        );
        tracing::info!(%project_id, "job registered");
        Ok(())
    }

    /// Remove a finished job from the map. Idempotent; late calls after
    /// a job was already deregistered are no-ops.
    fn on_job_complete(&self, project_id: Uuid) {
        let removed = self
            .jobs
            .lock()
            .expect("registry lock poisoned")
            .remove(&project_id)
            .is_some();
        if removed {
            tracing::info!(%project_id, "job deregistered");
        }
    }

    /// Request cancellation of a running job. Returns whether a job was
    /// found; the job stays registered until its supervisor sees it out.
    pub fn cancel(&self, project_id: Uuid) -> bool {
        let jobs = self.jobs.lock().expect("registry lock poisoned");
        match jobs.get(&project_id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(%project_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Settings shared by every job this registry spawns.
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Project ids with a job currently registered.
    pub fn active_jobs(&self) -> Vec<Uuid> {
        self.jobs
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Subscribe to a running job and return its progress as serialized
    /// wire payloads, one JSON object per item. The stream ends after the
    /// job's terminal log; dropping it unsubscribes the sink.
    pub fn open_stream(
        &self,
        project_id: Uuid,
    ) -> Result<impl Stream<Item = String> + Send + 'static, JobError> {
        let job = {
            let jobs = self.jobs.lock().expect("registry lock poisoned");
            jobs.get(&project_id)
                .map(|entry| Arc::clone(&entry.job))
                .ok_or_else(|| {
                    JobError::NotFound(format!("no active job for project {project_id}"))
                })?
        };

        let (sink, mut rx) = QueueSink::bounded(job.config().subscriber_capacity);
        let id = job.subscribe(sink);
        let guard = SubscriptionGuard { job, id };

        Ok(async_stream::stream! {
            let _guard = guard;
            while let Some(log) = rx.recv().await {
                let stop = log.stop;
                yield wire_json(&log);
                if stop {
                    break;
                }
            }
        })
    }
}

/// Drives one job to completion, deregisters it, then pushes the
/// terminal log. Deregistration comes first: once the final log is out a
/// new subscriber would wait forever, so from that moment `open_stream`
/// must answer `NotFound` instead.
async fn supervise(
    registry: Arc<JobRegistry>,
    job: Arc<ProcessingJob>,
    cancel: CancellationToken,
) {
    let project_id = job.project_id();
    let result = Arc::clone(&job).run(cancel).await;
    registry.on_job_complete(project_id);
    match result {
        Ok(()) => job.emit_terminal(),
        Err(e) => {
            tracing::error!(%project_id, error = %e, "processing job failed");
            job.emit_terminal_error(&e);
        }
    }
}

/// Unsubscribes the sink when the consumer walks away mid-stream.
struct SubscriptionGuard {
    job: Arc<ProcessingJob>,
    id: SinkId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.job.unsubscribe(self.id);
    }
}

/// Serialize one aggregated log for the wire. The terminal log is marked
/// by the stream simply ending, so the stop flag stays internal.
fn wire_json(log: &TaskLog) -> String {
    serde_json::json!({
        "project_id": log.project_id,
        "status": log.status,
        "completed_tasks": log.completed_tasks,
        "total_tasks": log.total_tasks,
        "message": log.message,
        "error": log.error,
        "task_statuses": log.task_statuses,
    })
    .to_string()
}
