// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use scribeflow_db::ProjectStore;
use scribeflow_events::{DomainEvent, EventBus};
use scribeflow_stt::Transcriber;

use crate::jobs::{JobConfig, JobRegistry};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Project/file persistence.
    pub store: Arc<dyn ProjectStore>,
    /// Transcription provider (HTTP or mock, chosen at startup).
    pub stt: Arc<dyn Transcriber>,
    /// Process-wide domain event bus (project/file updates).
    pub bus: Arc<EventBus<DomainEvent>>,
    /// Active processing jobs, one per project.
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(
        store: Arc<dyn ProjectStore>,
        stt: Arc<dyn Transcriber>,
        job_config: JobConfig,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let jobs = JobRegistry::new(
            Arc::clone(&store),
            Arc::clone(&stt),
            Arc::clone(&bus),
            job_config,
        );
        Arc::new(Self {
            start_time: Instant::now(),
            store,
            stt,
            bus,
            jobs,
        })
    }

    /// Seconds since the server started.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
