// crates/server/src/routes/projects.rs
//! Project fetch, processing lifecycle, and per-project event streams.
//!
//! - GET    /projects/{id} — Fetch one project with its files
//! - POST   /projects/{id}/process — Start processing (202)
//! - GET    /projects/{id}/process/stream — SSE of aggregated progress
//! - DELETE /projects/{id}/process — Request cancellation (202)
//! - GET    /projects/{id}/events — SSE of this project's domain events

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_stream::StreamExt;
use uuid::Uuid;

use scribeflow_core::Project;
use scribeflow_events::{DomainEvent, EventBus, QueueSink, SinkId};

use super::owner_id;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProcessAccepted {
    pub project_id: Uuid,
    pub message: String,
}

/// GET /api/projects/{id} - Fetch one project, files included.
///
/// Ownership is enforced by the store: a project belonging to another
/// user behaves exactly like a missing one.
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Project>> {
    let owner = owner_id(&headers)?;
    let project = state.store.get_by_id(id, owner).await?;
    Ok(Json(project))
}

/// POST /api/projects/{id}/process - Start processing the project.
///
/// Responds 202 as soon as the job is registered; progress is observed
/// via the stream endpoint.
pub async fn start_processing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<ProcessAccepted>)> {
    let owner = owner_id(&headers)?;
    let project = state.store.get_by_id(id, owner).await?;
    state.jobs.start(project)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessAccepted {
            project_id: id,
            message: "Processing started".to_string(),
        }),
    ))
}

/// DELETE /api/projects/{id}/process - Request cancellation.
///
/// Responds 202; in-flight transcription calls finish before the job
/// winds down, so deregistration is observed on the progress stream.
pub async fn cancel_processing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<ProcessAccepted>)> {
    let owner = owner_id(&headers)?;
    state.store.get_by_id(id, owner).await?;
    if !state.jobs.cancel(id) {
        return Err(ApiError::JobNotFound(format!(
            "no active job for project {id}"
        )));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessAccepted {
            project_id: id,
            message: "Cancellation requested".to_string(),
        }),
    ))
}

/// GET /api/projects/{id}/process/stream - SSE stream of aggregated
/// progress logs for the project's active job.
///
/// The stream closes after the job's terminal log.
pub async fn stream_processing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let owner = owner_id(&headers)?;
    state.store.get_by_id(id, owner).await?;
    let logs = state.jobs.open_stream(id)?;
    let stream = logs.map(|json| Ok(Event::default().data(json)));
    Ok(Sse::new(stream))
}

/// Unsubscribes a domain event sink when the client disconnects.
struct BusGuard {
    bus: Arc<EventBus<DomainEvent>>,
    id: SinkId,
}

impl Drop for BusGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// GET /api/projects/{id}/events - SSE stream of the project's domain
/// events (project and file updates).
///
/// Unlike the progress stream this has no terminal marker; it stays open
/// until the client disconnects.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let owner = owner_id(&headers)?;
    state.store.get_by_id(id, owner).await?;

    let (sink, mut rx) = QueueSink::bounded(state.jobs.config().subscriber_capacity);
    let sink_id = state.bus.subscribe(sink);
    let guard = BusGuard {
        bus: Arc::clone(&state.bus),
        id: sink_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            if event.project_id() != id {
                continue;
            }
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => {
                    tracing::warn!(project_id = %id, error = %e, "dropping unserializable event");
                }
            }
        }
    };
    Ok(Sse::new(stream))
}

/// Create the projects routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects/{id}", get(get_project))
        .route(
            "/projects/{id}/process",
            post(start_processing).delete(cancel_processing),
        )
        .route("/projects/{id}/process/stream", get(stream_processing))
        .route("/projects/{id}/events", get(stream_events))
}
