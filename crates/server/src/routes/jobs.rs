// crates/server/src/routes/jobs.rs
//! API routes for background job inspection.
//!
//! - GET /jobs — List project ids with an active processing job

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ActiveJobs {
    pub project_ids: Vec<Uuid>,
}

/// GET /api/jobs — List all active jobs.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<ActiveJobs> {
    Json(ActiveJobs {
        project_ids: state.jobs.active_jobs(),
    })
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs", get(list_jobs))
}
