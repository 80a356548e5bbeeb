// crates/server/src/routes/mod.rs
//! API route handlers for the scribeflow server.

pub mod health;
pub mod jobs;
pub mod projects;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the caller's user id. Stand-in for a real auth layer;
/// ownership checks in the store key off this value.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Extract and validate the caller's user id from request headers.
pub fn owner_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| ApiError::Unauthorized("missing X-User-Id header".to_string()))?;
    let raw = raw
        .to_str()
        .map_err(|_| ApiError::Unauthorized("malformed X-User-Id header".to_string()))?;
    raw.parse()
        .map_err(|_| ApiError::Unauthorized(format!("X-User-Id is not a valid uuid: {raw}")))
}

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET    /api/health - Health check
/// - GET    /api/projects/{id} - Fetch one project with its files
/// - POST   /api/projects/{id}/process - Start processing (202)
/// - GET    /api/projects/{id}/process/stream - SSE progress stream
/// - DELETE /api/projects/{id}/process - Cancel a running job
/// - GET    /api/projects/{id}/events - SSE stream of domain events
/// - GET    /api/jobs - List projects with an active job
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", projects::router())
        .nest("/api", jobs::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_owner_id_roundtrip() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(owner_id(&headers).unwrap(), id);
    }

    #[test]
    fn test_owner_id_missing_or_invalid() {
        let headers = HeaderMap::new();
        assert!(matches!(owner_id(&headers), Err(ApiError::Unauthorized(_))));

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(owner_id(&headers), Err(ApiError::Unauthorized(_))));
    }
}
