//! Polling API handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    Json,
};
use protocol::{
    CloseSessionRequest, CreateSessionRequest, CreateSessionResponse, HealthResponse,
    InputRequest, OutputRequest, OutputResponse, ResizeRequest, StatusResponse,
};

use super::{error::ApiError, AppState};
use crate::session::LaunchOptions;

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let report = state.manager.health();
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_sessions: report.active_sessions,
        session_timeout_seconds: report.staleness_threshold.as_secs(),
    })
}

/// POST /api/session
///
/// The body is optional; an empty one asks for the defaults.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let request = parse_create_request(&body)?;
    let session_id = state.manager.create(launch_options(request)).await?;
    Ok(Json(CreateSessionResponse { session_id }))
}

/// POST /api/input
pub async fn send_input(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InputRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(request) = payload?;
    state
        .manager
        .send_input(&request.session_id, request.input.as_bytes())
        .await?;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/output
pub async fn drain_output(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OutputRequest>, JsonRejection>,
) -> Result<Json<OutputResponse>, ApiError> {
    let Json(request) = payload?;
    let output = state.manager.drain_output(&request.session_id)?;
    Ok(Json(OutputResponse { output }))
}

/// POST /api/resize
pub async fn resize(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ResizeRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(request) = payload?;
    state
        .manager
        .resize(&request.session_id, request.cols, request.rows)?;
    Ok(Json(StatusResponse::ok()))
}

/// DELETE /api/session
///
/// Succeeds for unknown and already closing sessions.
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CloseSessionRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(request) = payload?;
    state.manager.close(&request.session_id);
    Ok(Json(StatusResponse::ok()))
}

fn parse_create_request(body: &[u8]) -> Result<CreateSessionRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateSessionRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn launch_options(request: CreateSessionRequest) -> LaunchOptions {
    LaunchOptions {
        cwd: request.cwd.map(PathBuf::from),
        env: request.env.into_iter().collect(),
        cols: request.cols,
        rows: request.rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_empty_create_body_uses_defaults() {
        assert_eq!(
            parse_create_request(b"").unwrap(),
            CreateSessionRequest::default()
        );
        assert_eq!(
            parse_create_request(b" \n").unwrap(),
            CreateSessionRequest::default()
        );
    }

    #[test]
    fn test_malformed_create_body_rejected() {
        assert!(matches!(
            parse_create_request(b"{not json"),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_launch_options_mapping() {
        let mut env = BTreeMap::new();
        env.insert("EDITOR".to_string(), "vi".to_string());
        let options = launch_options(CreateSessionRequest {
            cwd: Some("/tmp/work".to_string()),
            env,
            cols: 132,
            rows: 43,
        });

        assert_eq!(options.cwd, Some(PathBuf::from("/tmp/work")));
        assert_eq!(options.env, vec![("EDITOR".to_string(), "vi".to_string())]);
        assert_eq!((options.cols, options.rows), (132, 43));
    }
}
