//! HTTP API error types.
//!
//! Every failure leaves the API as a JSON [`ErrorBody`] with a status code
//! derived from the error kind.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use protocol::{ErrorBody, ErrorCode};
use thiserror::Error;

use crate::session::SessionError;

/// Errors that can occur in the HTTP API layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The request body was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The authorization gate denied the request.
    #[error("This app belongs to {owner}. You are logged in as {user}.")]
    Forbidden { owner: String, user: String },
}

impl ApiError {
    /// Status code and machine-readable code for this error.
    pub fn classify(&self) -> (StatusCode, ErrorCode) {
        match self {
            ApiError::Session(SessionError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, ErrorCode::SessionNotFound)
            }
            ApiError::Session(SessionError::Launch(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::LaunchFailed)
            }
            ApiError::Session(SessionError::Io(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::IoError)
            }
            ApiError::Session(SessionError::LimitReached { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::LimitReached)
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest),
            ApiError::Forbidden { .. } => (StatusCode::FORBIDDEN, ErrorCode::Forbidden),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }

        let body = Json(ErrorBody {
            error: self.to_string(),
            code,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(error: ApiError) -> (StatusCode, ErrorBody) {
        let response = error.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_not_found_response() {
        let (status, body) =
            body_of(SessionError::NotFound("abc".to_string()).into()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, ErrorCode::SessionNotFound);
        assert!(body.error.contains("abc"));
    }

    #[tokio::test]
    async fn test_limit_reached_response() {
        let (status, body) = body_of(SessionError::LimitReached { max: 2 }.into()).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, ErrorCode::LimitReached);
    }

    #[tokio::test]
    async fn test_server_errors() {
        let (status, body) = body_of(SessionError::Launch("no pty".to_string()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, ErrorCode::LaunchFailed);

        let (status, body) = body_of(SessionError::Io("EIO".to_string()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, ErrorCode::IoError);
    }

    #[tokio::test]
    async fn test_forbidden_response() {
        let (status, body) = body_of(ApiError::Forbidden {
            owner: "owner@example.com".to_string(),
            user: "other@example.com".to_string(),
        })
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, ErrorCode::Forbidden);
        assert!(body.error.contains("owner@example.com"));
        assert!(body.error.contains("other@example.com"));
    }

    #[tokio::test]
    async fn test_bad_request_response() {
        let (status, body) = body_of(ApiError::BadRequest("missing field".to_string())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, ErrorCode::InvalidRequest);
    }
}
