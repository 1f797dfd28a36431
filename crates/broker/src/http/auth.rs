//! Single-owner authorization gate.
//!
//! The broker does not authenticate anyone. A proxy in front of it does, and
//! forwards the caller's identity in a header. When an owner is configured,
//! a request carrying a different identity is refused. Requests without an
//! identity pass, which keeps local development working.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};

use super::{error::ApiError, AppState};
use crate::config::ServerConfig;

/// Permits or denies requests based on the forwarded identity.
#[derive(Debug, Clone, Default)]
pub struct OwnerGate {
    owner: Option<String>,
    headers: Vec<HeaderName>,
}

impl OwnerGate {
    /// Creates a gate. Header names that are not valid HTTP header names are
    /// skipped.
    pub fn new(owner: Option<String>, identity_headers: &[String]) -> Self {
        let headers = identity_headers
            .iter()
            .filter_map(|name| match HeaderName::try_from(name.as_str()) {
                Ok(header) => Some(header),
                Err(_) => {
                    tracing::warn!(header = %name, "Ignoring invalid identity header name");
                    None
                }
            })
            .collect();

        Self {
            owner: owner.filter(|o| !o.is_empty()),
            headers,
        }
    }

    /// Creates a gate from the `[server]` configuration section.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.owner.clone(), &config.identity_headers)
    }

    /// A gate that lets everything through.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// The first non-empty identity header present on the request.
    pub fn identity(&self, headers: &HeaderMap) -> Option<String> {
        self.headers.iter().find_map(|name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
    }

    /// Decides whether a request with these headers may proceed.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(owner) = &self.owner else {
            return Ok(());
        };
        let Some(user) = self.identity(headers) else {
            return Ok(());
        };

        if &user == owner {
            Ok(())
        } else {
            tracing::warn!(user = %user, owner = %owner, "Unauthorized access attempt");
            Err(ApiError::Forbidden {
                owner: owner.clone(),
                user,
            })
        }
    }
}

/// Middleware applying the gate to every route it wraps.
pub async fn require_owner(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    state.gate.check(request.headers())?;
    Ok(next.run(request).await)
}
