//! Control socket message types.
//!
//! Requests flow from the `ptyhub` CLI to the running broker; each gets
//! exactly one response.

use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::session::SessionInfo;

/// Requests that can be sent from the CLI to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the broker is alive.
    Ping,
    /// Get the current status of the broker.
    Status,
    /// Request the broker to stop gracefully.
    Stop,
    /// List all registered sessions.
    ListSessions,
    /// Close a specific session by ID.
    CloseSession {
        /// The unique identifier of the session to close.
        session_id: String,
    },
}

/// Responses sent from the broker to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current broker status.
    Status {
        /// Whether the broker is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Number of active sessions.
        session_count: usize,
        /// Idle seconds after which a session is reaped.
        staleness_threshold_secs: u64,
    },
    /// Acknowledgment that the broker is stopping.
    Stopping,
    /// List of sessions.
    Sessions {
        /// Information about each session.
        sessions: Vec<IpcSessionInfo>,
    },
    /// Confirmation that a session is being closed.
    SessionClosed {
        /// The ID of the closed session.
        session_id: String,
    },
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Information about a session for IPC communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcSessionInfo {
    /// Unique session identifier.
    pub id: String,
    /// Process ID of the shell.
    pub pid: Option<u32>,
    /// Unix timestamp when the session was created.
    pub created_at: u64,
    /// Seconds since the client last drained output.
    pub idle_secs: u64,
    /// Terminal columns.
    pub cols: u16,
    /// Terminal rows.
    pub rows: u16,
    /// Lifecycle state (`active` or `terminating`).
    pub state: String,
}

impl From<SessionInfo> for IpcSessionInfo {
    fn from(info: SessionInfo) -> Self {
        Self {
            id: info.id,
            pid: info.pid,
            created_at: info
                .created_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            idle_secs: info.idle.as_secs(),
            cols: info.cols,
            rows: info.rows,
            state: info.state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LifecycleState;
    use std::time::Duration;

    #[test]
    fn test_unit_requests_serialize_as_strings() {
        assert_eq!(serde_json::to_string(&IpcRequest::Ping).unwrap(), r#""Ping""#);
        assert_eq!(serde_json::to_string(&IpcRequest::Status).unwrap(), r#""Status""#);
        assert_eq!(serde_json::to_string(&IpcRequest::Stop).unwrap(), r#""Stop""#);
        assert_eq!(
            serde_json::to_string(&IpcRequest::ListSessions).unwrap(),
            r#""ListSessions""#
        );
    }

    #[test]
    fn test_request_close_session_serialization() {
        let request = IpcRequest::CloseSession {
            session_id: "test-session-123".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"CloseSession":{"session_id":"test-session-123"}}"#
        );

        let deserialized: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_response_status_serialization() {
        let response = IpcResponse::Status {
            running: true,
            uptime_secs: 3600,
            session_count: 2,
            staleness_threshold_secs: 60,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("staleness_threshold_secs"));

        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_response_error_serialization() {
        let response = IpcResponse::Error {
            message: "Something went wrong".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("Something went wrong"));

        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_session_info_conversion() {
        let info = SessionInfo {
            id: "abc".to_string(),
            pid: Some(1234),
            cols: 100,
            rows: 30,
            created_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            idle: Duration::from_millis(4500),
            state: LifecycleState::Terminating,
        };

        let ipc = IpcSessionInfo::from(info);
        assert_eq!(ipc.id, "abc");
        assert_eq!(ipc.pid, Some(1234));
        assert_eq!(ipc.created_at, 1_700_000_000);
        assert_eq!(ipc.idle_secs, 4);
        assert_eq!((ipc.cols, ipc.rows), (100, 30));
        assert_eq!(ipc.state, "terminating");
    }
}
