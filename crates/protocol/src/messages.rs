//! Request and response bodies for the ptyhub HTTP binding.
//!
//! Every body is plain JSON. Field names follow the polling API that browser
//! clients speak (`session_id`, `input`, `output`, ...), so a client written
//! against one broker version keeps working as long as [`PROTOCOL_VERSION`]
//! does not change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default terminal width used when a request omits it.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height used when a request omits it.
pub const DEFAULT_ROWS: u16 = 24;

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

// ============================================================================
// Session Messages
// ============================================================================

/// Request to create a new shell session.
///
/// Every field is optional; an empty JSON object (or an empty body) asks for
/// an 80x24 shell in the broker's default workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Working directory for the shell. Created if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Environment overrides applied on top of the broker's shell environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Initial terminal columns.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Initial terminal rows.
    #[serde(default = "default_rows")]
    pub rows: u16,
}

impl Default for CreateSessionRequest {
    fn default() -> Self {
        Self {
            cwd: None,
            env: BTreeMap::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// Response confirming session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    /// Unique session identifier.
    pub session_id: String,
}

/// Keystrokes for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    /// Target session.
    pub session_id: String,
    /// Raw input, written to the terminal verbatim.
    #[serde(default)]
    pub input: String,
}

/// Request to drain buffered output. Doubles as the session heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRequest {
    /// Target session.
    pub session_id: String,
}

/// Output drained from a session since the previous poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputResponse {
    /// Concatenated output chunks; empty when the shell was idle.
    pub output: String,
}

/// Terminal resize request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    /// Target session.
    pub session_id: String,
    /// New terminal columns.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// New terminal rows.
    #[serde(default = "default_rows")]
    pub rows: u16,
}

/// Request to close a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    /// Target session. Unknown ids are accepted.
    pub session_id: String,
}

/// Generic acknowledgement body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Always `"ok"`.
    pub status: String,
}

impl StatusResponse {
    /// The acknowledgement every mutating endpoint returns on success.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Liveness report for load balancers and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the broker answers.
    pub status: String,
    /// Number of sessions in the active state.
    pub active_sessions: usize,
    /// Seconds without a drain after which a session is reaped.
    pub session_timeout_seconds: u64,
}

// ============================================================================
// Push Channel Frames
// ============================================================================

/// Frames a client sends over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Keystrokes for the session.
    Input {
        /// Raw input.
        data: String,
    },
    /// New terminal dimensions.
    Resize {
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },
}

/// Frames the broker pushes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Output produced since the previous frame.
    Output {
        /// Terminal output.
        data: String,
    },
    /// The session is gone (closed or reaped). The channel closes next.
    Closed,
    /// A request could not be served.
    Error {
        /// Machine-readable code.
        code: crate::ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl ClientFrame {
    /// Parses a text frame received from a client.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerFrame {
    /// Encodes the frame for a text message.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
