//! # ptyhub Protocol Library
//!
//! Wire types shared by the ptyhub broker and its clients.
//!
//! ## Overview
//!
//! The broker exposes the same five session operations over two bindings:
//!
//! - **Polling**: JSON request/response bodies ([`messages`]) posted to
//!   `/api/session`, `/api/input`, `/api/output`, `/api/resize`.
//! - **Push channel**: a WebSocket carrying tagged [`ClientFrame`] and
//!   [`ServerFrame`] text messages.
//!
//! Failures in either binding carry an [`ErrorCode`].
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientFrame, ServerFrame};
//!
//! let frame = ClientFrame::from_json(r#"{"type":"input","data":"ls\n"}"#).unwrap();
//! assert_eq!(frame, ClientFrame::Input { data: "ls\n".to_string() });
//!
//! let text = ServerFrame::Closed.to_json().unwrap();
//! assert_eq!(text, r#"{"type":"closed"}"#);
//! ```

pub mod error;
pub mod messages;

pub use error::{ErrorBody, ErrorCode, ProtocolError, Result};
pub use messages::{
    ClientFrame, CloseSessionRequest, CreateSessionRequest, CreateSessionResponse,
    HealthResponse, InputRequest, OutputRequest, OutputResponse, ResizeRequest, ServerFrame,
    StatusResponse, DEFAULT_COLS, DEFAULT_ROWS, PROTOCOL_VERSION,
};
