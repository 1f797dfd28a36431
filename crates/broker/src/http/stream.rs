//! WebSocket push channel.
//!
//! Instead of polling `/api/output`, a client may open
//! `/api/stream/{session_id}`. The server drains the session once per pump
//! poll interval and pushes non-empty output as `output` frames. Every drain
//! counts as client contact, so an open channel keeps its session alive.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use protocol::{ClientFrame, ErrorCode, ServerFrame};
use tokio::time::MissedTickBehavior;

use super::AppState;
use crate::session::SessionError;

type Sender = SplitSink<WebSocket, Message>;

/// GET /api/stream/{session_id}
pub async fn stream_session(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| run_stream(socket, state, session_id))
}

/// What the connection loop does after handling one event.
enum Flow {
    Continue,
    Stop,
}

async fn run_stream(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let (mut sender, mut receiver) = socket.split();

    if !state.manager.registry().is_active(&session_id) {
        let frame = ServerFrame::Error {
            code: ErrorCode::SessionNotFound,
            message: SessionError::NotFound(session_id.clone()).to_string(),
        };
        let _ = send_frame(&mut sender, &frame).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    tracing::debug!(session_id = %session_id, "Push channel opened");

    let mut ticker = tokio::time::interval(state.manager.settings().pump.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let flow = tokio::select! {
            _ = ticker.tick() => push_output(&state, &session_id, &mut sender).await,
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&state, &session_id, text.as_str(), &mut sender).await
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => Flow::Stop,
                Some(Ok(_)) => Flow::Continue,
            },
        };

        if let Flow::Stop = flow {
            break;
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    tracing::debug!(session_id = %session_id, "Push channel closed");
}

async fn push_output(state: &AppState, session_id: &str, sender: &mut Sender) -> Flow {
    match state.manager.drain_output(session_id) {
        Ok(output) if output.is_empty() => Flow::Continue,
        Ok(output) => send_frame(sender, &ServerFrame::Output { data: output }).await,
        Err(_) => {
            let _ = send_frame(sender, &ServerFrame::Closed).await;
            Flow::Stop
        }
    }
}

async fn handle_client_frame(
    state: &AppState,
    session_id: &str,
    text: &str,
    sender: &mut Sender,
) -> Flow {
    let frame = match ClientFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            let error = ServerFrame::Error {
                code: ErrorCode::InvalidRequest,
                message: e.to_string(),
            };
            return send_frame(sender, &error).await;
        }
    };

    let result = match frame {
        ClientFrame::Input { data } => state.manager.send_input(session_id, data.as_bytes()).await,
        ClientFrame::Resize { cols, rows } => state.manager.resize(session_id, cols, rows),
    };

    match result {
        Ok(()) => Flow::Continue,
        Err(SessionError::NotFound(_)) => {
            let _ = send_frame(sender, &ServerFrame::Closed).await;
            Flow::Stop
        }
        Err(e) => {
            let error = ServerFrame::Error {
                code: ErrorCode::IoError,
                message: e.to_string(),
            };
            send_frame(sender, &error).await
        }
    }
}

async fn send_frame(sender: &mut Sender, frame: &ServerFrame) -> Flow {
    let text = match frame.to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server frame");
            return Flow::Continue;
        }
    };

    match sender.send(Message::Text(text.into())).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Stop,
    }
}
