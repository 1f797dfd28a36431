//! PTY master handle and session error types.
//!
//! A [`PtyHandle`] owns the master side of one pseudo-terminal. It is shared
//! between request handlers (input, resize) and the termination protocol,
//! which releases it exactly once.

use std::io::Write;
use std::sync::{Arc, Mutex};

use portable_pty::{MasterPty, PtySize};
use thiserror::Error;

use super::lock;

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The PTY could not be allocated or the shell could not be started.
    #[error("failed to launch session: {0}")]
    Launch(String),

    /// The session id is unknown, closed or already reaped.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Writing to or resizing the PTY failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The broker already runs its maximum number of sessions.
    #[error("session limit reached ({max} sessions)")]
    LimitReached {
        /// Configured maximum.
        max: usize,
    },
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

type Writer = Box<dyn Write + Send>;

/// The master side of a pseudo-terminal.
pub struct PtyHandle {
    /// The PTY master, `None` once released.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,

    /// Input side of the master, `None` once released.
    writer: Arc<Mutex<Option<Writer>>>,

    /// Current terminal size as (cols, rows).
    size: Mutex<(u16, u16)>,
}

impl PtyHandle {
    /// Wraps an opened master and its writer.
    pub fn new(master: Box<dyn MasterPty + Send>, writer: Writer, cols: u16, rows: u16) -> Self {
        Self {
            master: Mutex::new(Some(master)),
            writer: Arc::new(Mutex::new(Some(writer))),
            size: Mutex::new((cols, rows)),
        }
    }

    /// Returns the current terminal size as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        *lock(&self.size)
    }

    /// Returns whether the master has been released.
    pub fn is_closed(&self) -> bool {
        lock(&self.master).is_none()
    }

    /// Writes data to the PTY (the shell's stdin).
    ///
    /// The write runs on the blocking pool: a shell that stops reading fills
    /// the terminal's input queue and would otherwise stall the runtime.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&writer);
            let writer = guard
                .as_mut()
                .ok_or_else(|| SessionError::Io("PTY already closed".to_string()))?;
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| SessionError::Io(format!("write task failed: {}", e)))?
    }

    /// Resizes the PTY to the given dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let master = lock(&self.master);
        let master = master
            .as_ref()
            .ok_or_else(|| SessionError::Io("PTY already closed".to_string()))?;

        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Io(e.to_string()))?;

        *lock(&self.size) = (cols, rows);
        Ok(())
    }

    /// Releases the master descriptor and its writer.
    ///
    /// Returns `true` only for the call that actually released them.
    pub fn close(&self) -> bool {
        let writer = lock(&self.writer).take();
        let master = lock(&self.master).take();
        let released = master.is_some();
        drop(writer);
        drop(master);
        released
    }
}
