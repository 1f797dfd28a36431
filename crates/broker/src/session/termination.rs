//! Session termination protocol.
//!
//! 1. Hangup to the shell's process group.
//! 2. Wait the grace period.
//! 3. Kill the group if the shell is still alive, then reap it.
//! 4. Release the PTY master.
//! 5. Remove the session from the registry.
//!
//! Every step is best-effort. Failures are logged at debug level and the
//! protocol carries on, so a session always ends up removed.

use std::sync::Arc;
use std::time::Duration;

use super::process::{ProcessControl, TermSignal};
use super::pty::PtyHandle;
use super::registry::{SessionRegistry, TerminationTicket};

/// Default time a shell gets to exit after the hangup.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Runs the full protocol for a session claimed through a ticket.
pub async fn terminate(registry: &SessionRegistry, ticket: TerminationTicket, grace: Duration) {
    let TerminationTicket { id, pty, process } = ticket;

    tracing::debug!(session_id = %id, pid = ?process.pid(), "Terminating session");
    release(&pty, process, grace).await;

    if let Some(session) = registry.remove(&id) {
        tracing::info!(session_id = %id, state = %session.state(), "Session terminated");
    }
}

/// Steps 1 to 4: stop the process and release the PTY.
///
/// Also used for shells that were launched but never registered.
pub async fn release(pty: &PtyHandle, process: Arc<dyn ProcessControl>, grace: Duration) {
    if let Err(e) = process.signal(TermSignal::Hangup) {
        tracing::debug!(pid = ?process.pid(), error = %e, "Hangup failed");
    }

    tokio::time::sleep(grace).await;

    if process.is_alive() {
        tracing::debug!(pid = ?process.pid(), "Shell ignored hangup, killing");
        if let Err(e) = process.signal(TermSignal::Kill) {
            tracing::debug!(pid = ?process.pid(), error = %e, "Kill failed");
        }
    }

    let reaper = Arc::clone(&process);
    if let Err(e) = tokio::task::spawn_blocking(move || reaper.reap()).await {
        tracing::debug!(pid = ?process.pid(), error = %e, "Reap task failed");
    }

    if !pty.close() {
        tracing::debug!(pid = ?process.pid(), "PTY already released");
    }
}
