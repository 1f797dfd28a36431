//! Session management module.
//!
//! This module provides PTY launching, the session registry, the per-session
//! output pump, the termination protocol and the stale-session reaper.
//! Sessions can be created, written to, drained, resized and closed.

pub mod buffer;
pub mod launcher;
pub mod manager;
pub mod process;
pub mod pty;
pub mod pump;
pub mod reaper;
pub mod registry;
pub mod termination;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use buffer::OutputBuffer;
pub use launcher::{LaunchOptions, LaunchedSession, PtyLauncher};
pub use manager::{HealthReport, ManagerSettings, SessionInfo, SessionManager};
pub use process::{ProcessControl, ShellProcess, TermSignal};
pub use pty::{PtyHandle, SessionError, SessionId};
pub use pump::PumpConfig;
pub use reaper::Reaper;
pub use registry::{LifecycleState, Session, SessionRegistry, SessionSnapshot, TerminationTicket};

/// Locks a std mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this module is a handful of field updates, so
/// the data behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
