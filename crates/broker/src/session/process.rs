//! Shell process control.
//!
//! The termination protocol only talks to processes through
//! [`ProcessControl`], so it can be exercised against a fake in tests.

use std::sync::Mutex;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::Child;

use super::lock;
use super::pty::SessionError;

/// How long [`ShellProcess::reap`] keeps polling for the exit status.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll step while reaping.
const REAP_STEP: Duration = Duration::from_millis(10);

/// Signals used by the termination protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// Cooperative hangup (SIGHUP).
    Hangup,
    /// Unconditional kill (SIGKILL).
    Kill,
}

impl From<TermSignal> for Signal {
    fn from(signal: TermSignal) -> Self {
        match signal {
            TermSignal::Hangup => Signal::SIGHUP,
            TermSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// Operations the termination protocol needs from a session's process.
pub trait ProcessControl: Send + Sync {
    /// Process id of the shell, if known.
    fn pid(&self) -> Option<u32>;

    /// Delivers `signal` to the shell's process group.
    fn signal(&self, signal: TermSignal) -> Result<(), SessionError>;

    /// Returns whether the shell has not exited yet.
    fn is_alive(&self) -> bool;

    /// Collects the exit status so no zombie is left behind. Best-effort and
    /// bounded in time; may block briefly.
    fn reap(&self);
}

/// A shell started by the launcher.
///
/// The shell is the leader of its own session and process group, so its pid
/// doubles as the process group id.
pub struct ShellProcess {
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
}

impl ShellProcess {
    /// Wraps a spawned child.
    pub fn new(child: Box<dyn Child + Send + Sync>) -> Self {
        let pid = child.process_id();
        Self {
            child: Mutex::new(child),
            pid,
        }
    }

    fn process_group(&self) -> Result<Pid, SessionError> {
        match self.pid {
            Some(pid) if pid > 0 && pid <= i32::MAX as u32 => Ok(Pid::from_raw(pid as i32)),
            Some(pid) => Err(SessionError::Io(format!("invalid process id {}", pid))),
            None => Err(SessionError::Io("process id unavailable".to_string())),
        }
    }
}

impl ProcessControl for ShellProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn signal(&self, signal: TermSignal) -> Result<(), SessionError> {
        // A reaped pid may already belong to someone else.
        if !self.is_alive() {
            return Ok(());
        }

        let group = self.process_group()?;
        killpg(group, Signal::from(signal)).map_err(|e| SessionError::Io(e.to_string()))
    }

    fn is_alive(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    fn reap(&self) {
        let deadline = std::time::Instant::now() + REAP_TIMEOUT;
        while self.is_alive() && std::time::Instant::now() < deadline {
            std::thread::sleep(REAP_STEP);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_pty::{native_pty_system, CommandBuilder, PtySize};

    fn spawn_shell() -> ShellProcess {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .unwrap();
        let child = pair.slave.spawn_command(CommandBuilder::new("/bin/sh")).unwrap();
        // The master must outlive the child or the shell gets a hangup first.
        std::mem::forget(pair.master);
        ShellProcess::new(child)
    }

    #[test]
    fn test_signal_mapping() {
        assert_eq!(Signal::from(TermSignal::Hangup), Signal::SIGHUP);
        assert_eq!(Signal::from(TermSignal::Kill), Signal::SIGKILL);
    }

    #[test]
    fn test_spawned_shell_is_alive() {
        let process = spawn_shell();
        assert!(process.pid().is_some());
        assert!(process.is_alive());

        process.signal(TermSignal::Kill).unwrap();
        process.reap();
        assert!(!process.is_alive());
    }

    #[test]
    fn test_signal_after_exit_is_noop() {
        let process = spawn_shell();
        process.signal(TermSignal::Kill).unwrap();
        process.reap();

        assert!(process.signal(TermSignal::Hangup).is_ok());
        assert!(process.signal(TermSignal::Kill).is_ok());
    }
}
