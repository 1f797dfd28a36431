//! PID file handling for running-broker detection.
//!
//! The PID file lives at:
//! - `$XDG_DATA_HOME/ptyhub/broker.pid` if XDG_DATA_HOME is set
//! - `~/.local/share/ptyhub/broker.pid` otherwise
//!
//! ```rust
//! use broker::ipc::pidfile::{broker_pid, pid_file_path};
//!
//! if let Some(pid) = broker_pid(&pid_file_path()) {
//!     println!("Broker is already running with PID {}", pid);
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Default location of the broker PID file.
pub fn pid_file_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        });
    data_dir.join("ptyhub").join("broker.pid")
}

/// Record the current process as the running broker.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", std::process::id()))
}

/// Remove the PID file if it still names the current process.
pub fn remove_pid_file(path: &Path) {
    let ours = fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        == Some(std::process::id());
    if ours {
        let _ = fs::remove_file(path);
    }
}

/// The PID of the running broker, if any.
///
/// A PID file naming a dead process, or holding garbage, is removed.
pub fn broker_pid(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;

    match contents.trim().parse::<u32>() {
        Ok(pid) if is_process_running(pid) => Some(pid),
        _ => {
            let _ = fs::remove_file(path);
            None
        }
    }
}

pub fn is_broker_running(path: &Path) -> bool {
    broker_pid(path).is_some()
}

/// Signal 0 checks for existence without delivering anything.
fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else.
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
