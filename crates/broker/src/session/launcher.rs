//! Pseudo-terminal launcher.
//!
//! Opens a PTY pair and starts the configured shell on its slave side. The
//! shell becomes a session leader (and so the leader of its own process
//! group), which lets the termination protocol signal everything it started.

use std::fs::File;
use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use super::process::{ProcessControl, ShellProcess};
use super::pty::{PtyHandle, SessionError};
use crate::config::SessionConfig;

/// Per-launch parameters supplied by the caller.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Working directory. Defaults to `$HOME/<workspace_dir>`.
    pub cwd: Option<PathBuf>,
    /// Environment overrides, applied after the broker's own variables.
    pub env: Vec<(String, String)>,
    /// Initial terminal columns.
    pub cols: u16,
    /// Initial terminal rows.
    pub rows: u16,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            cols: protocol::DEFAULT_COLS,
            rows: protocol::DEFAULT_ROWS,
        }
    }
}

/// Everything a freshly launched session consists of.
pub struct LaunchedSession {
    /// The PTY master, used for input and resize.
    pub pty: PtyHandle,
    /// A dedicated read descriptor on the master for the output pump.
    pub reader: File,
    /// The shell process.
    pub process: ShellProcess,
}

/// Starts shells attached to fresh pseudo-terminals.
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    shell: String,
    term: String,
    home_fallback: PathBuf,
    workspace_dir: PathBuf,
}

impl PtyLauncher {
    /// Creates a launcher.
    pub fn new(
        shell: impl Into<String>,
        term: impl Into<String>,
        home_fallback: impl Into<PathBuf>,
        workspace_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            shell: shell.into(),
            term: term.into(),
            home_fallback: home_fallback.into(),
            workspace_dir: workspace_dir.into(),
        }
    }

    /// Creates a launcher from the `[session]` configuration section.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.shell.clone(),
            config.term.clone(),
            config.home_fallback.clone(),
            config.workspace_dir.clone(),
        )
    }

    /// Returns the shell command this launcher starts.
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Allocates a PTY and starts the shell on it.
    ///
    /// This blocks (fork/exec, directory creation) and should run on the
    /// blocking pool. Nothing is left running when it fails.
    pub fn launch(&self, options: LaunchOptions) -> Result<LaunchedSession, SessionError> {
        let home = resolve_home(std::env::var("HOME").ok().as_deref(), &self.home_fallback);
        let cwd = options
            .cwd
            .unwrap_or_else(|| home.join(&self.workspace_dir));

        std::fs::create_dir_all(&cwd).map_err(|e| {
            SessionError::Launch(format!(
                "failed to create working directory {}: {}",
                cwd.display(),
                e
            ))
        })?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        // Both descriptors are taken before the shell exists so a failure
        // here has nothing to clean up.
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        let reader = clone_read_descriptor(pair.master.as_ref())?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.cwd(&cwd);
        let inherited_path = std::env::var("PATH").ok();
        for (key, value) in shell_environment(&home, &self.term, inherited_path.as_deref()) {
            cmd.env(key, value);
        }
        for (key, value) in options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Launch(format!("failed to start {}: {}", self.shell, e)))?;

        // The shell holds its own copy of the slave.
        drop(pair.slave);

        let process = ShellProcess::new(child);
        tracing::debug!(
            shell = %self.shell,
            cwd = %cwd.display(),
            pid = ?process.pid(),
            "Launched shell"
        );

        Ok(LaunchedSession {
            pty: PtyHandle::new(pair.master, writer, options.cols, options.rows),
            reader,
            process,
        })
    }
}

/// Duplicates the master descriptor for the output pump.
fn clone_read_descriptor(master: &dyn MasterPty) -> Result<File, SessionError> {
    let fd = master
        .as_raw_fd()
        .ok_or_else(|| SessionError::Launch("PTY master has no file descriptor".to_string()))?;

    // SAFETY: `fd` is owned by `master`, which outlives this borrow.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let owned = borrowed
        .try_clone_to_owned()
        .map_err(|e| SessionError::Launch(format!("failed to duplicate PTY master: {}", e)))?;

    Ok(File::from(owned))
}

/// Picks the shell's `HOME`: the service's own unless it is unset, empty or `/`.
pub fn resolve_home(home: Option<&str>, fallback: &Path) -> PathBuf {
    match home {
        Some(home) if !home.is_empty() && home != "/" => PathBuf::from(home),
        _ => fallback.to_path_buf(),
    }
}

/// Variables the broker sets on top of the inherited environment.
pub fn shell_environment(home: &Path, term: &str, path: Option<&str>) -> Vec<(String, String)> {
    let local_bin = home.join(".local").join("bin");
    let path = match path {
        Some(path) if !path.is_empty() => format!("{}:{}", local_bin.display(), path),
        _ => local_bin.display().to_string(),
    };

    vec![
        ("TERM".to_string(), term.to_string()),
        ("HOME".to_string(), home.display().to_string()),
        ("PATH".to_string(), path),
    ]
}
