//! Session lifecycle controller.
//!
//! [`SessionManager`] is the one entry point for every client-facing session
//! operation. It launches shells, registers them, starts their output pumps
//! and drives termination. Transport bindings (HTTP, WebSocket, control
//! socket) hold it behind an `Arc` and never touch the registry directly.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio_util::task::TaskTracker;

use super::launcher::{LaunchOptions, LaunchedSession, PtyLauncher};
use super::process::ProcessControl;
use super::pty::{SessionError, SessionId};
use super::pump::{self, PumpConfig};
use super::registry::{LifecycleState, Session, SessionRegistry, TerminationTicket};
use super::termination::{self, DEFAULT_GRACE_PERIOD};
use crate::config::Config;

/// Tunables for the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Maximum number of active sessions.
    pub max_sessions: usize,
    /// Output buffer capacity, in chunks.
    pub buffer_chunks: usize,
    /// Output pump tuning.
    pub pump: PumpConfig,
    /// Time between hangup and kill.
    pub grace_period: Duration,
    /// Idle time after which the reaper terminates a session.
    pub staleness_threshold: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 128,
            buffer_chunks: 1000,
            pump: PumpConfig::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
            staleness_threshold: Duration::from_secs(60),
        }
    }
}

impl ManagerSettings {
    /// Builds settings from the `[session]` and `[reaper]` sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_sessions: config.session.max_sessions,
            buffer_chunks: config.session.buffer_chunks,
            pump: PumpConfig {
                poll_interval: Duration::from_millis(config.session.poll_interval_ms),
                chunk_size: config.session.read_chunk_size,
            },
            grace_period: Duration::from_secs(config.reaper.grace_period_secs),
            staleness_threshold: Duration::from_secs(config.reaper.staleness_timeout_secs),
        }
    }
}

/// Result of a health query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub active_sessions: usize,
    pub staleness_threshold: Duration,
}

/// Information about a session, for listings.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Process ID of the shell.
    pub pid: Option<u32>,
    /// Current terminal columns.
    pub cols: u16,
    /// Current terminal rows.
    pub rows: u16,
    /// When the session was created.
    pub created_at: SystemTime,
    /// Time since the last output drain.
    pub idle: Duration,
    /// Lifecycle state.
    pub state: LifecycleState,
}

/// Creates, drives and terminates shell sessions.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    launcher: PtyLauncher,
    settings: ManagerSettings,
    /// Pump and termination tasks, awaited on shutdown.
    tasks: TaskTracker,
}

impl SessionManager {
    /// Creates a manager with its own empty registry.
    pub fn new(launcher: PtyLauncher, settings: ManagerSettings) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            launcher,
            settings,
            tasks: TaskTracker::new(),
        }
    }

    /// Returns the registry this manager owns.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Launches a shell and registers it as a new active session.
    pub async fn create(&self, options: LaunchOptions) -> Result<SessionId, SessionError> {
        let max = self.settings.max_sessions;
        if self.registry.active_count() >= max {
            return Err(SessionError::LimitReached { max });
        }

        let launcher = self.launcher.clone();
        let LaunchedSession {
            pty,
            reader,
            process,
        } = tokio::task::spawn_blocking(move || launcher.launch(options))
            .await
            .map_err(|e| SessionError::Launch(format!("launch task failed: {}", e)))??;

        let pid = process.pid();
        let (cols, rows) = pty.size();
        let session = Session::new(Arc::new(pty), Arc::new(process), self.settings.buffer_chunks);

        // Another create may have taken the last slot while this one launched.
        let id = match self.registry.try_insert(session, max) {
            Ok(id) => id,
            Err(session) => {
                drop(reader);
                let (pty, process) = session.into_parts();
                let grace = self.settings.grace_period;
                self.tasks
                    .spawn(async move { termination::release(&pty, process, grace).await });
                tracing::warn!(max_sessions = max, "Session limit reached, discarding shell");
                return Err(SessionError::LimitReached { max });
            }
        };

        self.tasks.spawn(pump::run(
            Arc::clone(&self.registry),
            id.clone(),
            reader,
            self.settings.pump,
        ));

        tracing::info!(
            session_id = %id,
            pid = ?pid,
            cols = cols,
            rows = rows,
            "Created new session"
        );

        Ok(id)
    }

    /// Writes client input to a session's terminal.
    ///
    /// A failed write leaves the session in place.
    pub async fn send_input(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let pty = self.registry.pty(id)?;
        pty.write(data).await.inspect_err(|e| {
            tracing::debug!(session_id = %id, error = %e, "Input write failed");
        })
    }

    /// Returns and clears a session's buffered output. Counts as client
    /// contact for the reaper.
    pub fn drain_output(&self, id: &str) -> Result<String, SessionError> {
        self.registry.drain(id)
    }

    /// Changes a session's terminal size.
    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let pty = self.registry.pty(id)?;
        pty.resize(cols, rows)?;

        tracing::debug!(session_id = %id, cols = cols, rows = rows, "Resized PTY");
        Ok(())
    }

    /// Starts terminating a session.
    ///
    /// The session disappears from client operations immediately; the
    /// termination protocol finishes in the background. Returns `false` for
    /// unknown or already terminating sessions, which callers treat as
    /// success.
    pub fn close(&self, id: &str) -> bool {
        match self.registry.begin_termination(id) {
            Some(ticket) => {
                tracing::info!(session_id = %id, "Closing session");
                self.spawn_termination(ticket);
                true
            }
            None => false,
        }
    }

    /// Runs the termination protocol for a claimed session on its own task.
    pub fn spawn_termination(&self, ticket: TerminationTicket) {
        let registry = Arc::clone(&self.registry);
        let grace = self.settings.grace_period;
        self.tasks
            .spawn(async move { termination::terminate(&registry, ticket, grace).await });
    }

    /// Active session count and staleness threshold.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            active_sessions: self.registry.active_count(),
            staleness_threshold: self.settings.staleness_threshold,
        }
    }

    /// Lists every registered session, terminating ones included.
    pub fn list(&self) -> Vec<SessionInfo> {
        let now = Instant::now();
        let mut sessions: Vec<SessionInfo> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|s| SessionInfo {
                id: s.id,
                pid: s.pid,
                cols: s.cols,
                rows: s.rows,
                created_at: s.created_at,
                idle: now.saturating_duration_since(s.last_contact),
                state: s.state,
            })
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Terminates every session and waits for all background work to end.
    pub async fn shutdown(&self) {
        let ids = self.registry.active_ids();
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Terminating remaining sessions");
        }
        for id in ids {
            self.close(&id);
        }

        self.tasks.close();
        self.tasks.wait().await;
        tracing::debug!("All session tasks finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_manager(max_sessions: usize) -> SessionManager {
        let launcher = PtyLauncher::new("/bin/sh", "xterm-256color", "/tmp", "projects");
        SessionManager::new(
            launcher,
            ManagerSettings {
                max_sessions,
                pump: PumpConfig {
                    poll_interval: Duration::from_millis(20),
                    chunk_size: 4096,
                },
                grace_period: Duration::from_millis(100),
                ..Default::default()
            },
        )
    }

    fn options(dir: &TempDir) -> LaunchOptions {
        LaunchOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    async fn wait_for_output(manager: &SessionManager, id: &str, needle: &str) -> String {
        let mut collected = String::new();
        for _ in 0..100 {
            collected.push_str(&manager.drain_output(id).unwrap());
            if collected.contains(needle) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        collected
    }

    async fn wait_until_removed(manager: &SessionManager, id: &str) {
        for _ in 0..100 {
            if manager.registry().state(id).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {} was not removed", id);
    }

    #[tokio::test]
    async fn test_manager_create_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(8);

        let id = manager.create(options(&dir)).await.unwrap();
        assert!(!id.is_empty());
        assert!(manager.registry().is_active(&id));
        assert_eq!(manager.health().active_sessions, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_manager_echo_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(8);
        let id = manager.create(options(&dir)).await.unwrap();

        manager
            .send_input(&id, b"echo roundtrip_$((20+22))\n")
            .await
            .unwrap();

        let output = wait_for_output(&manager, &id, "roundtrip_42").await;
        assert!(output.contains("roundtrip_42"), "output: {:?}", output);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_manager_unknown_session() {
        let manager = test_manager(8);

        let result = manager.send_input("nonexistent", b"hello").await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
        assert!(matches!(
            manager.drain_output("nonexistent"),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            manager.resize("nonexistent", 100, 40),
            Err(SessionError::NotFound(_))
        ));
        assert!(!manager.close("nonexistent"));
    }

    #[tokio::test]
    async fn test_manager_resize() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(8);
        let id = manager.create(options(&dir)).await.unwrap();

        manager.resize(&id, 120, 40).unwrap();

        let info = manager.list().into_iter().find(|s| s.id == id).unwrap();
        assert_eq!((info.cols, info.rows), (120, 40));
        assert_eq!(info.state, LifecycleState::Active);
        assert!(info.pid.is_some());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_manager_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(8);
        let id = manager.create(options(&dir)).await.unwrap();

        assert!(manager.close(&id));
        assert!(!manager.close(&id));

        // Hidden from clients at once.
        assert!(matches!(
            manager.send_input(&id, b"ls\n").await,
            Err(SessionError::NotFound(_))
        ));
        assert_eq!(manager.health().active_sessions, 0);

        wait_until_removed(&manager, &id).await;
        assert!(!manager.close(&id));
    }

    #[tokio::test]
    async fn test_manager_close_kills_shell_ignoring_hangup() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(8);
        let id = manager.create(options(&dir)).await.unwrap();

        manager
            .send_input(&id, b"trap '' HUP; echo trapped\n")
            .await
            .unwrap();
        wait_for_output(&manager, &id, "trapped").await;

        manager.close(&id);
        wait_until_removed(&manager, &id).await;
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_manager_limit_reached() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(1);

        manager.create(options(&dir)).await.unwrap();
        let result = manager.create(options(&dir)).await;
        assert!(matches!(
            result,
            Err(SessionError::LimitReached { max: 1 })
        ));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_manager_launch_failure_registers_nothing() {
        let manager = SessionManager::new(
            PtyLauncher::new("/nonexistent/shell", "xterm", "/tmp", "projects"),
            ManagerSettings::default(),
        );
        let dir = tempfile::tempdir().unwrap();

        let result = manager.create(options(&dir)).await;
        assert!(matches!(result, Err(SessionError::Launch(_))));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_manager_list_sorted_by_creation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(8);

        let first = manager.create(options(&dir)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = manager.create(options(&dir)).await.unwrap();

        let ids: Vec<_> = manager.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first, second]);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_manager_shutdown_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(8);
        for _ in 0..3 {
            manager.create(options(&dir)).await.unwrap();
        }
        assert_eq!(manager.health().active_sessions, 3);

        manager.shutdown().await;
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.session.max_sessions = 7;
        config.session.poll_interval_ms = 250;
        config.reaper.grace_period_secs = 1;
        config.reaper.staleness_timeout_secs = 90;

        let settings = ManagerSettings::from_config(&config);
        assert_eq!(settings.max_sessions, 7);
        assert_eq!(settings.pump.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.grace_period, Duration::from_secs(1));
        assert_eq!(settings.staleness_threshold, Duration::from_secs(90));
    }
}
