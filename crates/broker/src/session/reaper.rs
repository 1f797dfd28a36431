//! Stale session reaper.
//!
//! Clients prove they are still around by draining output. The reaper
//! periodically terminates sessions that have not been drained for longer
//! than the staleness threshold.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::manager::SessionManager;
use super::pty::SessionId;

/// Default time between scans.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic scan for abandoned sessions.
pub struct Reaper {
    manager: Arc<SessionManager>,
    interval: Duration,
    threshold: Duration,
}

impl Reaper {
    /// Creates a reaper using the manager's staleness threshold.
    pub fn new(manager: Arc<SessionManager>, interval: Duration) -> Self {
        let threshold = manager.settings().staleness_threshold;
        Self {
            manager,
            interval,
            threshold,
        }
    }

    /// Runs one scan and returns the ids whose termination it started.
    pub fn reap_once(&self) -> Vec<SessionId> {
        let registry = self.manager.registry();
        let now = Instant::now();

        let stale: Vec<SessionId> = registry
            .snapshot()
            .into_iter()
            .filter(|s| now.saturating_duration_since(s.last_contact) > self.threshold)
            .map(|s| s.id)
            .collect();

        let mut reaped = Vec::with_capacity(stale.len());
        for id in stale {
            // Re-checked under the lock: a drain since the snapshot wins.
            let Some(ticket) = registry.claim_stale(&id, self.threshold, Instant::now()) else {
                continue;
            };

            tracing::info!(
                session_id = %id,
                threshold_secs = self.threshold.as_secs(),
                "Reaping stale session"
            );
            self.manager.spawn_termination(ticket);
            reaped.push(id);
        }

        reaped
    }

    /// Scans every interval until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::debug!(
                interval_secs = self.interval.as_secs_f64(),
                threshold_secs = self.threshold.as_secs_f64(),
                "Reaper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Reaper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reaped = self.reap_once();
                        if !reaped.is_empty() {
                            tracing::debug!(count = reaped.len(), "Reaper tick finished");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::launcher::{LaunchOptions, PtyLauncher};
    use crate::session::manager::ManagerSettings;
    use crate::session::registry::tests::{fake_session, FakeProcess};

    fn manager(threshold: Duration) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            PtyLauncher::new("/bin/sh", "xterm-256color", "/tmp", "projects"),
            ManagerSettings {
                grace_period: Duration::from_millis(20),
                staleness_threshold: threshold,
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_reap_once_terminates_stale_sessions() {
        let manager = manager(Duration::from_millis(50));
        let stale = manager
            .registry()
            .insert(fake_session(Arc::new(FakeProcess::cooperative())));
        let reaper = Reaper::new(Arc::clone(&manager), DEFAULT_INTERVAL);

        assert!(reaper.reap_once().is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let fresh = manager
            .registry()
            .insert(fake_session(Arc::new(FakeProcess::cooperative())));

        let reaped = reaper.reap_once();
        assert_eq!(reaped, vec![stale.clone()]);
        assert!(!manager.registry().is_active(&stale));
        assert!(manager.registry().is_active(&fresh));

        manager.shutdown().await;
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_drained_session_survives() {
        let manager = manager(Duration::from_millis(200));
        let id = manager
            .registry()
            .insert(fake_session(Arc::new(FakeProcess::cooperative())));
        let reaper = Reaper::new(Arc::clone(&manager), DEFAULT_INTERVAL);

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            manager.drain_output(&id).unwrap();
            assert!(reaper.reap_once().is_empty());
        }
        assert!(manager.registry().is_active(&id));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawned_reaper_removes_real_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Duration::from_millis(100));
        let id = manager
            .create(LaunchOptions {
                cwd: Some(dir.path().to_path_buf()),
                ..Default::default()
            })
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle =
            Reaper::new(Arc::clone(&manager), Duration::from_millis(50)).spawn(shutdown.clone());

        let mut removed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if manager.registry().state(&id).is_none() {
                removed = true;
                break;
            }
        }
        assert!(removed, "stale session was not reaped");
        assert_eq!(manager.health().active_sessions, 0);

        shutdown.cancel();
        handle.await.unwrap();
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancel() {
        let manager = manager(Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        let handle = Reaper::new(manager, Duration::from_millis(10)).spawn(shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
