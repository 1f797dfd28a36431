//! Broker orchestrator wiring the subsystems together.
//!
//! [`BrokerOrchestrator`] owns the session manager and starts, around it, the
//! stale session reaper, the HTTP server and the local control socket. All of
//! them observe one [`CancellationToken`]; a `Stop` request on the control
//! socket cancels it just like a termination signal does.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::{self, AppState, OwnerGate};
use crate::ipc::{IpcConnection, IpcError, IpcRequest, IpcResponse, IpcServer, IpcSessionInfo};
use crate::session::{LifecycleState, ManagerSettings, PtyLauncher, Reaper, SessionManager};

/// Broker orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding listeners and spawning tasks.
    Starting,
    /// Serving requests.
    Running,
    /// Terminating sessions and waiting for tasks.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    StateChanged(OrchestratorState),
    /// The HTTP server is accepting connections.
    Listening(SocketAddr),
    Error { message: String },
}

/// Starts and stops the broker's long-running tasks.
pub struct BrokerOrchestrator {
    config: Config,
    state: Arc<RwLock<OrchestratorState>>,
    manager: Arc<SessionManager>,
    gate: OwnerGate,
    control_socket: Option<PathBuf>,
    shutdown_token: CancellationToken,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    /// HTTP server and control socket loops.
    tasks: TaskTracker,
    reaper: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    started_at: Instant,
}

impl BrokerOrchestrator {
    /// Creates an orchestrator from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        let launcher = PtyLauncher::from_config(&config.session);
        let manager = Arc::new(SessionManager::new(
            launcher,
            ManagerSettings::from_config(&config),
        ));
        let gate = OwnerGate::from_config(&config.server);

        match gate.owner() {
            Some(owner) => info!(owner = %owner, "Single-owner gate enabled"),
            None => debug!("No owner configured; all requests are allowed"),
        }

        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            manager,
            gate,
            control_socket: None,
            shutdown_token: CancellationToken::new(),
            event_tx,
            tasks: TaskTracker::new(),
            reaper: None,
            local_addr: None,
            started_at: Instant::now(),
        })
    }

    /// Also serve the control socket at `path` once started.
    pub fn with_control_socket(mut self, path: PathBuf) -> Self {
        self.control_socket = Some(path);
        self
    }

    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Address the HTTP server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Token cancelled when the broker should stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Binds the configured address and starts every subsystem.
    pub async fn start(&mut self) -> Result<()> {
        let addr = self
            .config
            .bind_addr()
            .with_context(|| format!("Invalid bind address: {}", self.config.server.bind))?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        self.start_with_listener(listener).await
    }

    /// Starts every subsystem, serving HTTP on an already bound listener.
    pub async fn start_with_listener(&mut self, listener: TcpListener) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting broker...");
        self.started_at = Instant::now();

        let control = match self.bind_control_socket().await {
            Ok(control) => control,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                return Err(e);
            }
        };

        let reaper = Reaper::new(
            Arc::clone(&self.manager),
            Duration::from_secs(self.config.reaper.interval_secs),
        );
        self.reaper = Some(reaper.spawn(self.shutdown_token.child_token()));

        let local_addr = listener.local_addr().context("Listener has no local address")?;
        self.local_addr = Some(local_addr);

        let app_state = AppState::new(Arc::clone(&self.manager), self.gate.clone());
        let token = self.shutdown_token.clone();
        let event_tx = self.event_tx.clone();
        self.tasks.spawn(async move {
            if let Err(e) = http::serve(listener, app_state, token.clone()).await {
                error!(error = %e, "HTTP server failed");
                let _ = event_tx.send(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                token.cancel();
            }
        });
        self.emit_event(OrchestratorEvent::Listening(local_addr));

        if let Some(server) = control {
            let context = ControlContext {
                manager: Arc::clone(&self.manager),
                started_at: self.started_at,
                shutdown: self.shutdown_token.clone(),
            };
            let tracker = self.tasks.clone();
            self.tasks
                .spawn(run_control_loop(server, Arc::new(context), tracker));
        }

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!(addr = %local_addr, "Broker started");
        Ok(())
    }

    async fn bind_control_socket(&self) -> Result<Option<IpcServer>> {
        let Some(path) = &self.control_socket else {
            return Ok(None);
        };
        let server = IpcServer::bind(path)
            .await
            .with_context(|| format!("Failed to bind control socket {}", path.display()))?;
        Ok(Some(server))
    }

    /// Waits until shutdown is requested.
    pub async fn wait(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// Stops every subsystem and terminates all sessions.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping broker...");
        self.shutdown_token.cancel();

        if let Some(reaper) = self.reaper.take() {
            if let Err(e) = reaper.await {
                warn!(error = %e, "Reaper task ended abnormally");
            }
        }

        self.tasks.close();
        self.tasks.wait().await;

        self.manager.shutdown().await;

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Broker stopped");
        Ok(())
    }

    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// What a control connection can reach.
struct ControlContext {
    manager: Arc<SessionManager>,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl ControlContext {
    fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Status => {
                let health = self.manager.health();
                IpcResponse::Status {
                    running: !self.shutdown.is_cancelled(),
                    uptime_secs: self.started_at.elapsed().as_secs(),
                    session_count: health.active_sessions,
                    staleness_threshold_secs: health.staleness_threshold.as_secs(),
                }
            }
            IpcRequest::Stop => {
                info!("Stop requested over control socket");
                self.shutdown.cancel();
                IpcResponse::Stopping
            }
            IpcRequest::ListSessions => IpcResponse::Sessions {
                sessions: self
                    .manager
                    .list()
                    .into_iter()
                    .map(IpcSessionInfo::from)
                    .collect(),
            },
            IpcRequest::CloseSession { session_id } => {
                let closing = self.manager.close(&session_id)
                    || self.manager.registry().state(&session_id)
                        == Some(LifecycleState::Terminating);
                if closing {
                    IpcResponse::SessionClosed { session_id }
                } else {
                    IpcResponse::Error {
                        message: format!("Session not found: {}", session_id),
                    }
                }
            }
        }
    }
}

async fn run_control_loop(server: IpcServer, context: Arc<ControlContext>, tracker: TaskTracker) {
    info!(path = %server.path().display(), "Control socket listening");

    loop {
        tokio::select! {
            _ = context.shutdown.cancelled() => break,
            accepted = server.accept() => match accepted {
                Ok(conn) => {
                    tracker.spawn(serve_connection(conn, Arc::clone(&context)));
                }
                Err(e) => warn!(error = %e, "Failed to accept control connection"),
            },
        }
    }

    debug!("Control socket closed");
}

async fn serve_connection(mut conn: IpcConnection, context: Arc<ControlContext>) {
    loop {
        let response = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            request = conn.read_request() => match request {
                Ok(Some(request)) => {
                    debug!(?request, "Control request");
                    context.handle(request)
                }
                Ok(None) => break,
                Err(IpcError::Json(e)) => IpcResponse::Error {
                    message: format!("Invalid request: {}", e),
                },
                Err(IpcError::Io(e)) => {
                    debug!(error = %e, "Control connection failed");
                    break;
                }
            },
        };

        if conn.send_response(&response).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::IpcClient;
    use crate::session::LaunchOptions;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.server.bind = "127.0.0.1:0".to_string();
        config.session.shell = "/bin/sh".to_string();
        config.session.home_fallback = temp_dir.path().to_path_buf();
        config.session.poll_interval_ms = 20;
        config.reaper.grace_period_secs = 1;
        config
    }

    async fn started(temp_dir: &TempDir) -> (BrokerOrchestrator, PathBuf) {
        let socket = temp_dir.path().join("run").join("broker.sock");
        let mut orchestrator = BrokerOrchestrator::new(test_config(temp_dir))
            .unwrap()
            .with_control_socket(socket.clone());
        orchestrator.start().await.unwrap();
        (orchestrator, socket)
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = BrokerOrchestrator::new(test_config(&temp_dir)).unwrap();

        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, socket) = started(&temp_dir).await;
        let mut events = orchestrator.subscribe();

        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        assert!(orchestrator.local_addr().is_some());
        assert!(socket.exists());

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(!socket.exists());

        let mut seen = Vec::new();
        while let Ok(OrchestratorEvent::StateChanged(state)) = events.try_recv() {
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![OrchestratorState::ShuttingDown, OrchestratorState::Stopped]
        );

        // Stopping twice is fine.
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, _socket) = started(&temp_dir).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(orchestrator.start_with_listener(listener).await.is_err());

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_control_socket_requests() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, socket) = started(&temp_dir).await;

        let mut client = IpcClient::connect(&socket).await.unwrap();
        assert!(client.ping().await.unwrap());

        let options = LaunchOptions {
            cwd: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let id = orchestrator.manager().create(options).await.unwrap();

        match client.status().await.unwrap() {
            IpcResponse::Status {
                running,
                session_count,
                staleness_threshold_secs,
                ..
            } => {
                assert!(running);
                assert_eq!(session_count, 1);
                assert_eq!(staleness_threshold_secs, 60);
            }
            other => panic!("Expected Status response, got {:?}", other),
        }

        match client.list_sessions().await.unwrap() {
            IpcResponse::Sessions { sessions } => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].id, id);
                assert_eq!(sessions[0].state, "active");
            }
            other => panic!("Expected Sessions response, got {:?}", other),
        }

        assert_eq!(
            client.close_session(id.clone()).await.unwrap(),
            IpcResponse::SessionClosed {
                session_id: id.clone()
            }
        );
        assert!(matches!(
            client.close_session("no-such-session".to_string()).await.unwrap(),
            IpcResponse::Error { .. }
        ));

        orchestrator.stop().await.unwrap();
        assert!(orchestrator.manager().registry().is_empty());
    }

    #[tokio::test]
    async fn test_stop_request_cancels_token() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, socket) = started(&temp_dir).await;

        let mut client = IpcClient::connect(&socket).await.unwrap();
        assert_eq!(client.stop().await.unwrap(), IpcResponse::Stopping);

        tokio::time::timeout(Duration::from_secs(2), orchestrator.wait())
            .await
            .unwrap();

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }
}
