//! ptyhub broker
//!
//! Serves shell sessions on pseudo-terminals to remote clients.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use broker::config::Config;
use broker::ipc::pidfile::{remove_pid_file, write_pid_file};
use broker::ipc::{broker_pid, pid_file_path, socket_path, IpcClient, IpcResponse, IpcSessionInfo};
use broker::logging;
use broker::orchestrator::{BrokerOrchestrator, OrchestratorEvent};
use clap::{Parser, Subcommand};

/// ptyhub - pseudo-terminal session broker.
#[derive(Parser, Debug)]
#[command(name = "ptyhub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the broker in the foreground
    Serve {
        /// Address to listen on, overriding the configuration
        #[arg(long, short, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Stop the running broker
    Stop {
        /// Seconds to wait for the broker to exit
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show broker status
    Status,

    /// Manage sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List all sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Close a session
    Close {
        /// Session ID to close
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    let overrides = config.apply_env_overrides();
    if let Commands::Serve { bind: Some(bind) } = &cli.command {
        config.server.bind = bind.clone();
    }
    config.validate().context("Invalid configuration")?;

    let _log_guard = logging::init(
        &config.daemon.log_level,
        cli.verbose,
        config.daemon.log_dir.as_deref(),
    )?;

    if let Some(path) = &cli.config {
        tracing::debug!(path = %path.display(), "Using config file");
    }
    for applied in &overrides {
        tracing::info!(setting = applied.setting, value = %applied.value, "Overriding setting from environment");
    }

    match cli.command {
        Commands::Serve { .. } => serve(config).await,
        Commands::Stop { timeout } => {
            graceful_stop_broker(timeout).await?;
            println!("Broker stopped successfully");
            Ok(())
        }
        Commands::Status => {
            let status = query_status().await?;
            println!(
                "Broker Status: {}",
                if status.running { "running" } else { "stopping" }
            );
            println!("  Uptime:    {}", format_duration(status.uptime_secs));
            println!("  Sessions:  {}", status.session_count);
            println!(
                "  Idle timeout: {}",
                format_duration(status.staleness_threshold_secs)
            );
            Ok(())
        }
        Commands::Sessions(SessionsCommands::List { json }) => {
            let sessions = query_sessions_list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print_sessions_table(&sessions);
            }
            Ok(())
        }
        Commands::Sessions(SessionsCommands::Close { session_id }) => {
            close_session(&session_id).await?;
            println!("Session {} is closing", session_id);
            Ok(())
        }
    }
}

/// Runs the broker until a termination signal or a `Stop` request.
async fn serve(config: Config) -> anyhow::Result<()> {
    let pid_path = pid_file_path();
    if let Some(pid) = broker_pid(&pid_path) {
        eprintln!("To stop the existing broker, run:");
        eprintln!("  ptyhub stop");
        anyhow::bail!("Broker already running (PID: {})", pid);
    }
    write_pid_file(&pid_path)
        .with_context(|| format!("Failed to write PID file {}", pid_path.display()))?;

    let result = run_foreground(config).await;
    remove_pid_file(&pid_path);
    result
}

async fn run_foreground(config: Config) -> anyhow::Result<()> {
    let mut orchestrator = BrokerOrchestrator::new(config)?.with_control_socket(socket_path());

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::debug!(?state, "Broker state changed");
                }
                OrchestratorEvent::Listening(addr) => {
                    tracing::info!(%addr, "Accepting sessions");
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!(error = %message, "Broker error");
                }
            }
        }
    });

    orchestrator.start().await?;

    tokio::select! {
        signal = wait_for_shutdown_signal() => signal?,
        _ = orchestrator.wait() => tracing::info!("Shutdown requested"),
    }

    orchestrator.stop().await
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    Ok(())
}

async fn connect() -> anyhow::Result<IpcClient> {
    IpcClient::connect_with_timeout(&socket_path(), Duration::from_secs(5))
        .await
        .context("Broker is not running (cannot connect to control socket)")
}

struct BrokerStatus {
    running: bool,
    uptime_secs: u64,
    session_count: usize,
    staleness_threshold_secs: u64,
}

async fn query_status() -> anyhow::Result<BrokerStatus> {
    let mut client = connect().await?;
    match client.status().await.context("Failed to query status")? {
        IpcResponse::Status {
            running,
            uptime_secs,
            session_count,
            staleness_threshold_secs,
        } => Ok(BrokerStatus {
            running,
            uptime_secs,
            session_count,
            staleness_threshold_secs,
        }),
        IpcResponse::Error { message } => anyhow::bail!("Broker returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from broker"),
    }
}

async fn query_sessions_list() -> anyhow::Result<Vec<IpcSessionInfo>> {
    let mut client = connect().await?;
    match client
        .list_sessions()
        .await
        .context("Failed to query sessions")?
    {
        IpcResponse::Sessions { sessions } => Ok(sessions),
        IpcResponse::Error { message } => anyhow::bail!("Broker returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from broker"),
    }
}

async fn close_session(session_id: &str) -> anyhow::Result<()> {
    let mut client = connect().await?;
    match client
        .close_session(session_id.to_string())
        .await
        .context("Failed to send close request")?
    {
        IpcResponse::SessionClosed { .. } => Ok(()),
        IpcResponse::Error { message } => anyhow::bail!("{}", message),
        _ => anyhow::bail!("Unexpected response from broker"),
    }
}

/// Sends `Stop` and waits for the control socket to go away.
async fn graceful_stop_broker(timeout_secs: u64) -> anyhow::Result<()> {
    let socket_path = socket_path();
    let mut client = connect().await?;

    println!("Sending shutdown request...");
    match client.stop().await.context("Failed to send stop request")? {
        IpcResponse::Stopping => println!("Shutdown acknowledged, waiting for broker to exit..."),
        IpcResponse::Error { message } => anyhow::bail!("Broker returned error: {}", message),
        _ => anyhow::bail!("Unexpected response from broker"),
    }
    drop(client);

    let timeout = Duration::from_secs(timeout_secs);
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if !socket_path.exists()
            || IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
                .await
                .is_err()
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    anyhow::bail!("Timeout waiting for broker to exit ({}s)", timeout_secs)
}

fn print_sessions_table(sessions: &[IpcSessionInfo]) {
    if sessions.is_empty() {
        println!("No active sessions.");
        return;
    }

    let id_width = sessions.iter().map(|s| s.id.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<id_width$}  {:>8}  {:>9}  {:<11}  {:>8}  {:>10}",
        "ID", "PID", "SIZE", "STATE", "IDLE", "CREATED"
    );
    println!("{}", "-".repeat(id_width + 58));

    for session in sessions {
        let pid = session
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<id_width$}  {:>8}  {:>9}  {:<11}  {:>8}  {:>10}",
            truncate_str(&session.id, id_width),
            pid,
            format!("{}x{}", session.cols, session.rows),
            session.state,
            format_duration(session.idle_secs),
            format_relative_time(session.created_at),
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
}

/// Format a Unix timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let elapsed = now.saturating_sub(timestamp);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::try_parse_from(["ptyhub", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { bind } => assert!(bind.is_none()),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_bind() {
        let cli = Cli::try_parse_from(["ptyhub", "serve", "--bind", "127.0.0.1:9000"]).unwrap();
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.as_deref(), Some("127.0.0.1:9000")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_stop_command() {
        let cli = Cli::try_parse_from(["ptyhub", "stop"]).unwrap();
        match cli.command {
            Commands::Stop { timeout } => assert_eq!(timeout, 30),
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_stop_with_timeout() {
        let cli = Cli::try_parse_from(["ptyhub", "stop", "--timeout", "5"]).unwrap();
        match cli.command {
            Commands::Stop { timeout } => assert_eq!(timeout, 5),
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::try_parse_from(["ptyhub", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_sessions_list() {
        let cli = Cli::try_parse_from(["ptyhub", "sessions", "list"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::List { json }) => assert!(!json),
            _ => panic!("Expected Sessions List command"),
        }
    }

    #[test]
    fn test_sessions_list_json() {
        let cli = Cli::try_parse_from(["ptyhub", "sessions", "list", "--json"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::List { json }) => assert!(json),
            _ => panic!("Expected Sessions List command"),
        }
    }

    #[test]
    fn test_sessions_close() {
        let cli = Cli::try_parse_from(["ptyhub", "sessions", "close", "abc-123"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::Close { session_id }) => {
                assert_eq!(session_id, "abc-123");
            }
            _ => panic!("Expected Sessions Close command"),
        }
    }

    #[test]
    fn test_sessions_close_requires_id() {
        assert!(Cli::try_parse_from(["ptyhub", "sessions", "close"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["ptyhub", "-v", "-c", "/etc/ptyhub.toml", "status"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ptyhub.toml")));

        let cli = Cli::try_parse_from(["ptyhub", "status", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_invalid_command_fails() {
        assert!(Cli::try_parse_from(["ptyhub", "invalid"]).is_err());
        assert!(Cli::try_parse_from(["ptyhub"]).is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3661), "1h 1m 1s");
    }

    #[test]
    fn test_format_relative_time() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(format_relative_time(now).ends_with("s ago"));
        assert_eq!(format_relative_time(now - 120), "2m ago");
        assert_eq!(format_relative_time(now - 7200), "2h ago");
        assert_eq!(format_relative_time(now - 172_800), "2d ago");
        // Clock skew never goes negative.
        assert_eq!(format_relative_time(now + 100), "0s ago");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("0123456789abc", 10), "0123456...");
    }
}
