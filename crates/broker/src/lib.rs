//! # ptyhub broker
//!
//! Spawns interactive shells on pseudo-terminals and lets remote clients
//! drive them over HTTP: send keystrokes, poll (or stream) output, resize the
//! terminal and close the session. Sessions a client stops polling are
//! reclaimed by a background reaper.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Broker Orchestrator                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌─────────────────┐  ┌─────────────┐  │
//! │  │  HTTP API + WS   │  │ Control socket  │  │   Reaper    │  │
//! │  └────────┬─────────┘  └────────┬────────┘  └──────┬──────┘  │
//! │           └─────────────┬───────┴──────────────────┘         │
//! │                 ┌───────┴────────┐                           │
//! │                 │ SessionManager │──── output pumps          │
//! │                 └───────┬────────┘                           │
//! │                 ┌───────┴────────┐                           │
//! │                 │SessionRegistry │                           │
//! │                 └────────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use broker::{BrokerOrchestrator, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let mut orchestrator = BrokerOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!     orchestrator.wait().await;
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY sessions, output pumps, termination and reaping
//! - [`http`]: Polling API, push channel and owner gate
//! - [`ipc`]: Local control socket for the CLI
//! - [`logging`]: Tracing subscriber setup
//! - [`orchestrator`]: Startup and shutdown of all of the above

pub mod config;
pub mod http;
pub mod ipc;
pub mod logging;
pub mod orchestrator;
pub mod session;

pub use protocol;

pub use config::Config;

pub use session::{
    LaunchOptions, ManagerSettings, PtyLauncher, Reaper, SessionError, SessionId, SessionInfo,
    SessionManager,
};

pub use orchestrator::{BrokerOrchestrator, OrchestratorEvent, OrchestratorState};
