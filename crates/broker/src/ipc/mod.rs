//! Local control socket between the `ptyhub` CLI and a running broker.
//!
//! The protocol is newline-delimited JSON: each message is a single JSON
//! object followed by a newline.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/ptyhub/broker.sock`
//! - Fallback: `/tmp/ptyhub-$UID/broker.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use broker::ipc::{socket_path, IpcClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&socket_path()).await?;
//!
//!     if client.ping().await? {
//!         println!("Broker is running");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse, IpcSessionInfo};
pub use pidfile::{broker_pid, is_broker_running, pid_file_path};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Where the broker's control socket lives.
///
/// `$XDG_RUNTIME_DIR` is preferred since it is private to the user and
/// cleared on logout.
pub fn socket_path() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => {
            PathBuf::from(runtime_dir).join("ptyhub").join("broker.sock")
        }
        _ => {
            let uid = nix::unistd::getuid();
            PathBuf::from(format!("/tmp/ptyhub-{}", uid)).join("broker.sock")
        }
    }
}
