//! Per-session output pump.
//!
//! The pump moves bytes from the PTY master into the session's output buffer.
//! It never blocks indefinitely: each iteration waits at most one poll
//! interval for the descriptor to become readable, then re-checks that the
//! session is still active. Removing or terminating the session is therefore
//! enough to stop it.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use super::pty::SessionId;
use super::registry::SessionRegistry;

/// Default upper bound on one wait for readability.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default size of a single read.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Pump tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    pub poll_interval: Duration,
    pub chunk_size: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Outcome of one bounded read.
enum ReadOutcome {
    Data(Vec<u8>),
    Idle,
    Eof,
}

/// Runs the pump for `id` until the session leaves the active state, the
/// shell side hangs up or a read fails. Errors are logged, never returned.
pub async fn run(registry: Arc<SessionRegistry>, id: SessionId, reader: File, config: PumpConfig) {
    let reader = Arc::new(reader);
    let mut decoder = Utf8Decoder::default();

    tracing::debug!(session_id = %id, "Output pump started");

    loop {
        if !registry.is_active(&id) {
            tracing::debug!(session_id = %id, "Output pump stopping: session not active");
            break;
        }

        let reader_clone = Arc::clone(&reader);
        let result = tokio::task::spawn_blocking(move || {
            read_bounded(&reader_clone, config.poll_interval, config.chunk_size)
        })
        .await;

        match result {
            Ok(Ok(ReadOutcome::Data(bytes))) => {
                let text = decoder.decode(&bytes);
                if text.is_empty() {
                    continue;
                }
                if !registry.append_output(&id, text) {
                    tracing::debug!(session_id = %id, "Output pump stopping: session gone");
                    break;
                }
            }
            Ok(Ok(ReadOutcome::Idle)) => {}
            Ok(Ok(ReadOutcome::Eof)) => {
                tracing::debug!(session_id = %id, "PTY EOF");
                break;
            }
            Ok(Err(e)) => {
                // EIO is how a Linux PTY master reports that the shell exited.
                tracing::debug!(session_id = %id, error = %e, "PTY read ended");
                break;
            }
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "Read task panicked");
                break;
            }
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        registry.append_output(&id, tail);
    }

    tracing::debug!(session_id = %id, "Output pump stopped");
}

/// Waits up to `timeout` for `file` to become readable, then reads at most
/// `chunk_size` bytes.
fn read_bounded(file: &File, timeout: Duration, chunk_size: usize) -> io::Result<ReadOutcome> {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];

    match poll(&mut fds, PollTimeout::from(millis)) {
        Ok(0) => return Ok(ReadOutcome::Idle),
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(ReadOutcome::Idle),
        Err(e) => return Err(io::Error::from(e)),
    }

    let mut buffer = vec![0u8; chunk_size];
    let mut reader = file;
    match reader.read(&mut buffer) {
        Ok(0) => Ok(ReadOutcome::Eof),
        Ok(n) => {
            buffer.truncate(n);
            Ok(ReadOutcome::Data(buffer))
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadOutcome::Idle),
        Err(e) => Err(e),
    }
}

/// Permissive incremental UTF-8 decoder.
///
/// Invalid sequences become U+FFFD. A multi-byte sequence cut off at the end
/// of one read is held back and completed by the next.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decodes `bytes`, prefixed by any bytes held back from the last call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let split = data.len() - incomplete_tail_len(&data);
        self.pending = data.split_off(split);
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Flushes held-back bytes, replacing them since no continuation will come.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// Length of a trailing, truncated but so far valid, UTF-8 sequence.
fn incomplete_tail_len(data: &[u8]) -> usize {
    // A sequence is at most 4 bytes, so only the last 3 can be incomplete.
    for back in 1..=data.len().min(3) {
        let byte = data[data.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }

        let needed = match byte {
            0x00..=0x7F => 1,
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
