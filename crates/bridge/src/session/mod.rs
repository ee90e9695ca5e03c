//! Session module.
//!
//! A session pairs one PTY shell with one relay connection and runs three
//! tasks between them: the input forwarder, the output batcher and the
//! flusher. Any task's terminal condition tears the whole session down.

pub mod buffer;
mod forward;
pub mod lifecycle;
pub mod process;
pub mod pty;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

pub use buffer::{OutputBuffer, OverflowPolicy};
pub use lifecycle::{Session, SessionHandle};
pub use process::{
    IoFuture, ProcessControl, ProcessHandle, ProcessInput, ProcessOutput, ProcessSpawner,
};
pub use pty::{PtySpawner, ShellConfig};
pub use registry::{Reservation, SessionInfo, SessionRegistry};

/// Identifies a session by the pair of opaque identifiers in the request path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    task_manager_id: String,
    session_id: String,
}

impl SessionKey {
    pub fn new(task_manager_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            task_manager_id: task_manager_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn task_manager_id(&self) -> &str {
        &self.task_manager_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.task_manager_id, self.session_id)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Process spawn and relay dial in progress.
    Init,
    /// All three tasks are running.
    Attached,
    /// A terminal condition was hit; resources are being released.
    Closing,
    /// All resources released and all tasks exited.
    Terminated,
}

/// Errors that can occur while establishing or running a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The shell process could not be started.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// The relay connection could not be opened.
    #[error("failed to dial relay at {url}: {reason}")]
    DialFailed { url: String, reason: String },

    /// Receiving an inbound frame failed.
    #[error("failed to receive input frame: {0}")]
    InputReceive(#[source] TransportError),

    /// Writing a frame payload to the process failed.
    #[error("failed to write to process: {0}")]
    InputWrite(#[source] io::Error),

    /// Reading process output failed for a reason other than end-of-stream.
    #[error("failed to read process output: {0}")]
    OutputRead(#[source] io::Error),

    /// Sending a batched output frame failed.
    #[error("failed to send output frame: {0}")]
    FlushSend(#[source] TransportError),

    /// Output outgrew the buffer cap under the `close` policy.
    #[error("output buffer exceeded {limit} bytes")]
    BufferOverflow { limit: usize },

    /// A session with the same key is already running.
    #[error("session already active: {0}")]
    AlreadyActive(SessionKey),
}

/// Why a session left the `Attached` state.
#[derive(Debug)]
pub enum ExitReason {
    /// The relay closed the connection.
    InputClosed,
    /// The process output reached end-of-stream.
    OutputClosed,
    /// The session was cancelled from outside, e.g. on service shutdown.
    Cancelled,
    /// A task failed.
    Failed(SessionError),
}

impl ExitReason {
    /// Returns true for reasons that are not failures.
    pub fn is_clean(&self) -> bool {
        !matches!(self, ExitReason::Failed(_))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::InputClosed => f.write_str("relay closed the connection"),
            ExitReason::OutputClosed => f.write_str("process output closed"),
            ExitReason::Cancelled => f.write_str("cancelled"),
            ExitReason::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Immutable per-session settings, built once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Period of the flush timer.
    pub flush_interval: Duration,
    /// Cap on buffered, not yet flushed output.
    pub max_buffer_bytes: usize,
    /// What to do when output outgrows the cap.
    pub overflow: OverflowPolicy,
    /// How long establishment waits for the process readiness signal.
    pub ready_timeout: Duration,
    /// How long establishment waits for the relay dial.
    pub connect_timeout: Duration,
    /// Upper bound on each teardown step.
    pub teardown_timeout: Duration,
}

/// Default flush period.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Default output buffer cap (1 MiB).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            overflow: OverflowPolicy::DropOldest,
            ready_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(2),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub key: SessionKey,
    pub reason: ExitReason,
    /// Exit code of the process, if it could be collected.
    pub exit_code: Option<u32>,
    /// Inbound frames written to the process.
    pub frames_in: u64,
    /// Bytes written to the process.
    pub bytes_in: u64,
    /// Outbound frames sent to the relay.
    pub frames_out: u64,
    /// Bytes of process output sent to the relay.
    pub bytes_out: u64,
    /// Bytes discarded by the overflow policy or at teardown.
    pub bytes_dropped: u64,
}
