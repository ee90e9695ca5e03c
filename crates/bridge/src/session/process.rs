//! Process handle abstraction.
//!
//! The session never touches the PTY directly. It works with three halves
//! that can be owned by different tasks: input, output and control.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::sync::oneshot;

use super::{SessionError, SessionKey};

/// Boxed future returned by process operations.
pub type IoFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// Writable input side of a process (its terminal input).
pub trait ProcessInput: Send {
    /// Writes all of `data`, in order.
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> IoFuture<'a, ()>;
}

/// Readable output side of a process.
pub trait ProcessOutput: Send {
    /// Reads the next available chunk of output.
    ///
    /// Returns `Ok(None)` at end-of-stream. Must be cancel-safe: dropping the
    /// future before it completes loses no output.
    fn next_chunk(&mut self) -> IoFuture<'_, Option<Vec<u8>>>;
}

/// Lifetime control of a process.
pub trait ProcessControl: Send {
    /// Terminates the process if it is still running and collects its exit
    /// code. Calling it again returns the code collected the first time.
    fn terminate(&mut self) -> IoFuture<'_, Option<u32>>;
}

/// A spawned interactive process, split into independently owned halves.
pub struct ProcessHandle {
    pub input: Box<dyn ProcessInput>,
    pub output: Box<dyn ProcessOutput>,
    pub control: Box<dyn ProcessControl>,
    /// Fires once the process is ready to be attached.
    pub ready: Option<oneshot::Receiver<()>>,
    /// OS process ID, if known.
    pub pid: Option<u32>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("ready_pending", &self.ready.is_some())
            .finish_non_exhaustive()
    }
}

/// Starts the process for a new session.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, key: &SessionKey) -> Result<ProcessHandle, SessionError>;
}
