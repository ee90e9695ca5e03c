//! PTY-backed process handles.
//!
//! Spawns the configured shell in a pseudo-terminal with `portable-pty`.
//! The master side is blocking, so:
//! - output is read on a dedicated thread and handed over through a bounded
//!   channel (which also provides the readiness signal on first output)
//! - writes and termination run on the blocking thread pool

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};

use super::process::{IoFuture, ProcessControl, ProcessHandle, ProcessInput, ProcessOutput, ProcessSpawner};
use super::{SessionError, SessionKey};

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Chunks queued between the reader thread and the output batcher.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// errno returned by a PTY master read once the slave side is gone.
#[cfg(unix)]
const EIO: i32 = 5;

/// Shell invocation for new sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Program to run.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory; inherits the service's when `None`.
    pub cwd: Option<PathBuf>,
    /// Value for `TERM`.
    pub term: String,
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "/bin/bash".to_string(),
            args: vec!["--login".to_string()],
            cwd: None,
            term: "xterm-color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Spawns the configured shell inside a PTY for each session.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    shell: ShellConfig,
}

impl PtySpawner {
    pub fn new(shell: ShellConfig) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> &ShellConfig {
        &self.shell
    }
}

impl ProcessSpawner for PtySpawner {
    fn spawn(&self, key: &SessionKey) -> Result<ProcessHandle, SessionError> {
        let shell = &self.shell;
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: shell.rows,
                cols: shell.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&shell.program);
        cmd.args(&shell.args);
        if let Some(ref dir) = shell.cwd {
            cmd.cwd(dir);
        }
        cmd.env("TERM", &shell.term);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        // The slave fd must not outlive the child, or reads never see EOF
        drop(pair.slave);

        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_name = format!("pty-reader-{}", pid.unwrap_or(0));
        let label = key.to_string();
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || read_loop(reader, output_tx, ready_tx, label))
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        tracing::info!(
            session = %key,
            pid = ?pid,
            program = %shell.program,
            cols = shell.cols,
            rows = shell.rows,
            "Spawned shell in PTY"
        );

        Ok(ProcessHandle {
            input: Box::new(PtyInput {
                writer: Arc::new(Mutex::new(writer)),
            }),
            output: Box::new(PtyOutput { rx: output_rx }),
            control: Box::new(PtyControl {
                child: Some(child),
                master: Some(pair.master),
                exit_code: None,
            }),
            ready: Some(ready_rx),
            pid,
        })
    }
}

/// Reads the PTY master until end-of-stream or until the session stops
/// listening. Runs on its own thread.
fn read_loop(
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::Sender<io::Result<Vec<u8>>>,
    ready_tx: oneshot::Sender<()>,
    label: String,
) {
    let mut ready_tx = Some(ready_tx);
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let result = match reader.read(&mut buffer) {
            Ok(0) => None,
            Ok(n) => Some(Ok(buffer[..n].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_hangup(&e) => None,
            Err(e) => Some(Err(e)),
        };

        // First output means the shell is up; so does a dead one
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(());
        }

        match result {
            Some(item) => {
                let failed = item.is_err();
                if output_tx.blocking_send(item).is_err() {
                    tracing::trace!(session = %label, "Output receiver gone, stopping PTY reader");
                    break;
                }
                if failed {
                    break;
                }
            }
            None => {
                tracing::debug!(session = %label, "PTY EOF - process exited");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(EIO)
}

#[cfg(not(unix))]
fn is_hangup(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
}

struct PtyInput {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ProcessInput for PtyInput {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> IoFuture<'a, ()> {
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut writer = writer
                    .lock()
                    .map_err(|_| io::Error::other("PTY writer lock poisoned"))?;
                writer.write_all(&data)?;
                writer.flush()
            })
            .await
            .map_err(io::Error::other)?
        })
    }
}

struct PtyOutput {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
}

impl ProcessOutput for PtyOutput {
    fn next_chunk(&mut self) -> IoFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(Ok(chunk)) => Ok(Some(chunk)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        })
    }
}

struct PtyControl {
    child: Option<Box<dyn Child + Send + Sync>>,
    master: Option<Box<dyn MasterPty + Send>>,
    exit_code: Option<u32>,
}

impl ProcessControl for PtyControl {
    fn terminate(&mut self) -> IoFuture<'_, Option<u32>> {
        Box::pin(async move {
            let Some(mut child) = self.child.take() else {
                return Ok(self.exit_code);
            };

            let status = tokio::task::spawn_blocking(move || {
                if child.try_wait()?.is_none() {
                    // kill() hangs up the shell first and escalates if it lingers
                    if let Err(e) = child.kill() {
                        tracing::debug!(error = %e, "Kill failed, process may have exited");
                    }
                }
                child.wait()
            })
            .await
            .map_err(io::Error::other)??;

            // Closing the master releases the terminal device
            self.master.take();

            self.exit_code = Some(status.exit_code());
            Ok(self.exit_code)
        })
    }
}

impl Drop for PtyControl {
    fn drop(&mut self) {
        // A handle dropped before terminate() still must not orphan the shell
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(None) = child.try_wait() {
            tracing::debug!(pid = ?child.process_id(), "Killing process dropped while running");
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "Kill failed, process may have exited");
            }
        }
    }
}
