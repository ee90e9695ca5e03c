//! In-memory process and transport doubles for session tests.

use std::future::pending;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use url::Url;

use super::process::{IoFuture, ProcessControl, ProcessHandle, ProcessInput, ProcessOutput, ProcessSpawner};
use super::{SessionError, SessionKey};
use crate::transport::{Connection, Dialer, FrameSink, FrameSource, TransportError, TransportFuture};

#[derive(Default)]
struct ProcessState {
    written: Vec<u8>,
    write_calls: usize,
    fail_writes: bool,
    /// Writes never complete, like a PTY whose foreground program stopped
    /// reading stdin.
    block_writes: bool,
    terminate_calls: usize,
    terminated: bool,
}

/// Test-side controls of a fake process.
pub(crate) struct FakeProcess {
    state: Arc<Mutex<ProcessState>>,
    output: Mutex<Option<mpsc::UnboundedSender<io::Result<Vec<u8>>>>>,
}

impl FakeProcess {
    /// Makes the process produce `bytes` as one chunk.
    pub(crate) fn emit(&self, bytes: &[u8]) {
        if let Some(tx) = self.output.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(bytes.to_vec()));
        }
    }

    /// Ends the output stream.
    pub(crate) fn finish(&self) {
        self.output.lock().unwrap().take();
    }

    pub(crate) fn fail_read(&self) {
        if let Some(tx) = self.output.lock().unwrap().as_ref() {
            let _ = tx.send(Err(io::Error::new(io::ErrorKind::Other, "read failed")));
        }
    }

    pub(crate) fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub(crate) fn block_writes(&self) {
        self.state.lock().unwrap().block_writes = true;
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.state.lock().unwrap().write_calls
    }

    pub(crate) fn terminated(&self) -> bool {
        self.state.lock().unwrap().terminated
    }

    pub(crate) fn terminate_calls(&self) -> usize {
        self.state.lock().unwrap().terminate_calls
    }
}

struct RecordingInput(Arc<Mutex<ProcessState>>);

impl ProcessInput for RecordingInput {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> IoFuture<'a, ()> {
        Box::pin(async move {
            let blocked = self.0.lock().unwrap().block_writes;
            if blocked {
                return pending().await;
            }

            let mut state = self.0.lock().unwrap();
            if state.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
            state.written.extend_from_slice(data);
            state.write_calls += 1;
            Ok(())
        })
    }
}

struct ScriptedOutput(mpsc::UnboundedReceiver<io::Result<Vec<u8>>>);

impl ProcessOutput for ScriptedOutput {
    fn next_chunk(&mut self) -> IoFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            match self.0.recv().await {
                Some(Ok(bytes)) => Ok(Some(bytes)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        })
    }
}

struct RecordingControl(Arc<Mutex<ProcessState>>);

impl ProcessControl for RecordingControl {
    fn terminate(&mut self) -> IoFuture<'_, Option<u32>> {
        Box::pin(async move {
            let mut state = self.0.lock().unwrap();
            state.terminate_calls += 1;
            state.terminated = true;
            Ok(Some(0))
        })
    }
}

/// A process whose output and input are driven through the returned
/// controls.
pub(crate) fn fake_process() -> (ProcessHandle, FakeProcess) {
    let state = Arc::new(Mutex::new(ProcessState::default()));
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = ProcessHandle {
        input: Box::new(RecordingInput(Arc::clone(&state))),
        output: Box::new(ScriptedOutput(rx)),
        control: Box::new(RecordingControl(Arc::clone(&state))),
        ready: None,
        pid: None,
    };
    let fake = FakeProcess {
        state,
        output: Mutex::new(Some(tx)),
    };
    (handle, fake)
}

#[derive(Default)]
struct SinkState {
    sent: Vec<String>,
    send_attempts: usize,
    fail_sends: bool,
    /// Sends never complete, like a relay that stopped reading.
    block_sends: bool,
    block_closes: bool,
    closed: bool,
}

/// Test-side controls of a fake relay connection.
pub(crate) struct FakeRelay {
    state: Arc<Mutex<SinkState>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>>>,
}

impl FakeRelay {
    /// Delivers one inbound frame to the session.
    pub(crate) fn push_inbound(&self, payload: &[u8]) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(payload.to_vec()));
        }
    }

    pub(crate) fn push_inbound_error(&self) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(Err(TransportError::Closed));
        }
    }

    /// Simulates the relay closing the connection.
    pub(crate) fn close_inbound(&self) {
        self.inbound.lock().unwrap().take();
    }

    pub(crate) fn fail_sends(&self) {
        self.state.lock().unwrap().fail_sends = true;
    }

    pub(crate) fn block_sends(&self) {
        self.state.lock().unwrap().block_sends = true;
    }

    pub(crate) fn block_closes(&self) {
        self.state.lock().unwrap().block_closes = true;
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub(crate) fn send_attempts(&self) -> usize {
        self.state.lock().unwrap().send_attempts
    }

    pub(crate) fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

struct ChannelSource(mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>);

impl FrameSource for ChannelSource {
    fn recv(&mut self) -> TransportFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            match self.0.recv().await {
                Some(Ok(payload)) => Ok(Some(payload)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        })
    }
}

struct RecordingSink(Arc<Mutex<SinkState>>);

impl FrameSink for RecordingSink {
    fn send_text(&mut self, text: String) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let blocked = {
                let mut state = self.0.lock().unwrap();
                state.send_attempts += 1;
                state.block_sends
            };
            if blocked {
                return pending().await;
            }

            let mut state = self.0.lock().unwrap();
            if state.fail_sends || state.closed {
                return Err(TransportError::Closed);
            }
            state.sent.push(text);
            Ok(())
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let blocked = self.0.lock().unwrap().block_closes;
            if blocked {
                return pending().await;
            }
            self.0.lock().unwrap().closed = true;
            Ok(())
        })
    }
}

/// A relay connection driven through the returned controls.
pub(crate) fn fake_connection() -> (Connection, FakeRelay) {
    let state = Arc::new(Mutex::new(SinkState::default()));
    let (tx, rx) = mpsc::unbounded_channel();

    let connection = Connection {
        source: Box::new(ChannelSource(rx)),
        sink: Box::new(RecordingSink(Arc::clone(&state))),
    };
    let relay = FakeRelay {
        state,
        inbound: Mutex::new(Some(tx)),
    };
    (connection, relay)
}

/// Hands out one prepared process, or fails every spawn.
pub(crate) struct FakeSpawner {
    process: Mutex<Option<ProcessHandle>>,
}

impl FakeSpawner {
    pub(crate) fn new(process: ProcessHandle) -> Self {
        Self {
            process: Mutex::new(Some(process)),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            process: Mutex::new(None),
        }
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, _key: &SessionKey) -> Result<ProcessHandle, SessionError> {
        self.process
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("no such program".to_string()))
    }
}

/// Hands out one prepared connection and records the dialed URL.
pub(crate) struct FakeDialer {
    connection: Mutex<Option<Connection>>,
    dialed: Mutex<Option<String>>,
}

impl FakeDialer {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
            dialed: Mutex::new(None),
        }
    }

    pub(crate) fn dialed(&self) -> Option<String> {
        self.dialed.lock().unwrap().clone()
    }
}

impl Dialer for FakeDialer {
    fn dial<'a>(&'a self, url: &'a Url) -> TransportFuture<'a, Connection> {
        Box::pin(async move {
            *self.dialed.lock().unwrap() = Some(url.to_string());
            self.connection
                .lock()
                .unwrap()
                .take()
                .ok_or(TransportError::Closed)
        })
    }
}

/// Refuses every connection.
pub(crate) struct FailingDialer;

impl Dialer for FailingDialer {
    fn dial<'a>(&'a self, _url: &'a Url) -> TransportFuture<'a, Connection> {
        Box::pin(async { Err(TransportError::Closed) })
    }
}

/// Never finishes connecting; only the connect timeout ends a dial.
pub(crate) struct HangingDialer;

impl Dialer for HangingDialer {
    fn dial<'a>(&'a self, _url: &'a Url) -> TransportFuture<'a, Connection> {
        Box::pin(pending())
    }
}
