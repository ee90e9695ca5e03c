//! Session establishment, supervision and teardown.
//!
//! ```text
//! Init ──establish──▶ Attached ──terminal condition──▶ Closing ──▶ Terminated
//! ```
//!
//! Teardown order once any task stops the session:
//! 1. stop intake (input forwarder and output batcher exit)
//! 2. flush the remaining output, or discard it if the relay is unusable
//! 3. close the relay connection
//! 4. terminate the process
//!
//! Every step is bounded by `teardown_timeout`, so a stuck write, send or
//! close never keeps the process alive.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::buffer::{OutputBuffer, SharedOutputBuffer};
use super::forward::{self, FlusherExit, SessionStats, Teardown};
use super::process::{ProcessHandle, ProcessSpawner};
use super::{ExitReason, SessionError, SessionKey, SessionOutcome, SessionSettings, SessionState};
use crate::transport::{Connection, Dialer, RelayEndpoint};

/// Handle for observing and cancelling a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    key: SessionKey,
    instance: Uuid,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Unique ID of this session instance, distinguishing reattachments
    /// under the same key in logs.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Requests teardown. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits until the session reaches `Terminated`.
    pub async fn terminated(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == SessionState::Terminated)
            .await;
    }
}

/// One shell attached to one relay connection.
pub struct Session {
    key: SessionKey,
    instance: Uuid,
    process: ProcessHandle,
    connection: Connection,
    settings: SessionSettings,
    buffer: SharedOutputBuffer,
    teardown: Teardown,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Spawns the process, waits for it to be ready, then dials the relay.
    ///
    /// Spawn and dial failures are returned to the caller; a process spawned
    /// before a failed dial is terminated here. `parent` cancels the session
    /// together with everything else under it.
    pub async fn establish(
        key: SessionKey,
        settings: SessionSettings,
        spawner: &dyn ProcessSpawner,
        dialer: &dyn Dialer,
        relay: &RelayEndpoint,
        parent: &CancellationToken,
    ) -> Result<Session, SessionError> {
        debug!(session = %key, "Establishing session");

        let mut process = spawner.spawn(&key)?;

        if let Some(ready) = process.ready.take() {
            match timeout(settings.ready_timeout, ready).await {
                Ok(_) => debug!(session = %key, "Process ready"),
                Err(_) => warn!(
                    session = %key,
                    timeout_ms = settings.ready_timeout.as_millis() as u64,
                    "No readiness signal from process, attaching anyway"
                ),
            }
        }

        let connection = match Self::dial(&key, &settings, dialer, relay).await {
            Ok(connection) => connection,
            Err(e) => {
                if let Err(term_err) = process.control.terminate().await {
                    warn!(session = %key, error = %term_err, "Failed to terminate process after dial failure");
                }
                return Err(e);
            }
        };

        Ok(Self::attach(key, process, connection, settings, parent))
    }

    async fn dial(
        key: &SessionKey,
        settings: &SessionSettings,
        dialer: &dyn Dialer,
        relay: &RelayEndpoint,
    ) -> Result<Connection, SessionError> {
        let url = relay.url_for(key).map_err(|e| SessionError::DialFailed {
            url: format!("{}://{}:{}", relay.scheme, relay.host, relay.port),
            reason: e.to_string(),
        })?;

        info!(session = %key, url = %url, "Connecting to relay");

        match timeout(settings.connect_timeout, dialer.dial(&url)).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(SessionError::DialFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(SessionError::DialFailed {
                url: url.to_string(),
                reason: format!(
                    "timed out after {}ms",
                    settings.connect_timeout.as_millis()
                ),
            }),
        }
    }

    /// Builds a session from an already spawned process and an open
    /// connection. Nothing runs until [`Session::run`].
    pub fn attach(
        key: SessionKey,
        process: ProcessHandle,
        connection: Connection,
        settings: SessionSettings,
        parent: &CancellationToken,
    ) -> Session {
        let buffer = OutputBuffer::new(settings.max_buffer_bytes, settings.overflow).shared();
        let (state, _) = watch::channel(SessionState::Init);

        Session {
            key,
            instance: Uuid::new_v4(),
            process,
            connection,
            settings,
            buffer,
            teardown: Teardown::new(parent.child_token()),
            state,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Returns a handle that stays valid after the session is moved into
    /// [`Session::run`].
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            key: self.key.clone(),
            instance: self.instance,
            cancel: self.teardown.token().clone(),
            state: self.state.subscribe(),
        }
    }

    /// Runs the session until a terminal condition, then tears it down.
    pub async fn run(self) -> SessionOutcome {
        let Session {
            key,
            instance,
            mut process,
            connection,
            settings,
            buffer,
            teardown,
            state,
        } = self;

        let stats = Arc::new(SessionStats::default());

        state.send_replace(SessionState::Attached);
        info!(
            session = %key,
            instance = %instance,
            pid = ?process.pid,
            flush_ms = settings.flush_interval.as_millis() as u64,
            "Session attached"
        );

        let input_task = tokio::spawn(forward::forward_input(
            key.clone(),
            connection.source,
            process.input,
            teardown.clone(),
            Arc::clone(&stats),
        ));
        let output_task = tokio::spawn(forward::batch_output(
            key.clone(),
            process.output,
            Arc::clone(&buffer),
            teardown.clone(),
            Arc::clone(&stats),
        ));
        let flush_task = tokio::spawn(forward::flush_output(
            key.clone(),
            connection.sink,
            Arc::clone(&buffer),
            settings.flush_interval,
            teardown.clone(),
            Arc::clone(&stats),
        ));

        teardown.cancelled().await;
        state.send_replace(SessionState::Closing);
        debug!(session = %key, "Session closing");

        let grace = settings.teardown_timeout;

        // 1. stop intake
        join_within(&key, "Input forwarder", input_task, grace).await;
        join_within(&key, "Output batcher", output_task, grace).await;

        // 2. flush or discard what is left
        let flusher = join_within(&key, "Flusher", flush_task, grace).await;

        let mut sink = match flusher {
            Some(FlusherExit {
                mut sink,
                healthy: true,
            }) => {
                let remaining = buffer.lock().await.drain_all_text();
                if let Some(text) = remaining {
                    let len = text.len();
                    match timeout(grace, sink.send_text(text)).await {
                        Ok(Ok(())) => {
                            stats.record_out(len);
                            debug!(session = %key, bytes = len, "Flushed remaining output");
                        }
                        Ok(Err(e)) => {
                            stats.record_dropped(len);
                            debug!(session = %key, error = %e, "Final flush failed");
                        }
                        Err(_) => {
                            stats.record_dropped(len);
                            warn!(session = %key, bytes = len, "Final flush timed out");
                        }
                    }
                }
                Some(sink)
            }
            unusable => {
                let discarded = buffer.lock().await.discard();
                if discarded > 0 {
                    stats.record_dropped(discarded);
                    debug!(session = %key, bytes = discarded, "Discarded remaining output");
                }
                unusable.map(|exit| exit.sink)
            }
        };

        // 3. close the relay connection
        if let Some(sink) = sink.as_mut() {
            match timeout(grace, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(session = %key, error = %e, "Closing relay connection failed"),
                Err(_) => warn!(session = %key, "Closing relay connection timed out"),
            }
        }
        drop(sink);

        // 4. terminate the process
        let exit_code = match timeout(grace, process.control.terminate()).await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                warn!(session = %key, error = %e, "Failed to terminate process");
                None
            }
            Err(_) => {
                warn!(session = %key, "Process did not exit in time");
                None
            }
        };

        state.send_replace(SessionState::Terminated);

        let reason = teardown.take_reason();
        let outcome = SessionOutcome {
            key,
            reason,
            exit_code,
            frames_in: stats.frames_in.load(Ordering::Relaxed),
            bytes_in: stats.bytes_in.load(Ordering::Relaxed),
            frames_out: stats.frames_out.load(Ordering::Relaxed),
            bytes_out: stats.bytes_out.load(Ordering::Relaxed),
            bytes_dropped: stats.bytes_dropped.load(Ordering::Relaxed),
        };

        info!(
            session = %outcome.key,
            instance = %instance,
            reason = %outcome.reason,
            exit_code = ?outcome.exit_code,
            bytes_in = outcome.bytes_in,
            bytes_out = outcome.bytes_out,
            "Session terminated"
        );

        outcome
    }
}

/// Waits for a stopped task, aborting it once `grace` runs out.
async fn join_within<T>(
    key: &SessionKey,
    name: &str,
    mut task: JoinHandle<T>,
    grace: Duration,
) -> Option<T> {
    match timeout(grace, &mut task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(session = %key, error = %e, "{} panicked", name);
            None
        }
        Err(_) => {
            warn!(
                session = %key,
                timeout_ms = grace.as_millis() as u64,
                "{} did not stop in time, aborting",
                name
            );
            task.abort();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::session::testing::{
        fake_connection, fake_process, FailingDialer, FakeDialer, FakeProcess, FakeRelay,
        FakeSpawner,
    };
    use crate::session::OverflowPolicy;

    fn key() -> SessionKey {
        SessionKey::new("tm-1", "sess-1")
    }

    fn relay() -> RelayEndpoint {
        RelayEndpoint::new("ws", "10.0.0.1", 10411)
    }

    fn start(
        settings: SessionSettings,
    ) -> (
        SessionHandle,
        tokio::task::JoinHandle<SessionOutcome>,
        FakeProcess,
        FakeRelay,
    ) {
        let (process, fake_shell) = fake_process();
        let (connection, fake_relay) = fake_connection();
        let session = Session::attach(
            key(),
            process,
            connection,
            settings,
            &CancellationToken::new(),
        );
        let handle = session.handle();
        let task = tokio::spawn(session.run());
        (handle, task, fake_shell, fake_relay)
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_frame_reaches_process() {
        let (handle, _task, process, conn) = start(SessionSettings::default());

        conn.push_inbound(b"ls\n");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(process.written(), b"ls\n");
        assert_eq!(process.write_calls(), 1);
        assert_eq!(handle.state(), SessionState::Attached);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_frames_written_once_in_order() {
        let (handle, _task, process, conn) = start(SessionSettings::default());

        conn.push_inbound(b"echo 1\n");
        conn.push_inbound(b"echo 2\n");
        conn.push_inbound(b"\x03");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(process.written(), b"echo 1\necho 2\n\x03");
        assert_eq!(process.write_calls(), 3);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_within_one_window_is_one_frame() {
        let (handle, _task, process, conn) = start(SessionSettings::default());

        process.emit(b"a");
        process.emit(b"b");
        process.emit(b"c");
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(conn.sent(), vec!["abc".to_string()]);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_windows_emit_no_frames() {
        let (handle, _task, _process, conn) = start(SessionSettings::default());

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(conn.sent().is_empty());
        assert_eq!(conn.send_attempts(), 0);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_window_flushes_only_new_output() {
        let (handle, _task, process, conn) = start(SessionSettings::default());

        process.emit(b"first");
        tokio::time::sleep(Duration::from_millis(150)).await;
        // Nothing produced in the second window
        tokio::time::sleep(Duration::from_millis(100)).await;
        process.emit(b"second");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            conn.sent(),
            vec!["first".to_string(), "second".to_string()]
        );
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_failure_terminates_session() {
        let (mut handle, task, process, conn) = start(SessionSettings::default());
        conn.fail_sends();

        process.emit(b"doomed");
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(
            outcome.reason,
            ExitReason::Failed(SessionError::FlushSend(_))
        ));
        assert_eq!(handle.state(), SessionState::Terminated);
        assert!(process.terminated());
        assert!(conn.closed());

        // More output after the failure never triggers another send
        process.emit(b"late");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(conn.send_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_close_tears_down_everything() {
        let (mut handle, task, process, conn) = start(SessionSettings::default());

        process.emit(b"bye");
        conn.close_inbound();
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(outcome.reason, ExitReason::InputClosed));
        assert!(process.terminated());
        assert!(conn.closed());
        assert_eq!(process.terminate_calls(), 1);

        // Flush timer is gone: no sends after teardown
        let attempts = conn.send_attempts();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(conn.send_attempts(), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_eof_flushes_remaining_then_closes() {
        let (mut handle, task, process, conn) = start(SessionSettings::default());

        process.emit(b"logout\r\n");
        process.finish();
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(outcome.reason, ExitReason::OutputClosed));
        assert_eq!(conn.sent(), vec!["logout\r\n".to_string()]);
        assert_eq!(outcome.frames_out, 1);
        assert_eq!(outcome.bytes_out, 8);
        assert!(conn.closed());
        assert!(process.terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_read_error_is_session_scoped() {
        let (mut handle, task, process, conn) = start(SessionSettings::default());

        process.fail_read();
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(
            outcome.reason,
            ExitReason::Failed(SessionError::OutputRead(_))
        ));
        assert!(conn.closed());
        assert!(process.terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_write_failure_terminates_session() {
        let (mut handle, task, process, conn) = start(SessionSettings::default());
        process.fail_writes();

        conn.push_inbound(b"ls\n");
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(
            outcome.reason,
            ExitReason::Failed(SessionError::InputWrite(_))
        ));
        assert!(process.terminated());
        assert!(conn.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_receive_failure_terminates_session() {
        let (mut handle, task, _process, conn) = start(SessionSettings::default());

        conn.push_inbound_error();
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(
            outcome.reason,
            ExitReason::Failed(SessionError::InputReceive(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_reports_cancelled() {
        let (mut handle, task, process, conn) = start(SessionSettings::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.cancel();
        handle.cancel();
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(outcome.reason, ExitReason::Cancelled));
        assert_eq!(process.terminate_calls(), 1);
        assert!(conn.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_blocked_write_terminates_process() {
        let settings = SessionSettings::default();
        let (mut handle, task, process, conn) = start(settings.clone());
        process.block_writes();

        conn.push_inbound(b"large paste");
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Stuck in the write, the forwarder cannot see the relay close
        conn.close_inbound();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), SessionState::Attached);

        let started = tokio::time::Instant::now();
        handle.cancel();
        timeout(Duration::from_secs(60), handle.terminated())
            .await
            .expect("session stuck in teardown");
        let outcome = task.await.unwrap();

        // The write observed the cancellation; no step had to time out
        assert!(started.elapsed() < settings.teardown_timeout);
        assert!(matches!(outcome.reason, ExitReason::Cancelled));
        assert_eq!(outcome.frames_in, 0);
        assert!(process.terminated());
        assert!(conn.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_blocked_send_terminates_process() {
        let (mut handle, task, process, conn) = start(SessionSettings::default());
        conn.block_sends();

        process.emit(b"stuck");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(conn.send_attempts(), 1);

        process.emit(b"more");
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        timeout(Duration::from_secs(60), handle.terminated())
            .await
            .expect("session stuck in teardown");
        let outcome = task.await.unwrap();

        // The interrupted frame and the rest of the buffer are both dropped
        assert_eq!(outcome.bytes_dropped, 9);
        assert_eq!(outcome.frames_out, 0);
        assert_eq!(conn.send_attempts(), 1);
        assert!(conn.closed());
        assert!(process.terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_final_flush_is_bounded() {
        let settings = SessionSettings::default();
        let (mut handle, task, process, conn) = start(settings.clone());
        conn.block_sends();

        let started = tokio::time::Instant::now();
        process.emit(b"tail");
        process.finish();
        timeout(Duration::from_secs(60), handle.terminated())
            .await
            .expect("session stuck in teardown");
        let outcome = task.await.unwrap();

        assert!(matches!(outcome.reason, ExitReason::OutputClosed));
        assert!(started.elapsed() >= settings.teardown_timeout);
        assert_eq!(outcome.bytes_dropped, 4);
        assert!(conn.closed());
        assert!(process.terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_close_still_terminates_process() {
        let (mut handle, task, process, conn) = start(SessionSettings::default());
        conn.block_closes();
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.cancel();
        timeout(Duration::from_secs(60), handle.terminated())
            .await
            .expect("session stuck in teardown");
        task.await.unwrap();

        assert!(!conn.closed());
        assert_eq!(process.terminate_calls(), 1);
        assert!(process.terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_session() {
        let parent = CancellationToken::new();
        let (process, shell) = fake_process();
        let (connection, _conn) = fake_connection();
        let session = Session::attach(key(), process, connection, SessionSettings::default(), &parent);
        let mut handle = session.handle();
        let task = tokio::spawn(session.run());

        parent.cancel();
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(outcome.reason, ExitReason::Cancelled));
        assert!(shell.terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_overflow_with_close_policy() {
        let settings = SessionSettings {
            max_buffer_bytes: 4,
            overflow: OverflowPolicy::Close,
            ..SessionSettings::default()
        };
        let (mut handle, task, process, _conn) = start(settings);

        process.emit(b"0123456789");
        handle.terminated().await;
        let outcome = task.await.unwrap();

        assert!(matches!(
            outcome.reason,
            ExitReason::Failed(SessionError::BufferOverflow { limit: 4 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_drop_oldest_counts_dropped() {
        let settings = SessionSettings {
            max_buffer_bytes: 4,
            ..SessionSettings::default()
        };
        let (handle, task, process, conn) = start(settings);

        process.emit(b"abcdef");
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.cancel();
        let outcome = task.await.unwrap();

        assert_eq!(conn.sent(), vec!["cdef".to_string()]);
        assert_eq!(outcome.bytes_dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let (process, _p) = fake_process();
        let (connection, conn) = fake_connection();
        let session = Session::attach(key(), process, connection, SessionSettings::default(), &CancellationToken::new());
        let mut handle = session.handle();
        assert_eq!(handle.state(), SessionState::Init);

        let task = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.state(), SessionState::Attached);

        conn.close_inbound();
        handle.terminated().await;
        assert_eq!(handle.state(), SessionState::Terminated);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_establish_uses_relay_url() {
        let (process, _p) = fake_process();
        let spawner = FakeSpawner::new(process);
        let (connection, _c) = fake_connection();
        let dialer = FakeDialer::new(connection);

        let session = Session::establish(
            key(),
            SessionSettings::default(),
            &spawner,
            &dialer,
            &relay(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(session.key(), &key());
        assert_eq!(
            dialer.dialed().as_deref(),
            Some("ws://10.0.0.1:10411/container/tm-1/sess-1")
        );
        assert_eq!(session.handle().state(), SessionState::Init);
    }

    #[tokio::test]
    async fn test_establish_spawn_failure_skips_dial() {
        let spawner = FakeSpawner::failing();
        let (connection, _c) = fake_connection();
        let dialer = FakeDialer::new(connection);

        let result = Session::establish(
            key(),
            SessionSettings::default(),
            &spawner,
            &dialer,
            &relay(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
        assert!(dialer.dialed().is_none());
    }

    #[tokio::test]
    async fn test_establish_dial_failure_terminates_process() {
        let (process, shell) = fake_process();
        let spawner = FakeSpawner::new(process);

        let result = Session::establish(
            key(),
            SessionSettings::default(),
            &spawner,
            &FailingDialer,
            &relay(),
            &CancellationToken::new(),
        )
        .await;

        match result {
            Err(SessionError::DialFailed { url, .. }) => {
                assert_eq!(url, "ws://10.0.0.1:10411/container/tm-1/sess-1");
            }
            other => panic!("expected DialFailed, got {:?}", other.map(|s| s.key().clone())),
        }
        assert!(shell.terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_proceeds_without_readiness() {
        let (mut process, _shell) = fake_process();
        let (_never_ready, ready_rx) = tokio::sync::oneshot::channel::<()>();
        process.ready = Some(ready_rx);
        let spawner = FakeSpawner::new(process);
        let (connection, _c) = fake_connection();
        let dialer = FakeDialer::new(connection);

        let result = Session::establish(
            key(),
            SessionSettings::default(),
            &spawner,
            &dialer,
            &relay(),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_ok());
        assert!(dialer.dialed().is_some());
    }
}
