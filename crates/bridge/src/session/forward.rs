//! The three per-session tasks and the teardown signal they share.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::buffer::SharedOutputBuffer;
use super::process::{ProcessInput, ProcessOutput};
use super::{ExitReason, SessionError, SessionKey};
use crate::transport::{FrameSink, FrameSource};

/// Cancellation shared by the tasks of one session.
///
/// The first task to hit a terminal condition records its reason and
/// cancels the token; the others observe the cancellation and stop.
#[derive(Clone)]
pub(crate) struct Teardown {
    token: CancellationToken,
    reason: Arc<Mutex<Option<ExitReason>>>,
}

impl Teardown {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Records `reason` unless another one was recorded first, then cancels.
    pub(crate) fn trigger(&self, reason: ExitReason) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The recorded reason, or `Cancelled` when the token was cancelled from
    /// outside the session.
    pub(crate) fn take_reason(&self) -> ExitReason {
        self.reason
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or(ExitReason::Cancelled)
    }
}

/// Counters updated by the tasks while the session runs.
#[derive(Debug, Default)]
pub(crate) struct SessionStats {
    pub frames_in: AtomicU64,
    pub bytes_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub bytes_out: AtomicU64,
    pub bytes_dropped: AtomicU64,
}

impl SessionStats {
    pub(crate) fn record_out(&self, bytes: usize) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, bytes: usize) {
        self.bytes_dropped.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// Receives inbound frames and writes their payload to the process.
pub(crate) async fn forward_input(
    key: SessionKey,
    mut source: Box<dyn FrameSource>,
    mut input: Box<dyn ProcessInput>,
    teardown: Teardown,
    stats: Arc<SessionStats>,
) {
    loop {
        let frame = tokio::select! {
            _ = teardown.cancelled() => {
                tracing::trace!(session = %key, "Input forwarder cancelled");
                return;
            }
            frame = source.recv() => frame,
        };

        match frame {
            Ok(Some(payload)) => {
                // A PTY write blocks while the foreground program ignores stdin
                let written = tokio::select! {
                    biased;
                    result = input.write_all(&payload) => Some(result),
                    _ = teardown.cancelled() => None,
                };
                match written {
                    None => {
                        tracing::debug!(
                            session = %key,
                            bytes = payload.len(),
                            "Input forwarder cancelled during a write"
                        );
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(session = %key, error = %e, "Writing to process failed");
                        teardown.trigger(ExitReason::Failed(SessionError::InputWrite(e)));
                        return;
                    }
                    Some(Ok(())) => {}
                }
                stats.frames_in.fetch_add(1, Ordering::Relaxed);
                stats
                    .bytes_in
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
            }
            Ok(None) => {
                tracing::debug!(session = %key, "Relay closed the connection");
                teardown.trigger(ExitReason::InputClosed);
                return;
            }
            Err(e) => {
                tracing::warn!(session = %key, error = %e, "Receiving from relay failed");
                teardown.trigger(ExitReason::Failed(SessionError::InputReceive(e)));
                return;
            }
        }
    }
}

/// Reads process output and appends it to the shared buffer.
pub(crate) async fn batch_output(
    key: SessionKey,
    mut output: Box<dyn ProcessOutput>,
    buffer: SharedOutputBuffer,
    teardown: Teardown,
    stats: Arc<SessionStats>,
) {
    loop {
        let chunk = tokio::select! {
            _ = teardown.cancelled() => {
                tracing::trace!(session = %key, "Output batcher cancelled");
                return;
            }
            chunk = output.next_chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                let appended = buffer.lock().await.append(&bytes);
                match appended {
                    Ok(0) => {}
                    Ok(dropped) => {
                        stats.record_dropped(dropped);
                        tracing::warn!(
                            session = %key,
                            dropped,
                            "Output buffer full, dropped oldest output"
                        );
                    }
                    Err(overflow) => {
                        tracing::warn!(
                            session = %key,
                            limit = overflow.limit,
                            "Output buffer full, closing session"
                        );
                        teardown.trigger(ExitReason::Failed(SessionError::BufferOverflow {
                            limit: overflow.limit,
                        }));
                        return;
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(session = %key, "Process output reached end-of-stream");
                teardown.trigger(ExitReason::OutputClosed);
                return;
            }
            Err(e) => {
                tracing::warn!(session = %key, error = %e, "Reading process output failed");
                teardown.trigger(ExitReason::Failed(SessionError::OutputRead(e)));
                return;
            }
        }
    }
}

/// What the flusher hands back when it stops.
pub(crate) struct FlusherExit {
    pub sink: Box<dyn FrameSink>,
    /// False once a send has failed; the sink must not be used for data.
    pub healthy: bool,
}

/// Sends the buffered output as one frame per timer tick.
pub(crate) async fn flush_output(
    key: SessionKey,
    mut sink: Box<dyn FrameSink>,
    buffer: SharedOutputBuffer,
    period: Duration,
    teardown: Teardown,
    stats: Arc<SessionStats>,
) -> FlusherExit {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = teardown.cancelled() => {
                tracing::trace!(session = %key, "Flusher cancelled");
                return FlusherExit { sink, healthy: true };
            }
            _ = ticker.tick() => {}
        }

        // Read and clear happen together under the lock
        let Some(text) = buffer.lock().await.drain_text() else {
            continue;
        };

        let len = text.len();
        let sent = tokio::select! {
            biased;
            result = sink.send_text(text) => Some(result),
            _ = teardown.cancelled() => None,
        };
        match sent {
            // The interrupted frame may be half written; the sink is unusable
            None => {
                stats.record_dropped(len);
                tracing::debug!(session = %key, bytes = len, "Flusher cancelled during a send");
                return FlusherExit {
                    sink,
                    healthy: false,
                };
            }
            Some(Err(e)) => {
                tracing::warn!(session = %key, error = %e, "Sending output frame failed");
                teardown.trigger(ExitReason::Failed(SessionError::FlushSend(e)));
                return FlusherExit {
                    sink,
                    healthy: false,
                };
            }
            Some(Ok(())) => {}
        }
        stats.record_out(len);
        tracing::trace!(session = %key, bytes = len, "Flushed output frame");
    }
}
