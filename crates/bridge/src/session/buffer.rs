//! Output buffer shared by the output batcher and the flusher.
//!
//! Bytes are appended in production order and drained as one text payload
//! per flush. The buffer is capped; what happens at the cap is decided by
//! the [`OverflowPolicy`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Behaviour when appended output would exceed the buffer cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Discard the oldest buffered bytes to make room.
    DropOldest,
    /// Reject the append; the session closes.
    Close,
}

/// The append was rejected under [`OverflowPolicy::Close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    pub limit: usize,
}

/// Output buffer shared behind a lock.
pub type SharedOutputBuffer = Arc<Mutex<OutputBuffer>>;

/// Accumulates process output between flushes.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
    policy: OverflowPolicy,
}

impl OutputBuffer {
    /// Creates an empty buffer holding at most `limit` bytes.
    pub fn new(limit: usize, policy: OverflowPolicy) -> Self {
        Self {
            data: Vec::new(),
            limit: limit.max(1),
            policy,
        }
    }

    /// Wraps the buffer for sharing between tasks.
    pub fn shared(self) -> SharedOutputBuffer {
        Arc::new(Mutex::new(self))
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends `bytes` after everything already buffered.
    ///
    /// Returns the number of bytes discarded to make room, counting what is
    /// left of a character cut at the front.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize, Overflow> {
        let needed = self.data.len() + bytes.len();
        if needed <= self.limit {
            self.data.extend_from_slice(bytes);
            return Ok(0);
        }

        match self.policy {
            OverflowPolicy::Close => Err(Overflow { limit: self.limit }),
            OverflowPolicy::DropOldest => {
                let excess = needed - self.limit;
                let from_buffer = excess.min(self.data.len());
                self.data.drain(..from_buffer);
                // A single chunk larger than the cap keeps only its tail
                let skip = excess - from_buffer;
                self.data.extend_from_slice(&bytes[skip..]);
                // Never start on a continuation byte of a character cut in half
                let partial = self
                    .data
                    .iter()
                    .take(3)
                    .take_while(|byte| **byte & 0xC0 == 0x80)
                    .count();
                self.data.drain(..partial);
                Ok(excess + partial)
            }
        }
    }

    /// Takes the buffered output as text for one frame.
    ///
    /// Returns `None` when there is nothing to send. An incomplete UTF-8
    /// sequence at the end stays buffered until its remaining bytes arrive;
    /// invalid sequences are replaced with U+FFFD.
    pub fn drain_text(&mut self) -> Option<String> {
        let cut = incomplete_tail_start(&self.data);
        if cut == 0 {
            return None;
        }
        let tail = self.data.split_off(cut);
        let head = std::mem::replace(&mut self.data, tail);
        Some(into_text(head))
    }

    /// Takes everything, including a held-back incomplete sequence.
    pub fn drain_all_text(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(into_text(std::mem::take(&mut self.data)))
    }

    /// Discards the buffered output, returning how many bytes were dropped.
    pub fn discard(&mut self) -> usize {
        let len = self.data.len();
        self.data.clear();
        len
    }
}

fn into_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Index where a trailing, not yet complete UTF-8 sequence starts, or
/// `data.len()` when the data ends on a character boundary.
fn incomplete_tail_start(data: &[u8]) -> usize {
    let len = data.len();
    for back in 1..=len.min(3) {
        let byte = data[len - back];
        if byte & 0xC0 == 0x80 {
            // continuation byte, keep looking for the lead byte
            continue;
        }
        let width = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => return len,
        };
        return if back < width { len - back } else { len };
    }
    len
}
