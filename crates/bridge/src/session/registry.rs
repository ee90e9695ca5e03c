//! Registry of the sessions this process is running.
//!
//! A key is reserved before establishment starts so that a second request
//! for the same key is rejected instead of racing the first one. The
//! reservation is released when its guard is dropped without activation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;

use super::lifecycle::SessionHandle;
use super::{SessionError, SessionKey, SessionState};

struct Slot {
    handle: Option<SessionHandle>,
    since: Instant,
}

/// Information about a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub task_manager_id: String,
    pub session_id: String,
    pub state: SessionState,
    /// Seconds since the key was reserved.
    pub uptime_secs: u64,
}

/// Thread-safe session registry backed by DashMap.
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Slot>,
    count: watch::Sender<usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            sessions: DashMap::new(),
            count,
        }
    }

    /// Reserves `key` for a session about to be established.
    ///
    /// The key stays taken while the returned guard lives, and for good once
    /// the guard is activated.
    pub fn reserve(self: &Arc<Self>, key: &SessionKey) -> Result<Reservation, SessionError> {
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyActive(key.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    handle: None,
                    since: Instant::now(),
                });
            }
        }
        self.publish_count();
        Ok(Reservation {
            registry: Arc::clone(self),
            key: key.clone(),
            armed: true,
        })
    }

    /// Records the handle of an established session under its reserved key.
    fn activate(&self, handle: SessionHandle) {
        let key = handle.key().clone();
        match self.sessions.get_mut(&key) {
            Some(mut slot) => slot.handle = Some(handle),
            None => {
                self.sessions.insert(
                    key,
                    Slot {
                        handle: Some(handle),
                        since: Instant::now(),
                    },
                );
                self.publish_count();
            }
        }
    }

    /// Removes `key`, after termination or a failed establishment.
    pub fn remove(&self, key: &SessionKey) {
        if self.sessions.remove(key).is_some() {
            tracing::debug!(session = %key, "Removed session from registry");
            self.publish_count();
        }
    }

    /// Lists every registered session, sorted by key.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                task_manager_id: entry.key().task_manager_id().to_string(),
                session_id: entry.key().session_id().to_string(),
                state: entry
                    .value()
                    .handle
                    .as_ref()
                    .map_or(SessionState::Init, SessionHandle::state),
                uptime_secs: entry.value().since.elapsed().as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| {
            (&a.task_manager_id, &a.session_id).cmp(&(&b.task_manager_id, &b.session_id))
        });
        sessions
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Cancels every active session.
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            if let Some(handle) = &entry.value().handle {
                handle.cancel();
            }
        }
    }

    /// Waits until the registry is empty. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut count = self.count.subscribe();
        let idle = tokio::time::timeout(timeout, count.wait_for(|n| *n == 0))
            .await
            .is_ok();
        idle
    }

    fn publish_count(&self) {
        self.count.send_replace(self.sessions.len());
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A reserved key. Dropping it before [`Reservation::activate`] frees the
/// key again.
pub struct Reservation {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    armed: bool,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("key", &self.key)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl Reservation {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Hands the key over to an established session. From here on the
    /// session's supervisor removes it.
    pub fn activate(mut self, handle: SessionHandle) {
        self.armed = false;
        self.registry.activate(handle);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(session = %self.key, "Releasing unused reservation");
            self.registry.remove(&self.key);
        }
    }
}
