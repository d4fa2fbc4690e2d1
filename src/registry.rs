//! Session registry and broadcast hub.
//!
//! All live connections are tracked here, keyed by connection id. The map and
//! the history buffer sit behind one mutex so a broadcast's history append
//! and its recipient snapshot happen in a single critical section. Delivery
//! itself is a lock-free `try_send` to each session's writer channel; a
//! failed send routes the recipient through the full disconnect sequence.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::history::{HistoryBuffer, HistoryEntry};

/// Maximum number of concurrently registered connections.
pub const MAX_CLIENTS: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("server full")]
    Full,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliverError {
    #[error("User not found.")]
    RecipientNotFound,
}

/// One registered session: published display-name snapshot plus the write
/// endpoint and the close signal for its connection task.
pub struct SessionEntry {
    pub name: String,
    pub auth_user: Option<String>,
    tx: mpsc::Sender<String>,
    closing: Arc<Notify>,
}

struct Inner {
    /// Monotonic ids make BTreeMap iteration == insertion order, which keeps
    /// `/who` listings stable.
    sessions: BTreeMap<u64, SessionEntry>,
    history: HistoryBuffer,
    next_id: u64,
}

/// The shared hub, owned by `ServerState`. Every operation takes the single
/// internal lock for as short a span as possible and never holds it across
/// an await point (there are none; all delivery is `try_send`).
pub struct Hub {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CLIENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: BTreeMap::new(),
                history: HistoryBuffer::default(),
                next_id: 1,
            }),
            capacity,
        }
    }

    /// Register a new connection, assigning its id. Fails with `Full` at
    /// capacity, in which case the caller refuses the connection before any
    /// identity exists. Ids are never reused.
    pub fn register(
        &self,
        tx: mpsc::Sender<String>,
        closing: Arc<Notify>,
    ) -> Result<u64, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.len() >= self.capacity {
            return Err(RegistryError::Full);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.sessions.insert(
            id,
            SessionEntry {
                name: format!("User{id}"),
                auth_user: None,
                tx,
                closing,
            },
        );
        Ok(id)
    }

    /// Publish a session's current display name (and account, if logged in)
    /// so `/who`, `/msg` lookup and the login-uniqueness scan see it.
    pub fn update_name(&self, id: u64, name: String, auth_user: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.name = name;
            entry.auth_user = auth_user;
        }
    }

    /// Remove a session. Idempotent: removing an absent id is a no-op.
    pub fn remove(&self, id: u64) -> Option<SessionEntry> {
        self.inner.lock().unwrap().sessions.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append to history and snapshot the recipients in one critical
    /// section, then fan out. Returns ids whose delivery failed.
    fn broadcast_raw(&self, line: &str, exclude: Option<u64>) -> Vec<u64> {
        let recipients: Vec<(u64, mpsc::Sender<String>)> = {
            let mut inner = self.inner.lock().unwrap();
            inner.history.push(line);
            inner
                .sessions
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, e)| (*id, e.tx.clone()))
                .collect()
        };
        let mut dead = Vec::new();
        for (id, tx) in recipients {
            if tx.try_send(line.to_string()).is_err() {
                dead.push(id);
            }
        }
        dead
    }

    /// Fan a line out to every registered session except `exclude`. Failed
    /// endpoints go through the full disconnect sequence; their departure
    /// announcements are new broadcast calls, never a re-entry for this line.
    pub fn broadcast(&self, line: &str, exclude: Option<u64>) {
        for id in self.broadcast_raw(line, exclude) {
            self.disconnect(id, "write-error");
        }
    }

    /// Deliver a private line to the session whose display name matches
    /// exactly. A transport failure on the target runs the target's
    /// disconnect; the caller still confirms to the sender.
    pub fn private(&self, target_name: &str, line: &str) -> Result<(), DeliverError> {
        let found = {
            let inner = self.inner.lock().unwrap();
            inner
                .sessions
                .iter()
                .find(|(_, e)| e.name == target_name)
                .map(|(id, e)| (*id, e.tx.clone()))
        };
        let (id, tx) = found.ok_or(DeliverError::RecipientNotFound)?;
        if tx.try_send(line.to_string()).is_err() {
            self.disconnect(id, "write-error");
        }
        Ok(())
    }

    /// Snapshot of display names at call time, in registration order.
    pub fn list_online(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.values().map(|e| e.name.clone()).collect()
    }

    /// Best-effort scan: is this account name held by a live session?
    /// Checked at login time only, not continuously.
    pub fn is_online(&self, username: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .values()
            .any(|e| e.auth_user.as_deref() == Some(username))
    }

    /// The most recent `n` history entries for replay to a new connection.
    pub fn replay(&self, n: usize) -> Vec<HistoryEntry> {
        self.inner.lock().unwrap().history.recent(n)
    }

    /// Tear down a connection exactly once: first remover wins, later and
    /// concurrent calls are absorbed. Best-effort farewell, close signal to
    /// the owning task, then the departure broadcast. Failed recipients of
    /// that broadcast are torn down in turn via a worklist, so teardown
    /// never recurses.
    pub fn disconnect(&self, id: u64, reason: &str) {
        let mut pending = vec![(id, reason.to_string())];
        while let Some((id, reason)) = pending.pop() {
            let Some(entry) = self.remove(id) else {
                continue;
            };
            let _ = entry.tx.try_send("Goodbye.".to_string());
            entry.closing.notify_one();
            tracing::info!(id, %reason, "Disconnected {}", entry.name);
            let line = format!("* {} disconnected ({reason})", entry.name);
            for dead in self.broadcast_raw(&line, None) {
                pending.push((dead, "write-error".to_string()));
            }
        }
    }
}
