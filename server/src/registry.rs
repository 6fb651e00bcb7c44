//! Authoritative mapping of session id to session state.
//!
//! Every operation takes the single lock, copies or mutates, and releases it
//! before returning. All methods are synchronous and hand back owned values,
//! so callers cannot hold the lock across an `.await` or a socket call.

use crate::session::{ClientSessionRecord, Connection};
use log::{info, warn};
use shared::{SessionId, Transform, MAX_FRAME_RECORDS};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Transform read from a client during one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformUpdate {
    pub id: SessionId,
    pub transform: Transform,
}

#[derive(Debug)]
struct Inner<C> {
    sessions: BTreeMap<SessionId, ClientSessionRecord<C>>,
    /// Last id handed out; ids are pre-incremented so the first is 1
    last_id: SessionId,
}

/// Registered sessions, ordered by id.
#[derive(Debug)]
pub struct Registry<C = Connection> {
    inner: Mutex<Inner<C>>,
    max_clients: usize,
}

impl<C: Clone> Registry<C> {
    /// Creates an empty registry admitting at most `max_clients` sessions.
    ///
    /// Capped at [`MAX_FRAME_RECORDS`], the largest snapshot a client accepts.
    pub fn new(max_clients: usize) -> Self {
        if max_clients > MAX_FRAME_RECORDS {
            warn!(
                "max_clients {} exceeds the frame limit, capping at {}",
                max_clients, MAX_FRAME_RECORDS
            );
        }
        let max_clients = max_clients.min(MAX_FRAME_RECORDS);

        Self {
            inner: Mutex::new(Inner {
                sessions: BTreeMap::new(),
                last_id: 0,
            }),
            max_clients,
        }
    }

    /// Most sessions this registry will hold.
    pub fn capacity(&self) -> usize {
        self.max_clients
    }

    fn lock(&self) -> MutexGuard<'_, Inner<C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates the next id and inserts a session for it.
    ///
    /// Returns `None` without consuming an id when the registry is full.
    pub fn insert(&self, name: String, transform: Transform, connection: C) -> Option<SessionId> {
        let mut inner = self.lock();
        if inner.sessions.len() >= self.max_clients {
            return None;
        }

        inner.last_id += 1;
        let id = inner.last_id;
        inner
            .sessions
            .insert(id, ClientSessionRecord::new(id, name, transform, connection));
        Some(id)
    }

    /// Point-in-time copy of every session, ordered by id.
    pub fn snapshot(&self) -> Vec<ClientSessionRecord<C>> {
        self.lock().sessions.values().cloned().collect()
    }

    /// Stores each update on the session with the same id and refreshes its
    /// activity time. Updates for sessions that are gone are dropped.
    ///
    /// Returns the number of sessions updated.
    pub fn apply_updates(&self, updates: &[TransformUpdate]) -> usize {
        if updates.is_empty() {
            return 0;
        }

        let now = Instant::now();
        let mut inner = self.lock();
        let mut applied = 0;
        for update in updates {
            if let Some(session) = inner.sessions.get_mut(&update.id) {
                session.transform = update.transform;
                session.last_heard = now;
                applied += 1;
            }
        }
        applied
    }

    /// Returns the number of registered sessions
    pub fn clients(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// Removes and returns sessions that have not reported a transform within
    /// `timeout`. Closing their connections is left to the caller.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<ClientSessionRecord<C>> {
        let mut inner = self.lock();
        let stale: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|session| session.is_timed_out(timeout))
            .map(|session| session.id)
            .collect();

        stale
            .iter()
            .filter_map(|id| inner.sessions.remove(id))
            .inspect(|session| info!("Client {} ({}) timed out", session.id, session.name))
            .collect()
    }

    /// Removes every session. The id counter keeps running.
    pub fn clear(&self) -> Vec<ClientSessionRecord<C>> {
        let sessions = std::mem::take(&mut self.lock().sessions);
        sessions.into_values().collect()
    }
}
