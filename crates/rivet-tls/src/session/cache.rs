//! The session cache shared by all engines of one configuration.
//!
//! A single lock guards the ID map, the by-peer index, and the bounds;
//! last-accessed timestamps live on the sessions themselves and are updated
//! under that lock. Expired entries are never returned and are evicted
//! lazily; capacity pressure evicts the least recently accessed entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{now_millis, TlsSession};

/// Default bound on cached sessions.
pub const DEFAULT_CACHE_SIZE: usize = 20480;
/// Default session lifetime: 24 hours.
pub const DEFAULT_TIMEOUT_SECS: u64 = 24 * 60 * 60;

struct CacheInner {
    by_id: HashMap<Vec<u8>, Arc<TlsSession>>,
    /// (host, port) -> session ID of the most recent session with that peer.
    by_peer: HashMap<(String, u16), Vec<u8>>,
    /// 0 means unbounded.
    capacity: usize,
    timeout_secs: u64,
}

impl CacheInner {
    fn is_expired(&self, session: &TlsSession, now: u64) -> bool {
        self.timeout_secs > 0
            && now.saturating_sub(session.last_accessed_time()) > self.timeout_secs * 1000
    }

    fn remove(&mut self, id: &[u8]) -> Option<Arc<TlsSession>> {
        let session = self.by_id.remove(id)?;
        if let (Some(host), Some(port)) = (session.peer_host(), session.peer_port()) {
            let key = (host.to_string(), port);
            if self.by_peer.get(&key).is_some_and(|mapped| mapped == id) {
                self.by_peer.remove(&key);
            }
        }
        Some(session)
    }

    /// Drop expired entries, then least-recently-accessed entries until the
    /// capacity bound holds.
    fn enforce_bounds(&mut self, now: u64) {
        let expired: Vec<Vec<u8>> = self
            .by_id
            .iter()
            .filter(|(_, s)| self.is_expired(s, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.remove(&id);
        }

        while self.capacity > 0 && self.by_id.len() > self.capacity {
            let Some(oldest) = self
                .by_id
                .iter()
                .min_by_key(|(_, s)| s.last_accessed_time())
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            self.remove(&oldest);
        }
    }
}

/// Thread-safe, bounded, TTL-scoped session store.
pub struct SessionContext {
    inner: Mutex<CacheInner>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::with_bounds(DEFAULT_CACHE_SIZE, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_bounds(capacity: usize, timeout_secs: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                by_id: HashMap::new(),
                by_peer: HashMap::new(),
                capacity,
                timeout_secs,
            }),
        }
    }

    /// Look up a session by ID. Touches the access time; expired or
    /// invalidated entries are removed and not returned.
    pub fn get(&self, id: &[u8]) -> Option<Arc<TlsSession>> {
        if id.is_empty() {
            return None;
        }
        let now = now_millis();
        let mut inner = self.inner.lock().expect("session cache poisoned");
        let session = inner.by_id.get(id).cloned()?;
        if inner.is_expired(&session, now) || !session.is_valid() {
            inner.remove(id);
            return None;
        }
        session.accessed_at(now);
        Some(session)
    }

    /// The most recent resumable session negotiated with `(host, port)`,
    /// used for the client-side resumption offer.
    pub fn get_by_peer(&self, host: &str, port: u16) -> Option<Arc<TlsSession>> {
        let id = {
            let inner = self.inner.lock().expect("session cache poisoned");
            inner.by_peer.get(&(host.to_string(), port)).cloned()?
        };
        let session = self.get(&id)?;
        session.is_resumable().then_some(session)
    }

    /// Store a session. Sessions without an ID are not cacheable.
    pub fn put(&self, session: Arc<TlsSession>) {
        if session.id().is_empty() {
            return;
        }
        let now = now_millis();
        session.accessed_at(now);
        let mut inner = self.inner.lock().expect("session cache poisoned");
        if let (Some(host), Some(port)) = (session.peer_host(), session.peer_port()) {
            inner
                .by_peer
                .insert((host.to_string(), port), session.id().to_vec());
        }
        inner.by_id.insert(session.id().to_vec(), session);
        inner.enforce_bounds(now);
    }

    /// Invalidate and remove the session under `id`. Idempotent.
    pub fn invalidate(&self, id: &[u8]) {
        let mut inner = self.inner.lock().expect("session cache poisoned");
        if let Some(session) = inner.remove(id) {
            session.invalidate();
        }
    }

    /// Change the capacity bound; 0 means unbounded. Shrinking evicts
    /// immediately.
    pub fn set_cache_size(&self, capacity: usize) {
        let mut inner = self.inner.lock().expect("session cache poisoned");
        inner.capacity = capacity;
        inner.enforce_bounds(now_millis());
    }

    pub fn cache_size(&self) -> usize {
        self.inner.lock().expect("session cache poisoned").capacity
    }

    /// Change the TTL in seconds; 0 disables expiry.
    pub fn set_timeout(&self, timeout_secs: u64) {
        let mut inner = self.inner.lock().expect("session cache poisoned");
        inner.timeout_secs = timeout_secs;
        inner.enforce_bounds(now_millis());
    }

    pub fn timeout(&self) -> u64 {
        self.inner
            .lock()
            .expect("session cache poisoned")
            .timeout_secs
    }

    /// Number of live entries (expired entries may still be counted until
    /// they are lazily evicted).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("session cache poisoned").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
