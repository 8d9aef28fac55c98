//! TLS sessions: the immutable resumable tuple plus the host-facing value
//! map with bind/unbind notification.

pub mod cache;

pub use cache::SessionContext;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::version::ProtocolVersion;
use crate::CipherSuite;
use zeroize::Zeroize;

/// Wall-clock milliseconds since the epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Listener interface for session value binding events.
pub trait SessionBindingListener: Send + Sync {
    fn value_bound(&self, session: &Arc<TlsSession>, name: &str);
    fn value_unbound(&self, session: &Arc<TlsSession>, name: &str);
}

/// An opaque host value attached to a session. Values that want binding
/// notifications return a listener from [`SessionValue::binding_listener`].
pub trait SessionValue: Any + Send + Sync {
    fn binding_listener(&self) -> Option<&dyn SessionBindingListener> {
        None
    }
    fn as_any(&self) -> &dyn Any;
}

/// A negotiated TLS session.
///
/// The negotiated tuple is immutable; mutability is confined to the access
/// timestamp, the invalidation flag, and the value map. A session is
/// resumable iff its ID is non-empty and it has not been invalidated.
pub struct TlsSession {
    id: Vec<u8>,
    version: ProtocolVersion,
    cipher_suite: CipherSuite,
    master_secret: Vec<u8>,
    peer_certificate: Option<Vec<Vec<u8>>>,
    local_certificate: Option<Vec<Vec<u8>>>,
    extended_master_secret: bool,
    peer_host: Option<String>,
    peer_port: Option<u16>,
    creation_time: u64,
    last_accessed: AtomicU64,
    invalidated: AtomicBool,
    values: Mutex<HashMap<String, Arc<dyn SessionValue>>>,
}

impl Drop for TlsSession {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

impl TlsSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Vec<u8>,
        version: ProtocolVersion,
        cipher_suite: CipherSuite,
        master_secret: Vec<u8>,
        peer_certificate: Option<Vec<Vec<u8>>>,
        local_certificate: Option<Vec<Vec<u8>>>,
        extended_master_secret: bool,
        peer_host: Option<String>,
        peer_port: Option<u16>,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            version,
            cipher_suite,
            master_secret,
            peer_certificate,
            local_certificate,
            extended_master_secret,
            peer_host,
            peer_port,
            creation_time: now,
            last_accessed: AtomicU64::new(now),
            invalidated: AtomicBool::new(false),
            values: Mutex::new(HashMap::new()),
        }
    }

    /// The null session: empty ID, nothing negotiated. Returned by engines
    /// before any handshake has completed.
    pub fn null() -> Self {
        Self::new(
            Vec::new(),
            ProtocolVersion::TLS12,
            CipherSuite(0x0000),
            Vec::new(),
            None,
            None,
            false,
            None,
            None,
        )
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub(crate) fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    pub fn peer_certificate(&self) -> Option<&[Vec<u8>]> {
        self.peer_certificate.as_deref()
    }

    pub fn local_certificate(&self) -> Option<&[Vec<u8>]> {
        self.local_certificate.as_deref()
    }

    pub fn extended_master_secret(&self) -> bool {
        self.extended_master_secret
    }

    pub fn peer_host(&self) -> Option<&str> {
        self.peer_host.as_deref()
    }

    pub fn peer_port(&self) -> Option<u16> {
        self.peer_port
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn last_accessed_time(&self) -> u64 {
        self.last_accessed.load(Ordering::Acquire)
    }

    /// Monotonic access-time update: `new = max(old, access_time)`.
    pub fn accessed_at(&self, access_time: u64) {
        self.last_accessed.fetch_max(access_time, Ordering::AcqRel);
    }

    #[cfg(test)]
    pub(crate) fn force_last_accessed(&self, access_time: u64) {
        self.last_accessed.store(access_time, Ordering::Release);
    }

    /// Idempotent. An invalidated session never resumes again; handshakes
    /// that already picked it up may still complete.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::Acquire)
    }

    pub fn is_resumable(&self) -> bool {
        !self.id.is_empty() && self.is_valid()
    }

    /// Largest application-data fragment the record layer will produce.
    pub fn application_buffer_size(&self) -> usize {
        1 << 14
    }

    /// Worst case for a single wrap output, accounting for a possible
    /// application-data split before TLS 1.1.
    pub fn packet_buffer_size(&self) -> usize {
        (1 << 14) + 1 + 2 * (crate::record::HEADER_LEN + 1024)
    }

    // -- value map ----------------------------------------------------------

    /// Bind `value` under `name`. Fires `value_unbound` for a displaced
    /// value, then `value_bound` for the new one, both outside the map
    /// guard so listeners may re-enter the session.
    pub fn put_value(self: &Arc<Self>, name: &str, value: Arc<dyn SessionValue>) {
        let old = {
            let mut values = self.values.lock().expect("session value map poisoned");
            values.insert(name.to_string(), Arc::clone(&value))
        };
        if let Some(old) = old {
            if let Some(listener) = old.binding_listener() {
                listener.value_unbound(self, name);
            }
        }
        if let Some(listener) = value.binding_listener() {
            listener.value_bound(self, name);
        }
    }

    pub fn get_value(&self, name: &str) -> Option<Arc<dyn SessionValue>> {
        self.values
            .lock()
            .expect("session value map poisoned")
            .get(name)
            .cloned()
    }

    /// Remove the binding under `name`, firing `value_unbound` outside the
    /// guard.
    pub fn remove_value(self: &Arc<Self>, name: &str) {
        let old = {
            let mut values = self.values.lock().expect("session value map poisoned");
            values.remove(name)
        };
        if let Some(old) = old {
            if let Some(listener) = old.binding_listener() {
                listener.value_unbound(self, name);
            }
        }
    }

    pub fn value_names(&self) -> Vec<String> {
        self.values
            .lock()
            .expect("session value map poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("id_len", &self.id.len())
            .field("version", &self.version)
            .field("cipher_suite", &self.cipher_suite)
            .field("extended_master_secret", &self.extended_master_secret)
            .field("resumable", &self.is_resumable())
            .finish_non_exhaustive()
    }
}
