//! Security parameters and the per-connection context.
//!
//! Each connection owns two parameter slots: the set being negotiated and
//! the set of the last completed handshake. Exactly one transition happens
//! per handshake: the handshake slot, once populated, replaces the
//! connection slot and is cleared. Channel bindings and keying-material
//! export read the completed slot only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypt::export::export_keying_material;
use crate::provider::Crypto;
use crate::session::TlsSession;
use crate::version::ProtocolVersion;
use crate::{CipherSuite, TlsRole};
use rivet_types::{AlertDescription, HashAlg, TlsError};

/// Process-wide counter feeding per-connection nonce-generator seeds.
/// Collisions between connections are unacceptable, hence the atomic.
static NONCE_SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A 16-byte nonce-generator seed: counter, wall-clock nanos, and the
/// connection end folded into the first byte.
pub fn next_nonce_seed(entity: TlsRole) -> [u8; 16] {
    let counter = NONCE_SEED_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 | (d.as_secs() << 32))
        .unwrap_or(0);

    let mut seed = [0u8; 16];
    seed[..8].copy_from_slice(&counter.to_be_bytes());
    seed[8..].copy_from_slice(&nanos.to_be_bytes());
    seed[0] = match entity {
        TlsRole::Client => 1,
        TlsRole::Server => 2,
    };
    seed
}

/// Channel binding types (RFC 5929).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelBindingType {
    /// The first Finished message of the most recent handshake.
    TlsUnique,
    /// A hash of the server's end-entity certificate.
    TlsServerEndPoint,
}

/// The mutable bag of negotiated values for one handshake or connection.
pub struct SecurityParameters {
    pub entity: TlsRole,
    pub negotiated_version: Option<ProtocolVersion>,
    pub cipher_suite: Option<CipherSuite>,
    pub prf_hash: Option<HashAlg>,
    pub client_random: Option<[u8; 32]>,
    pub server_random: Option<[u8; 32]>,
    /// 48 bytes once derived; zeroized on drop.
    pub master_secret: Vec<u8>,
    /// Transcript hash through ClientKeyExchange when EMS is active.
    pub session_hash: Option<Vec<u8>>,
    pub extended_master_secret: bool,
    pub peer_certificate: Option<Vec<Vec<u8>>>,
    pub local_certificate: Option<Vec<Vec<u8>>>,
    pub secure_renegotiation: bool,
    /// Our Finished verify_data from this handshake.
    pub local_verify_data: Vec<u8>,
    /// The peer's Finished verify_data from this handshake.
    pub peer_verify_data: Vec<u8>,
    /// First Finished of the handshake (RFC 5929 tls-unique).
    pub tls_unique: Vec<u8>,
    /// Hash of the server's end-entity certificate (RFC 5929).
    pub tls_server_end_point: Vec<u8>,
    /// Negotiated ALPN protocol.
    pub application_protocol: Option<Vec<u8>>,
}

impl SecurityParameters {
    pub fn new(entity: TlsRole) -> Self {
        Self {
            entity,
            negotiated_version: None,
            cipher_suite: None,
            prf_hash: None,
            client_random: None,
            server_random: None,
            master_secret: Vec::new(),
            session_hash: None,
            extended_master_secret: false,
            peer_certificate: None,
            local_certificate: None,
            secure_renegotiation: false,
            local_verify_data: Vec::new(),
            peer_verify_data: Vec::new(),
            tls_unique: Vec::new(),
            tls_server_end_point: Vec::new(),
            application_protocol: None,
        }
    }
}

impl Drop for SecurityParameters {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.master_secret.zeroize();
    }
}

fn internal_error(reason: &str) -> TlsError {
    TlsError::fatal(AlertDescription::InternalError, reason.to_string())
}

/// Per-connection authoritative state shared between the handshake machine
/// and the record layer.
pub struct ConnectionContext {
    entity: TlsRole,
    params_handshake: Option<SecurityParameters>,
    params_connection: Option<SecurityParameters>,
    session: Option<Arc<TlsSession>>,
}

impl ConnectionContext {
    pub fn new(entity: TlsRole) -> Self {
        Self {
            entity,
            params_handshake: None,
            params_connection: None,
            session: None,
        }
    }

    pub fn entity(&self) -> TlsRole {
        self.entity
    }

    /// Populate the handshake slot. Fails if a handshake is already in
    /// progress. The engine runs exactly one handshake per connection, so
    /// the connection slot is necessarily empty here; renegotiation
    /// attempts are rejected before they ever reach this point.
    pub fn handshake_beginning(&mut self) -> Result<(), TlsError> {
        if self.params_handshake.is_some() {
            return Err(internal_error("handshake already in progress"));
        }
        self.params_handshake = Some(SecurityParameters::new(self.entity));
        Ok(())
    }

    /// Freeze the handshake slot into the connection slot and record the
    /// negotiated session. The single transition per handshake.
    pub fn handshake_complete(&mut self, session: Arc<TlsSession>) -> Result<(), TlsError> {
        let params = self
            .params_handshake
            .take()
            .ok_or_else(|| internal_error("no handshake in progress"))?;
        self.params_connection = Some(params);
        self.session = Some(session);
        Ok(())
    }

    /// The in-progress parameters if a handshake is running, else the last
    /// completed set.
    pub fn security_parameters(&self) -> Option<&SecurityParameters> {
        self.params_handshake
            .as_ref()
            .or(self.params_connection.as_ref())
    }

    pub fn security_parameters_handshake(&self) -> Option<&SecurityParameters> {
        self.params_handshake.as_ref()
    }

    pub fn security_parameters_handshake_mut(&mut self) -> Result<&mut SecurityParameters, TlsError> {
        self.params_handshake
            .as_mut()
            .ok_or_else(|| internal_error("no handshake in progress"))
    }

    pub fn security_parameters_connection(&self) -> Option<&SecurityParameters> {
        self.params_connection.as_ref()
    }

    pub fn session(&self) -> Option<&Arc<TlsSession>> {
        self.session.as_ref()
    }

    /// The negotiated session if it can still drive an abbreviated
    /// handshake.
    pub fn resumable_session(&self) -> Option<&Arc<TlsSession>> {
        self.session.as_ref().filter(|s| s.is_resumable())
    }

    /// Export a channel binding (RFC 5929). Only available once the
    /// handshake has completed.
    pub fn channel_binding(&self, binding: ChannelBindingType) -> Result<Vec<u8>, TlsError> {
        let params = self.params_connection.as_ref().ok_or_else(|| {
            TlsError::Misuse("channel bindings unavailable before handshake completion".into())
        })?;
        match binding {
            ChannelBindingType::TlsUnique => Ok(params.tls_unique.clone()),
            ChannelBindingType::TlsServerEndPoint => Ok(params.tls_server_end_point.clone()),
        }
    }

    /// Export keying material (RFC 5705) from the completed handshake.
    ///
    /// Refused without the extended master secret: RFC 7627 §5.4 forbids
    /// exporting from a master secret that is not bound to the transcript.
    pub fn export_keying_material(
        &self,
        crypto: &dyn Crypto,
        label: &str,
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>, TlsError> {
        let params = self.params_connection.as_ref().ok_or_else(|| {
            TlsError::Misuse("key material unavailable before handshake completion".into())
        })?;
        if !params.extended_master_secret {
            return Err(TlsError::Misuse(
                "cannot export keying material without extended_master_secret".into(),
            ));
        }
        let (version, prf_hash, client_random, server_random) = match (
            params.negotiated_version,
            params.prf_hash,
            params.client_random,
            params.server_random,
        ) {
            (Some(v), Some(h), Some(cr), Some(sr)) => (v, h, cr, sr),
            _ => return Err(internal_error("incomplete connection parameters")),
        };
        export_keying_material(
            crypto,
            version,
            prf_hash,
            &params.master_secret,
            &client_random,
            &server_random,
            label,
            context,
            length,
        )
    }
}
