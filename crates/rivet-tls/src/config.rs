//! Engine configuration.
//!
//! [`ContextData`] bundles the capabilities shared by every engine of one
//! configuration (crypto, key/trust managers, the session cache, an
//! optional observer). [`TlsConfig`] carries the per-engine negotiation
//! parameters; each engine takes its own copy and may adjust it until the
//! handshake begins.

use std::fmt;
use std::sync::Arc;

use crate::crypt::{NamedGroup, SignatureScheme};
use crate::provider::{Crypto, HandshakeObserver, KeyManager, TrustManager};
use crate::session::SessionContext;
use crate::version::ProtocolVersion;
use crate::CipherSuite;
use rivet_types::TlsError;

/// Capabilities shared across engines of one configuration.
pub struct ContextData {
    pub crypto: Arc<dyn Crypto>,
    pub key_manager: Arc<dyn KeyManager>,
    pub trust_manager: Arc<dyn TrustManager>,
    pub sessions: Arc<SessionContext>,
    pub observer: Option<Arc<dyn HandshakeObserver>>,
}

impl ContextData {
    pub fn new(
        crypto: Arc<dyn Crypto>,
        key_manager: Arc<dyn KeyManager>,
        trust_manager: Arc<dyn TrustManager>,
    ) -> Self {
        Self {
            crypto,
            key_manager,
            trust_manager,
            sessions: Arc::new(SessionContext::new()),
            observer: None,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionContext>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn HandshakeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Per-engine negotiation parameters.
#[derive(Clone)]
pub struct TlsConfig {
    /// Enabled protocol versions (any order; negotiation takes the maximum).
    pub enabled_versions: Vec<ProtocolVersion>,
    /// Enabled cipher suites in preference order.
    pub cipher_suites: Vec<CipherSuite>,
    /// Supported key-exchange groups in preference order.
    pub supported_groups: Vec<NamedGroup>,
    /// Supported signature schemes in preference order (TLS 1.2).
    pub signature_schemes: Vec<SignatureScheme>,
    /// ALPN protocols in preference order; empty disables ALPN.
    pub alpn_protocols: Vec<Vec<u8>>,
    /// Server name sent in SNI (client) or expected (server side ignores).
    pub server_name: Option<String>,
    /// Request a client certificate but tolerate its absence.
    pub want_client_auth: bool,
    /// Require a client certificate; absence is fatal.
    pub need_client_auth: bool,
    /// Offer/accept the extended master secret extension.
    pub extended_master_secret: bool,
    /// Allow new sessions to be created and cached.
    pub session_creation: bool,
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Highest enabled version, if any version is enabled.
    pub fn max_version(&self) -> Option<ProtocolVersion> {
        self.enabled_versions.iter().copied().max()
    }

    /// Pre-handshake sanity checks; failures never touch a connection.
    pub fn validate(&self) -> Result<(), TlsError> {
        if self.enabled_versions.is_empty() {
            return Err(TlsError::Config("no protocol versions enabled".into()));
        }
        if self.cipher_suites.is_empty() {
            return Err(TlsError::Config("no cipher suites enabled".into()));
        }
        if self.need_client_auth && !self.want_client_auth {
            // need implies want; normalize at validation time instead of
            // surprising the host later.
            return Err(TlsError::Config(
                "need_client_auth requires want_client_auth".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("enabled_versions", &self.enabled_versions)
            .field("cipher_suites", &self.cipher_suites.len())
            .field("alpn_protocols", &self.alpn_protocols.len())
            .field("server_name", &self.server_name)
            .field("want_client_auth", &self.want_client_auth)
            .field("need_client_auth", &self.need_client_auth)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TlsConfig`].
#[derive(Debug)]
pub struct TlsConfigBuilder {
    enabled_versions: Vec<ProtocolVersion>,
    cipher_suites: Vec<CipherSuite>,
    supported_groups: Vec<NamedGroup>,
    signature_schemes: Vec<SignatureScheme>,
    alpn_protocols: Vec<Vec<u8>>,
    server_name: Option<String>,
    want_client_auth: bool,
    need_client_auth: bool,
    extended_master_secret: bool,
    session_creation: bool,
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self {
            enabled_versions: vec![
                ProtocolVersion::TLS12,
                ProtocolVersion::TLS11,
                ProtocolVersion::TLS10,
            ],
            cipher_suites: vec![
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_RSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
                CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            ],
            supported_groups: vec![NamedGroup::X25519, NamedGroup::SECP256R1],
            signature_schemes: vec![
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::ECDSA_SHA1,
                SignatureScheme::RSA_PKCS1_SHA1,
            ],
            alpn_protocols: Vec::new(),
            server_name: None,
            want_client_auth: false,
            need_client_auth: false,
            extended_master_secret: true,
            session_creation: true,
        }
    }
}

impl TlsConfigBuilder {
    pub fn enabled_versions(mut self, versions: &[ProtocolVersion]) -> Self {
        self.enabled_versions = versions.to_vec();
        self
    }

    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    pub fn supported_groups(mut self, groups: &[NamedGroup]) -> Self {
        self.supported_groups = groups.to_vec();
        self
    }

    pub fn signature_schemes(mut self, schemes: &[SignatureScheme]) -> Self {
        self.signature_schemes = schemes.to_vec();
        self
    }

    pub fn alpn(mut self, protocols: &[&[u8]]) -> Self {
        self.alpn_protocols = protocols.iter().map(|p| p.to_vec()).collect();
        self
    }

    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = Some(name.to_string());
        self
    }

    pub fn want_client_auth(mut self, want: bool) -> Self {
        self.want_client_auth = want;
        self
    }

    pub fn need_client_auth(mut self, need: bool) -> Self {
        self.need_client_auth = need;
        if need {
            self.want_client_auth = true;
        }
        self
    }

    pub fn extended_master_secret(mut self, enabled: bool) -> Self {
        self.extended_master_secret = enabled;
        self
    }

    pub fn session_creation(mut self, enabled: bool) -> Self {
        self.session_creation = enabled;
        self
    }

    pub fn build(self) -> TlsConfig {
        TlsConfig {
            enabled_versions: self.enabled_versions,
            cipher_suites: self.cipher_suites,
            supported_groups: self.supported_groups,
            signature_schemes: self.signature_schemes,
            alpn_protocols: self.alpn_protocols,
            server_name: self.server_name,
            want_client_auth: self.want_client_auth,
            need_client_auth: self.need_client_auth,
            extended_master_secret: self.extended_master_secret,
            session_creation: self.session_creation,
        }
    }
}
