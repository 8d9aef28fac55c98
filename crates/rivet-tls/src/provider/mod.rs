//! Capability traits consumed by the engine.
//!
//! The engine never touches cryptographic primitives, key stores, or trust
//! decisions directly: primitives come through [`Crypto`], identities through
//! [`KeyManager`], chain validation through [`TrustManager`], and handshake
//! lifecycle events go out through [`HandshakeObserver`]. Certificates are
//! opaque DER blobs end to end; the only "parsing" the engine asks for is
//! public-key extraction, which is part of the crypto capability.

#[cfg(feature = "rustcrypto-provider")]
pub mod rustcrypto;

use std::sync::Arc;

use crate::crypt::{NamedGroup, SignatureAlgorithm};
use crate::session::TlsSession;
use rivet_types::{AeadAlg, AlertDescription, BlockCipherAlg, CryptoError, HashAlg};

/// An incremental message digest.
pub trait Digest: Send {
    fn update(&mut self, data: &[u8]);
    /// Write the digest of everything fed so far and reset the state.
    fn finish(&mut self, out: &mut [u8]);
    /// Digest output size in bytes.
    fn output_len(&self) -> usize;
    /// Internal block size in bytes (needed for HMAC).
    fn block_len(&self) -> usize;
}

/// A factory closure that creates fresh [`Digest`] instances.
pub type HashFactory = Box<dyn Fn() -> Box<dyn Digest> + Send + Sync>;

/// Authenticated encryption with associated data.
pub trait Aead: Send {
    /// Returns `ciphertext || tag`.
    fn encrypt(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    /// Input is `ciphertext || tag`; returns the plaintext.
    fn decrypt(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn tag_len(&self) -> usize;
}

/// A CBC-mode block cipher operating in place on whole blocks.
pub trait BlockCipher: Send {
    fn encrypt(&self, iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError>;
    fn decrypt(&self, iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError>;
    fn block_len(&self) -> usize;
}

/// One ephemeral key-agreement exchange. `agree` consumes the secret.
pub trait KeyAgreement: Send {
    /// Our public value in the group's wire encoding (uncompressed point or
    /// raw X25519 bytes).
    fn public_key(&self) -> Vec<u8>;
    fn agree(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Deterministic nonce source seeded per connection.
pub trait NonceGenerator: Send {
    fn next_nonce(&mut self, len: usize) -> Vec<u8>;
}

/// An extracted peer public key.
#[derive(Clone)]
pub enum PublicKey {
    /// RSA modulus and exponent, big-endian.
    Rsa { n: Vec<u8>, e: Vec<u8> },
    /// Elliptic-curve point (uncompressed SEC1) on the named group.
    Ec { group: NamedGroup, point: Vec<u8> },
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublicKey::Rsa { n, .. } => write!(f, "PublicKey::Rsa({} bits)", n.len() * 8),
            PublicKey::Ec { group, .. } => write!(f, "PublicKey::Ec({group:?})"),
        }
    }
}

/// The key type of an identity, used for alias selection and suite filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ec,
}

impl KeyType {
    /// JSSE-style name, used as the `auth_type` for trust checks.
    pub fn name(&self) -> &'static str {
        match self {
            KeyType::Rsa => "RSA",
            KeyType::Ec => "EC",
        }
    }
}

/// A private-key handle held by the key manager.
pub trait PrivateKey: Send + Sync {
    fn key_type(&self) -> KeyType;
    /// Sign `data` (the provider hashes per the algorithm).
    fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
    /// PKCS#1 v1.5 decryption of an encrypted premaster secret (RSA key
    /// exchange only).
    fn decrypt_premaster(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let _ = ciphertext;
        Err(CryptoError::NotSupported)
    }
}

/// Cryptographic primitive capability.
///
/// Must be thread-safe for concurrent use across engines; per-handshake
/// working state lives in the engine, never here.
pub trait Crypto: Send + Sync {
    fn hash_factory(&self, alg: HashAlg) -> HashFactory;
    fn random_bytes(&self, out: &mut [u8]) -> Result<(), CryptoError>;
    fn create_aead(&self, alg: AeadAlg, key: &[u8]) -> Result<Box<dyn Aead>, CryptoError>;
    fn create_block_cipher(
        &self,
        alg: BlockCipherAlg,
        key: &[u8],
    ) -> Result<Box<dyn BlockCipher>, CryptoError>;
    fn create_nonce_generator(&self, seed: &[u8]) -> Box<dyn NonceGenerator>;
    fn start_key_agreement(&self, group: NamedGroup) -> Result<Box<dyn KeyAgreement>, CryptoError>;
    fn verify_signature(
        &self,
        algorithm: SignatureAlgorithm,
        key: &PublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError>;
    /// PKCS#1 v1.5 encryption of the premaster secret (RSA key exchange).
    fn rsa_encrypt_premaster(
        &self,
        key: &PublicKey,
        premaster: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
    /// Extract the subject public key from a DER certificate ("encoding
    /// conversion" — no path validation happens here).
    fn extract_public_key(&self, cert_der: &[u8]) -> Result<PublicKey, CryptoError>;
}

/// A failed trust decision, optionally requesting a specific alert.
#[derive(Debug)]
pub struct TrustError {
    pub alert: Option<AlertDescription>,
    pub reason: String,
}

impl TrustError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            alert: None,
            reason: reason.into(),
        }
    }

    pub fn with_alert(alert: AlertDescription, reason: impl Into<String>) -> Self {
        Self {
            alert: Some(alert),
            reason: reason.into(),
        }
    }

    /// The alert to send: the requested one, else `certificate_unknown`.
    pub fn alert(&self) -> AlertDescription {
        self.alert.unwrap_or(AlertDescription::CertificateUnknown)
    }
}

/// Chain validation capability. `auth_type` follows JSSE conventions: the
/// key-exchange string for server checks ("RSA", "ECDHE_RSA",
/// "ECDHE_ECDSA"), the certificate key type for client checks.
pub trait TrustManager: Send + Sync {
    fn check_client_trusted(&self, chain: &[Vec<u8>], auth_type: &str) -> Result<(), TrustError>;
    fn check_server_trusted(&self, chain: &[Vec<u8>], auth_type: &str) -> Result<(), TrustError>;
}

/// Identity selection capability.
pub trait KeyManager: Send + Sync {
    /// Pick a client identity matching any of `key_types` and, when issuers
    /// are given, issued by one of them (DER-encoded names).
    fn choose_client_alias(
        &self,
        key_types: &[KeyType],
        issuers: Option<&[Vec<u8>]>,
    ) -> Option<String>;
    fn choose_server_alias(&self, key_type: KeyType, issuers: Option<&[Vec<u8>]>)
        -> Option<String>;
    fn private_key(&self, alias: &str) -> Option<Arc<dyn PrivateKey>>;
    /// DER chain, leaf first.
    fn certificate_chain(&self, alias: &str) -> Option<Vec<Vec<u8>>>;
}

/// Host listener for handshake lifecycle events.
pub trait HandshakeObserver: Send + Sync {
    /// Called before Finished validation with the in-progress session.
    fn handshake_session(&self, session: &Arc<TlsSession>) {
        let _ = session;
    }
    /// Called once per handshake, after both Finished messages verify.
    fn handshake_complete(&self, session: &Arc<TlsSession>) {
        let _ = session;
    }
}
