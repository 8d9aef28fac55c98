//! Cipher-suite parameter tables and crypto helpers for the handshake and
//! record layers.

pub mod export;
pub mod key_schedule;
pub mod prf;
pub mod transcript;

use crate::provider::HashFactory;
use crate::version::ProtocolVersion;
use crate::CipherSuite;
use rivet_types::{AeadAlg, AlertDescription, BlockCipherAlg, HashAlg, TlsError};

/// TLS named group identifiers (RFC 8422 §5.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamedGroup(pub u16);

impl NamedGroup {
    pub const SECP256R1: Self = Self(0x0017);
    pub const X25519: Self = Self(0x001D);
}

/// TLS signature-and-hash scheme identifiers (RFC 5246 §7.4.1.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const RSA_PKCS1_SHA1: Self = Self(0x0201);
    pub const ECDSA_SHA1: Self = Self(0x0203);
    pub const RSA_PKCS1_SHA256: Self = Self(0x0401);
    pub const ECDSA_SECP256R1_SHA256: Self = Self(0x0403);
    pub const RSA_PKCS1_SHA384: Self = Self(0x0501);

    /// The abstract algorithm behind the wire scheme, if supported.
    pub fn algorithm(&self) -> Option<SignatureAlgorithm> {
        match *self {
            SignatureScheme::RSA_PKCS1_SHA1 => Some(SignatureAlgorithm::RsaPkcs1(HashAlg::Sha1)),
            SignatureScheme::RSA_PKCS1_SHA256 => {
                Some(SignatureAlgorithm::RsaPkcs1(HashAlg::Sha256))
            }
            SignatureScheme::RSA_PKCS1_SHA384 => {
                Some(SignatureAlgorithm::RsaPkcs1(HashAlg::Sha384))
            }
            SignatureScheme::ECDSA_SHA1 => Some(SignatureAlgorithm::Ecdsa(HashAlg::Sha1)),
            SignatureScheme::ECDSA_SECP256R1_SHA256 => {
                Some(SignatureAlgorithm::Ecdsa(HashAlg::Sha256))
            }
            _ => None,
        }
    }
}

/// An abstract signature algorithm: the wire [`SignatureScheme`] resolved to
/// a (mechanism, hash) pair. The legacy TLS < 1.2 forms use `Md5Sha1`
/// (RSA, no DigestInfo prefix) and `Sha1` (ECDSA) and never appear on the
/// wire as scheme codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaPkcs1(HashAlg),
    Ecdsa(HashAlg),
}

/// Key exchange algorithm of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlg {
    /// Ephemeral ECDH, parameters signed in ServerKeyExchange.
    Ecdhe,
    /// Static RSA: client encrypts the premaster with the server's RSA key.
    Rsa,
}

impl KeyExchangeAlg {
    /// JSSE-style auth string passed to the trust capability.
    pub fn auth_type(&self, auth: AuthAlg) -> &'static str {
        match (self, auth) {
            (KeyExchangeAlg::Rsa, _) => "RSA",
            (KeyExchangeAlg::Ecdhe, AuthAlg::Rsa) => "ECDHE_RSA",
            (KeyExchangeAlg::Ecdhe, AuthAlg::Ecdsa) => "ECDHE_ECDSA",
        }
    }
}

/// Authentication (certificate) algorithm of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAlg {
    Rsa,
    Ecdsa,
}

/// Bulk cipher of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkCipher {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
    Aes128CbcSha,
    Aes256CbcSha,
}

impl BulkCipher {
    pub fn is_aead(&self) -> bool {
        !matches!(self, BulkCipher::Aes128CbcSha | BulkCipher::Aes256CbcSha)
    }

    pub fn aead_alg(&self) -> Option<AeadAlg> {
        match self {
            BulkCipher::Aes128Gcm => Some(AeadAlg::Aes128Gcm),
            BulkCipher::Aes256Gcm => Some(AeadAlg::Aes256Gcm),
            BulkCipher::Chacha20Poly1305 => Some(AeadAlg::Chacha20Poly1305),
            _ => None,
        }
    }

    pub fn block_alg(&self) -> Option<BlockCipherAlg> {
        match self {
            BulkCipher::Aes128CbcSha => Some(BlockCipherAlg::Aes128Cbc),
            BulkCipher::Aes256CbcSha => Some(BlockCipherAlg::Aes256Cbc),
            _ => None,
        }
    }

    /// Encryption key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            BulkCipher::Aes128Gcm | BulkCipher::Aes128CbcSha => 16,
            BulkCipher::Aes256Gcm | BulkCipher::Aes256CbcSha | BulkCipher::Chacha20Poly1305 => 32,
        }
    }

    /// Fixed IV length taken from the key block.
    pub fn fixed_iv_len(&self, version: ProtocolVersion) -> usize {
        match self {
            BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => 4,
            BulkCipher::Chacha20Poly1305 => 12,
            // Explicit-IV versions generate the IV per record instead.
            BulkCipher::Aes128CbcSha | BulkCipher::Aes256CbcSha => {
                if version.uses_explicit_cbc_iv() {
                    0
                } else {
                    16
                }
            }
        }
    }

    /// Per-record explicit IV/nonce length on the wire.
    pub fn record_iv_len(&self, version: ProtocolVersion) -> usize {
        match self {
            BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => 8,
            BulkCipher::Chacha20Poly1305 => 0,
            BulkCipher::Aes128CbcSha | BulkCipher::Aes256CbcSha => {
                if version.uses_explicit_cbc_iv() {
                    16
                } else {
                    0
                }
            }
        }
    }

    /// AEAD tag length (0 for CBC suites).
    pub fn tag_len(&self) -> usize {
        if self.is_aead() {
            16
        } else {
            0
        }
    }

    /// HMAC key/output length (0 for AEAD suites; these suites use SHA-1).
    pub fn mac_len(&self) -> usize {
        if self.is_aead() {
            0
        } else {
            20
        }
    }

    /// CBC block length (0 for AEAD suites).
    pub fn block_len(&self) -> usize {
        if self.is_aead() {
            0
        } else {
            16
        }
    }
}

/// Static parameters bound to a cipher suite identifier.
#[derive(Debug, Clone)]
pub struct CipherSuiteParams {
    pub suite: CipherSuite,
    pub kx_alg: KeyExchangeAlg,
    pub auth_alg: AuthAlg,
    pub bulk: BulkCipher,
    /// PRF hash for TLS 1.2 (earlier versions always use MD5+SHA-1).
    pub prf_hash: HashAlg,
    /// Lowest protocol version the suite is defined for.
    pub min_version: ProtocolVersion,
}

impl CipherSuiteParams {
    /// Look up the static parameters for a suite identifier.
    pub fn from_suite(suite: CipherSuite) -> Result<Self, TlsError> {
        let (kx_alg, auth_alg, bulk, prf_hash, min_version) = match suite {
            CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256 => (
                KeyExchangeAlg::Rsa,
                AuthAlg::Rsa,
                BulkCipher::Aes128Gcm,
                HashAlg::Sha256,
                ProtocolVersion::TLS12,
            ),
            CipherSuite::TLS_RSA_WITH_AES_256_GCM_SHA384 => (
                KeyExchangeAlg::Rsa,
                AuthAlg::Rsa,
                BulkCipher::Aes256Gcm,
                HashAlg::Sha384,
                ProtocolVersion::TLS12,
            ),
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Ecdsa,
                BulkCipher::Aes128Gcm,
                HashAlg::Sha256,
                ProtocolVersion::TLS12,
            ),
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Ecdsa,
                BulkCipher::Aes256Gcm,
                HashAlg::Sha384,
                ProtocolVersion::TLS12,
            ),
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Rsa,
                BulkCipher::Aes128Gcm,
                HashAlg::Sha256,
                ProtocolVersion::TLS12,
            ),
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384 => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Rsa,
                BulkCipher::Aes256Gcm,
                HashAlg::Sha384,
                ProtocolVersion::TLS12,
            ),
            CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256 => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Rsa,
                BulkCipher::Chacha20Poly1305,
                HashAlg::Sha256,
                ProtocolVersion::TLS12,
            ),
            CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256 => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Ecdsa,
                BulkCipher::Chacha20Poly1305,
                HashAlg::Sha256,
                ProtocolVersion::TLS12,
            ),
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA => (
                KeyExchangeAlg::Rsa,
                AuthAlg::Rsa,
                BulkCipher::Aes128CbcSha,
                HashAlg::Sha256,
                ProtocolVersion::TLS10,
            ),
            CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA => (
                KeyExchangeAlg::Rsa,
                AuthAlg::Rsa,
                BulkCipher::Aes256CbcSha,
                HashAlg::Sha256,
                ProtocolVersion::TLS10,
            ),
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Ecdsa,
                BulkCipher::Aes128CbcSha,
                HashAlg::Sha256,
                ProtocolVersion::TLS10,
            ),
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Ecdsa,
                BulkCipher::Aes256CbcSha,
                HashAlg::Sha256,
                ProtocolVersion::TLS10,
            ),
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Rsa,
                BulkCipher::Aes128CbcSha,
                HashAlg::Sha256,
                ProtocolVersion::TLS10,
            ),
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA => (
                KeyExchangeAlg::Ecdhe,
                AuthAlg::Rsa,
                BulkCipher::Aes256CbcSha,
                HashAlg::Sha256,
                ProtocolVersion::TLS10,
            ),
            _ => {
                return Err(TlsError::fatal(
                    AlertDescription::HandshakeFailure,
                    format!("unsupported cipher suite 0x{:04X}", suite.0),
                ))
            }
        };
        Ok(Self {
            suite,
            kx_alg,
            auth_alg,
            bulk,
            prf_hash,
            min_version,
        })
    }

    /// True if the suite may be negotiated at `version`.
    pub fn usable_at(&self, version: ProtocolVersion) -> bool {
        version >= self.min_version
    }

    /// PRF hash output length for TLS 1.2.
    pub fn prf_hash_len(&self) -> usize {
        self.prf_hash.output_len()
    }

    /// Total key block length (RFC 5246 §6.3 layout).
    pub fn key_block_len(&self, version: ProtocolVersion) -> usize {
        2 * self.bulk.mac_len() + 2 * self.bulk.key_len() + 2 * self.bulk.fixed_iv_len(version)
    }

    /// The certificate key type this suite needs on the server.
    pub fn server_key_type(&self) -> crate::provider::KeyType {
        match self.auth_alg {
            AuthAlg::Rsa => crate::provider::KeyType::Rsa,
            AuthAlg::Ecdsa => crate::provider::KeyType::Ec,
        }
    }
}

/// HMAC over the capability [`Digest`](crate::provider::Digest) trait
/// (RFC 2104), used by the PRF and the CBC record MAC.
pub fn hmac(factory: &HashFactory, key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut digest = factory();
    let block_len = digest.block_len();
    let out_len = digest.output_len();

    let mut key_block = vec![0u8; block_len];
    if key.len() > block_len {
        digest.update(key);
        let mut hashed = vec![0u8; out_len];
        digest.finish(&mut hashed);
        key_block[..out_len].copy_from_slice(&hashed);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut ipad = vec![0u8; block_len];
    let mut opad = vec![0u8; block_len];
    for i in 0..block_len {
        ipad[i] = key_block[i] ^ 0x36;
        opad[i] = key_block[i] ^ 0x5c;
    }

    let mut inner = factory();
    inner.update(&ipad);
    inner.update(data);
    let mut inner_hash = vec![0u8; out_len];
    inner.finish(&mut inner_hash);

    let mut outer = factory();
    outer.update(&opad);
    outer.update(&inner_hash);
    let mut out = vec![0u8; out_len];
    outer.finish(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_scheme_wire_values() {
        assert_eq!(SignatureScheme::RSA_PKCS1_SHA256.0, 0x0401);
        assert_eq!(SignatureScheme::ECDSA_SECP256R1_SHA256.0, 0x0403);
        assert_eq!(SignatureScheme::RSA_PKCS1_SHA1.0, 0x0201);
        assert_eq!(SignatureScheme::ECDSA_SHA1.0, 0x0203);
    }

    #[test]
    fn test_scheme_to_algorithm() {
        assert_eq!(
            SignatureScheme::RSA_PKCS1_SHA256.algorithm(),
            Some(SignatureAlgorithm::RsaPkcs1(HashAlg::Sha256))
        );
        assert_eq!(
            SignatureScheme::ECDSA_SECP256R1_SHA256.algorithm(),
            Some(SignatureAlgorithm::Ecdsa(HashAlg::Sha256))
        );
        assert_eq!(SignatureScheme(0x0808).algorithm(), None);
    }

    #[test]
    fn test_suite_params_gcm() {
        let p =
            CipherSuiteParams::from_suite(CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256)
                .unwrap();
        assert_eq!(p.kx_alg, KeyExchangeAlg::Ecdhe);
        assert_eq!(p.auth_alg, AuthAlg::Rsa);
        assert_eq!(p.bulk.key_len(), 16);
        assert_eq!(p.bulk.fixed_iv_len(ProtocolVersion::TLS12), 4);
        assert_eq!(p.bulk.record_iv_len(ProtocolVersion::TLS12), 8);
        assert_eq!(p.bulk.tag_len(), 16);
        assert!(p.bulk.is_aead());
        assert!(!p.usable_at(ProtocolVersion::TLS11));
        assert!(p.usable_at(ProtocolVersion::TLS12));
        // 2*16 + 2*4
        assert_eq!(p.key_block_len(ProtocolVersion::TLS12), 40);
    }

    #[test]
    fn test_suite_params_chacha() {
        let p = CipherSuiteParams::from_suite(
            CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        )
        .unwrap();
        assert_eq!(p.bulk.key_len(), 32);
        assert_eq!(p.bulk.fixed_iv_len(ProtocolVersion::TLS12), 12);
        assert_eq!(p.bulk.record_iv_len(ProtocolVersion::TLS12), 0);
        assert_eq!(p.auth_alg, AuthAlg::Ecdsa);
    }

    #[test]
    fn test_suite_params_cbc_iv_by_version() {
        let p = CipherSuiteParams::from_suite(CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA)
            .unwrap();
        assert!(!p.bulk.is_aead());
        assert_eq!(p.bulk.mac_len(), 20);
        // TLS 1.0: IV comes from the key block, none on the wire
        assert_eq!(p.bulk.fixed_iv_len(ProtocolVersion::TLS10), 16);
        assert_eq!(p.bulk.record_iv_len(ProtocolVersion::TLS10), 0);
        // TLS 1.1+: per-record explicit IV
        assert_eq!(p.bulk.fixed_iv_len(ProtocolVersion::TLS11), 0);
        assert_eq!(p.bulk.record_iv_len(ProtocolVersion::TLS11), 16);
        assert!(p.usable_at(ProtocolVersion::TLS10));
        // 2*20 + 2*16 + 2*16
        assert_eq!(p.key_block_len(ProtocolVersion::TLS10), 104);
        // 2*20 + 2*16
        assert_eq!(p.key_block_len(ProtocolVersion::TLS12), 72);
    }

    #[test]
    fn test_unknown_suite_rejected() {
        assert!(CipherSuiteParams::from_suite(CipherSuite(0x1301)).is_err());
        assert!(
            CipherSuiteParams::from_suite(CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV).is_err()
        );
    }

    #[test]
    fn test_auth_type_strings() {
        assert_eq!(KeyExchangeAlg::Rsa.auth_type(AuthAlg::Rsa), "RSA");
        assert_eq!(KeyExchangeAlg::Ecdhe.auth_type(AuthAlg::Rsa), "ECDHE_RSA");
        assert_eq!(
            KeyExchangeAlg::Ecdhe.auth_type(AuthAlg::Ecdsa),
            "ECDHE_ECDSA"
        );
    }
}
