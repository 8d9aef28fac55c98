//! Default [`Crypto`] capability backed by the RustCrypto crates.
//!
//! Public-key extraction does not parse X.509: it scans the DER blob for the
//! algorithm OID and reads the SubjectPublicKeyInfo that follows, which is
//! sufficient for well-formed certificates and keeps path validation where
//! it belongs, in the trust capability.

use super::{Aead, BlockCipher, Crypto, Digest, HashFactory, KeyAgreement, NonceGenerator,
            PrivateKey, PublicKey};
use crate::crypt::{NamedGroup, SignatureAlgorithm};
use rivet_types::{AeadAlg, BlockCipherAlg, CryptoError, HashAlg};

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead as _, KeyInit, Payload};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{OsRng, RngCore};
use rsa::{BigUint, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::digest::{FixedOutputReset, Update};

/// The default provider. Stateless and safe to share across engines.
#[derive(Default)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    pub fn new() -> Self {
        Self
    }
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

macro_rules! impl_digest {
    ($name:ident, $inner:ty, $out:expr, $block:expr) => {
        struct $name($inner);

        impl Digest for $name {
            fn update(&mut self, data: &[u8]) {
                Update::update(&mut self.0, data);
            }

            fn finish(&mut self, out: &mut [u8]) {
                let digest = self.0.finalize_fixed_reset();
                out[..$out].copy_from_slice(&digest);
            }

            fn output_len(&self) -> usize {
                $out
            }

            fn block_len(&self) -> usize {
                $block
            }
        }
    };
}

impl_digest!(Md5Digest, md5::Md5, 16, 64);
impl_digest!(Sha1Digest, sha1::Sha1, 20, 64);
impl_digest!(Sha256Digest, sha2::Sha256, 32, 64);
impl_digest!(Sha384Digest, sha2::Sha384, 48, 128);

/// The TLS < 1.2 handshake digest: MD5 and SHA-1 over the same input.
struct Md5Sha1Digest {
    md5: md5::Md5,
    sha1: sha1::Sha1,
}

impl Digest for Md5Sha1Digest {
    fn update(&mut self, data: &[u8]) {
        Update::update(&mut self.md5, data);
        Update::update(&mut self.sha1, data);
    }

    fn finish(&mut self, out: &mut [u8]) {
        let md5 = self.md5.finalize_fixed_reset();
        let sha1 = self.sha1.finalize_fixed_reset();
        out[..16].copy_from_slice(&md5);
        out[16..36].copy_from_slice(&sha1);
    }

    fn output_len(&self) -> usize {
        36
    }

    fn block_len(&self) -> usize {
        64
    }
}

fn digest_data(alg: HashAlg, data: &[u8]) -> Vec<u8> {
    let factory = make_factory(alg);
    let mut digest = factory();
    digest.update(data);
    let mut out = vec![0u8; digest.output_len()];
    digest.finish(&mut out);
    out
}

fn make_factory(alg: HashAlg) -> HashFactory {
    match alg {
        HashAlg::Md5 => Box::new(|| Box::new(Md5Digest(md5::Md5::default())) as Box<dyn Digest>),
        HashAlg::Sha1 => {
            Box::new(|| Box::new(Sha1Digest(sha1::Sha1::default())) as Box<dyn Digest>)
        }
        HashAlg::Sha256 => {
            Box::new(|| Box::new(Sha256Digest(sha2::Sha256::default())) as Box<dyn Digest>)
        }
        HashAlg::Sha384 => {
            Box::new(|| Box::new(Sha384Digest(sha2::Sha384::default())) as Box<dyn Digest>)
        }
        HashAlg::Md5Sha1 => Box::new(|| {
            Box::new(Md5Sha1Digest {
                md5: md5::Md5::default(),
                sha1: sha1::Sha1::default(),
            }) as Box<dyn Digest>
        }),
    }
}

// ---------------------------------------------------------------------------
// AEAD
// ---------------------------------------------------------------------------

macro_rules! impl_aead {
    ($name:ident, $cipher:ty) => {
        struct $name($cipher);

        impl Aead for $name {
            fn encrypt(
                &self,
                nonce: &[u8],
                aad: &[u8],
                plaintext: &[u8],
            ) -> Result<Vec<u8>, CryptoError> {
                if nonce.len() != 12 {
                    return Err(CryptoError::InvalidIvLength);
                }
                self.0
                    .encrypt(
                        GenericArray::from_slice(nonce),
                        Payload {
                            msg: plaintext,
                            aad,
                        },
                    )
                    .map_err(|_| CryptoError::AeadTagVerifyFail)
            }

            fn decrypt(
                &self,
                nonce: &[u8],
                aad: &[u8],
                ciphertext: &[u8],
            ) -> Result<Vec<u8>, CryptoError> {
                if nonce.len() != 12 {
                    return Err(CryptoError::InvalidIvLength);
                }
                self.0
                    .decrypt(
                        GenericArray::from_slice(nonce),
                        Payload {
                            msg: ciphertext,
                            aad,
                        },
                    )
                    .map_err(|_| CryptoError::AeadTagVerifyFail)
            }

            fn tag_len(&self) -> usize {
                16
            }
        }
    };
}

impl_aead!(Aes128GcmAead, aes_gcm::Aes128Gcm);
impl_aead!(Aes256GcmAead, aes_gcm::Aes256Gcm);
impl_aead!(ChaCha20Poly1305Aead, chacha20poly1305::ChaCha20Poly1305);

// ---------------------------------------------------------------------------
// CBC block ciphers
// ---------------------------------------------------------------------------

struct AesCbc {
    key: Vec<u8>,
}

impl BlockCipher for AesCbc {
    fn encrypt(&self, iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
        if data.len() % 16 != 0 {
            return Err(CryptoError::InvalidInputLength);
        }
        let len = data.len();
        match self.key.len() {
            16 => {
                let enc = cbc::Encryptor::<aes::Aes128>::new_from_slices(&self.key, iv)
                    .map_err(|_| CryptoError::InvalidIvLength)?;
                enc.encrypt_padded_mut::<NoPadding>(data, len)
                    .map_err(|_| CryptoError::InvalidIvLength)?;
            }
            32 => {
                let enc = cbc::Encryptor::<aes::Aes256>::new_from_slices(&self.key, iv)
                    .map_err(|_| CryptoError::InvalidIvLength)?;
                enc.encrypt_padded_mut::<NoPadding>(data, len)
                    .map_err(|_| CryptoError::InvalidIvLength)?;
            }
            other => {
                return Err(CryptoError::InvalidKeyLength {
                    expected: 16,
                    got: other,
                })
            }
        }
        Ok(())
    }

    fn decrypt(&self, iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
        if data.len() % 16 != 0 {
            return Err(CryptoError::InvalidInputLength);
        }
        match self.key.len() {
            16 => {
                let dec = cbc::Decryptor::<aes::Aes128>::new_from_slices(&self.key, iv)
                    .map_err(|_| CryptoError::InvalidIvLength)?;
                dec.decrypt_padded_mut::<NoPadding>(data)
                    .map_err(|_| CryptoError::InvalidIvLength)?;
            }
            32 => {
                let dec = cbc::Decryptor::<aes::Aes256>::new_from_slices(&self.key, iv)
                    .map_err(|_| CryptoError::InvalidIvLength)?;
                dec.decrypt_padded_mut::<NoPadding>(data)
                    .map_err(|_| CryptoError::InvalidIvLength)?;
            }
            other => {
                return Err(CryptoError::InvalidKeyLength {
                    expected: 16,
                    got: other,
                })
            }
        }
        Ok(())
    }

    fn block_len(&self) -> usize {
        16
    }
}

// ---------------------------------------------------------------------------
// Key agreement
// ---------------------------------------------------------------------------

struct X25519Agreement {
    secret: x25519_dalek::EphemeralSecret,
    public: x25519_dalek::PublicKey,
}

impl KeyAgreement for X25519Agreement {
    fn public_key(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    fn agree(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let this = *self;
        let shared = this
            .secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(peer));
        Ok(shared.as_bytes().to_vec())
    }
}

struct P256Agreement {
    secret: p256::ecdh::EphemeralSecret,
}

impl KeyAgreement for P256Agreement {
    fn public_key(&self) -> Vec<u8> {
        self.secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    fn agree(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let peer = p256::PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Nonce generator
// ---------------------------------------------------------------------------

/// Hash-counter generator: SHA-256(seed || os_random || counter || index),
/// with the OS randomness mixed in once at construction.
struct HashNonceGenerator {
    seed: Vec<u8>,
    counter: u64,
}

impl NonceGenerator for HashNonceGenerator {
    fn next_nonce(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut index = 0u32;
        while out.len() < len {
            let mut block_input = self.seed.clone();
            block_input.extend_from_slice(&self.counter.to_be_bytes());
            block_input.extend_from_slice(&index.to_be_bytes());
            out.extend_from_slice(&digest_data(HashAlg::Sha256, &block_input));
            index += 1;
        }
        self.counter += 1;
        out.truncate(len);
        out
    }
}

// ---------------------------------------------------------------------------
// Private keys
// ---------------------------------------------------------------------------

/// RSA identity key: signs and decrypts premaster secrets.
pub struct RsaSigningKey(pub RsaPrivateKey);

impl PrivateKey for RsaSigningKey {
    fn key_type(&self) -> super::KeyType {
        super::KeyType::Rsa
    }

    fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let hash = match algorithm {
            SignatureAlgorithm::RsaPkcs1(hash) => hash,
            SignatureAlgorithm::Ecdsa(_) => return Err(CryptoError::NotSupported),
        };
        let digest = digest_data(hash, data);
        self.0
            .sign(rsa_padding(hash)?, &digest)
            .map_err(|_| CryptoError::SignFail)
    }

    fn decrypt_premaster(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| CryptoError::AsymDecryptFail)
    }
}

/// ECDSA P-256 identity key.
pub struct EcdsaSigningKey(pub p256::ecdsa::SigningKey);

impl PrivateKey for EcdsaSigningKey {
    fn key_type(&self) -> super::KeyType {
        super::KeyType::Ec
    }

    fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let hash = match algorithm {
            SignatureAlgorithm::Ecdsa(hash) => hash,
            SignatureAlgorithm::RsaPkcs1(_) => return Err(CryptoError::NotSupported),
        };
        let digest = digest_data(hash, data);
        let signature: p256::ecdsa::Signature = self
            .0
            .sign_prehash(&digest)
            .map_err(|_| CryptoError::SignFail)?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

fn rsa_padding(hash: HashAlg) -> Result<Pkcs1v15Sign, CryptoError> {
    Ok(match hash {
        HashAlg::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        HashAlg::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        HashAlg::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        // TLS < 1.2 RSA signatures: raw MD5 || SHA-1, no DigestInfo.
        HashAlg::Md5Sha1 => Pkcs1v15Sign::new_unprefixed(),
        HashAlg::Md5 => return Err(CryptoError::NotSupported),
    })
}

// ---------------------------------------------------------------------------
// Crypto impl
// ---------------------------------------------------------------------------

impl Crypto for RustCryptoProvider {
    fn hash_factory(&self, alg: HashAlg) -> HashFactory {
        make_factory(alg)
    }

    fn random_bytes(&self, out: &mut [u8]) -> Result<(), CryptoError> {
        OsRng
            .try_fill_bytes(out)
            .map_err(|_| CryptoError::RandGenFail)
    }

    fn create_aead(&self, alg: AeadAlg, key: &[u8]) -> Result<Box<dyn Aead>, CryptoError> {
        match alg {
            AeadAlg::Aes128Gcm => {
                let cipher = aes_gcm::Aes128Gcm::new_from_slice(key).map_err(|_| {
                    CryptoError::InvalidKeyLength {
                        expected: 16,
                        got: key.len(),
                    }
                })?;
                Ok(Box::new(Aes128GcmAead(cipher)))
            }
            AeadAlg::Aes256Gcm => {
                let cipher = aes_gcm::Aes256Gcm::new_from_slice(key).map_err(|_| {
                    CryptoError::InvalidKeyLength {
                        expected: 32,
                        got: key.len(),
                    }
                })?;
                Ok(Box::new(Aes256GcmAead(cipher)))
            }
            AeadAlg::Chacha20Poly1305 => {
                let cipher =
                    chacha20poly1305::ChaCha20Poly1305::new_from_slice(key).map_err(|_| {
                        CryptoError::InvalidKeyLength {
                            expected: 32,
                            got: key.len(),
                        }
                    })?;
                Ok(Box::new(ChaCha20Poly1305Aead(cipher)))
            }
        }
    }

    fn create_block_cipher(
        &self,
        alg: BlockCipherAlg,
        key: &[u8],
    ) -> Result<Box<dyn BlockCipher>, CryptoError> {
        let expected = match alg {
            BlockCipherAlg::Aes128Cbc => 16,
            BlockCipherAlg::Aes256Cbc => 32,
        };
        if key.len() != expected {
            return Err(CryptoError::InvalidKeyLength {
                expected,
                got: key.len(),
            });
        }
        Ok(Box::new(AesCbc { key: key.to_vec() }))
    }

    fn create_nonce_generator(&self, seed: &[u8]) -> Box<dyn NonceGenerator> {
        let mut mixed = seed.to_vec();
        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy);
        mixed.extend_from_slice(&entropy);
        Box::new(HashNonceGenerator {
            seed: mixed,
            counter: 0,
        })
    }

    fn start_key_agreement(&self, group: NamedGroup) -> Result<Box<dyn KeyAgreement>, CryptoError> {
        match group {
            NamedGroup::X25519 => {
                let secret = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                Ok(Box::new(X25519Agreement { secret, public }))
            }
            NamedGroup::SECP256R1 => {
                let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
                Ok(Box::new(P256Agreement { secret }))
            }
            _ => Err(CryptoError::NotSupported),
        }
    }

    fn verify_signature(
        &self,
        algorithm: SignatureAlgorithm,
        key: &PublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        match (algorithm, key) {
            (SignatureAlgorithm::RsaPkcs1(hash), PublicKey::Rsa { n, e }) => {
                let key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                let digest = digest_data(hash, data);
                key.verify(rsa_padding(hash)?, &digest, signature)
                    .map_err(|_| CryptoError::SignatureVerifyFail)
            }
            (SignatureAlgorithm::Ecdsa(hash), PublicKey::Ec { group, point }) => {
                if *group != NamedGroup::SECP256R1 {
                    return Err(CryptoError::NotSupported);
                }
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| CryptoError::SignatureVerifyFail)?;
                let digest = digest_data(hash, data);
                key.verify_prehash(&digest, &sig)
                    .map_err(|_| CryptoError::SignatureVerifyFail)
            }
            _ => Err(CryptoError::NotSupported),
        }
    }

    fn rsa_encrypt_premaster(
        &self,
        key: &PublicKey,
        premaster: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let PublicKey::Rsa { n, e } = key else {
            return Err(CryptoError::NotSupported);
        };
        let key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        key.encrypt(&mut OsRng, Pkcs1v15Encrypt, premaster)
            .map_err(|_| CryptoError::AsymEncryptFail)
    }

    fn extract_public_key(&self, cert_der: &[u8]) -> Result<PublicKey, CryptoError> {
        extract_public_key(cert_der)
    }
}

// ---------------------------------------------------------------------------
// SPKI extraction
// ---------------------------------------------------------------------------

/// rsaEncryption OID: 1.2.840.113549.1.1.1
const RSA_OID: &[u8] = &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
/// secp256r1 OID: 1.2.840.10045.3.1.7
const P256_OID: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read a DER length at `pos`, returning (content_len, header_len).
fn der_length(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let first = *data.get(pos)?;
    if first < 0x80 {
        return Some((first as usize, 1));
    }
    let num_bytes = (first & 0x7f) as usize;
    if num_bytes == 0 || num_bytes > 4 {
        return None;
    }
    let mut len = 0usize;
    for i in 0..num_bytes {
        len = (len << 8) | *data.get(pos + 1 + i)? as usize;
    }
    Some((len, 1 + num_bytes))
}

/// Find the first BIT STRING after `from` and return its content (with the
/// leading unused-bits byte stripped).
fn bit_string_after(data: &[u8], from: usize) -> Option<&[u8]> {
    let mut pos = from;
    while pos < data.len() {
        if data[pos] == 0x03 {
            let (len, hdr) = der_length(data, pos + 1)?;
            let start = pos + 1 + hdr;
            let end = start + len;
            if end <= data.len() && len >= 1 && data[start] == 0x00 {
                return Some(&data[start + 1..end]);
            }
        }
        pos += 1;
    }
    None
}

/// Read a DER INTEGER at `pos`, returning (magnitude, next_pos). Strips the
/// sign byte a positive big-endian integer may carry.
fn der_integer(data: &[u8], pos: usize) -> Option<(Vec<u8>, usize)> {
    if *data.get(pos)? != 0x02 {
        return None;
    }
    let (len, hdr) = der_length(data, pos + 1)?;
    let start = pos + 1 + hdr;
    let end = start + len;
    if end > data.len() {
        return None;
    }
    let mut bytes = &data[start..end];
    while bytes.len() > 1 && bytes[0] == 0x00 {
        bytes = &bytes[1..];
    }
    Some((bytes.to_vec(), end))
}

/// Extract the subject public key from a DER certificate by locating the
/// algorithm OID and reading the BIT STRING that follows it.
pub fn extract_public_key(cert_der: &[u8]) -> Result<PublicKey, CryptoError> {
    if let Some(oid_pos) = find_subsequence(cert_der, P256_OID) {
        let point = bit_string_after(cert_der, oid_pos + P256_OID.len())
            .ok_or(CryptoError::NoPublicKeyInCert)?;
        if point.first() != Some(&0x04) || point.len() != 65 {
            return Err(CryptoError::InvalidPublicKey);
        }
        return Ok(PublicKey::Ec {
            group: NamedGroup::SECP256R1,
            point: point.to_vec(),
        });
    }

    if let Some(oid_pos) = find_subsequence(cert_der, RSA_OID) {
        let spk = bit_string_after(cert_der, oid_pos + RSA_OID.len())
            .ok_or(CryptoError::NoPublicKeyInCert)?;
        // RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent INTEGER }
        if spk.first() != Some(&0x30) {
            return Err(CryptoError::InvalidPublicKey);
        }
        let (_, hdr) = der_length(spk, 1).ok_or(CryptoError::InvalidPublicKey)?;
        let (n, next) = der_integer(spk, 1 + hdr).ok_or(CryptoError::InvalidPublicKey)?;
        let (e, _) = der_integer(spk, next).ok_or(CryptoError::InvalidPublicKey)?;
        return Ok(PublicKey::Rsa { n, e });
    }

    Err(CryptoError::NoPublicKeyInCert)
}

// ---------------------------------------------------------------------------
// Minimal SPKI construction (test identities)
// ---------------------------------------------------------------------------

fn der_len_bytes(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x100 {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, len as u8]
    }
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&der_len_bytes(content.len()));
    out.extend_from_slice(content);
    out
}

fn der_uint(value: &[u8]) -> Vec<u8> {
    let mut content = value.to_vec();
    if content.first().is_some_and(|b| b & 0x80 != 0) {
        content.insert(0, 0);
    }
    der_tlv(0x02, &content)
}

/// Build a minimal SubjectPublicKeyInfo for an RSA key. Not a certificate;
/// test hosts use it as the opaque "certificate" blob the engine carries.
pub fn rsa_spki(n: &[u8], e: &[u8]) -> Vec<u8> {
    let alg = {
        let mut content = RSA_OID.to_vec();
        content.extend_from_slice(&der_tlv(0x05, &[])); // NULL params
        der_tlv(0x30, &content)
    };
    let rsa_pub = {
        let mut content = der_uint(n);
        content.extend_from_slice(&der_uint(e));
        der_tlv(0x30, &content)
    };
    let mut bits = vec![0x00];
    bits.extend_from_slice(&rsa_pub);
    let mut spki = alg;
    spki.extend_from_slice(&der_tlv(0x03, &bits));
    der_tlv(0x30, &spki)
}

/// Build a minimal SubjectPublicKeyInfo for a P-256 key (uncompressed point).
pub fn p256_spki(point: &[u8]) -> Vec<u8> {
    let alg = {
        // id-ecPublicKey OID: 1.2.840.10045.2.1
        let mut content = vec![0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
        content.extend_from_slice(P256_OID);
        der_tlv(0x30, &content)
    };
    let mut bits = vec![0x00];
    bits.extend_from_slice(point);
    let mut spki = alg;
    spki.extend_from_slice(&der_tlv(0x03, &bits));
    der_tlv(0x30, &spki)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    #[test]
    fn test_digest_factories() {
        let p = RustCryptoProvider::new();
        for (alg, len) in [
            (HashAlg::Md5, 16),
            (HashAlg::Sha1, 20),
            (HashAlg::Sha256, 32),
            (HashAlg::Sha384, 48),
            (HashAlg::Md5Sha1, 36),
        ] {
            let factory = p.hash_factory(alg);
            let mut d = factory();
            d.update(b"abc");
            let mut out = vec![0u8; d.output_len()];
            d.finish(&mut out);
            assert_eq!(out.len(), len);
        }
    }

    #[test]
    fn test_sha256_known_answer() {
        let out = digest_data(HashAlg::Sha256, b"abc");
        assert_eq!(
            out,
            [
                0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d,
                0xae, 0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10,
                0xff, 0x61, 0xf2, 0x00, 0x15, 0xad
            ]
        );
    }

    #[test]
    fn test_md5sha1_is_concatenation() {
        let combined = digest_data(HashAlg::Md5Sha1, b"data");
        let md5 = digest_data(HashAlg::Md5, b"data");
        let sha1 = digest_data(HashAlg::Sha1, b"data");
        assert_eq!(&combined[..16], &md5[..]);
        assert_eq!(&combined[16..], &sha1[..]);
    }

    #[test]
    fn test_aead_roundtrip_and_tamper() {
        let p = RustCryptoProvider::new();
        for (alg, key_len) in [
            (AeadAlg::Aes128Gcm, 16),
            (AeadAlg::Aes256Gcm, 32),
            (AeadAlg::Chacha20Poly1305, 32),
        ] {
            let aead = p.create_aead(alg, &vec![0x42u8; key_len]).unwrap();
            let nonce = [7u8; 12];
            let ct = aead.encrypt(&nonce, b"aad", b"plaintext").unwrap();
            assert_eq!(ct.len(), 9 + 16);
            assert_eq!(aead.decrypt(&nonce, b"aad", &ct).unwrap(), b"plaintext");

            let mut tampered = ct.clone();
            tampered[0] ^= 1;
            assert!(aead.decrypt(&nonce, b"aad", &tampered).is_err());
            assert!(aead.decrypt(&nonce, b"other", &ct).is_err());
        }
    }

    #[test]
    fn test_cbc_roundtrip() {
        let p = RustCryptoProvider::new();
        let cipher = p
            .create_block_cipher(BlockCipherAlg::Aes128Cbc, &[0x11u8; 16])
            .unwrap();
        let iv = [0x22u8; 16];
        let mut data = vec![0x33u8; 32];
        let original = data.clone();
        cipher.encrypt(&iv, &mut data).unwrap();
        assert_ne!(data, original);
        cipher.decrypt(&iv, &mut data).unwrap();
        assert_eq!(data, original);

        // Non-block-multiple input rejected
        let mut bad = vec![0u8; 17];
        assert!(cipher.encrypt(&iv, &mut bad).is_err());
    }

    #[test]
    fn test_key_agreement_x25519() {
        let p = RustCryptoProvider::new();
        let a = p.start_key_agreement(NamedGroup::X25519).unwrap();
        let b = p.start_key_agreement(NamedGroup::X25519).unwrap();
        let a_pub = a.public_key();
        let b_pub = b.public_key();
        assert_eq!(a_pub.len(), 32);
        let s1 = a.agree(&b_pub).unwrap();
        let s2 = b.agree(&a_pub).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_key_agreement_p256() {
        let p = RustCryptoProvider::new();
        let a = p.start_key_agreement(NamedGroup::SECP256R1).unwrap();
        let b = p.start_key_agreement(NamedGroup::SECP256R1).unwrap();
        let a_pub = a.public_key();
        let b_pub = b.public_key();
        assert_eq!(a_pub.len(), 65);
        assert_eq!(a_pub[0], 0x04);
        let s1 = a.agree(&b_pub).unwrap();
        let s2 = b.agree(&a_pub).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_nonce_generator_distinct() {
        let p = RustCryptoProvider::new();
        let mut g = p.create_nonce_generator(b"seed");
        let n1 = g.next_nonce(16);
        let n2 = g.next_nonce(16);
        assert_eq!(n1.len(), 16);
        assert_ne!(n1, n2);
    }

    #[test]
    fn test_ecdsa_sign_verify_via_spki() {
        let p = RustCryptoProvider::new();
        let signing = p256::ecdsa::SigningKey::random(&mut OsRng);
        let verifying = signing.verifying_key();
        let point = verifying.to_encoded_point(false).as_bytes().to_vec();
        let spki = p256_spki(&point);

        let key = EcdsaSigningKey(signing);
        let alg = SignatureAlgorithm::Ecdsa(HashAlg::Sha256);
        let sig = key.sign(alg, b"signed data").unwrap();

        let public = p.extract_public_key(&spki).unwrap();
        assert!(p.verify_signature(alg, &public, b"signed data", &sig).is_ok());
        assert!(p
            .verify_signature(alg, &public, b"other data", &sig)
            .is_err());
    }

    #[test]
    fn test_rsa_sign_verify_and_premaster_roundtrip() {
        let p = RustCryptoProvider::new();
        // Small key to keep the test fast; production uses >= 2048 bits.
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let spki = rsa_spki(
            &private.to_public_key().n().to_bytes_be(),
            &private.to_public_key().e().to_bytes_be(),
        );
        let public = p.extract_public_key(&spki).unwrap();

        let key = RsaSigningKey(private);
        let alg = SignatureAlgorithm::RsaPkcs1(HashAlg::Sha256);
        let sig = key.sign(alg, b"signed data").unwrap();
        assert!(p.verify_signature(alg, &public, b"signed data", &sig).is_ok());
        assert!(p
            .verify_signature(alg, &public, b"tampered", &sig)
            .is_err());

        let premaster = [0x03u8; 48];
        let encrypted = p.rsa_encrypt_premaster(&public, &premaster).unwrap();
        let decrypted = key.decrypt_premaster(&encrypted).unwrap();
        assert_eq!(decrypted, premaster);
    }

    #[test]
    fn test_rsa_legacy_md5sha1_signature() {
        let p = RustCryptoProvider::new();
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let spki = rsa_spki(
            &private.to_public_key().n().to_bytes_be(),
            &private.to_public_key().e().to_bytes_be(),
        );
        let public = p.extract_public_key(&spki).unwrap();

        let key = RsaSigningKey(private);
        let alg = SignatureAlgorithm::RsaPkcs1(HashAlg::Md5Sha1);
        let sig = key.sign(alg, b"legacy signed data").unwrap();
        assert!(p
            .verify_signature(alg, &public, b"legacy signed data", &sig)
            .is_ok());
    }

    #[test]
    fn test_extract_public_key_missing_oid() {
        let p = RustCryptoProvider::new();
        assert!(p.extract_public_key(&[0x30, 0x03, 0x02, 0x01, 0x00]).is_err());
    }
}
