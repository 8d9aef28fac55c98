//! TLS 1.0-1.2 key derivation (RFC 5246 §6.3, §8.1; RFC 7627).

use super::prf::prf;
use super::CipherSuiteParams;
use crate::provider::Crypto;
use crate::version::ProtocolVersion;
use rivet_types::HashAlg;
use zeroize::Zeroize;

/// Finished verify_data length (RFC 5246 §7.4.9).
pub const VERIFY_DATA_LEN: usize = 12;

/// Master secret length (RFC 5246 §8.1).
pub const MASTER_SECRET_LEN: usize = 48;

/// Key block split into per-direction keys.
///
/// MAC keys are empty for AEAD suites; IVs are empty where the version
/// puts the IV on the wire instead of in the key block.
pub struct KeyBlock {
    pub client_write_mac_key: Vec<u8>,
    pub server_write_mac_key: Vec<u8>,
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
}

impl Drop for KeyBlock {
    fn drop(&mut self) {
        self.client_write_mac_key.zeroize();
        self.server_write_mac_key.zeroize();
        self.client_write_key.zeroize();
        self.server_write_key.zeroize();
        self.client_write_iv.zeroize();
        self.server_write_iv.zeroize();
    }
}

/// Derive the 48-byte master secret.
///
/// ```text
/// master_secret = PRF(pre_master_secret, "master secret",
///                     ClientHello.random + ServerHello.random)[0..47]
/// ```
pub fn derive_master_secret(
    crypto: &dyn Crypto,
    version: ProtocolVersion,
    prf_hash: HashAlg,
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Vec<u8> {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    prf(
        crypto,
        version,
        prf_hash,
        pre_master_secret,
        "master secret",
        &seed,
        MASTER_SECRET_LEN,
    )
}

/// Derive the master secret with the Extended Master Secret extension
/// (RFC 7627 §4); `session_hash` covers the handshake through
/// ClientKeyExchange.
pub fn derive_extended_master_secret(
    crypto: &dyn Crypto,
    version: ProtocolVersion,
    prf_hash: HashAlg,
    pre_master_secret: &[u8],
    session_hash: &[u8],
) -> Vec<u8> {
    prf(
        crypto,
        version,
        prf_hash,
        pre_master_secret,
        "extended master secret",
        session_hash,
        MASTER_SECRET_LEN,
    )
}

/// Expand the master secret into the key block.
///
/// ```text
/// key_block = PRF(master_secret, "key expansion",
///                 ServerHello.random + ClientHello.random)
/// ```
///
/// Split order per RFC 5246 §6.3: MAC keys, then encryption keys, then IVs.
pub fn derive_key_block(
    crypto: &dyn Crypto,
    version: ProtocolVersion,
    master_secret: &[u8],
    server_random: &[u8; 32],
    client_random: &[u8; 32],
    params: &CipherSuiteParams,
) -> KeyBlock {
    // Note the reversed random order relative to master-secret derivation.
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    let mac_len = params.bulk.mac_len();
    let key_len = params.bulk.key_len();
    let iv_len = params.bulk.fixed_iv_len(version);

    let mut key_block = prf(
        crypto,
        version,
        params.prf_hash,
        master_secret,
        "key expansion",
        &seed,
        params.key_block_len(version),
    );

    let mut offset = 0;
    let mut take = |len: usize| {
        let part = key_block[offset..offset + len].to_vec();
        offset += len;
        part
    };

    let out = KeyBlock {
        client_write_mac_key: take(mac_len),
        server_write_mac_key: take(mac_len),
        client_write_key: take(key_len),
        server_write_key: take(key_len),
        client_write_iv: take(iv_len),
        server_write_iv: take(iv_len),
    };
    key_block.zeroize();
    out
}

/// Compute a Finished verify_data value.
///
/// ```text
/// verify_data = PRF(master_secret, finished_label,
///                   Hash(handshake_messages))[0..11]
/// ```
pub fn compute_verify_data(
    crypto: &dyn Crypto,
    version: ProtocolVersion,
    prf_hash: HashAlg,
    master_secret: &[u8],
    label: &str,
    handshake_hash: &[u8],
) -> Vec<u8> {
    prf(
        crypto,
        version,
        prf_hash,
        master_secret,
        label,
        handshake_hash,
        VERIFY_DATA_LEN,
    )
}
