//! TLS pseudo-random functions.
//!
//! TLS 1.2 (RFC 5246 §5):
//! ```text
//! PRF(secret, label, seed) = P_<hash>(secret, label + seed)
//!
//! P_hash(secret, seed) = HMAC_hash(secret, A(1) + seed) ||
//!                        HMAC_hash(secret, A(2) + seed) || ...
//! A(0) = seed
//! A(i) = HMAC_hash(secret, A(i-1))
//! ```
//!
//! TLS 1.0/1.1 (RFC 2246 §5): the secret is split into two halves; the
//! output is `P_MD5(S1, label + seed) XOR P_SHA1(S2, label + seed)`.

use super::hmac;
use crate::provider::{Crypto, HashFactory};
use crate::version::ProtocolVersion;
use rivet_types::HashAlg;

/// P_hash expansion function.
fn p_hash(factory: &HashFactory, secret: &[u8], seed: &[u8], output_len: usize) -> Vec<u8> {
    let mut result = Vec::with_capacity(output_len);

    // A(0) = seed
    let mut a = seed.to_vec();

    while result.len() < output_len {
        // A(i) = HMAC_hash(secret, A(i-1))
        a = hmac(factory, secret, &a);

        // HMAC_hash(secret, A(i) + seed)
        let mut ai_seed = Vec::with_capacity(a.len() + seed.len());
        ai_seed.extend_from_slice(&a);
        ai_seed.extend_from_slice(seed);
        result.extend_from_slice(&hmac(factory, secret, &ai_seed));
    }

    result.truncate(output_len);
    result
}

/// TLS 1.2 PRF with an explicit hash factory.
pub fn prf_tls12(
    factory: &HashFactory,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Vec<u8> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label.as_bytes());
    label_seed.extend_from_slice(seed);
    p_hash(factory, secret, &label_seed, output_len)
}

/// TLS 1.0/1.1 PRF: P_MD5 over the first half of the secret XOR P_SHA1 over
/// the second half (halves overlap by one byte for odd lengths).
pub fn prf_legacy(
    crypto: &dyn Crypto,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Vec<u8> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label.as_bytes());
    label_seed.extend_from_slice(seed);

    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let md5_factory = crypto.hash_factory(HashAlg::Md5);
    let sha1_factory = crypto.hash_factory(HashAlg::Sha1);

    let p_md5 = p_hash(&md5_factory, s1, &label_seed, output_len);
    let p_sha1 = p_hash(&sha1_factory, s2, &label_seed, output_len);

    p_md5
        .iter()
        .zip(p_sha1.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Version-dispatching PRF: `prf_hash` is only consulted for TLS >= 1.2.
pub fn prf(
    crypto: &dyn Crypto,
    version: ProtocolVersion,
    prf_hash: HashAlg,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Vec<u8> {
    if version.uses_tls12_prf() {
        let factory = crypto.hash_factory(prf_hash);
        prf_tls12(&factory, secret, label, seed, output_len)
    } else {
        prf_legacy(crypto, secret, label, seed, output_len)
    }
}
