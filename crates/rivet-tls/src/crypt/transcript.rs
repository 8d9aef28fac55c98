//! Handshake transcript hash.
//!
//! The transcript keeps the raw message bytes and hashes on demand: TLS 1.2
//! Finished values need the PRF hash of the transcript, CertificateVerify
//! needs a snapshot excluding itself, and the extended-master-secret session
//! hash is taken through ClientKeyExchange. Buffer-and-replay makes all of
//! these cheap to express; TLS < 1.2 additionally needs the concatenated
//! MD5 and SHA-1 digests of the same bytes.

use crate::provider::{Crypto, HashFactory};
use crate::version::ProtocolVersion;
use rivet_types::HashAlg;

/// Running transcript over handshake messages (headers included).
#[derive(Default)]
pub struct Transcript {
    buffer: Vec<u8>,
}

impl Transcript {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed a complete handshake message (including its 4-byte header).
    pub fn update(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Raw transcript bytes (for signatures computed over the messages
    /// themselves, such as CertificateVerify).
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Hash of the transcript with a single algorithm.
    pub fn hash_with(&self, factory: &HashFactory) -> Vec<u8> {
        let mut digest = factory();
        digest.update(&self.buffer);
        let mut out = vec![0u8; digest.output_len()];
        digest.finish(&mut out);
        out
    }

    /// The handshake hash used for Finished computation at `version`:
    /// `Hash(transcript)` for TLS 1.2, `MD5(transcript) || SHA1(transcript)`
    /// earlier.
    pub fn finished_hash(
        &self,
        crypto: &dyn Crypto,
        version: ProtocolVersion,
        prf_hash: HashAlg,
    ) -> Vec<u8> {
        if version.uses_tls12_prf() {
            self.hash_with(&crypto.hash_factory(prf_hash))
        } else {
            let mut out = self.hash_with(&crypto.hash_factory(HashAlg::Md5));
            out.extend_from_slice(&self.hash_with(&crypto.hash_factory(HashAlg::Sha1)));
            out
        }
    }
}
