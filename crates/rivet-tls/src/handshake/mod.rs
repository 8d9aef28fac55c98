//! Handshake protocol: message types, state machines, reassembly.

pub mod client;
pub mod codec;
pub mod extensions;
pub mod server;

use std::sync::Arc;

use crate::crypt::key_schedule::derive_key_block;
use crate::crypt::transcript::Transcript;
use crate::crypt::CipherSuiteParams;
use crate::params::next_nonce_seed;
use crate::provider::Crypto;
use crate::record::cipher::CipherKeys;
use crate::record::{ContentType, RecordCipher, RecordLayer, MAX_PLAINTEXT_LEN};
use crate::session::TlsSession;
use crate::version::ProtocolVersion;
use crate::TlsRole;
use rivet_types::{AlertDescription, TlsError};

/// Handshake message types (RFC 5246 §7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(HandshakeType::HelloRequest),
            1 => Ok(HandshakeType::ClientHello),
            2 => Ok(HandshakeType::ServerHello),
            11 => Ok(HandshakeType::Certificate),
            12 => Ok(HandshakeType::ServerKeyExchange),
            13 => Ok(HandshakeType::CertificateRequest),
            14 => Ok(HandshakeType::ServerHelloDone),
            15 => Ok(HandshakeType::CertificateVerify),
            16 => Ok(HandshakeType::ClientKeyExchange),
            20 => Ok(HandshakeType::Finished),
            _ => Err(v),
        }
    }
}

/// Client handshake states (happy path top to bottom).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    WaitServerHello,
    WaitCertificate,
    WaitServerKeyExchange,
    /// CertificateRequest (at most once) or ServerHelloDone.
    WaitServerHelloDone,
    WaitChangeCipherSpec,
    WaitFinished,
    Complete,
}

/// Server handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    WaitClientHello,
    WaitClientCertificate,
    WaitClientKeyExchange,
    WaitCertificateVerify,
    WaitChangeCipherSpec,
    WaitFinished,
    Complete,
}

/// A reassembled handshake message.
#[derive(Debug, Clone)]
pub struct HandshakeMessage {
    pub msg_type: HandshakeType,
    /// Message body, header stripped.
    pub body: Vec<u8>,
    /// The full wire form (header + body), as fed to the transcript.
    pub raw: Vec<u8>,
}

/// Upper bound on a single handshake message; anything larger is treated as
/// a decoding attack rather than a legitimate certificate chain.
const MAX_HANDSHAKE_MESSAGE_LEN: usize = 1 << 20;

/// Reassembles handshake messages from record fragments. Messages may span
/// records; records may carry several messages.
#[derive(Default)]
pub struct HandshakeReassembly {
    buffer: Vec<u8>,
}

impl HandshakeReassembly {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);
    }

    /// True while a partially received message sits in the buffer.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Pop the next complete message, if one has fully arrived.
    pub fn next_message(&mut self) -> Result<Option<HandshakeMessage>, TlsError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let msg_type = HandshakeType::from_u8(self.buffer[0]).map_err(|v| {
            TlsError::fatal(
                AlertDescription::UnexpectedMessage,
                format!("unknown handshake message type {v}"),
            )
        })?;
        let length = ((self.buffer[1] as usize) << 16)
            | ((self.buffer[2] as usize) << 8)
            | (self.buffer[3] as usize);
        if length > MAX_HANDSHAKE_MESSAGE_LEN {
            return Err(TlsError::fatal(
                AlertDescription::DecodeError,
                format!("handshake message of {length} bytes rejected"),
            ));
        }
        let total = 4 + length;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let raw: Vec<u8> = self.buffer.drain(..total).collect();
        let body = raw[4..].to_vec();
        Ok(Some(HandshakeMessage {
            msg_type,
            body,
            raw,
        }))
    }
}

/// Where the state machines emit their flights: the record layer's write
/// half plus the connection's pending network output.
pub(crate) struct HandshakeOutput<'a> {
    pub record: &'a mut RecordLayer,
    pub out: &'a mut Vec<u8>,
}

impl HandshakeOutput<'_> {
    /// Seal a handshake message (fragmenting if needed) and feed the
    /// transcript.
    pub fn send_handshake(
        &mut self,
        transcript: &mut Transcript,
        message: &[u8],
    ) -> Result<(), TlsError> {
        transcript.update(message);
        for chunk in message.chunks(MAX_PLAINTEXT_LEN) {
            self.record
                .seal_record_into(ContentType::Handshake, chunk, self.out)?;
        }
        Ok(())
    }

    /// Emit ChangeCipherSpec and promote the pending write keys: the next
    /// outbound record is protected.
    pub fn send_change_cipher_spec(
        &mut self,
        crypto: &dyn Crypto,
        keys: &CipherKeys,
        role: TlsRole,
    ) -> Result<(), TlsError> {
        self.record.seal_record_into(
            ContentType::ChangeCipherSpec,
            &codec::change_cipher_spec_payload(),
            self.out,
        )?;
        let nonce_gen = crypto.create_nonce_generator(&next_nonce_seed(role));
        let cipher = RecordCipher::new(crypto, keys, Some(nonce_gen))?;
        self.record.activate_write(cipher);
        Ok(())
    }
}

/// Pick the preferred signature scheme usable with `key_type` that both
/// sides support. `ours` is in preference order.
pub(crate) fn select_signature_scheme(
    ours: &[crate::crypt::SignatureScheme],
    peers: &[crate::crypt::SignatureScheme],
    key_type: crate::provider::KeyType,
) -> Option<crate::crypt::SignatureScheme> {
    ours.iter()
        .copied()
        .find(|scheme| peers.contains(scheme) && scheme_matches_key(*scheme, key_type))
}

pub(crate) fn scheme_matches_key(
    scheme: crate::crypt::SignatureScheme,
    key_type: crate::provider::KeyType,
) -> bool {
    use crate::crypt::SignatureAlgorithm;
    use crate::provider::KeyType;
    matches!(
        (scheme.algorithm(), key_type),
        (Some(SignatureAlgorithm::RsaPkcs1(_)), KeyType::Rsa)
            | (Some(SignatureAlgorithm::Ecdsa(_)), KeyType::Ec)
    )
}

/// The implicit TLS < 1.2 signature algorithm for a key type.
pub(crate) fn legacy_signature_algorithm(
    key_type: crate::provider::KeyType,
) -> crate::crypt::SignatureAlgorithm {
    use crate::crypt::SignatureAlgorithm;
    use rivet_types::HashAlg;
    match key_type {
        crate::provider::KeyType::Rsa => SignatureAlgorithm::RsaPkcs1(HashAlg::Md5Sha1),
        crate::provider::KeyType::Ec => SignatureAlgorithm::Ecdsa(HashAlg::Sha1),
    }
}

/// The default signature-algorithm assumption when a TLS 1.2 ClientHello
/// carries no signature_algorithms extension (RFC 5246 §7.4.1.4.1).
pub(crate) fn default_peer_schemes() -> Vec<crate::crypt::SignatureScheme> {
    vec![
        crate::crypt::SignatureScheme::RSA_PKCS1_SHA1,
        crate::crypt::SignatureScheme::ECDSA_SHA1,
    ]
}

/// A completed handshake, handed back to the connection.
pub(crate) struct HandshakeResult {
    pub session: Arc<TlsSession>,
    pub resumed: bool,
    /// Store the session in the shared cache.
    pub publish_session: bool,
}

/// Split the key block into (write, read) keys for `role`.
pub(crate) fn direction_keys(
    crypto: &dyn Crypto,
    version: ProtocolVersion,
    suite: &CipherSuiteParams,
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    role: TlsRole,
) -> (CipherKeys, CipherKeys) {
    let block = derive_key_block(
        crypto,
        version,
        master_secret,
        server_random,
        client_random,
        suite,
    );
    let client_keys = CipherKeys {
        bulk: suite.bulk,
        version,
        key: block.client_write_key.clone(),
        fixed_iv: block.client_write_iv.clone(),
        mac_key: block.client_write_mac_key.clone(),
    };
    let server_keys = CipherKeys {
        bulk: suite.bulk,
        version,
        key: block.server_write_key.clone(),
        fixed_iv: block.server_write_iv.clone(),
        mac_key: block.server_write_mac_key.clone(),
    };
    match role {
        TlsRole::Client => (client_keys, server_keys),
        TlsRole::Server => (server_keys, client_keys),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::codec::wrap_handshake;

    #[test]
    fn test_handshake_type_wire_values() {
        // RFC 5246 §7.4 — wire values are security-critical
        assert_eq!(HandshakeType::HelloRequest as u8, 0);
        assert_eq!(HandshakeType::ClientHello as u8, 1);
        assert_eq!(HandshakeType::ServerHello as u8, 2);
        assert_eq!(HandshakeType::Certificate as u8, 11);
        assert_eq!(HandshakeType::ServerKeyExchange as u8, 12);
        assert_eq!(HandshakeType::CertificateRequest as u8, 13);
        assert_eq!(HandshakeType::ServerHelloDone as u8, 14);
        assert_eq!(HandshakeType::CertificateVerify as u8, 15);
        assert_eq!(HandshakeType::ClientKeyExchange as u8, 16);
        assert_eq!(HandshakeType::Finished as u8, 20);
    }

    #[test]
    fn test_reassembly_single_message() {
        let mut reassembly = HandshakeReassembly::new();
        let msg = wrap_handshake(HandshakeType::Finished, &[0xAA; 12]);
        reassembly.push(&msg);

        let out = reassembly.next_message().unwrap().unwrap();
        assert_eq!(out.msg_type, HandshakeType::Finished);
        assert_eq!(out.body, vec![0xAA; 12]);
        assert_eq!(out.raw, msg);
        assert!(!reassembly.has_partial());
        assert!(reassembly.next_message().unwrap().is_none());
    }

    #[test]
    fn test_reassembly_across_fragments() {
        let mut reassembly = HandshakeReassembly::new();
        let msg = wrap_handshake(HandshakeType::Certificate, &[0x42; 300]);

        reassembly.push(&msg[..10]);
        assert!(reassembly.next_message().unwrap().is_none());
        assert!(reassembly.has_partial());

        reassembly.push(&msg[10..]);
        let out = reassembly.next_message().unwrap().unwrap();
        assert_eq!(out.msg_type, HandshakeType::Certificate);
        assert_eq!(out.body.len(), 300);
    }

    #[test]
    fn test_reassembly_multiple_messages_one_fragment() {
        let mut reassembly = HandshakeReassembly::new();
        let mut combined = wrap_handshake(HandshakeType::ServerHelloDone, &[]);
        combined.extend_from_slice(&wrap_handshake(HandshakeType::Finished, &[0; 12]));
        reassembly.push(&combined);

        assert_eq!(
            reassembly.next_message().unwrap().unwrap().msg_type,
            HandshakeType::ServerHelloDone
        );
        assert_eq!(
            reassembly.next_message().unwrap().unwrap().msg_type,
            HandshakeType::Finished
        );
        assert!(reassembly.next_message().unwrap().is_none());
    }

    #[test]
    fn test_reassembly_rejects_unknown_type() {
        let mut reassembly = HandshakeReassembly::new();
        reassembly.push(&[99, 0, 0, 0]);
        let err = reassembly.next_message().unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
    }

    #[test]
    fn test_reassembly_rejects_oversized_message() {
        let mut reassembly = HandshakeReassembly::new();
        // Claimed length 0x200000 > 1 MiB cap
        reassembly.push(&[11, 0x20, 0x00, 0x00]);
        let err = reassembly.next_message().unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::DecodeError));
    }
}
