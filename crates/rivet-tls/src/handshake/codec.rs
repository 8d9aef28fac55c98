//! Handshake message encoding and decoding (RFC 5246 §7.4).

use crate::crypt::{NamedGroup, SignatureScheme};
use crate::handshake::extensions::{encode_extensions_block, parse_extensions_block, Extension};
use crate::version::ProtocolVersion;
use crate::CipherSuite;
use rivet_types::{AlertDescription, TlsError};

use super::HandshakeType;

/// Client certificate types in CertificateRequest (RFC 5246 §7.4.4).
pub const CERT_TYPE_RSA_SIGN: u8 = 1;
pub const CERT_TYPE_ECDSA_SIGN: u8 = 64;

fn decode_error(reason: impl Into<String>) -> TlsError {
    TlsError::fatal(AlertDescription::DecodeError, reason.into())
}

/// Wrap a message body with the 4-byte handshake header.
pub fn wrap_handshake(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let len = body.len();
    let mut out = Vec::with_capacity(4 + len);
    out.push(msg_type as u8);
    out.push((len >> 16) as u8);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    out.extend_from_slice(body);
    out
}

/// Bounds-checked cursor over a message body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.data.len() - self.pos < n {
            return Err(decode_error("message body truncated"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TlsError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u24(&mut self) -> Result<usize, TlsError> {
        let bytes = self.take(3)?;
        Ok(((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    fn is_done(&self) -> bool {
        self.pos == self.data.len()
    }
}

// ---------------------------------------------------------------------------
// ClientHello / ServerHello
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
}

pub fn encode_client_hello(hello: &ClientHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(128);
    body.extend_from_slice(&hello.client_version.to_wire());
    body.extend_from_slice(&hello.random);
    body.push(hello.session_id.len() as u8);
    body.extend_from_slice(&hello.session_id);
    body.extend_from_slice(&((hello.cipher_suites.len() * 2) as u16).to_be_bytes());
    for suite in &hello.cipher_suites {
        body.extend_from_slice(&suite.0.to_be_bytes());
    }
    body.push(hello.compression_methods.len() as u8);
    body.extend_from_slice(&hello.compression_methods);
    body.extend_from_slice(&encode_extensions_block(&hello.extensions));
    wrap_handshake(HandshakeType::ClientHello, &body)
}

pub fn decode_client_hello(body: &[u8]) -> Result<ClientHello, TlsError> {
    let mut reader = Reader::new(body);
    let version = reader.take(2)?;
    let client_version = ProtocolVersion::from_wire(version[0], version[1]);

    let mut random = [0u8; 32];
    random.copy_from_slice(reader.take(32)?);

    let session_id_len = reader.u8()? as usize;
    if session_id_len > 32 {
        return Err(decode_error("session_id longer than 32 bytes"));
    }
    let session_id = reader.take(session_id_len)?.to_vec();

    let suites_len = reader.u16()? as usize;
    if suites_len == 0 || suites_len % 2 != 0 {
        return Err(decode_error("bad cipher_suites length"));
    }
    let cipher_suites = reader
        .take(suites_len)?
        .chunks_exact(2)
        .map(|pair| CipherSuite(u16::from_be_bytes([pair[0], pair[1]])))
        .collect();

    let compression_len = reader.u8()? as usize;
    if compression_len == 0 {
        return Err(decode_error("empty compression_methods"));
    }
    let compression_methods = reader.take(compression_len)?.to_vec();

    let extensions = parse_extensions_block(reader.rest())?;
    Ok(ClientHello {
        client_version,
        random,
        session_id,
        cipher_suites,
        compression_methods,
        extensions,
    })
}

#[derive(Debug, Clone)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Vec<Extension>,
}

pub fn encode_server_hello(hello: &ServerHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(96);
    body.extend_from_slice(&hello.server_version.to_wire());
    body.extend_from_slice(&hello.random);
    body.push(hello.session_id.len() as u8);
    body.extend_from_slice(&hello.session_id);
    body.extend_from_slice(&hello.cipher_suite.0.to_be_bytes());
    body.push(hello.compression_method);
    body.extend_from_slice(&encode_extensions_block(&hello.extensions));
    wrap_handshake(HandshakeType::ServerHello, &body)
}

pub fn decode_server_hello(body: &[u8]) -> Result<ServerHello, TlsError> {
    let mut reader = Reader::new(body);
    let version = reader.take(2)?;
    let server_version = ProtocolVersion::from_wire(version[0], version[1]);

    let mut random = [0u8; 32];
    random.copy_from_slice(reader.take(32)?);

    let session_id_len = reader.u8()? as usize;
    if session_id_len > 32 {
        return Err(decode_error("session_id longer than 32 bytes"));
    }
    let session_id = reader.take(session_id_len)?.to_vec();

    let suite = reader.u16()?;
    let compression_method = reader.u8()?;
    let extensions = parse_extensions_block(reader.rest())?;

    Ok(ServerHello {
        server_version,
        random,
        session_id,
        cipher_suite: CipherSuite(suite),
        compression_method,
        extensions,
    })
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// Encode a Certificate message from a DER chain (leaf first). An empty
/// chain encodes the empty list a client sends when it has no identity.
pub fn encode_certificate(chain: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = chain.iter().map(|cert| 3 + cert.len()).sum();
    let mut body = Vec::with_capacity(3 + total);
    body.push((total >> 16) as u8);
    body.push((total >> 8) as u8);
    body.push(total as u8);
    for cert in chain {
        let len = cert.len();
        body.push((len >> 16) as u8);
        body.push((len >> 8) as u8);
        body.push(len as u8);
        body.extend_from_slice(cert);
    }
    wrap_handshake(HandshakeType::Certificate, &body)
}

pub fn decode_certificate(body: &[u8]) -> Result<Vec<Vec<u8>>, TlsError> {
    let mut reader = Reader::new(body);
    let total = reader.u24()?;
    let list = reader.take(total)?;
    if !reader.is_done() {
        return Err(decode_error("trailing bytes after certificate_list"));
    }

    let mut chain = Vec::new();
    let mut inner = Reader::new(list);
    while !inner.is_done() {
        let len = inner.u24()?;
        chain.push(inner.take(len)?.to_vec());
    }
    Ok(chain)
}

// ---------------------------------------------------------------------------
// ServerKeyExchange (ECDHE, named_curve form)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServerKeyExchange {
    pub named_curve: NamedGroup,
    pub public_key: Vec<u8>,
    /// Present at TLS 1.2; earlier versions imply the legacy algorithm.
    pub signature_scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

/// The `ServerECDHParams` prefix covered by the signature.
pub fn build_ske_params(named_curve: NamedGroup, public_key: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(4 + public_key.len());
    params.push(3); // named_curve
    params.extend_from_slice(&named_curve.0.to_be_bytes());
    params.push(public_key.len() as u8);
    params.extend_from_slice(public_key);
    params
}

/// The data signed in ServerKeyExchange:
/// `client_random || server_random || params`.
pub fn build_ske_signed_data(
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    params: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(64 + params.len());
    data.extend_from_slice(client_random);
    data.extend_from_slice(server_random);
    data.extend_from_slice(params);
    data
}

pub fn encode_server_key_exchange(ske: &ServerKeyExchange) -> Vec<u8> {
    let params = build_ske_params(ske.named_curve, &ske.public_key);
    let mut body = Vec::with_capacity(params.len() + 4 + ske.signature.len());
    body.extend_from_slice(&params);
    if let Some(scheme) = ske.signature_scheme {
        body.extend_from_slice(&scheme.0.to_be_bytes());
    }
    body.extend_from_slice(&(ske.signature.len() as u16).to_be_bytes());
    body.extend_from_slice(&ske.signature);
    wrap_handshake(HandshakeType::ServerKeyExchange, &body)
}

pub fn decode_server_key_exchange(
    body: &[u8],
    version: ProtocolVersion,
) -> Result<ServerKeyExchange, TlsError> {
    let mut reader = Reader::new(body);
    let curve_type = reader.u8()?;
    if curve_type != 3 {
        return Err(TlsError::fatal(
            AlertDescription::HandshakeFailure,
            format!("unsupported ECCurveType {curve_type} (expected named_curve)"),
        ));
    }
    let named_curve = NamedGroup(reader.u16()?);
    let point_len = reader.u8()? as usize;
    let public_key = reader.take(point_len)?.to_vec();

    let signature_scheme = if version.uses_tls12_prf() {
        Some(SignatureScheme(reader.u16()?))
    } else {
        None
    };
    let sig_len = reader.u16()? as usize;
    let signature = reader.take(sig_len)?.to_vec();

    Ok(ServerKeyExchange {
        named_curve,
        public_key,
        signature_scheme,
        signature,
    })
}

// ---------------------------------------------------------------------------
// ClientKeyExchange
// ---------------------------------------------------------------------------

/// ECDHE: the client's public point with a 1-byte length.
pub fn encode_client_key_exchange_ecdhe(public_key: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + public_key.len());
    body.push(public_key.len() as u8);
    body.extend_from_slice(public_key);
    wrap_handshake(HandshakeType::ClientKeyExchange, &body)
}

pub fn decode_client_key_exchange_ecdhe(body: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut reader = Reader::new(body);
    let len = reader.u8()? as usize;
    let point = reader.take(len)?.to_vec();
    if !reader.is_done() {
        return Err(decode_error("trailing bytes after ECDH public"));
    }
    Ok(point)
}

/// Static RSA: the PKCS#1-encrypted premaster with a 2-byte length.
pub fn encode_client_key_exchange_rsa(encrypted_premaster: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + encrypted_premaster.len());
    body.extend_from_slice(&(encrypted_premaster.len() as u16).to_be_bytes());
    body.extend_from_slice(encrypted_premaster);
    wrap_handshake(HandshakeType::ClientKeyExchange, &body)
}

pub fn decode_client_key_exchange_rsa(body: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut reader = Reader::new(body);
    let len = reader.u16()? as usize;
    let encrypted = reader.take(len)?.to_vec();
    if !reader.is_done() {
        return Err(decode_error("trailing bytes after encrypted premaster"));
    }
    Ok(encrypted)
}

// ---------------------------------------------------------------------------
// CertificateRequest / CertificateVerify
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    /// Present at TLS 1.2 only.
    pub signature_schemes: Vec<SignatureScheme>,
    /// DER-encoded distinguished names; may be empty.
    pub certificate_authorities: Vec<Vec<u8>>,
}

pub fn encode_certificate_request(
    request: &CertificateRequest,
    version: ProtocolVersion,
) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(request.certificate_types.len() as u8);
    body.extend_from_slice(&request.certificate_types);
    if version.uses_tls12_prf() {
        body.extend_from_slice(&((request.signature_schemes.len() * 2) as u16).to_be_bytes());
        for scheme in &request.signature_schemes {
            body.extend_from_slice(&scheme.0.to_be_bytes());
        }
    }
    let ca_total: usize = request
        .certificate_authorities
        .iter()
        .map(|name| 2 + name.len())
        .sum();
    body.extend_from_slice(&(ca_total as u16).to_be_bytes());
    for name in &request.certificate_authorities {
        body.extend_from_slice(&(name.len() as u16).to_be_bytes());
        body.extend_from_slice(name);
    }
    wrap_handshake(HandshakeType::CertificateRequest, &body)
}

pub fn decode_certificate_request(
    body: &[u8],
    version: ProtocolVersion,
) -> Result<CertificateRequest, TlsError> {
    let mut reader = Reader::new(body);
    let types_len = reader.u8()? as usize;
    let certificate_types = reader.take(types_len)?.to_vec();

    let signature_schemes = if version.uses_tls12_prf() {
        let len = reader.u16()? as usize;
        if len % 2 != 0 {
            return Err(decode_error("bad supported_signature_algorithms length"));
        }
        reader
            .take(len)?
            .chunks_exact(2)
            .map(|pair| SignatureScheme(u16::from_be_bytes([pair[0], pair[1]])))
            .collect()
    } else {
        Vec::new()
    };

    let ca_total = reader.u16()? as usize;
    let ca_block = reader.take(ca_total)?;
    let mut certificate_authorities = Vec::new();
    let mut inner = Reader::new(ca_block);
    while !inner.is_done() {
        let len = inner.u16()? as usize;
        certificate_authorities.push(inner.take(len)?.to_vec());
    }

    Ok(CertificateRequest {
        certificate_types,
        signature_schemes,
        certificate_authorities,
    })
}

#[derive(Debug, Clone)]
pub struct CertificateVerify {
    /// Present at TLS 1.2 only.
    pub signature_scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

pub fn encode_certificate_verify(verify: &CertificateVerify) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + verify.signature.len());
    if let Some(scheme) = verify.signature_scheme {
        body.extend_from_slice(&scheme.0.to_be_bytes());
    }
    body.extend_from_slice(&(verify.signature.len() as u16).to_be_bytes());
    body.extend_from_slice(&verify.signature);
    wrap_handshake(HandshakeType::CertificateVerify, &body)
}

pub fn decode_certificate_verify(
    body: &[u8],
    version: ProtocolVersion,
) -> Result<CertificateVerify, TlsError> {
    let mut reader = Reader::new(body);
    let signature_scheme = if version.uses_tls12_prf() {
        Some(SignatureScheme(reader.u16()?))
    } else {
        None
    };
    let len = reader.u16()? as usize;
    let signature = reader.take(len)?.to_vec();
    if !reader.is_done() {
        return Err(decode_error("trailing bytes after signature"));
    }
    Ok(CertificateVerify {
        signature_scheme,
        signature,
    })
}

// ---------------------------------------------------------------------------
// Finished / ServerHelloDone / HelloRequest / ChangeCipherSpec
// ---------------------------------------------------------------------------

pub fn encode_finished(verify_data: &[u8]) -> Vec<u8> {
    wrap_handshake(HandshakeType::Finished, verify_data)
}

pub fn decode_finished(body: &[u8]) -> Result<Vec<u8>, TlsError> {
    if body.len() != crate::crypt::key_schedule::VERIFY_DATA_LEN {
        return Err(decode_error(format!(
            "Finished verify_data must be 12 bytes, got {}",
            body.len()
        )));
    }
    Ok(body.to_vec())
}

pub fn encode_server_hello_done() -> Vec<u8> {
    wrap_handshake(HandshakeType::ServerHelloDone, &[])
}

/// ChangeCipherSpec record payload (content type 20, not a handshake
/// message).
pub fn change_cipher_spec_payload() -> Vec<u8> {
    vec![0x01]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::extensions;
    use crate::handshake::HandshakeReassembly;

    fn roundtrip(raw: &[u8]) -> super::super::HandshakeMessage {
        let mut reassembly = HandshakeReassembly::new();
        reassembly.push(raw);
        reassembly.next_message().unwrap().unwrap()
    }

    #[test]
    fn test_client_hello_roundtrip() {
        let hello = ClientHello {
            client_version: ProtocolVersion::TLS12,
            random: [0xAA; 32],
            session_id: vec![1, 2, 3],
            cipher_suites: vec![
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            ],
            compression_methods: vec![0],
            extensions: vec![
                extensions::server_name("example.com"),
                extensions::extended_master_secret(),
            ],
        };
        let raw = encode_client_hello(&hello);
        let msg = roundtrip(&raw);
        assert_eq!(msg.msg_type, HandshakeType::ClientHello);

        let decoded = decode_client_hello(&msg.body).unwrap();
        assert_eq!(decoded.client_version, ProtocolVersion::TLS12);
        assert_eq!(decoded.random, [0xAA; 32]);
        assert_eq!(decoded.session_id, vec![1, 2, 3]);
        assert_eq!(decoded.cipher_suites.len(), 2);
        assert_eq!(decoded.compression_methods, vec![0]);
        assert_eq!(decoded.extensions.len(), 2);
    }

    #[test]
    fn test_client_hello_rejects_long_session_id() {
        let mut body = Vec::new();
        body.extend_from_slice(&[3, 3]);
        body.extend_from_slice(&[0; 32]);
        body.push(33); // session_id length over the RFC limit
        body.extend_from_slice(&[0; 33]);
        body.extend_from_slice(&[0, 2, 0, 0x2F, 1, 0]);
        assert!(decode_client_hello(&body).is_err());
    }

    #[test]
    fn test_server_hello_roundtrip() {
        let hello = ServerHello {
            server_version: ProtocolVersion::TLS12,
            random: [0xBB; 32],
            session_id: vec![9; 32],
            cipher_suite: CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            compression_method: 0,
            extensions: vec![extensions::renegotiation_info(&[])],
        };
        let raw = encode_server_hello(&hello);
        let msg = roundtrip(&raw);
        let decoded = decode_server_hello(&msg.body).unwrap();
        assert_eq!(decoded.server_version, ProtocolVersion::TLS12);
        assert_eq!(decoded.session_id.len(), 32);
        assert_eq!(
            decoded.cipher_suite,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
        );
        assert_eq!(decoded.extensions.len(), 1);
    }

    #[test]
    fn test_certificate_roundtrip() {
        let chain = vec![vec![0x30, 0x82, 0x01, 0x00], vec![0x30, 0x82, 0x02, 0x00]];
        let raw = encode_certificate(&chain);
        let msg = roundtrip(&raw);
        assert_eq!(decode_certificate(&msg.body).unwrap(), chain);

        // Empty chain (client declining authentication)
        let raw = encode_certificate(&[]);
        let msg = roundtrip(&raw);
        assert!(decode_certificate(&msg.body).unwrap().is_empty());
    }

    #[test]
    fn test_server_key_exchange_roundtrip_tls12() {
        let ske = ServerKeyExchange {
            named_curve: NamedGroup::SECP256R1,
            public_key: vec![0x04; 65],
            signature_scheme: Some(SignatureScheme::ECDSA_SECP256R1_SHA256),
            signature: vec![0xAA; 70],
        };
        let raw = encode_server_key_exchange(&ske);
        let msg = roundtrip(&raw);
        let decoded = decode_server_key_exchange(&msg.body, ProtocolVersion::TLS12).unwrap();
        assert_eq!(decoded.named_curve, NamedGroup::SECP256R1);
        assert_eq!(decoded.public_key, vec![0x04; 65]);
        assert_eq!(
            decoded.signature_scheme,
            Some(SignatureScheme::ECDSA_SECP256R1_SHA256)
        );
        assert_eq!(decoded.signature, vec![0xAA; 70]);
    }

    #[test]
    fn test_server_key_exchange_roundtrip_legacy() {
        let ske = ServerKeyExchange {
            named_curve: NamedGroup::X25519,
            public_key: vec![0x42; 32],
            signature_scheme: None,
            signature: vec![0xBB; 128],
        };
        let raw = encode_server_key_exchange(&ske);
        let msg = roundtrip(&raw);
        let decoded = decode_server_key_exchange(&msg.body, ProtocolVersion::TLS11).unwrap();
        assert_eq!(decoded.named_curve, NamedGroup::X25519);
        assert_eq!(decoded.signature_scheme, None);
        assert_eq!(decoded.signature.len(), 128);
    }

    #[test]
    fn test_server_key_exchange_rejects_unnamed_curve() {
        // explicit_prime curve type
        let body = [1u8, 0, 0x17, 1, 0x04, 0, 0];
        assert!(decode_server_key_exchange(&body, ProtocolVersion::TLS12).is_err());
    }

    #[test]
    fn test_ske_signed_data_layout() {
        let params = build_ske_params(NamedGroup::SECP256R1, &[0x04; 65]);
        let signed = build_ske_signed_data(&[1; 32], &[2; 32], &params);
        assert_eq!(signed.len(), 32 + 32 + 1 + 2 + 1 + 65);
        assert_eq!(signed[64], 3); // named_curve
        assert_eq!(&signed[65..67], &[0x00, 0x17]);
        assert_eq!(signed[67], 65);
    }

    #[test]
    fn test_client_key_exchange_ecdhe_roundtrip() {
        let raw = encode_client_key_exchange_ecdhe(&[0x04; 65]);
        let msg = roundtrip(&raw);
        assert_eq!(
            decode_client_key_exchange_ecdhe(&msg.body).unwrap(),
            vec![0x04; 65]
        );
    }

    #[test]
    fn test_client_key_exchange_rsa_roundtrip() {
        let raw = encode_client_key_exchange_rsa(&[0x55; 256]);
        let msg = roundtrip(&raw);
        assert_eq!(
            decode_client_key_exchange_rsa(&msg.body).unwrap(),
            vec![0x55; 256]
        );
    }

    #[test]
    fn test_certificate_request_roundtrip() {
        let request = CertificateRequest {
            certificate_types: vec![CERT_TYPE_RSA_SIGN, CERT_TYPE_ECDSA_SIGN],
            signature_schemes: vec![
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA256,
            ],
            certificate_authorities: vec![vec![0x30, 0x10]],
        };
        let raw = encode_certificate_request(&request, ProtocolVersion::TLS12);
        let msg = roundtrip(&raw);
        let decoded = decode_certificate_request(&msg.body, ProtocolVersion::TLS12).unwrap();
        assert_eq!(decoded.certificate_types, request.certificate_types);
        assert_eq!(decoded.signature_schemes, request.signature_schemes);
        assert_eq!(
            decoded.certificate_authorities,
            request.certificate_authorities
        );

        // Legacy form has no signature algorithms
        let raw = encode_certificate_request(&request, ProtocolVersion::TLS10);
        let msg = roundtrip(&raw);
        let decoded = decode_certificate_request(&msg.body, ProtocolVersion::TLS10).unwrap();
        assert!(decoded.signature_schemes.is_empty());
        assert_eq!(decoded.certificate_types, request.certificate_types);
    }

    #[test]
    fn test_certificate_verify_roundtrip() {
        let verify = CertificateVerify {
            signature_scheme: Some(SignatureScheme::RSA_PKCS1_SHA256),
            signature: vec![0xCC; 128],
        };
        let raw = encode_certificate_verify(&verify);
        let msg = roundtrip(&raw);
        let decoded = decode_certificate_verify(&msg.body, ProtocolVersion::TLS12).unwrap();
        assert_eq!(
            decoded.signature_scheme,
            Some(SignatureScheme::RSA_PKCS1_SHA256)
        );
        assert_eq!(decoded.signature.len(), 128);
    }

    #[test]
    fn test_finished_length_check() {
        assert!(decode_finished(&[0xAA; 12]).is_ok());
        assert!(decode_finished(&[0xAA; 11]).is_err());
        assert!(decode_finished(&[0xAA; 13]).is_err());
    }

    #[test]
    fn test_server_hello_done_and_ccs() {
        let raw = encode_server_hello_done();
        let msg = roundtrip(&raw);
        assert_eq!(msg.msg_type, HandshakeType::ServerHelloDone);
        assert!(msg.body.is_empty());

        assert_eq!(change_cipher_spec_payload(), vec![0x01]);
    }
}
