//! Hello extension codec.
//!
//! The engine processes SNI, supported_groups, ec_point_formats,
//! signature_algorithms, ALPN, extended_master_secret, and
//! renegotiation_info; everything else is carried opaquely and ignored.

use crate::crypt::{NamedGroup, SignatureScheme};
use rivet_types::{AlertDescription, TlsError};

/// Extension type identifiers (IANA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionType(pub u16);

impl ExtensionType {
    pub const SERVER_NAME: Self = Self(0);
    pub const SUPPORTED_GROUPS: Self = Self(10);
    pub const EC_POINT_FORMATS: Self = Self(11);
    pub const SIGNATURE_ALGORITHMS: Self = Self(13);
    pub const ALPN: Self = Self(16);
    pub const EXTENDED_MASTER_SECRET: Self = Self(23);
    pub const RENEGOTIATION_INFO: Self = Self(0xFF01);
}

/// A raw extension.
#[derive(Debug, Clone)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub data: Vec<u8>,
}

fn decode_error(reason: &str) -> TlsError {
    TlsError::fatal(AlertDescription::DecodeError, reason.to_string())
}

/// Encode an extension list with its 2-byte outer length.
pub fn encode_extensions_block(extensions: &[Extension]) -> Vec<u8> {
    let mut body = Vec::new();
    for extension in extensions {
        body.extend_from_slice(&extension.extension_type.0.to_be_bytes());
        body.extend_from_slice(&(extension.data.len() as u16).to_be_bytes());
        body.extend_from_slice(&extension.data);
    }
    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Parse an extension list preceded by its 2-byte length. Duplicate types
/// are rejected.
pub fn parse_extensions_block(data: &[u8]) -> Result<Vec<Extension>, TlsError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < 2 {
        return Err(decode_error("truncated extensions length"));
    }
    let total = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() != 2 + total {
        return Err(decode_error("extensions length mismatch"));
    }

    let mut extensions = Vec::new();
    let mut pos = 2;
    while pos < data.len() {
        if data.len() - pos < 4 {
            return Err(decode_error("truncated extension header"));
        }
        let extension_type = ExtensionType(u16::from_be_bytes([data[pos], data[pos + 1]]));
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 4;
        if data.len() - pos < len {
            return Err(decode_error("truncated extension data"));
        }
        if extensions
            .iter()
            .any(|e: &Extension| e.extension_type == extension_type)
        {
            return Err(decode_error("duplicate extension"));
        }
        extensions.push(Extension {
            extension_type,
            data: data[pos..pos + len].to_vec(),
        });
        pos += len;
    }
    Ok(extensions)
}

/// Find an extension by type.
pub fn find<'a>(extensions: &'a [Extension], extension_type: ExtensionType) -> Option<&'a [u8]> {
    extensions
        .iter()
        .find(|e| e.extension_type == extension_type)
        .map(|e| e.data.as_slice())
}

// ---------------------------------------------------------------------------
// server_name (RFC 6066 §3)
// ---------------------------------------------------------------------------

pub fn server_name(host: &str) -> Extension {
    let host = host.as_bytes();
    let mut entry = Vec::with_capacity(3 + host.len());
    entry.push(0); // host_name
    entry.extend_from_slice(&(host.len() as u16).to_be_bytes());
    entry.extend_from_slice(host);

    let mut data = Vec::with_capacity(2 + entry.len());
    data.extend_from_slice(&(entry.len() as u16).to_be_bytes());
    data.extend_from_slice(&entry);
    Extension {
        extension_type: ExtensionType::SERVER_NAME,
        data,
    }
}

/// Parse the first host_name entry, if present.
pub fn parse_server_name(data: &[u8]) -> Result<Option<String>, TlsError> {
    // The server's acknowledgement is empty.
    if data.is_empty() {
        return Ok(None);
    }
    if data.len() < 2 {
        return Err(decode_error("truncated server_name list"));
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() != 2 + list_len {
        return Err(decode_error("server_name list length mismatch"));
    }
    let mut pos = 2;
    while pos < data.len() {
        if data.len() - pos < 3 {
            return Err(decode_error("truncated server_name entry"));
        }
        let name_type = data[pos];
        let len = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) as usize;
        pos += 3;
        if data.len() - pos < len {
            return Err(decode_error("truncated server_name"));
        }
        if name_type == 0 {
            let host = std::str::from_utf8(&data[pos..pos + len])
                .map_err(|_| decode_error("server_name is not valid UTF-8"))?;
            return Ok(Some(host.to_string()));
        }
        pos += len;
    }
    Ok(None)
}

/// The server's empty SNI acknowledgement.
pub fn server_name_ack() -> Extension {
    Extension {
        extension_type: ExtensionType::SERVER_NAME,
        data: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// supported_groups (RFC 8422 §5.1.1) / ec_point_formats (§5.1.2)
// ---------------------------------------------------------------------------

pub fn supported_groups(groups: &[NamedGroup]) -> Extension {
    let mut data = Vec::with_capacity(2 + groups.len() * 2);
    data.extend_from_slice(&((groups.len() * 2) as u16).to_be_bytes());
    for group in groups {
        data.extend_from_slice(&group.0.to_be_bytes());
    }
    Extension {
        extension_type: ExtensionType::SUPPORTED_GROUPS,
        data,
    }
}

pub fn parse_supported_groups(data: &[u8]) -> Result<Vec<NamedGroup>, TlsError> {
    if data.len() < 2 {
        return Err(decode_error("truncated supported_groups"));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() != 2 + len || len % 2 != 0 {
        return Err(decode_error("supported_groups length mismatch"));
    }
    Ok(data[2..]
        .chunks_exact(2)
        .map(|pair| NamedGroup(u16::from_be_bytes([pair[0], pair[1]])))
        .collect())
}

/// Only the uncompressed point format is ever offered.
pub fn ec_point_formats() -> Extension {
    Extension {
        extension_type: ExtensionType::EC_POINT_FORMATS,
        data: vec![1, 0],
    }
}

/// The peer must list the uncompressed format (RFC 8422 §5.1.2).
pub fn parse_ec_point_formats(data: &[u8]) -> Result<(), TlsError> {
    if data.len() < 2 || data[0] as usize != data.len() - 1 {
        return Err(decode_error("truncated ec_point_formats"));
    }
    if !data[1..].contains(&0) {
        return Err(TlsError::fatal(
            AlertDescription::IllegalParameter,
            "peer does not support uncompressed points",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// signature_algorithms (RFC 5246 §7.4.1.4.1)
// ---------------------------------------------------------------------------

pub fn signature_algorithms(schemes: &[SignatureScheme]) -> Extension {
    let mut data = Vec::with_capacity(2 + schemes.len() * 2);
    data.extend_from_slice(&((schemes.len() * 2) as u16).to_be_bytes());
    for scheme in schemes {
        data.extend_from_slice(&scheme.0.to_be_bytes());
    }
    Extension {
        extension_type: ExtensionType::SIGNATURE_ALGORITHMS,
        data,
    }
}

pub fn parse_signature_algorithms(data: &[u8]) -> Result<Vec<SignatureScheme>, TlsError> {
    if data.len() < 2 {
        return Err(decode_error("truncated signature_algorithms"));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() != 2 + len || len % 2 != 0 {
        return Err(decode_error("signature_algorithms length mismatch"));
    }
    Ok(data[2..]
        .chunks_exact(2)
        .map(|pair| SignatureScheme(u16::from_be_bytes([pair[0], pair[1]])))
        .collect())
}

// ---------------------------------------------------------------------------
// application_layer_protocol_negotiation (RFC 7301)
// ---------------------------------------------------------------------------

pub fn alpn(protocols: &[Vec<u8>]) -> Extension {
    let mut list = Vec::new();
    for protocol in protocols {
        list.push(protocol.len() as u8);
        list.extend_from_slice(protocol);
    }
    let mut data = Vec::with_capacity(2 + list.len());
    data.extend_from_slice(&(list.len() as u16).to_be_bytes());
    data.extend_from_slice(&list);
    Extension {
        extension_type: ExtensionType::ALPN,
        data,
    }
}

pub fn parse_alpn(data: &[u8]) -> Result<Vec<Vec<u8>>, TlsError> {
    if data.len() < 2 {
        return Err(decode_error("truncated ALPN list"));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() != 2 + len {
        return Err(decode_error("ALPN list length mismatch"));
    }
    let mut protocols = Vec::new();
    let mut pos = 2;
    while pos < data.len() {
        let plen = data[pos] as usize;
        pos += 1;
        if plen == 0 || data.len() - pos < plen {
            return Err(decode_error("bad ALPN protocol name"));
        }
        protocols.push(data[pos..pos + plen].to_vec());
        pos += plen;
    }
    Ok(protocols)
}

// ---------------------------------------------------------------------------
// extended_master_secret (RFC 7627) / renegotiation_info (RFC 5746)
// ---------------------------------------------------------------------------

pub fn extended_master_secret() -> Extension {
    Extension {
        extension_type: ExtensionType::EXTENDED_MASTER_SECRET,
        data: Vec::new(),
    }
}

/// `renegotiated_connection` carries the previous verify_data; empty on the
/// initial handshake.
pub fn renegotiation_info(verify_data: &[u8]) -> Extension {
    let mut data = Vec::with_capacity(1 + verify_data.len());
    data.push(verify_data.len() as u8);
    data.extend_from_slice(verify_data);
    Extension {
        extension_type: ExtensionType::RENEGOTIATION_INFO,
        data,
    }
}

pub fn parse_renegotiation_info(data: &[u8]) -> Result<Vec<u8>, TlsError> {
    if data.is_empty() || data[0] as usize != data.len() - 1 {
        return Err(decode_error("bad renegotiation_info"));
    }
    Ok(data[1..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions_block_roundtrip() {
        let extensions = vec![server_name("example.com"), extended_master_secret()];
        let block = encode_extensions_block(&extensions);
        let parsed = parse_extensions_block(&block).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].extension_type, ExtensionType::SERVER_NAME);
        assert_eq!(parsed[1].extension_type, ExtensionType::EXTENDED_MASTER_SECRET);
        assert!(parsed[1].data.is_empty());
    }

    #[test]
    fn test_duplicate_extension_rejected() {
        let extensions = vec![extended_master_secret(), extended_master_secret()];
        let block = encode_extensions_block(&extensions);
        assert!(parse_extensions_block(&block).is_err());
    }

    #[test]
    fn test_empty_extensions() {
        assert!(parse_extensions_block(&[]).unwrap().is_empty());
        let block = encode_extensions_block(&[]);
        assert_eq!(block, vec![0, 0]);
        assert!(parse_extensions_block(&block).unwrap().is_empty());
    }

    #[test]
    fn test_server_name_roundtrip() {
        let extension = server_name("tls.example.net");
        let host = parse_server_name(&extension.data).unwrap();
        assert_eq!(host.as_deref(), Some("tls.example.net"));

        // Empty acknowledgement parses as no name
        assert_eq!(parse_server_name(&[]).unwrap(), None);
    }

    #[test]
    fn test_supported_groups_roundtrip() {
        let extension = supported_groups(&[NamedGroup::X25519, NamedGroup::SECP256R1]);
        let groups = parse_supported_groups(&extension.data).unwrap();
        assert_eq!(groups, vec![NamedGroup::X25519, NamedGroup::SECP256R1]);
    }

    #[test]
    fn test_signature_algorithms_roundtrip() {
        let schemes = [
            SignatureScheme::ECDSA_SECP256R1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA256,
        ];
        let extension = signature_algorithms(&schemes);
        let parsed = parse_signature_algorithms(&extension.data).unwrap();
        assert_eq!(parsed, schemes.to_vec());
    }

    #[test]
    fn test_alpn_roundtrip() {
        let protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        let extension = alpn(&protocols);
        let parsed = parse_alpn(&extension.data).unwrap();
        assert_eq!(parsed, protocols);
    }

    #[test]
    fn test_alpn_rejects_empty_name() {
        // list length 1 with a zero-length protocol
        let data = vec![0, 1, 0];
        assert!(parse_alpn(&data).is_err());
    }

    #[test]
    fn test_ec_point_formats() {
        let extension = ec_point_formats();
        assert!(parse_ec_point_formats(&extension.data).is_ok());
        // Compressed-only peer is rejected
        assert!(parse_ec_point_formats(&[1, 2]).is_err());
    }

    #[test]
    fn test_renegotiation_info_roundtrip() {
        let extension = renegotiation_info(&[]);
        assert_eq!(parse_renegotiation_info(&extension.data).unwrap(), b"");

        let extension = renegotiation_info(&[1, 2, 3]);
        assert_eq!(
            parse_renegotiation_info(&extension.data).unwrap(),
            vec![1, 2, 3]
        );

        assert!(parse_renegotiation_info(&[]).is_err());
        assert!(parse_renegotiation_info(&[5, 1, 2]).is_err());
    }

    #[test]
    fn test_find() {
        let extensions = vec![server_name("a"), extended_master_secret()];
        assert!(find(&extensions, ExtensionType::SERVER_NAME).is_some());
        assert!(find(&extensions, ExtensionType::ALPN).is_none());
    }
}
