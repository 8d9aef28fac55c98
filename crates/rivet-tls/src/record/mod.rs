//! TLS record layer: framing, limits, cipher activation, close discipline.
//!
//! Two half-duplex pipelines share this struct: inbound records are opened
//! one at a time (the engine consumes exactly one record per unwrap),
//! outbound fragments are sealed into whole records. An optional
//! [`RecordCipher`] protects each direction; activation is driven by
//! ChangeCipherSpec and resets that direction's sequence number to zero.

pub mod cipher;

pub use cipher::{CipherKeys, RecordCipher};

use crate::version::ProtocolVersion;
use rivet_types::{AlertDescription, TlsError};

/// Maximum plaintext fragment (RFC 5246 §6.2.1).
pub const MAX_PLAINTEXT_LEN: usize = 1 << 14;
/// Maximum ciphertext fragment (RFC 5246 §6.2.3).
pub const MAX_CIPHERTEXT_LEN: usize = (1 << 14) + 2048;
/// Record header: type(1) | version(2) | length(2).
pub const HEADER_LEN: usize = 5;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    /// Parsed and discarded (RFC 6520 is not implemented).
    Heartbeat = 24,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            24 => Ok(ContentType::Heartbeat),
            _ => Err(v),
        }
    }
}

/// A parsed 5-byte record header.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub fragment_len: usize,
}

impl RecordHeader {
    /// Total record size on the wire.
    pub fn record_len(&self) -> usize {
        HEADER_LEN + self.fragment_len
    }
}

/// Parse a record header. Needs at least [`HEADER_LEN`] bytes.
pub fn parse_header(data: &[u8]) -> Result<RecordHeader, TlsError> {
    if data.len() < HEADER_LEN {
        return Err(TlsError::fatal(
            AlertDescription::DecodeError,
            "incomplete record header",
        ));
    }
    let content_type = ContentType::from_u8(data[0]).map_err(|v| {
        TlsError::fatal(
            AlertDescription::DecodeError,
            format!("unknown record content type {v}"),
        )
    })?;
    let version = ProtocolVersion::from_wire(data[1], data[2]);
    if version.major != 3 {
        return Err(TlsError::fatal(
            AlertDescription::DecodeError,
            format!("bad record version {version}"),
        ));
    }
    let fragment_len = u16::from_be_bytes([data[3], data[4]]) as usize;
    if fragment_len > MAX_CIPHERTEXT_LEN {
        return Err(TlsError::fatal(
            AlertDescription::RecordOverflow,
            format!("record length {fragment_len} exceeds 2^14 + 2048"),
        ));
    }
    Ok(RecordHeader {
        content_type,
        version,
        fragment_len,
    })
}

/// The record layer's two half-duplex pipelines.
pub struct RecordLayer {
    read_cipher: Option<RecordCipher>,
    write_cipher: Option<RecordCipher>,
    /// Version written into outbound record headers. The first client
    /// flight goes out as TLS 1.0 for interoperability (RFC 5246 E.1);
    /// negotiation pins it afterwards.
    write_version: ProtocolVersion,
    /// Once negotiation fixes the version, inbound records must carry it.
    read_version: Option<ProtocolVersion>,
    inbound_closed: bool,
    outbound_closed: bool,
}

impl RecordLayer {
    pub fn new() -> Self {
        Self {
            read_cipher: None,
            write_cipher: None,
            write_version: ProtocolVersion::TLS10,
            read_version: None,
            inbound_closed: false,
            outbound_closed: false,
        }
    }

    /// Pin the negotiated version for both directions.
    pub fn set_negotiated_version(&mut self, version: ProtocolVersion) {
        self.write_version = version;
        self.read_version = Some(version);
    }

    /// Open exactly one record from `data` (which must hold the whole
    /// record). Returns the content type, the plaintext fragment, and the
    /// bytes consumed.
    pub fn open_record(&mut self, data: &[u8]) -> Result<(ContentType, Vec<u8>, usize), TlsError> {
        if self.inbound_closed {
            return Err(TlsError::Closed);
        }
        let header = parse_header(data)?;
        if let Some(expected) = self.read_version {
            if header.version != expected {
                return Err(TlsError::fatal(
                    AlertDescription::ProtocolVersion,
                    format!("record version {} after negotiating {expected}", header.version),
                ));
            }
        }
        if data.len() < header.record_len() {
            return Err(TlsError::fatal(
                AlertDescription::DecodeError,
                "incomplete record body",
            ));
        }
        let fragment = &data[HEADER_LEN..header.record_len()];

        let plaintext = match &mut self.read_cipher {
            Some(cipher) => cipher.decrypt(header.content_type, fragment)?,
            None => {
                if fragment.len() > MAX_PLAINTEXT_LEN {
                    return Err(TlsError::fatal(
                        AlertDescription::RecordOverflow,
                        "plaintext record exceeds 2^14 bytes",
                    ));
                }
                fragment.to_vec()
            }
        };

        Ok((header.content_type, plaintext, header.record_len()))
    }

    /// Seal one plaintext fragment into `out` as a whole record.
    pub fn seal_record_into(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), TlsError> {
        if self.outbound_closed {
            return Err(TlsError::Closed);
        }
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(TlsError::fatal(
                AlertDescription::InternalError,
                "plaintext fragment exceeds 2^14 bytes",
            ));
        }

        let version = self.write_version;
        let fragment = match &mut self.write_cipher {
            Some(cipher) => cipher.encrypt(content_type, plaintext)?,
            None => plaintext.to_vec(),
        };
        if fragment.len() > MAX_CIPHERTEXT_LEN {
            return Err(TlsError::fatal(
                AlertDescription::InternalError,
                "sealed fragment exceeds 2^14 + 2048 bytes",
            ));
        }

        out.push(content_type as u8);
        out.extend_from_slice(&version.to_wire());
        out.extend_from_slice(&(fragment.len() as u16).to_be_bytes());
        out.extend_from_slice(&fragment);
        Ok(())
    }

    /// Install the inbound cipher; the next record read uses it (sequence
    /// number zero).
    pub fn activate_read(&mut self, cipher: RecordCipher) {
        self.read_cipher = Some(cipher);
    }

    /// Install the outbound cipher; the next record written uses it.
    pub fn activate_write(&mut self, cipher: RecordCipher) {
        self.write_cipher = Some(cipher);
    }

    pub fn is_read_protected(&self) -> bool {
        self.read_cipher.is_some()
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_cipher.is_some()
    }

    /// Worst-case per-record growth of the outbound pipeline (cipher
    /// expansion only; the 5-byte header is extra).
    pub fn write_expansion(&self) -> usize {
        self.write_cipher
            .as_ref()
            .map_or(0, |cipher| cipher.max_expansion())
    }

    /// True when outbound application data must be split 1/n-1.
    pub fn write_needs_split(&self) -> bool {
        self.write_cipher
            .as_ref()
            .is_some_and(|cipher| cipher.needs_plaintext_split())
    }

    pub fn close_inbound(&mut self) {
        self.inbound_closed = true;
    }

    pub fn close_outbound(&mut self) {
        self.outbound_closed = true;
    }

    pub fn is_inbound_closed(&self) -> bool {
        self.inbound_closed
    }

    pub fn is_outbound_closed(&self) -> bool {
        self.outbound_closed
    }
}

impl Default for RecordLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let header = parse_header(&[22, 3, 3, 0x01, 0x00]).unwrap();
        assert_eq!(header.content_type, ContentType::Handshake);
        assert_eq!(header.version, ProtocolVersion::TLS12);
        assert_eq!(header.fragment_len, 256);
        assert_eq!(header.record_len(), 261);
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        // Too short
        assert!(parse_header(&[22, 3, 3, 0]).is_err());
        // Unknown content type
        let err = parse_header(&[99, 3, 3, 0, 0]).unwrap_err();
        assert_eq!(err.alert(), Some(rivet_types::AlertDescription::DecodeError));
        // Bad major version
        assert!(parse_header(&[22, 2, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_parse_header_record_overflow() {
        let too_big = (MAX_CIPHERTEXT_LEN + 1) as u16;
        let bytes = too_big.to_be_bytes();
        let err = parse_header(&[23, 3, 3, bytes[0], bytes[1]]).unwrap_err();
        assert_eq!(
            err.alert(),
            Some(rivet_types::AlertDescription::RecordOverflow)
        );
    }

    #[test]
    fn test_plaintext_roundtrip() {
        let mut layer = RecordLayer::new();
        let mut out = Vec::new();
        layer
            .seal_record_into(ContentType::Handshake, b"client hello bytes", &mut out)
            .unwrap();
        assert_eq!(out[0], 22);
        assert_eq!(out.len(), HEADER_LEN + 18);

        let (ct, plaintext, consumed) = layer.open_record(&out).unwrap();
        assert_eq!(ct, ContentType::Handshake);
        assert_eq!(plaintext, b"client hello bytes");
        assert_eq!(consumed, out.len());
    }

    #[test]
    fn test_version_pinning_after_negotiation() {
        let mut layer = RecordLayer::new();
        layer.set_negotiated_version(ProtocolVersion::TLS12);

        let mut out = Vec::new();
        layer
            .seal_record_into(ContentType::ApplicationData, b"x", &mut out)
            .unwrap();
        assert_eq!(&out[1..3], &[3, 3]);

        // A record claiming TLS 1.0 is now rejected
        let mut bad = out.clone();
        bad[2] = 1;
        let err = layer.open_record(&bad).unwrap_err();
        assert_eq!(
            err.alert(),
            Some(rivet_types::AlertDescription::ProtocolVersion)
        );
    }

    #[test]
    fn test_first_flight_version_is_permissive() {
        let mut layer = RecordLayer::new();
        // No negotiated version yet: both 3,1 and 3,3 headers are accepted
        for minor in [1u8, 3u8] {
            let record = [22, 3, minor, 0, 2, 0xAA, 0xBB];
            let (_, plaintext, _) = layer.open_record(&record).unwrap();
            assert_eq!(plaintext, &[0xAA, 0xBB]);
        }
    }

    #[test]
    fn test_closed_pipelines_refuse_io() {
        let mut layer = RecordLayer::new();
        layer.close_outbound();
        let mut out = Vec::new();
        assert!(matches!(
            layer.seal_record_into(ContentType::ApplicationData, b"x", &mut out),
            Err(TlsError::Closed)
        ));

        layer.close_inbound();
        assert!(matches!(
            layer.open_record(&[23, 3, 3, 0, 1, 0]),
            Err(TlsError::Closed)
        ));
    }

    #[cfg(feature = "rustcrypto-provider")]
    #[test]
    fn test_cipher_activation_changes_wire_form() {
        use crate::crypt::BulkCipher;
        use crate::provider::rustcrypto::RustCryptoProvider;

        let crypto = RustCryptoProvider::new();
        let keys = CipherKeys {
            bulk: BulkCipher::Aes128Gcm,
            version: ProtocolVersion::TLS12,
            key: vec![0x42; 16],
            fixed_iv: vec![0xAB; 4],
            mac_key: Vec::new(),
        };

        let mut writer = RecordLayer::new();
        writer.set_negotiated_version(ProtocolVersion::TLS12);
        writer.activate_write(RecordCipher::new(&crypto, &keys, None).unwrap());
        assert!(writer.is_write_protected());
        assert_eq!(writer.write_expansion(), 24);

        let mut out = Vec::new();
        writer
            .seal_record_into(ContentType::ApplicationData, b"secret app data", &mut out)
            .unwrap();
        // Ciphertext, not plaintext, on the wire
        assert_ne!(&out[HEADER_LEN..], b"secret app data".as_slice());

        let mut reader = RecordLayer::new();
        reader.set_negotiated_version(ProtocolVersion::TLS12);
        reader.activate_read(RecordCipher::new(&crypto, &keys, None).unwrap());
        let (ct, plaintext, _) = reader.open_record(&out).unwrap();
        assert_eq!(ct, ContentType::ApplicationData);
        assert_eq!(plaintext, b"secret app data");
    }
}
