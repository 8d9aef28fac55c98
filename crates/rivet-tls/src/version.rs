//! TLS protocol version numbers.

/// A TLS protocol version as a (major, minor) pair with a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const SSL30: Self = Self { major: 3, minor: 0 };
    pub const TLS10: Self = Self { major: 3, minor: 1 };
    pub const TLS11: Self = Self { major: 3, minor: 2 };
    pub const TLS12: Self = Self { major: 3, minor: 3 };

    /// Construct from the 2-byte wire encoding.
    pub fn from_wire(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// The 2-byte wire encoding.
    pub fn to_wire(&self) -> [u8; 2] {
        [self.major, self.minor]
    }

    /// True if record protection uses a per-record explicit IV (TLS >= 1.1).
    pub fn uses_explicit_cbc_iv(&self) -> bool {
        *self >= ProtocolVersion::TLS11
    }

    /// True if the handshake PRF is the TLS 1.2 P_hash construction rather
    /// than the MD5+SHA-1 combination of earlier versions.
    pub fn uses_tls12_prf(&self) -> bool {
        *self >= ProtocolVersion::TLS12
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ProtocolVersion::SSL30 => f.write_str("SSLv3"),
            ProtocolVersion::TLS10 => f.write_str("TLSv1.0"),
            ProtocolVersion::TLS11 => f.write_str("TLSv1.1"),
            ProtocolVersion::TLS12 => f.write_str("TLSv1.2"),
            ProtocolVersion { major, minor } => write!(f, "TLS({major},{minor})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_total_order() {
        assert!(ProtocolVersion::SSL30 < ProtocolVersion::TLS10);
        assert!(ProtocolVersion::TLS10 < ProtocolVersion::TLS11);
        assert!(ProtocolVersion::TLS11 < ProtocolVersion::TLS12);
    }

    #[test]
    fn test_wire_roundtrip() {
        let v = ProtocolVersion::from_wire(3, 3);
        assert_eq!(v, ProtocolVersion::TLS12);
        assert_eq!(v.to_wire(), [3, 3]);
    }

    #[test]
    fn test_feature_predicates() {
        assert!(!ProtocolVersion::TLS10.uses_explicit_cbc_iv());
        assert!(ProtocolVersion::TLS11.uses_explicit_cbc_iv());
        assert!(ProtocolVersion::TLS12.uses_explicit_cbc_iv());

        assert!(!ProtocolVersion::TLS11.uses_tls12_prf());
        assert!(ProtocolVersion::TLS12.uses_tls12_prf());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolVersion::TLS12.to_string(), "TLSv1.2");
        assert_eq!(ProtocolVersion::TLS10.to_string(), "TLSv1.0");
    }
}
