//! TLS alert protocol: the 2-byte wire form and the mapping from engine
//! errors to outbound alerts.

use rivet_types::{AlertDescription, AlertLevel, TlsError};

/// A TLS alert.
#[derive(Debug, Clone, Copy)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    pub fn close_notify() -> Self {
        Self {
            level: AlertLevel::Warning,
            description: AlertDescription::CloseNotify,
        }
    }

    /// The 2-byte record fragment.
    pub fn encode(&self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }

    /// Parse an alert record fragment.
    ///
    /// An unknown description code in a fatal alert is still fatal; the raw
    /// code is preserved for diagnostics.
    pub fn decode(fragment: &[u8]) -> Result<(AlertLevel, Result<AlertDescription, u8>), TlsError> {
        if fragment.len() != 2 {
            return Err(TlsError::fatal(
                AlertDescription::DecodeError,
                format!("alert fragment must be 2 bytes, got {}", fragment.len()),
            ));
        }
        let level = AlertLevel::from_u8(fragment[0]).map_err(|v| {
            TlsError::fatal(AlertDescription::DecodeError, format!("bad alert level {v}"))
        })?;
        Ok((level, AlertDescription::from_u8(fragment[1])))
    }

    /// The outbound alert for an engine failure, if the failure is one that
    /// reaches the wire at all (configuration and misuse errors do not).
    pub fn for_error(error: &TlsError) -> Option<Alert> {
        error.alert().map(Alert::fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let a = Alert::fatal(AlertDescription::HandshakeFailure);
        assert_eq!(a.encode(), [2, 40]);
        assert_eq!(Alert::close_notify().encode(), [1, 0]);
    }

    #[test]
    fn test_decode_roundtrip() {
        let (level, desc) = Alert::decode(&[2, 20]).unwrap();
        assert_eq!(level, AlertLevel::Fatal);
        assert_eq!(desc.unwrap(), AlertDescription::BadRecordMac);
    }

    #[test]
    fn test_decode_unknown_description_preserved() {
        let (level, desc) = Alert::decode(&[2, 200]).unwrap();
        assert_eq!(level, AlertLevel::Fatal);
        assert_eq!(desc.unwrap_err(), 200);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(Alert::decode(&[2]).is_err());
        assert!(Alert::decode(&[1, 0, 0]).is_err());
        assert!(Alert::decode(&[9, 0]).is_err());
    }

    #[test]
    fn test_for_error() {
        let e = TlsError::fatal(AlertDescription::DecodeError, "bad header");
        let a = Alert::for_error(&e).unwrap();
        assert_eq!(a.description, AlertDescription::DecodeError);
        assert_eq!(a.level, AlertLevel::Fatal);

        assert!(Alert::for_error(&TlsError::Misuse("renegotiation".into())).is_none());
    }
}
