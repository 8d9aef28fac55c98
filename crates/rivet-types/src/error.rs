use crate::alert::AlertDescription;

/// Cryptographic capability errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("operation not supported")]
    NotSupported,
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid iv length")]
    InvalidIvLength,
    #[error("input is not a whole number of cipher blocks")]
    InvalidInputLength,
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("aead: tag verification failed")]
    AeadTagVerifyFail,
    #[error("signature verification failed")]
    SignatureVerifyFail,
    #[error("signing failed")]
    SignFail,
    #[error("key agreement failed")]
    KeyAgreementFail,
    #[error("asymmetric encryption failed")]
    AsymEncryptFail,
    #[error("asymmetric decryption failed")]
    AsymDecryptFail,
    #[error("random generation failed")]
    RandGenFail,
    #[error("no public key found in certificate")]
    NoPublicKeyInCert,
}

/// TLS protocol and engine errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// A local failure that maps to a fatal alert sent to the peer.
    #[error("fatal alert {}: {reason}", .alert.name())]
    Fatal {
        alert: AlertDescription,
        reason: String,
    },
    /// The peer sent us a fatal alert.
    #[error("received fatal alert: {0}")]
    PeerAlert(AlertDescription),
    /// The peer sent an alert with an unrecognized description code.
    #[error("received fatal alert with unknown code {0}")]
    PeerAlertUnknown(u8),
    /// Invalid parameters detected before any bytes were produced.
    #[error("configuration error: {0}")]
    Config(String),
    /// Host misuse of the engine API; the connection is unaffected.
    #[error("engine misuse: {0}")]
    Misuse(String),
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl TlsError {
    /// Shorthand for a fatal-alert error.
    pub fn fatal(alert: AlertDescription, reason: impl Into<String>) -> Self {
        TlsError::Fatal {
            alert,
            reason: reason.into(),
        }
    }

    /// The alert this error should surface to the peer, if any.
    ///
    /// Capability errors map to `internal_error`; configuration and misuse
    /// errors never touch the connection.
    pub fn alert(&self) -> Option<AlertDescription> {
        match self {
            TlsError::Fatal { alert, .. } => Some(*alert),
            TlsError::Crypto(_) => Some(AlertDescription::InternalError),
            _ => None,
        }
    }
}
