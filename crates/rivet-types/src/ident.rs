/// Hash algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlg {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    /// The TLS 1.0/1.1 handshake digest: MD5 and SHA-1 concatenated.
    Md5Sha1,
}

impl HashAlg {
    /// Digest output size in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlg::Md5 => 16,
            HashAlg::Sha1 => 20,
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
            HashAlg::Md5Sha1 => 36,
        }
    }
}

/// AEAD cipher identifiers used by TLS record protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeadAlg {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
}

/// Block cipher identifiers for CBC record protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCipherAlg {
    Aes128Cbc,
    Aes256Cbc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_output_lengths() {
        assert_eq!(HashAlg::Md5.output_len(), 16);
        assert_eq!(HashAlg::Sha1.output_len(), 20);
        assert_eq!(HashAlg::Sha256.output_len(), 32);
        assert_eq!(HashAlg::Sha384.output_len(), 48);
        assert_eq!(HashAlg::Md5Sha1.output_len(), 36);
    }
}
