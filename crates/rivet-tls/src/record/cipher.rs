//! Per-direction record protection.
//!
//! AEAD suites follow RFC 5246 §6.2.3.3: GCM carries an 8-byte explicit
//! nonce (the sequence number) and builds `fixed_iv(4) || explicit(8)`;
//! ChaCha20-Poly1305 (RFC 7905) XORs the padded sequence number into a
//! 12-byte IV and sends no explicit nonce. The AAD is 13 bytes:
//! `seq(8) || type(1) || version(2) || plaintext_length(2)`.
//!
//! CBC suites are HMAC-SHA1 MAC-then-encrypt (RFC 5246 §6.2.3.2) with a
//! random explicit IV from TLS 1.1 on and the previous record's last
//! ciphertext block as IV on TLS 1.0.

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::crypt::{hmac, BulkCipher};
use crate::provider::{Aead, BlockCipher, Crypto, HashFactory, NonceGenerator};
use crate::version::ProtocolVersion;
use rivet_types::{AlertDescription, HashAlg, TlsError};

use super::{ContentType, MAX_PLAINTEXT_LEN};

/// Key material for one direction, produced by the key schedule.
pub struct CipherKeys {
    pub bulk: BulkCipher,
    pub version: ProtocolVersion,
    pub key: Vec<u8>,
    pub fixed_iv: Vec<u8>,
    pub mac_key: Vec<u8>,
}

impl Drop for CipherKeys {
    fn drop(&mut self) {
        self.key.zeroize();
        self.fixed_iv.zeroize();
        self.mac_key.zeroize();
    }
}

enum CipherState {
    Gcm {
        aead: Box<dyn Aead>,
        fixed_iv: Vec<u8>,
    },
    Chacha {
        aead: Box<dyn Aead>,
        fixed_iv: Vec<u8>,
    },
    Cbc {
        cipher: Box<dyn BlockCipher>,
        mac_key: Vec<u8>,
        mac_factory: HashFactory,
        /// TLS 1.0 chained IV; empty when the version uses explicit IVs.
        running_iv: Vec<u8>,
        /// IV source for explicit-IV encryption (write side only).
        nonce_gen: Option<Box<dyn NonceGenerator>>,
    },
}

impl Drop for CipherState {
    fn drop(&mut self) {
        match self {
            CipherState::Gcm { fixed_iv, .. } | CipherState::Chacha { fixed_iv, .. } => {
                fixed_iv.zeroize()
            }
            CipherState::Cbc {
                mac_key,
                running_iv,
                ..
            } => {
                mac_key.zeroize();
                running_iv.zeroize();
            }
        }
    }
}

/// Active record protection for one direction. Sequence numbers start at
/// zero on activation.
pub struct RecordCipher {
    state: CipherState,
    seq: u64,
    version: ProtocolVersion,
    bulk: BulkCipher,
}

const GCM_EXPLICIT_NONCE_LEN: usize = 8;

fn build_aad(seq: u64, content_type: ContentType, version: ProtocolVersion, len: u16) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..8].copy_from_slice(&seq.to_be_bytes());
    aad[8] = content_type as u8;
    aad[9..11].copy_from_slice(&version.to_wire());
    aad[11..13].copy_from_slice(&len.to_be_bytes());
    aad
}

fn bad_record_mac(reason: &str) -> TlsError {
    TlsError::fatal(AlertDescription::BadRecordMac, reason.to_string())
}

impl RecordCipher {
    /// Build the cipher state for one direction. `nonce_gen` supplies
    /// explicit CBC IVs and is only needed on the write side.
    pub fn new(
        crypto: &dyn Crypto,
        keys: &CipherKeys,
        nonce_gen: Option<Box<dyn NonceGenerator>>,
    ) -> Result<Self, TlsError> {
        let state = match keys.bulk {
            BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => CipherState::Gcm {
                aead: crypto.create_aead(keys.bulk.aead_alg().expect("gcm"), &keys.key)?,
                fixed_iv: keys.fixed_iv.clone(),
            },
            BulkCipher::Chacha20Poly1305 => CipherState::Chacha {
                aead: crypto.create_aead(keys.bulk.aead_alg().expect("chacha"), &keys.key)?,
                fixed_iv: keys.fixed_iv.clone(),
            },
            BulkCipher::Aes128CbcSha | BulkCipher::Aes256CbcSha => CipherState::Cbc {
                cipher: crypto
                    .create_block_cipher(keys.bulk.block_alg().expect("cbc"), &keys.key)?,
                mac_key: keys.mac_key.clone(),
                mac_factory: crypto.hash_factory(HashAlg::Sha1),
                running_iv: if keys.version.uses_explicit_cbc_iv() {
                    Vec::new()
                } else {
                    keys.fixed_iv.clone()
                },
                nonce_gen,
            },
        };
        Ok(Self {
            state,
            seq: 0,
            version: keys.version,
            bulk: keys.bulk,
        })
    }

    pub fn sequence_number(&self) -> u64 {
        self.seq
    }

    /// Worst-case fragment growth over the plaintext.
    pub fn max_expansion(&self) -> usize {
        match &self.state {
            CipherState::Gcm { .. } => GCM_EXPLICIT_NONCE_LEN + 16,
            CipherState::Chacha { .. } => 16,
            CipherState::Cbc { .. } => {
                let iv = if self.version.uses_explicit_cbc_iv() {
                    16
                } else {
                    0
                };
                // MAC + full padding block
                iv + 20 + 16
            }
        }
    }

    /// True when outbound application data needs the 1/n-1 split
    /// (IV-chaining CBC, i.e. TLS 1.0).
    pub fn needs_plaintext_split(&self) -> bool {
        matches!(self.state, CipherState::Cbc { .. }) && !self.version.uses_explicit_cbc_iv()
    }

    fn bump_seq(&mut self) -> Result<(), TlsError> {
        if self.seq == u64::MAX {
            return Err(TlsError::fatal(
                AlertDescription::InternalError,
                "record sequence number overflow",
            ));
        }
        self.seq += 1;
        Ok(())
    }

    /// Encrypt one plaintext fragment. Returns the record fragment.
    pub fn encrypt(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        debug_assert!(plaintext.len() <= MAX_PLAINTEXT_LEN);
        let aad = build_aad(
            self.seq,
            content_type,
            self.version,
            plaintext.len() as u16,
        );
        let fragment = match &mut self.state {
            CipherState::Gcm { aead, fixed_iv } => {
                let explicit = self.seq.to_be_bytes();
                let mut nonce = [0u8; 12];
                nonce[..4].copy_from_slice(fixed_iv);
                nonce[4..].copy_from_slice(&explicit);

                let ciphertext = aead.encrypt(&nonce, &aad, plaintext)?;
                let mut fragment =
                    Vec::with_capacity(GCM_EXPLICIT_NONCE_LEN + ciphertext.len());
                fragment.extend_from_slice(&explicit);
                fragment.extend_from_slice(&ciphertext);
                fragment
            }
            CipherState::Chacha { aead, fixed_iv } => {
                let mut nonce = [0u8; 12];
                nonce.copy_from_slice(fixed_iv);
                for (i, b) in self.seq.to_be_bytes().iter().enumerate() {
                    nonce[4 + i] ^= *b;
                }
                aead.encrypt(&nonce, &aad, plaintext)?
            }
            CipherState::Cbc {
                cipher,
                mac_key,
                mac_factory,
                running_iv,
                nonce_gen,
            } => {
                let mut mac_input = aad.to_vec();
                mac_input.extend_from_slice(plaintext);
                let mac = hmac(mac_factory, mac_key, &mac_input);

                let block = cipher.block_len();
                let content_len = plaintext.len() + mac.len();
                let pad_len = block - ((content_len + 1) % block);

                let mut content = Vec::with_capacity(content_len + pad_len + 1);
                content.extend_from_slice(plaintext);
                content.extend_from_slice(&mac);
                content.resize(content_len + pad_len + 1, pad_len as u8);

                if self.version.uses_explicit_cbc_iv() {
                    let generator = nonce_gen.as_mut().ok_or_else(|| {
                        TlsError::fatal(
                            AlertDescription::InternalError,
                            "write cipher activated without an IV source",
                        )
                    })?;
                    let iv = generator.next_nonce(block);
                    cipher.encrypt(&iv, &mut content)?;
                    let mut fragment = iv;
                    fragment.extend_from_slice(&content);
                    fragment
                } else {
                    let iv = running_iv.clone();
                    cipher.encrypt(&iv, &mut content)?;
                    running_iv.copy_from_slice(&content[content.len() - block..]);
                    content
                }
            }
        };
        self.bump_seq()?;
        Ok(fragment)
    }

    /// Decrypt one record fragment. Returns the plaintext.
    pub fn decrypt(
        &mut self,
        content_type: ContentType,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let plaintext = match &mut self.state {
            CipherState::Gcm { aead, fixed_iv } => {
                let tag_len = aead.tag_len();
                if fragment.len() < GCM_EXPLICIT_NONCE_LEN + tag_len {
                    return Err(bad_record_mac("encrypted record too short"));
                }
                let mut nonce = [0u8; 12];
                nonce[..4].copy_from_slice(fixed_iv);
                nonce[4..].copy_from_slice(&fragment[..GCM_EXPLICIT_NONCE_LEN]);

                let ciphertext = &fragment[GCM_EXPLICIT_NONCE_LEN..];
                let plaintext_len = ciphertext.len() - tag_len;
                let aad = build_aad(self.seq, content_type, self.version, plaintext_len as u16);
                aead.decrypt(&nonce, &aad, ciphertext)
                    .map_err(|_| bad_record_mac("AEAD tag mismatch"))?
            }
            CipherState::Chacha { aead, fixed_iv } => {
                let tag_len = aead.tag_len();
                if fragment.len() < tag_len {
                    return Err(bad_record_mac("encrypted record too short"));
                }
                let mut nonce = [0u8; 12];
                nonce.copy_from_slice(fixed_iv);
                for (i, b) in self.seq.to_be_bytes().iter().enumerate() {
                    nonce[4 + i] ^= *b;
                }
                let plaintext_len = fragment.len() - tag_len;
                let aad = build_aad(self.seq, content_type, self.version, plaintext_len as u16);
                aead.decrypt(&nonce, &aad, fragment)
                    .map_err(|_| bad_record_mac("AEAD tag mismatch"))?
            }
            CipherState::Cbc {
                cipher,
                mac_key,
                mac_factory,
                running_iv,
                ..
            } => {
                let block = cipher.block_len();
                let mac_len: usize = 20;

                // Wire-visible length checks: the ciphertext must be whole
                // blocks holding at least the MAC and one padding byte.
                let min_len = (mac_len + 1).div_ceil(block) * block;
                let body_len = if self.version.uses_explicit_cbc_iv() {
                    fragment.len().saturating_sub(block)
                } else {
                    fragment.len()
                };
                if body_len < min_len || body_len % block != 0 {
                    return Err(bad_record_mac("encrypted record too short"));
                }

                let (iv, mut data) = if self.version.uses_explicit_cbc_iv() {
                    (fragment[..block].to_vec(), fragment[block..].to_vec())
                } else {
                    let iv = running_iv.clone();
                    running_iv.copy_from_slice(&fragment[fragment.len() - block..]);
                    (iv, fragment.to_vec())
                };
                cipher.decrypt(&iv, &mut data)?;

                // Padding, length, and MAC checks fold into one verdict; the
                // MAC is always computed (over a dummy slice when the padding
                // is bad) to avoid a timing leak.
                let pad_len = *data.last().expect("nonempty") as usize;
                let overhead = pad_len + 1 + mac_len;
                let good_length = subtle::Choice::from(u8::from(overhead <= data.len()));

                let pad_start = data.len().saturating_sub(pad_len + 1);
                let mut pad_ok = good_length;
                for &b in &data[pad_start..] {
                    pad_ok &= b.ct_eq(&(pad_len as u8));
                }

                let plaintext_len = if good_length.unwrap_u8() == 1 {
                    data.len() - overhead
                } else {
                    0
                };
                let aad = build_aad(self.seq, content_type, self.version, plaintext_len as u16);
                let mut mac_input = aad.to_vec();
                mac_input.extend_from_slice(&data[..plaintext_len]);
                let expected = hmac(mac_factory, mac_key, &mac_input);

                let received = if good_length.unwrap_u8() == 1 {
                    &data[plaintext_len..plaintext_len + mac_len]
                } else {
                    &data[..mac_len]
                };
                let mac_ok = received.ct_eq(expected.as_slice());
                if (pad_ok & mac_ok).unwrap_u8() != 1 {
                    return Err(bad_record_mac("record MAC mismatch"));
                }

                data.truncate(plaintext_len);
                data
            }
        };

        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(TlsError::fatal(
                AlertDescription::RecordOverflow,
                "decrypted fragment exceeds 2^14 bytes",
            ));
        }
        self.bump_seq()?;
        Ok(plaintext)
    }

    pub fn bulk(&self) -> BulkCipher {
        self.bulk
    }
}
