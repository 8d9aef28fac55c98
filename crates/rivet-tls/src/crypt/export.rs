//! Keying-material export (RFC 5705).

use super::prf::prf;
use crate::provider::Crypto;
use crate::version::ProtocolVersion;
use rivet_types::{HashAlg, TlsError};

/// Labels reserved for the handshake itself (RFC 5705 §4).
const RESERVED_LABELS: &[&str] = &[
    "client finished",
    "server finished",
    "master secret",
    "extended master secret",
    "key expansion",
];

/// Reject labels that collide with handshake PRF invocations.
pub fn validate_exporter_label(label: &str) -> Result<(), TlsError> {
    if RESERVED_LABELS.contains(&label) {
        return Err(TlsError::Misuse(format!(
            "reserved label for key export: {label}"
        )));
    }
    Ok(())
}

/// Export keying material (RFC 5705 §4).
///
/// ```text
/// seed = client_random || server_random [|| uint16(len(context)) || context]
/// out  = PRF(master_secret, label, seed, length)
/// ```
///
/// A missing context and an empty context produce different output.
pub fn export_keying_material(
    crypto: &dyn Crypto,
    version: ProtocolVersion,
    prf_hash: HashAlg,
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    label: &str,
    context: Option<&[u8]>,
    length: usize,
) -> Result<Vec<u8>, TlsError> {
    validate_exporter_label(label)?;
    if let Some(ctx) = context {
        if ctx.len() > u16::MAX as usize {
            return Err(TlsError::Misuse(
                "exporter context must be shorter than 2^16".into(),
            ));
        }
    }

    let mut seed = Vec::with_capacity(64 + context.map_or(0, |c| 2 + c.len()));
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    if let Some(ctx) = context {
        seed.extend_from_slice(&(ctx.len() as u16).to_be_bytes());
        seed.extend_from_slice(ctx);
    }

    Ok(prf(
        crypto,
        version,
        prf_hash,
        master_secret,
        label,
        &seed,
        length,
    ))
}
