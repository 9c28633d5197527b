//! Concat KDF (NIST SP 800-56A §5.8.1) as profiled by RFC 7518 §4.6.2.

use anyhow::{anyhow, bail, Result};
use sha2::{Digest, Sha256};

use super::ENC_A128GCM;

/// Length in bytes of the A128GCM content-encryption key.
pub const CEK_LEN: usize = 16;

const DIGEST_BITS: u32 = 256;

fn length_prefixed(hasher: &mut Sha256, data: &[u8]) {
    hasher.update((data.len() as u32).to_be_bytes());
    hasher.update(data);
}

fn single_round(
    shared_secret: &[u8],
    algorithm_id: &str,
    party_u_info: &[u8],
    party_v_info: &[u8],
    key_bits: u32,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(shared_secret);
    length_prefixed(&mut hasher, algorithm_id.as_bytes());
    length_prefixed(&mut hasher, party_u_info);
    length_prefixed(&mut hasher, party_v_info);
    hasher.update(key_bits.to_be_bytes());
    // SuppPrivInfo is empty.
    hasher.finalize().into()
}

/// Single-round Concat KDF over SHA-256.
///
/// `algorithm_id` is the `enc` value for direct key agreement. Only key
/// lengths that fit one digest are supported.
pub fn concat_kdf(
    shared_secret: &[u8],
    algorithm_id: &str,
    party_u_info: &[u8],
    party_v_info: &[u8],
    key_bits: u32,
) -> Result<Vec<u8>> {
    if key_bits == 0 || key_bits % 8 != 0 || key_bits > DIGEST_BITS {
        bail!("unsupported key length {key_bits}")
    }
    let digest = single_round(shared_secret, algorithm_id, party_u_info, party_v_info, key_bits);
    Ok(digest[..key_bits as usize / 8].to_vec())
}

/// A128GCM key for ECDH-ES direct agreement with empty `apu`/`apv`.
pub fn derive_content_key(shared_secret: &[u8]) -> Result<[u8; CEK_LEN]> {
    let key = concat_kdf(shared_secret, ENC_A128GCM, &[], &[], CEK_LEN as u32 * 8)?;
    key.try_into()
        .map_err(|key: Vec<u8>| anyhow!("derived {} key bytes, expected {CEK_LEN}", key.len()))
}
