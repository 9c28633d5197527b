use anyhow::{Context, Result};
use base64::prelude::*;
use sha2::{Digest, Sha256};

/// Prefix identifying the digest algorithm of a disclosure hash.
pub const SHA256_PREFIX: &str = "sha-256:";

/// Lower-case hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// `sha-256:<hex>` digest of a disclosure, key-binding JWT or vp_token.
pub fn prefixed_sha256(value: &str) -> String {
    format!("{SHA256_PREFIX}{}", sha256_hex(value.as_bytes()))
}

/// Hashes every disclosure, reusing `precomputed` verbatim when it pairs up
/// one-to-one with `disclosures`.
pub fn disclosure_hashes(disclosures: &[String], precomputed: Option<&[String]>) -> Vec<String> {
    match precomputed {
        Some(hashes) if hashes.len() == disclosures.len() => hashes.to_vec(),
        _ => disclosures.iter().map(|d| prefixed_sha256(d)).collect(),
    }
}

pub fn base64url_encode(bytes: impl AsRef<[u8]>) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

pub fn base64url_decode(segment: &str) -> Result<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .context("segment is not valid base64url")
}

/// Decodes base64url first and falls back to the standard alphabet, with or
/// without padding.
pub fn base64_decode_lenient(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    BASE64_URL_SAFE_NO_PAD
        .decode(trimmed.trim_end_matches('='))
        .or_else(|_| BASE64_STANDARD.decode(trimmed))
        .or_else(|_| BASE64_STANDARD_NO_PAD.decode(trimmed))
        .context("value is neither base64url nor base64")
}

/// Truncates `value` to at most `limit` characters, marking the cut.
pub fn preview(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_owned();
    }
    let mut cut: String = value.chars().take(limit).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_digest_of_known_input() {
        assert_eq!(
            prefixed_sha256("abc"),
            "sha-256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn precomputed_hashes_reused_when_lengths_match() {
        let disclosures = vec!["abc".to_owned(), "def".to_owned()];
        let precomputed = vec!["sha-256:one".to_owned(), "sha-256:two".to_owned()];

        assert_eq!(
            disclosure_hashes(&disclosures, Some(&precomputed)),
            precomputed
        );
    }

    #[test]
    fn mismatched_precomputed_hashes_are_recomputed() {
        let disclosures = vec!["abc".to_owned(), "def".to_owned()];
        let precomputed = vec!["sha-256:one".to_owned()];

        let hashes = disclosure_hashes(&disclosures, Some(&precomputed));
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], prefixed_sha256("abc"));
        assert_eq!(hashes, disclosure_hashes(&disclosures, None));
    }

    #[test]
    fn lenient_base64_accepts_both_alphabets() {
        assert_eq!(base64_decode_lenient("_-8").unwrap(), vec![0xff, 0xef]);
        assert_eq!(base64_decode_lenient("/+8=").unwrap(), vec![0xff, 0xef]);
        assert!(base64_decode_lenient("not base64!").is_err());
    }

    #[test]
    fn preview_truncates_long_values() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefgh", 3), "abc…");
    }
}
