//! Deterministic keyed digests for exact-match lookup.
//!
//! # Normalization
//!
//! Each index declares its [`Normalization`]; individual fields never
//! normalize on their own.
//!
//! - [`Normalization::Exact`]: the value is digested byte for byte
//!   (identifiers such as health-card numbers).
//! - [`Normalization::CaseFoldTrim`]: surrounding whitespace is trimmed and
//!   the value lowercased before digesting (names, emails).
//!
//! The same policy is applied to query values and to the post-lookup
//! equality check, so lookups stay consistent with what was indexed.
//!
//! # Collisions
//!
//! Digests are truncated to [`DIGEST_SIZE`] bytes. A digest match only
//! nominates a candidate; callers compare decrypted plaintext before acting.

use crate::error::{CryptoError, CryptoResult};
use crate::key_material::KeyMaterial;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::borrow::Cow;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Digest length in bytes (128 bits).
pub const DIGEST_SIZE: usize = 16;

const SUBKEY_DOMAIN: &[u8] = b"phivault:blind-index:";

/// Fixed-length blind index digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Normalization applied before digesting and before equality checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    Exact,
    CaseFoldTrim,
}

impl Normalization {
    pub fn apply<'a>(&self, value: &'a str) -> Cow<'a, str> {
        match self {
            Self::Exact => Cow::Borrowed(value),
            Self::CaseFoldTrim => Cow::Owned(value.trim().to_lowercase()),
        }
    }

    /// Whether two plaintexts are equal under this policy.
    pub fn matches(&self, stored: &str, query: &str) -> bool {
        self.apply(stored) == self.apply(query)
    }
}

/// Computes blind index digests.
///
/// Exposed as a trait so lookups can be exercised against an indexer that
/// forces collisions.
pub trait BlindIndexer: Send + Sync {
    fn compute(
        &self,
        plaintext: &str,
        key: &KeyMaterial,
        index_name: &str,
        normalization: Normalization,
    ) -> CryptoResult<Digest>;
}

/// HMAC-SHA256 blind indexer.
///
/// Each index gets its own subkey, `HMAC(layer1, domain || index_name)`, so
/// equal values in different indexes do not share digests.
#[derive(Clone, Copy, Debug, Default)]
pub struct HmacBlindIndexer;

impl BlindIndexer for HmacBlindIndexer {
    fn compute(
        &self,
        plaintext: &str,
        key: &KeyMaterial,
        index_name: &str,
        normalization: Normalization,
    ) -> CryptoResult<Digest> {
        let mut subkey_mac = HmacSha256::new_from_slice(key.layer1().as_bytes())
            .map_err(|e| CryptoError::KeyUnavailable(format!("blind index key: {e}")))?;
        subkey_mac.update(SUBKEY_DOMAIN);
        subkey_mac.update(index_name.as_bytes());
        let subkey = subkey_mac.finalize().into_bytes();

        let mut mac = HmacSha256::new_from_slice(&subkey)
            .map_err(|e| CryptoError::KeyUnavailable(format!("blind index subkey: {e}")))?;
        mac.update(normalization.apply(plaintext).as_bytes());
        let full = mac.finalize().into_bytes();

        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&full[..DIGEST_SIZE]);
        Ok(Digest(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_fold_trim_normalizes() {
        assert_eq!(Normalization::CaseFoldTrim.apply("  Jane "), "jane");
        assert_eq!(Normalization::Exact.apply("  Jane "), "  Jane ");
        assert!(Normalization::CaseFoldTrim.matches("JANE", " jane"));
        assert!(!Normalization::Exact.matches("JANE", "jane"));
    }

    #[test]
    fn digest_hex_is_fixed_width() {
        let d = Digest::from_bytes([0xab; DIGEST_SIZE]);
        assert_eq!(d.to_hex().len(), DIGEST_SIZE * 2);
        assert_eq!(format!("{d:?}"), "Digest(abababab...)");
        assert!(Digest::from_slice(&[1, 2, 3]).is_none());
    }
}
