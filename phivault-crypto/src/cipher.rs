//! XChaCha20-Poly1305 authenticated encryption.
//!
//! Nonces are 192 bits drawn fresh from the CSPRNG on every call, so a
//! nonce cannot be reused for a key by construction.

use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Nonce size for XChaCha20-Poly1305 (192 bits).
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Ciphertext (with appended tag) plus the nonce it was sealed under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    pub fn len(&self) -> usize {
        self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

/// Encrypts `plaintext` under `key`, binding `aad` into the tag.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Encryption(format!("aead seal failed: {e}")))?;

    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypts data produced by [`encrypt`] with the same key and `aad`.
pub fn decrypt(key: &DerivedKey, data: &EncryptedData, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if data.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "ciphertext shorter than tag ({} bytes)",
            data.ciphertext.len()
        )));
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            XNonce::from_slice(&data.nonce),
            Payload {
                msg: &data.ciphertext,
                aad,
            },
        )
        .map_err(|_| {
            CryptoError::DecryptionFailed("wrong key or tampered data".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;

    #[test]
    fn nonces_differ_between_calls() {
        let key = generate_random_key();
        let a = encrypt(&key, b"same", b"").unwrap();
        let b = encrypt(&key, b"same", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn aad_mismatch_is_detected() {
        let key = generate_random_key();
        let sealed = encrypt(&key, b"value", b"first_name").unwrap();
        let err = decrypt(&key, &sealed, b"last_name").unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = generate_random_key();
        let mut sealed = encrypt(&key, b"value", b"").unwrap();
        sealed.ciphertext.truncate(4);
        assert!(matches!(
            decrypt(&key, &sealed, b""),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }
}
