//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while encrypting, decrypting or indexing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Layer-1 or layer-2 key material could not be resolved. Never
    /// answered by falling back to single-layer encryption.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// Authentication tag mismatch or malformed envelope.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
