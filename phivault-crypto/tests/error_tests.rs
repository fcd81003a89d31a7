use phivault_crypto::{CryptoError, KmsError};

#[test]
fn key_unavailable_display() {
    let err = CryptoError::KeyUnavailable("kms down".into());
    assert_eq!(err.to_string(), "key unavailable: kms down");
}

#[test]
fn decryption_failed_display() {
    let err = CryptoError::DecryptionFailed("tag mismatch".into());
    assert_eq!(err.to_string(), "decryption failed: tag mismatch");
}

#[test]
fn invalid_key_length_display() {
    let err = CryptoError::InvalidKeyLength { expected: 32, actual: 5 };
    assert_eq!(err.to_string(), "invalid key length: expected 32, got 5");
}

#[test]
fn kms_unreachable_display() {
    let err = KmsError::Unreachable("timeout".into());
    assert_eq!(err.to_string(), "key management service unreachable: timeout");
}
