//! Encryption layer for phivault.
//!
//! Protects individual PHI fields at rest while keeping selected fields
//! searchable by exact match.
//!
//! # Architecture
//!
//! Every field value is encrypted twice:
//!
//! 1. **Layer 2 (inner)**: a random data encryption key (DEK) minted by a
//!    [`KeyManagementService`]. The DEK travels with the value in wrapped
//!    form, so the envelope is self-describing.
//!
//! 2. **Layer 1 (outer)**: the application key held by the process.
//!
//! Decrypting a value therefore needs both the application key and the
//! ability to unwrap the DEK through the key-management service.
//!
//! Searchable fields also get a blind index: a truncated HMAC-SHA256 of the
//! normalized value, keyed by a per-index subkey of the application key.
//! Equal plaintexts give equal digests, so the storage layer can look rows
//! up without ever seeing plaintext.

pub mod blind_index;
mod cipher;
mod encoding;
mod error;
pub mod field_cipher;
mod key;
pub mod key_material;
pub mod kms;

pub use blind_index::{BlindIndexer, Digest, HmacBlindIndexer, Normalization, DIGEST_SIZE};
pub use cipher::{decrypt, encrypt, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use field_cipher::{EncryptedEnvelope, FieldCipher, StoredField};
pub use key::{generate_random_key, DerivedKey, KEY_SIZE};
pub use key_material::{
    FieldPurpose, KeyMaterial, KeyMaterialProvider, KmsWorkerPool, Layer2Handle, Layer2Ref,
    DEFAULT_MAX_KMS_WORKERS,
};
pub use kms::{DataKey, KeyManagementService, KmsError, KmsResult, LocalKms};
