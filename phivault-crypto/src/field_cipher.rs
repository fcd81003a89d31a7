//! Two-layer encryption of a single field value.

use crate::cipher::{self, EncryptedData, NONCE_SIZE};
use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::key_material::{KeyMaterial, Layer2Ref};
use serde::{Deserialize, Serialize};

/// Authenticated, self-describing ciphertext of one field value.
///
/// Holds everything needed for decryption except the two root keys: the
/// wrapped DEK and the id of the key that wrapped it travel along.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub version: u8,
    /// Name of the field the value belongs to; bound into both AEAD tags.
    pub field_name: String,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub layer1_nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64_array")]
    pub layer2_nonce: [u8; NONCE_SIZE],
    pub layer2_key_id: String,
    #[serde(with = "b64")]
    pub layer2_wrapped_dek: Vec<u8>,
}

impl EncryptedEnvelope {
    pub const CURRENT_VERSION: u8 = 1;

    /// The wrapped DEK reference needed to resolve read key material.
    pub fn layer2_ref(&self) -> Layer2Ref {
        Layer2Ref {
            key_id: self.layer2_key_id.clone(),
            wrapped_dek: self.layer2_wrapped_dek.clone(),
        }
    }
}

/// Persisted state of an optional field.
///
/// `Absent` is distinct from `Sealed` of an empty string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StoredField {
    Absent,
    Sealed(EncryptedEnvelope),
}

impl StoredField {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn envelope(&self) -> Option<&EncryptedEnvelope> {
        match self {
            Self::Absent => None,
            Self::Sealed(env) => Some(env),
        }
    }
}

/// Encrypts and decrypts field values with two-layer key material.
pub struct FieldCipher;

impl FieldCipher {
    /// Encrypts `plaintext` with the layer-2 DEK, then the result with the
    /// layer-1 key.
    pub fn encrypt(plaintext: &str, key: &KeyMaterial, field_name: &str) -> CryptoResult<EncryptedEnvelope> {
        let key_id = key.layer2.key_id();

        let inner = cipher::encrypt(
            &key.layer2.dek,
            plaintext.as_bytes(),
            &layer2_aad(field_name),
        )?;
        let outer = cipher::encrypt(
            &key.layer1,
            &inner.ciphertext,
            &layer1_aad(field_name, key_id),
        )?;

        Ok(EncryptedEnvelope {
            version: EncryptedEnvelope::CURRENT_VERSION,
            field_name: field_name.to_string(),
            ciphertext: outer.ciphertext,
            layer1_nonce: outer.nonce,
            layer2_nonce: inner.nonce,
            layer2_key_id: key_id.to_string(),
            layer2_wrapped_dek: key.layer2.key_ref.wrapped_dek.clone(),
        })
    }

    pub fn decrypt(envelope: &EncryptedEnvelope, key: &KeyMaterial) -> CryptoResult<String> {
        if envelope.version != EncryptedEnvelope::CURRENT_VERSION {
            return Err(CryptoError::DecryptionFailed(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }

        let outer = EncryptedData {
            nonce: envelope.layer1_nonce,
            ciphertext: envelope.ciphertext.clone(),
        };
        let inner_ciphertext = cipher::decrypt(
            &key.layer1,
            &outer,
            &layer1_aad(&envelope.field_name, &envelope.layer2_key_id),
        )?;

        let inner = EncryptedData {
            nonce: envelope.layer2_nonce,
            ciphertext: inner_ciphertext,
        };
        let plaintext = cipher::decrypt(&key.layer2.dek, &inner, &layer2_aad(&envelope.field_name))?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::DecryptionFailed("plaintext is not valid UTF-8".to_string()))
    }

    /// Seals an optional value. `None` bypasses encryption entirely.
    pub fn seal_optional(value: Option<&str>, key: &KeyMaterial, field_name: &str) -> CryptoResult<StoredField> {
        match value {
            None => Ok(StoredField::Absent),
            Some(v) => Self::encrypt(v, key, field_name).map(StoredField::Sealed),
        }
    }
}

fn layer1_aad(field_name: &str, key_id: &str) -> Vec<u8> {
    format!("phivault:l1:{field_name}:{key_id}").into_bytes()
}

fn layer2_aad(field_name: &str) -> Vec<u8> {
    format!("phivault:l2:{field_name}").into_bytes()
}
