//! Key-management seam for the layer-2 data encryption keys.
//!
//! A [`KeyManagementService`] mints DEKs and unwraps them again. Production
//! deployments plug in their provider's envelope-encryption API here;
//! [`LocalKms`] keeps X25519 key-encryption keys (KEKs) in process and
//! seals each DEK to the active KEK with an ephemeral keypair.

use crate::key::{generate_random_key, DerivedKey, KEY_SIZE};
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use std::sync::RwLock;
use thiserror::Error;
use zeroize::Zeroize;

const EPHEMERAL_PK_SIZE: usize = 32;
const BOX_NONCE_SIZE: usize = 24;

/// Errors reported by a key-management service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KmsError {
    #[error("key management service unreachable: {0}")]
    Unreachable(String),
    #[error("unknown key-encryption key: {0}")]
    UnknownKey(String),
    #[error("unwrap rejected: {0}")]
    Rejected(String),
}

pub type KmsResult<T> = Result<T, KmsError>;

/// A freshly minted data key: plaintext for immediate use, wrapped form for
/// storage next to the ciphertext.
#[derive(Clone, Debug)]
pub struct DataKey {
    /// Identifier of the KEK that wrapped this DEK.
    pub key_id: String,
    pub plaintext: DerivedKey,
    pub wrapped: Vec<u8>,
}

/// Envelope-encryption operations of an external key manager.
///
/// `scope` is the tenant-context label. Implementations bind it to the
/// wrapped key so a DEK minted for one scope does not unwrap in another.
pub trait KeyManagementService: Send + Sync {
    fn generate_data_key(&self, scope: &str) -> KmsResult<DataKey>;

    fn unwrap_data_key(&self, key_id: &str, wrapped: &[u8], scope: &str) -> KmsResult<DerivedKey>;
}

struct Kek {
    id: String,
    secret: SecretKey,
    public: PublicKey,
}

/// In-process KMS backed by X25519 key-encryption keys.
///
/// The newest KEK wraps new DEKs; older KEKs stay available for unwrap
/// after [`LocalKms::rotate`].
pub struct LocalKms {
    keks: RwLock<Vec<Kek>>,
}

impl LocalKms {
    /// Creates a KMS holding one freshly generated KEK.
    pub fn generate() -> Self {
        let kms = Self {
            keks: RwLock::new(Vec::new()),
        };
        kms.rotate();
        kms
    }

    /// Creates a KMS from a persisted KEK secret.
    pub fn from_secret_bytes(key_id: &str, secret: [u8; 32]) -> Self {
        let secret = SecretKey::from(secret);
        let public = secret.public_key();
        Self {
            keks: RwLock::new(vec![Kek {
                id: key_id.to_string(),
                secret,
                public,
            }]),
        }
    }

    /// Adds a new KEK and makes it active. Returns its id.
    pub fn rotate(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let secret = SecretKey::from(bytes);
        bytes.zeroize();
        let public = secret.public_key();

        let mut keks = self.keks.write().unwrap_or_else(|p| p.into_inner());
        let id = format!("local-kek-{}", keks.len() + 1);
        keks.push(Kek {
            id: id.clone(),
            secret,
            public,
        });
        id
    }

    /// Id of the KEK used for new DEKs.
    pub fn active_key_id(&self) -> Option<String> {
        let keks = self.keks.read().unwrap_or_else(|p| p.into_inner());
        keks.last().map(|k| k.id.clone())
    }
}

impl KeyManagementService for LocalKms {
    fn generate_data_key(&self, scope: &str) -> KmsResult<DataKey> {
        let keks = self.keks.read().unwrap_or_else(|p| p.into_inner());
        let kek = keks
            .last()
            .ok_or_else(|| KmsError::UnknownKey("no key-encryption key configured".to_string()))?;

        let dek = generate_random_key();
        let wrapped = seal_dek(dek.as_bytes(), scope, &kek.public)?;

        Ok(DataKey {
            key_id: kek.id.clone(),
            plaintext: dek,
            wrapped,
        })
    }

    fn unwrap_data_key(&self, key_id: &str, wrapped: &[u8], scope: &str) -> KmsResult<DerivedKey> {
        let keks = self.keks.read().unwrap_or_else(|p| p.into_inner());
        let kek = keks
            .iter()
            .find(|k| k.id == key_id)
            .ok_or_else(|| KmsError::UnknownKey(key_id.to_string()))?;

        let mut opened = open_dek(wrapped, &kek.secret)?;
        let result = split_scoped_dek(&opened, scope);
        opened.zeroize();
        result
    }
}

/// Seals `dek || scope` to `recipient` using an ephemeral X25519 keypair
/// and XSalsa20-Poly1305. Output layout: `epk(32) || nonce(24) || box`.
fn seal_dek(dek: &[u8], scope: &str, recipient: &PublicKey) -> KmsResult<Vec<u8>> {
    let mut eph_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut eph_bytes);
    let ephemeral = SecretKey::from(eph_bytes);
    eph_bytes.zeroize();
    let ephemeral_pk = ephemeral.public_key();

    let salsa_box = SalsaBox::new(recipient, &ephemeral);

    let mut nonce = [0u8; BOX_NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let mut payload = Vec::with_capacity(dek.len() + scope.len());
    payload.extend_from_slice(dek);
    payload.extend_from_slice(scope.as_bytes());

    let sealed = salsa_box
        .encrypt(crypto_box::Nonce::from_slice(&nonce), payload.as_slice())
        .map_err(|e| KmsError::Rejected(format!("seal failed: {e}")));
    payload.zeroize();
    let sealed = sealed?;

    let mut out = Vec::with_capacity(EPHEMERAL_PK_SIZE + BOX_NONCE_SIZE + sealed.len());
    out.extend_from_slice(ephemeral_pk.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn open_dek(wrapped: &[u8], secret: &SecretKey) -> KmsResult<Vec<u8>> {
    if wrapped.len() <= EPHEMERAL_PK_SIZE + BOX_NONCE_SIZE {
        return Err(KmsError::Rejected("wrapped key too short".to_string()));
    }
    let (pk_bytes, rest) = wrapped.split_at(EPHEMERAL_PK_SIZE);
    let (nonce, sealed) = rest.split_at(BOX_NONCE_SIZE);

    let mut pk = [0u8; EPHEMERAL_PK_SIZE];
    pk.copy_from_slice(pk_bytes);
    let salsa_box = SalsaBox::new(&PublicKey::from(pk), secret);

    salsa_box
        .decrypt(crypto_box::Nonce::from_slice(nonce), sealed)
        .map_err(|_| KmsError::Rejected("wrong key-encryption key or tampered data".to_string()))
}

fn split_scoped_dek(opened: &[u8], scope: &str) -> KmsResult<DerivedKey> {
    if opened.len() < KEY_SIZE || &opened[KEY_SIZE..] != scope.as_bytes() {
        return Err(KmsError::Rejected(format!(
            "data key was not issued for scope {scope}"
        )));
    }
    DerivedKey::from_slice(&opened[..KEY_SIZE])
        .map_err(|e| KmsError::Rejected(e.to_string()))
}
