//! Storage error types.

use phivault_crypto::CryptoError;
use phivault_model::ModelError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in tenant-routed storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An operation ran outside any `with_context` scope.
    #[error("no tenant context is active")]
    NoTenantContext,

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("unknown index {index} on {entity_type}")]
    UnknownIndex { entity_type: String, index: String },

    #[error("required field {field} missing on {entity_type}")]
    MissingRequiredField { entity_type: String, field: String },

    #[error("field {field} is not declared on {entity_type}")]
    UndeclaredField { entity_type: String, field: String },

    /// The id already belongs to a record of another entity type.
    #[error("record {id} is a {existing}, cannot save it as {attempted}")]
    IdConflict {
        id: String,
        existing: String,
        attempted: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl From<CryptoError> for StorageError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyUnavailable(msg) => Self::KeyUnavailable(msg),
            CryptoError::DecryptionFailed(msg) => Self::DecryptionFailed(msg),
            CryptoError::Encryption(msg) => Self::Encryption(msg),
            CryptoError::InvalidKeyLength { expected, actual } => Self::KeyUnavailable(format!(
                "invalid key length: expected {expected}, got {actual}"
            )),
        }
    }
}
