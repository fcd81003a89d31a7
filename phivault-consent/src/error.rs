//! Consent ledger error types.

use phivault_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

pub type ConsentResult<T> = Result<T, ConsentError>;

#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("consent definition key already exists: {0}")]
    DuplicateKey(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    /// More than one ACTIVE version would have been visible. The enclosing
    /// transaction is rolled back when this is raised.
    #[error("definition {definition_id} has {active} active versions")]
    DuplicateActiveVersion { definition_id: Uuid, active: i64 },

    #[error("invalid consent operation: {0}")]
    Invalid(String),

    #[error("corrupt consent row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConsentError {
    pub(crate) fn definition_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "consent definition", id }
    }

    pub(crate) fn version_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "consent version", id }
    }
}
