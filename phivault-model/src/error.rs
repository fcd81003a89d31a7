//! Model error types.

use thiserror::Error;

/// Errors raised while declaring encrypted fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("entity type name must not be empty")]
    EmptyEntityType,

    #[error("{entity_type}: field name must not be empty")]
    EmptyFieldName { entity_type: String },

    #[error("{entity_type}: field {field} declared twice")]
    DuplicateField { entity_type: String, field: String },

    #[error("{entity_type}: searchable field {field} has an empty index name")]
    EmptyIndexName { entity_type: String, field: String },

    #[error("{entity_type}: index {index} used by more than one field")]
    DuplicateIndex { entity_type: String, index: String },

    #[error("{entity_type}: previously registered field {field} is missing")]
    FieldRemoved { entity_type: String, field: String },

    #[error("{entity_type}: field {field} cannot change required from {was} to {now}")]
    RequiredChanged {
        entity_type: String,
        field: String,
        was: bool,
        now: bool,
    },

    #[error("{entity_type}: field {field} cannot change its index")]
    IndexChanged { entity_type: String, field: String },
}

/// Errors raised when converting between typed models and records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("expected entity type {expected}, got {actual}")]
    WrongEntityType { expected: String, actual: String },

    #[error("required field {0} is missing")]
    MissingField(String),
}
