//! Entity model for phivault.
//!
//! - [`Record`]: a generic entity row in plaintext form, as callers see it.
//! - [`EncryptedFieldRegistry`]: which fields of each entity type are
//!   encrypted, which are blind-indexed, and which are required.
//! - [`Patient`], [`CentralPatient`], [`Practitioner`],
//!   [`CentralPractitioner`]: typed views over [`Record`] with their field
//!   declarations.

mod error;
mod people;
mod record;
mod registry;

pub use error::{ModelError, RegistryError};
pub use people::{
    default_registry, CentralPatient, CentralPractitioner, EncryptedModel, Patient, Practitioner,
};
pub use record::Record;
pub use registry::{EncryptedFieldRegistry, FieldSpec, IndexSpec, RegistryBuilder};

pub use phivault_crypto::Normalization;
