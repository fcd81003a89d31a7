//! Declarative table of encrypted fields per entity type.
//!
//! Built once at startup through [`RegistryBuilder`] and immutable after
//! [`RegistryBuilder::build`]. Registration is append-only: an entity type
//! may be registered again to add fields, but existing fields cannot be
//! dropped, re-indexed, or have their `required` flag changed.

use crate::error::RegistryError;
use phivault_crypto::Normalization;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Blind index attached to a searchable field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub normalization: Normalization,
}

/// Declaration of one encrypted field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field_name: String,
    pub required: bool,
    pub index: Option<IndexSpec>,
}

impl FieldSpec {
    pub fn required(field_name: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            required: true,
            index: None,
        }
    }

    pub fn optional(field_name: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            required: false,
            index: None,
        }
    }

    /// Marks the field searchable through the named blind index.
    pub fn searchable(mut self, index_name: &str, normalization: Normalization) -> Self {
        self.index = Some(IndexSpec {
            name: index_name.to_string(),
            normalization,
        });
        self
    }

    pub fn is_searchable(&self) -> bool {
        self.index.is_some()
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index.as_ref().map(|i| i.name.as_str())
    }
}

/// Validated, immutable field registry.
#[derive(Clone, Debug, Default)]
pub struct EncryptedFieldRegistry {
    entities: BTreeMap<String, Vec<FieldSpec>>,
}

impl EncryptedFieldRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Ordered field declarations of `entity_type`.
    pub fn fields_for(&self, entity_type: &str) -> Option<&[FieldSpec]> {
        self.entities.get(entity_type).map(Vec::as_slice)
    }

    pub fn field(&self, entity_type: &str, field_name: &str) -> Option<&FieldSpec> {
        self.fields_for(entity_type)?
            .iter()
            .find(|f| f.field_name == field_name)
    }

    /// The field owning `index_name` within `entity_type`.
    pub fn index(&self, entity_type: &str, index_name: &str) -> Option<&FieldSpec> {
        self.fields_for(entity_type)?
            .iter()
            .find(|f| f.index_name() == Some(index_name))
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.entities.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

/// Accumulates and validates registrations.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: BTreeMap<String, Vec<FieldSpec>>,
}

impl RegistryBuilder {
    pub fn register(mut self, entity_type: &str, specs: Vec<FieldSpec>) -> Result<Self, RegistryError> {
        if entity_type.is_empty() {
            return Err(RegistryError::EmptyEntityType);
        }
        validate_specs(entity_type, &specs)?;

        let merged = match self.entities.remove(entity_type) {
            None => specs,
            Some(existing) => merge_append_only(entity_type, existing, specs)?,
        };
        self.entities.insert(entity_type.to_string(), merged);
        Ok(self)
    }

    pub fn build(self) -> EncryptedFieldRegistry {
        EncryptedFieldRegistry {
            entities: self.entities,
        }
    }
}

fn validate_specs(entity_type: &str, specs: &[FieldSpec]) -> Result<(), RegistryError> {
    let mut fields = HashSet::new();
    let mut indexes = HashSet::new();

    for spec in specs {
        if spec.field_name.is_empty() {
            return Err(RegistryError::EmptyFieldName {
                entity_type: entity_type.to_string(),
            });
        }
        if !fields.insert(spec.field_name.as_str()) {
            return Err(RegistryError::DuplicateField {
                entity_type: entity_type.to_string(),
                field: spec.field_name.clone(),
            });
        }
        if let Some(index) = &spec.index {
            if index.name.is_empty() {
                return Err(RegistryError::EmptyIndexName {
                    entity_type: entity_type.to_string(),
                    field: spec.field_name.clone(),
                });
            }
            if !indexes.insert(index.name.as_str()) {
                return Err(RegistryError::DuplicateIndex {
                    entity_type: entity_type.to_string(),
                    index: index.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Every existing field must reappear unchanged; new ones go to the end.
fn merge_append_only(
    entity_type: &str,
    existing: Vec<FieldSpec>,
    incoming: Vec<FieldSpec>,
) -> Result<Vec<FieldSpec>, RegistryError> {
    for old in &existing {
        let new = incoming
            .iter()
            .find(|s| s.field_name == old.field_name)
            .ok_or_else(|| RegistryError::FieldRemoved {
                entity_type: entity_type.to_string(),
                field: old.field_name.clone(),
            })?;
        if new.required != old.required {
            return Err(RegistryError::RequiredChanged {
                entity_type: entity_type.to_string(),
                field: old.field_name.clone(),
                was: old.required,
                now: new.required,
            });
        }
        if new.index != old.index {
            return Err(RegistryError::IndexChanged {
                entity_type: entity_type.to_string(),
                field: old.field_name.clone(),
            });
        }
    }

    let mut merged = existing;
    for spec in incoming {
        if !merged.iter().any(|s| s.field_name == spec.field_name) {
            merged.push(spec);
        }
    }
    Ok(merged)
}
