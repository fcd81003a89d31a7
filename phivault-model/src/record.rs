//! Plaintext form of an entity row.

use phivault_types::{now_millis, ExternalRef, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A generic entity as seen by callers.
///
/// `fields` holds the values of declared encrypted fields (`None` = absent);
/// `attributes` holds non-sensitive data stored as plain JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub entity_type: String,
    pub fields: BTreeMap<String, Option<String>>,
    pub attributes: serde_json::Value,
    pub external_ref: Option<ExternalRef>,
    pub created_at: i64,
    pub modified_at: i64,
}

impl Record {
    pub fn new(entity_type: &str) -> Self {
        let now = now_millis();
        Self {
            id: RecordId::new(),
            entity_type: entity_type.to_string(),
            fields: BTreeMap::new(),
            attributes: serde_json::Value::Object(serde_json::Map::new()),
            external_ref: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_field(mut self, name: &str, value: Option<&str>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        if let Some(obj) = self.attributes.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_external_ref(mut self, external_ref: ExternalRef) -> Self {
        self.external_ref = Some(external_ref);
        self
    }

    pub fn set(&mut self, name: &str, value: Option<&str>) {
        self.fields
            .insert(name.to_string(), value.map(str::to_string));
    }

    /// Value of a field, `None` when absent or never set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_deref())
    }
}
