//! Typed patient and practitioner models.
//!
//! A person may exist as a central row (minimal identity shared across
//! clinics) and as a tenant row (the full clinical record), linked by an
//! [`ExternalRef`] pair rather than a foreign key. The two representations
//! are distinct entity types with disjoint field sets.

use crate::error::{ModelError, RegistryError};
use crate::record::Record;
use crate::registry::{EncryptedFieldRegistry, FieldSpec};
use phivault_crypto::Normalization;
use phivault_types::{EntityKind, ExternalRef, RecordId};

/// Conversion between a typed model and a generic [`Record`].
pub trait EncryptedModel: Sized {
    /// Registry key of this model.
    const ENTITY_TYPE: &'static str;
    /// Consent kind the model answers to.
    const KIND: EntityKind;

    fn field_specs() -> Vec<FieldSpec>;

    fn id(&self) -> RecordId;

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self, ModelError>;
}

/// Registry holding the four built-in people models.
pub fn default_registry() -> Result<EncryptedFieldRegistry, RegistryError> {
    Ok(EncryptedFieldRegistry::builder()
        .register(Patient::ENTITY_TYPE, Patient::field_specs())?
        .register(CentralPatient::ENTITY_TYPE, CentralPatient::field_specs())?
        .register(Practitioner::ENTITY_TYPE, Practitioner::field_specs())?
        .register(CentralPractitioner::ENTITY_TYPE, CentralPractitioner::field_specs())?
        .build())
}

fn check_type(record: &Record, expected: &str) -> Result<(), ModelError> {
    if record.entity_type != expected {
        return Err(ModelError::WrongEntityType {
            expected: expected.to_string(),
            actual: record.entity_type.clone(),
        });
    }
    Ok(())
}

fn required(record: &Record, field: &str) -> Result<String, ModelError> {
    record
        .get(field)
        .map(str::to_string)
        .ok_or_else(|| ModelError::MissingField(field.to_string()))
}

fn optional(record: &Record, field: &str) -> Option<String> {
    record.get(field).map(str::to_string)
}

fn base_record(entity_type: &str, id: RecordId, external_ref: &Option<ExternalRef>) -> Record {
    let mut record = Record::new(entity_type);
    record.id = id;
    record.external_ref = external_ref.clone();
    record
}

// ── Patient ──────────────────────────────────────────────────────

/// Full clinical patient record held in a clinic's database.
#[derive(Clone, Debug, PartialEq)]
pub struct Patient {
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub health_number: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    /// Link to the central identity row.
    pub central_ref: Option<ExternalRef>,
}

impl Patient {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self {
            id: RecordId::new(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            health_number: None,
            email: None,
            phone: None,
            date_of_birth: None,
            address: None,
            emergency_contact: None,
            central_ref: None,
        }
    }
}

impl EncryptedModel for Patient {
    const ENTITY_TYPE: &'static str = "patient";
    const KIND: EntityKind = EntityKind::Patient;

    fn field_specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::required("first_name").searchable("first_name_index", Normalization::CaseFoldTrim),
            FieldSpec::required("last_name").searchable("last_name_index", Normalization::CaseFoldTrim),
            FieldSpec::optional("health_number").searchable("health_number_index", Normalization::Exact),
            FieldSpec::optional("email").searchable("email_index", Normalization::CaseFoldTrim),
            FieldSpec::optional("phone"),
            FieldSpec::optional("date_of_birth"),
            FieldSpec::optional("address"),
            FieldSpec::optional("emergency_contact"),
        ]
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn to_record(&self) -> Record {
        base_record(Self::ENTITY_TYPE, self.id, &self.central_ref)
            .with_field("first_name", Some(self.first_name.as_str()))
            .with_field("last_name", Some(self.last_name.as_str()))
            .with_field("health_number", self.health_number.as_deref())
            .with_field("email", self.email.as_deref())
            .with_field("phone", self.phone.as_deref())
            .with_field("date_of_birth", self.date_of_birth.as_deref())
            .with_field("address", self.address.as_deref())
            .with_field("emergency_contact", self.emergency_contact.as_deref())
    }

    fn from_record(record: &Record) -> Result<Self, ModelError> {
        check_type(record, Self::ENTITY_TYPE)?;
        Ok(Self {
            id: record.id,
            first_name: required(record, "first_name")?,
            last_name: required(record, "last_name")?,
            health_number: optional(record, "health_number"),
            email: optional(record, "email"),
            phone: optional(record, "phone"),
            date_of_birth: optional(record, "date_of_birth"),
            address: optional(record, "address"),
            emergency_contact: optional(record, "emergency_contact"),
            central_ref: record.external_ref.clone(),
        })
    }
}

/// Minimal patient identity held in the central database.
#[derive(Clone, Debug, PartialEq)]
pub struct CentralPatient {
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub health_number: Option<String>,
    /// Link to one tenant's full record.
    pub tenant_ref: Option<ExternalRef>,
}

impl EncryptedModel for CentralPatient {
    const ENTITY_TYPE: &'static str = "central_patient";
    const KIND: EntityKind = EntityKind::Patient;

    fn field_specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::required("first_name"),
            FieldSpec::required("last_name"),
            FieldSpec::optional("email").searchable("email_index", Normalization::CaseFoldTrim),
            FieldSpec::optional("health_number").searchable("health_number_index", Normalization::Exact),
        ]
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn to_record(&self) -> Record {
        base_record(Self::ENTITY_TYPE, self.id, &self.tenant_ref)
            .with_field("first_name", Some(self.first_name.as_str()))
            .with_field("last_name", Some(self.last_name.as_str()))
            .with_field("email", self.email.as_deref())
            .with_field("health_number", self.health_number.as_deref())
    }

    fn from_record(record: &Record) -> Result<Self, ModelError> {
        check_type(record, Self::ENTITY_TYPE)?;
        Ok(Self {
            id: record.id,
            first_name: required(record, "first_name")?,
            last_name: required(record, "last_name")?,
            email: optional(record, "email"),
            health_number: optional(record, "health_number"),
            tenant_ref: record.external_ref.clone(),
        })
    }
}

// ── Practitioner ─────────────────────────────────────────────────

/// Practitioner record held in a clinic's database.
#[derive(Clone, Debug, PartialEq)]
pub struct Practitioner {
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub license_number: Option<String>,
    pub phone: Option<String>,
    pub central_ref: Option<ExternalRef>,
}

impl Practitioner {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self {
            id: RecordId::new(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: None,
            license_number: None,
            phone: None,
            central_ref: None,
        }
    }
}

impl EncryptedModel for Practitioner {
    const ENTITY_TYPE: &'static str = "practitioner";
    const KIND: EntityKind = EntityKind::Practitioner;

    fn field_specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::required("first_name"),
            FieldSpec::required("last_name"),
            FieldSpec::optional("email").searchable("email_index", Normalization::CaseFoldTrim),
            FieldSpec::optional("license_number").searchable("license_number_index", Normalization::Exact),
            FieldSpec::optional("phone"),
        ]
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn to_record(&self) -> Record {
        base_record(Self::ENTITY_TYPE, self.id, &self.central_ref)
            .with_field("first_name", Some(self.first_name.as_str()))
            .with_field("last_name", Some(self.last_name.as_str()))
            .with_field("email", self.email.as_deref())
            .with_field("license_number", self.license_number.as_deref())
            .with_field("phone", self.phone.as_deref())
    }

    fn from_record(record: &Record) -> Result<Self, ModelError> {
        check_type(record, Self::ENTITY_TYPE)?;
        Ok(Self {
            id: record.id,
            first_name: required(record, "first_name")?,
            last_name: required(record, "last_name")?,
            email: optional(record, "email"),
            license_number: optional(record, "license_number"),
            phone: optional(record, "phone"),
            central_ref: record.external_ref.clone(),
        })
    }
}

/// Minimal practitioner identity held in the central database.
#[derive(Clone, Debug, PartialEq)]
pub struct CentralPractitioner {
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub tenant_ref: Option<ExternalRef>,
}

impl EncryptedModel for CentralPractitioner {
    const ENTITY_TYPE: &'static str = "central_practitioner";
    const KIND: EntityKind = EntityKind::Practitioner;

    fn field_specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::required("first_name"),
            FieldSpec::required("last_name"),
            FieldSpec::optional("email").searchable("email_index", Normalization::CaseFoldTrim),
        ]
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn to_record(&self) -> Record {
        base_record(Self::ENTITY_TYPE, self.id, &self.tenant_ref)
            .with_field("first_name", Some(self.first_name.as_str()))
            .with_field("last_name", Some(self.last_name.as_str()))
            .with_field("email", self.email.as_deref())
    }

    fn from_record(record: &Record) -> Result<Self, ModelError> {
        check_type(record, Self::ENTITY_TYPE)?;
        Ok(Self {
            id: record.id,
            first_name: required(record, "first_name")?,
            last_name: required(record, "last_name")?,
            email: optional(record, "email"),
            tenant_ref: record.external_ref.clone(),
        })
    }
}
