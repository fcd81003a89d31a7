//! Shared identifiers for phivault.
//!
//! Everything here is plain data: tenant identifiers, the tenant/central
//! context that selects a database and a key scope, the closed set of
//! consentable entity kinds, and record identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Maximum length of a tenant identifier.
pub const MAX_TENANT_ID_LEN: usize = 64;

/// Errors produced while parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("tenant id must not be empty")]
    EmptyTenantId,
    #[error("tenant id too long: {0} characters (max {MAX_TENANT_ID_LEN})")]
    TenantIdTooLong(usize),
    #[error("tenant id contains invalid character {0:?}")]
    InvalidTenantChar(char),
    #[error("invalid record id: {0}")]
    InvalidRecordId(String),
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),
}

/// Identifier of a clinic.
///
/// Restricted to `[A-Za-z0-9_-]` so it can name a database file directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        if raw.is_empty() {
            return Err(IdError::EmptyTenantId);
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return Err(IdError::TenantIdTooLong(raw.len()));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(IdError::InvalidTenantChar(bad));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The scope an operation runs under: the shared central database or one
/// clinic's database.
///
/// Only two states exist, so "central with a tenant id" cannot be expressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "tenant_id", rename_all = "snake_case")]
pub enum TenantContext {
    Central,
    Tenant(TenantId),
}

impl TenantContext {
    pub fn tenant(id: TenantId) -> Self {
        Self::Tenant(id)
    }

    pub fn is_central(&self) -> bool {
        matches!(self, Self::Central)
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            Self::Central => None,
            Self::Tenant(id) => Some(id),
        }
    }

    /// Stable label used for key-scope derivation and log fields.
    pub fn label(&self) -> String {
        match self {
            Self::Central => "central".to_string(),
            Self::Tenant(id) => format!("tenant:{id}"),
        }
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Entity kinds that can hold PHI and accept consents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Patient,
    Practitioner,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "PATIENT",
            Self::Practitioner => "PRACTITIONER",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, IdError> {
        match raw {
            "PATIENT" => Ok(Self::Patient),
            "PRACTITIONER" => Ok(Self::Practitioner),
            other => Err(IdError::UnknownEntityKind(other.to_string())),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strongly-typed record identifier (time-ordered UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> Result<Self, IdError> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| IdError::InvalidRecordId(format!("{raw}: {e}")))
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cross-database link between a central identity row and a tenant row.
///
/// Stored as a plain reference pair, never as a foreign key, because the two
/// rows live in different databases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRef {
    /// Tenant owning the linked row, or `None` when the link points at central.
    pub tenant_id: Option<TenantId>,
    pub record_id: RecordId,
}

impl ExternalRef {
    pub fn central(record_id: RecordId) -> Self {
        Self {
            tenant_id: None,
            record_id,
        }
    }

    pub fn tenant(tenant_id: TenantId, record_id: RecordId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            record_id,
        }
    }

    /// Flat form stored in a single indexed column.
    ///
    /// `:` never appears in a tenant id, so a tenant literally named
    /// `central` cannot collide with a central link.
    pub fn to_key(&self) -> String {
        match &self.tenant_id {
            Some(t) => format!("tenant:{t}:{}", self.record_id),
            None => format!("central:{}", self.record_id),
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_accepts_safe_names() {
        assert_eq!(TenantId::parse("clinic_01-a").unwrap().as_str(), "clinic_01-a");
    }

    #[test]
    fn tenant_id_rejects_path_characters() {
        assert_eq!(
            TenantId::parse("../etc"),
            Err(IdError::InvalidTenantChar('.'))
        );
        assert_eq!(TenantId::parse(""), Err(IdError::EmptyTenantId));
        let long = "a".repeat(MAX_TENANT_ID_LEN + 1);
        assert_eq!(
            TenantId::parse(&long),
            Err(IdError::TenantIdTooLong(MAX_TENANT_ID_LEN + 1))
        );
    }

    #[test]
    fn tenant_id_deserialization_validates() {
        let bad: Result<TenantId, _> = serde_json::from_str("\"a b\"");
        assert!(bad.is_err());
        let good: TenantId = serde_json::from_str("\"north\"").unwrap();
        assert_eq!(good.as_str(), "north");
    }

    #[test]
    fn external_ref_keys_separate_central_from_tenants() {
        let id = RecordId::new();
        let central = ExternalRef::central(id);
        let named_central = ExternalRef::tenant(TenantId::parse("central").unwrap(), id);
        assert_eq!(central.to_key(), format!("central:{id}"));
        assert_eq!(named_central.to_key(), format!("tenant:central:{id}"));
        assert_ne!(central.to_key(), named_central.to_key());

        let north = ExternalRef::tenant(TenantId::parse("north").unwrap(), id);
        assert_eq!(north.to_key(), format!("tenant:north:{id}"));
    }

    #[test]
    fn context_labels_are_distinct() {
        let t = TenantContext::tenant(TenantId::parse("north").unwrap());
        assert_eq!(TenantContext::Central.label(), "central");
        assert_eq!(t.label(), "tenant:north");
        assert!(TenantContext::Central.is_central());
        assert!(!t.is_central());
        assert_eq!(t.tenant_id().map(TenantId::as_str), Some("north"));
    }

    #[test]
    fn entity_kind_round_trips_through_str() {
        for kind in [EntityKind::Patient, EntityKind::Practitioner] {
            assert_eq!(EntityKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(EntityKind::parse("patient").is_err());
    }
}
