//! Consent ledger types.

use phivault_types::{EntityKind, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Lifecycle moment at which a consent is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPoint {
    Registration,
    Booking,
    Checkin,
    PortalLogin,
}

impl TriggerPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Booking => "booking",
            Self::Checkin => "checkin",
            Self::PortalLogin => "portal_login",
        }
    }
}

impl fmt::Display for TriggerPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Active,
    Archived,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(Self::Active),
            "ARCHIVED" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A consent document that entities of one kind may be asked to accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentDefinition {
    pub id: Uuid,
    /// Stable machine name, unique per database (e.g. `hipaa_release`).
    pub key: String,
    pub entity_kind: EntityKind,
    pub is_required: bool,
    pub trigger_points: BTreeSet<TriggerPoint>,
    pub created_at: i64,
    /// Set while the definition is soft-deleted.
    pub archived_at: Option<i64>,
}

impl ConsentDefinition {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn presented_at(&self, trigger: TriggerPoint) -> bool {
        self.trigger_points.contains(&trigger)
    }
}

/// One published text of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentVersion {
    pub id: Uuid,
    pub definition_id: Uuid,
    /// Starts at 1 and increases by one per publication.
    pub version: i32,
    pub body: String,
    pub status: VersionStatus,
    pub published_at: i64,
    pub archived_at: Option<i64>,
}

impl ConsentVersion {
    pub fn is_active(&self) -> bool {
        self.status == VersionStatus::Active
    }
}

/// The patient or practitioner a consent applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsentSubject {
    pub kind: EntityKind,
    pub id: RecordId,
}

impl ConsentSubject {
    pub fn new(kind: EntityKind, id: RecordId) -> Self {
        Self { kind, id }
    }

    pub fn patient(id: RecordId) -> Self {
        Self::new(EntityKind::Patient, id)
    }

    pub fn practitioner(id: RecordId) -> Self {
        Self::new(EntityKind::Practitioner, id)
    }
}

impl fmt::Display for ConsentSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConsentAcceptance {
    pub id: Uuid,
    pub subject: ConsentSubject,
    pub consent_version_id: Uuid,
    pub accepted_at: i64,
}
