//! Consent definitions, versions and acceptances.

use crate::error::{ConsentError, ConsentResult};
use crate::types::{
    ConsentDefinition, ConsentSubject, ConsentVersion, EntityConsentAcceptance, TriggerPoint,
    VersionStatus,
};
use duckdb::{params, Connection};
use phivault_storage::{lock_conn, Session};
use phivault_types::{now_millis, EntityKind, RecordId};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

const DEFINITION_COLUMNS: &str =
    "d.id, d.key, d.entity_type, d.is_required, d.trigger_points, d.created_at, d.archived_at";

const VERSION_COLUMNS: &str =
    "v.id, v.definition_id, v.version, v.body, v.status, v.published_at, v.archived_at";

const ACCEPTANCE_COLUMNS: &str = "a.id, a.entity_type, a.entity_id, a.consent_version_id, a.accepted_at";

/// Definitions of the subject's kind with an ACTIVE version the subject has
/// not accepted. Bound parameters: kind, kind, subject id.
const PENDING_SQL: &str = "FROM consent_definitions d \
     JOIN consent_versions v ON v.definition_id = d.id AND v.status = 'ACTIVE' \
     WHERE d.entity_type = ? AND d.archived_at IS NULL \
     AND NOT EXISTS ( \
         SELECT 1 FROM consent_acceptances a \
         WHERE a.consent_version_id = v.id AND a.entity_type = ? AND a.entity_id = ? \
     )";

// ── Raw rows ─────────────────────────────────────────────────────

struct DefinitionRow {
    id: String,
    key: String,
    entity_type: String,
    is_required: bool,
    trigger_points: String,
    created_at: i64,
    archived_at: Option<i64>,
}

impl DefinitionRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            key: row.get(1)?,
            entity_type: row.get(2)?,
            is_required: row.get(3)?,
            trigger_points: row.get(4)?,
            created_at: row.get(5)?,
            archived_at: row.get(6)?,
        })
    }

    fn into_definition(self) -> ConsentResult<ConsentDefinition> {
        Ok(ConsentDefinition {
            id: parse_uuid(&self.id)?,
            entity_kind: parse_kind(&self.entity_type)?,
            trigger_points: serde_json::from_str(&self.trigger_points)?,
            key: self.key,
            is_required: self.is_required,
            created_at: self.created_at,
            archived_at: self.archived_at,
        })
    }
}

struct VersionRow {
    id: String,
    definition_id: String,
    version: i32,
    body: String,
    status: String,
    published_at: i64,
    archived_at: Option<i64>,
}

impl VersionRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            definition_id: row.get(1)?,
            version: row.get(2)?,
            body: row.get(3)?,
            status: row.get(4)?,
            published_at: row.get(5)?,
            archived_at: row.get(6)?,
        })
    }

    fn into_version(self) -> ConsentResult<ConsentVersion> {
        let status = VersionStatus::parse(&self.status)
            .ok_or_else(|| ConsentError::Corrupt(format!("unknown version status {}", self.status)))?;
        Ok(ConsentVersion {
            id: parse_uuid(&self.id)?,
            definition_id: parse_uuid(&self.definition_id)?,
            version: self.version,
            body: self.body,
            status,
            published_at: self.published_at,
            archived_at: self.archived_at,
        })
    }
}

struct AcceptanceRow {
    id: String,
    entity_type: String,
    entity_id: String,
    consent_version_id: String,
    accepted_at: i64,
}

impl AcceptanceRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            consent_version_id: row.get(3)?,
            accepted_at: row.get(4)?,
        })
    }

    fn into_acceptance(self) -> ConsentResult<EntityConsentAcceptance> {
        let entity_id = RecordId::parse(&self.entity_id)
            .map_err(|e| ConsentError::Corrupt(format!("acceptance {}: {e}", self.id)))?;
        Ok(EntityConsentAcceptance {
            id: parse_uuid(&self.id)?,
            subject: ConsentSubject::new(parse_kind(&self.entity_type)?, entity_id),
            consent_version_id: parse_uuid(&self.consent_version_id)?,
            accepted_at: self.accepted_at,
        })
    }
}

fn parse_uuid(raw: &str) -> ConsentResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ConsentError::Corrupt(format!("id {raw}: {e}")))
}

fn parse_kind(raw: &str) -> ConsentResult<EntityKind> {
    EntityKind::parse(raw).map_err(|e| ConsentError::Corrupt(e.to_string()))
}

// ── Row lookups shared by the operations ─────────────────────────

fn definition_by_id(conn: &Connection, id: Uuid) -> ConsentResult<Option<ConsentDefinition>> {
    let result = conn.query_row(
        &format!("SELECT {DEFINITION_COLUMNS} FROM consent_definitions d WHERE d.id = ?"),
        params![id.to_string()],
        DefinitionRow::from_row,
    );
    match result {
        Ok(row) => row.into_definition().map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn version_by_id(conn: &Connection, id: Uuid) -> ConsentResult<Option<ConsentVersion>> {
    let result = conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM consent_versions v WHERE v.id = ?"),
        params![id.to_string()],
        VersionRow::from_row,
    );
    match result {
        Ok(row) => row.into_version().map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn active_count(conn: &Connection, definition_id: Uuid) -> ConsentResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM consent_versions WHERE definition_id = ? AND status = 'ACTIVE'",
        params![definition_id.to_string()],
        |row| row.get(0),
    )?)
}

fn set_archived_at(conn: &Connection, id: Uuid, archived_at: Option<i64>) -> ConsentResult<ConsentDefinition> {
    let updated = conn.execute(
        "UPDATE consent_definitions SET archived_at = ? WHERE id = ?",
        params![archived_at, id.to_string()],
    )?;
    if updated == 0 {
        return Err(ConsentError::definition_not_found(id));
    }
    definition_by_id(conn, id)?.ok_or_else(|| ConsentError::definition_not_found(id))
}

/// Versioned consent definitions and the acceptances recorded against them.
///
/// Stateless: every call operates on the database selected by the session's
/// current tenant context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsentLedger;

impl ConsentLedger {
    pub fn new() -> Self {
        Self
    }

    // ── Definitions ──────────────────────────────────────────────

    /// Creates a definition presented at no particular trigger point.
    pub fn define(
        &self,
        session: &Session,
        key: &str,
        entity_kind: EntityKind,
        required: bool,
    ) -> ConsentResult<ConsentDefinition> {
        self.define_with_triggers(session, key, entity_kind, required, std::iter::empty())
    }

    pub fn define_with_triggers(
        &self,
        session: &Session,
        key: &str,
        entity_kind: EntityKind,
        required: bool,
        trigger_points: impl IntoIterator<Item = TriggerPoint>,
    ) -> ConsentResult<ConsentDefinition> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ConsentError::Invalid("definition key must not be empty".into()));
        }

        let definition = ConsentDefinition {
            id: Uuid::now_v7(),
            key: key.to_string(),
            entity_kind,
            is_required: required,
            trigger_points: trigger_points.into_iter().collect::<BTreeSet<_>>(),
            created_at: now_millis(),
            archived_at: None,
        };
        let triggers_json = serde_json::to_string(&definition.trigger_points)?;

        let (ctx, shared) = session.connection()?;
        let mut conn = lock_conn(&shared);
        let tx = conn.transaction()?;

        let taken: i64 = tx.query_row(
            "SELECT COUNT(*) FROM consent_definitions WHERE key = ?",
            params![definition.key],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(ConsentError::DuplicateKey(definition.key));
        }

        tx.execute(
            "INSERT INTO consent_definitions (id, key, entity_type, is_required, trigger_points, created_at, archived_at) \
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
            params![
                definition.id.to_string(),
                definition.key,
                entity_kind.as_str(),
                required,
                triggers_json,
                definition.created_at
            ],
        )?;
        tx.commit()?;

        info!(context = %ctx, key = %definition.key, kind = entity_kind.as_str(), required, "consent defined");
        Ok(definition)
    }

    pub fn definition(&self, session: &Session, id: Uuid) -> ConsentResult<Option<ConsentDefinition>> {
        let (_, shared) = session.connection()?;
        let conn = lock_conn(&shared);
        definition_by_id(&conn, id)
    }

    pub fn definition_by_key(&self, session: &Session, key: &str) -> ConsentResult<Option<ConsentDefinition>> {
        let (_, shared) = session.connection()?;
        let conn = lock_conn(&shared);
        let result = conn.query_row(
            &format!("SELECT {DEFINITION_COLUMNS} FROM consent_definitions d WHERE d.key = ?"),
            params![key],
            DefinitionRow::from_row,
        );
        match result {
            Ok(row) => row.into_definition().map(Some),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Definitions for one kind of entity, oldest first.
    pub fn definitions(
        &self,
        session: &Session,
        entity_kind: EntityKind,
        include_archived: bool,
    ) -> ConsentResult<Vec<ConsentDefinition>> {
        let mut sql = format!("SELECT {DEFINITION_COLUMNS} FROM consent_definitions d WHERE d.entity_type = ?");
        if !include_archived {
            sql.push_str(" AND d.archived_at IS NULL");
        }
        sql.push_str(" ORDER BY d.created_at, d.key");

        let (_, shared) = session.connection()?;
        let rows = {
            let conn = lock_conn(&shared);
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![entity_kind.as_str()], DefinitionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(DefinitionRow::into_definition).collect()
    }

    /// Soft-deletes a definition. Its versions and acceptances are kept.
    pub fn archive_definition(&self, session: &Session, id: Uuid) -> ConsentResult<ConsentDefinition> {
        let (ctx, shared) = session.connection()?;
        let conn = lock_conn(&shared);
        let definition = set_archived_at(&conn, id, Some(now_millis()))?;
        info!(context = %ctx, key = %definition.key, "consent definition archived");
        Ok(definition)
    }

    pub fn restore_definition(&self, session: &Session, id: Uuid) -> ConsentResult<ConsentDefinition> {
        let (ctx, shared) = session.connection()?;
        let conn = lock_conn(&shared);
        let definition = set_archived_at(&conn, id, None)?;
        info!(context = %ctx, key = %definition.key, "consent definition restored");
        Ok(definition)
    }

    // ── Versions ─────────────────────────────────────────────────

    /// Publishes a new ACTIVE version and archives the previous one in the
    /// same transaction.
    pub fn publish_version(&self, session: &Session, definition_id: Uuid, body: &str) -> ConsentResult<ConsentVersion> {
        if body.trim().is_empty() {
            return Err(ConsentError::Invalid("consent body must not be empty".into()));
        }

        let (ctx, shared) = session.connection()?;
        let mut conn = lock_conn(&shared);
        let tx = conn.transaction()?;

        let definition =
            definition_by_id(&tx, definition_id)?.ok_or_else(|| ConsentError::definition_not_found(definition_id))?;
        if definition.is_archived() {
            return Err(ConsentError::Invalid(format!(
                "definition {} is archived",
                definition.key
            )));
        }

        let active = active_count(&tx, definition_id)?;
        if active > 1 {
            return Err(ConsentError::DuplicateActiveVersion { definition_id, active });
        }

        let latest: Option<i32> = tx.query_row(
            "SELECT MAX(version) FROM consent_versions WHERE definition_id = ?",
            params![definition_id.to_string()],
            |row| row.get(0),
        )?;
        let now = now_millis();
        let version = ConsentVersion {
            id: Uuid::now_v7(),
            definition_id,
            version: latest.unwrap_or(0) + 1,
            body: body.to_string(),
            status: VersionStatus::Active,
            published_at: now,
            archived_at: None,
        };

        let archived = tx.execute(
            "UPDATE consent_versions SET status = 'ARCHIVED', archived_at = ? \
             WHERE definition_id = ? AND status = 'ACTIVE'",
            params![now, definition_id.to_string()],
        )?;
        tx.execute(
            "INSERT INTO consent_versions (id, definition_id, version, body, status, published_at, archived_at) \
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
            params![
                version.id.to_string(),
                definition_id.to_string(),
                version.version,
                version.body,
                version.status.as_str(),
                version.published_at
            ],
        )?;

        let active = active_count(&tx, definition_id)?;
        if active != 1 {
            return Err(ConsentError::DuplicateActiveVersion { definition_id, active });
        }
        tx.commit()?;

        info!(
            context = %ctx,
            key = %definition.key,
            version = version.version,
            archived,
            "consent version published"
        );
        Ok(version)
    }

    pub fn version(&self, session: &Session, id: Uuid) -> ConsentResult<Option<ConsentVersion>> {
        let (_, shared) = session.connection()?;
        let conn = lock_conn(&shared);
        version_by_id(&conn, id)
    }

    pub fn active_version(&self, session: &Session, definition_id: Uuid) -> ConsentResult<Option<ConsentVersion>> {
        let (_, shared) = session.connection()?;
        let conn = lock_conn(&shared);
        if definition_by_id(&conn, definition_id)?.is_none() {
            return Err(ConsentError::definition_not_found(definition_id));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM consent_versions v \
             WHERE v.definition_id = ? AND v.status = 'ACTIVE' ORDER BY v.version DESC"
        ))?;
        let rows = stmt
            .query_map(params![definition_id.to_string()], VersionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        if rows.len() > 1 {
            return Err(ConsentError::DuplicateActiveVersion {
                definition_id,
                active: rows.len() as i64,
            });
        }
        rows.into_iter().next().map(VersionRow::into_version).transpose()
    }

    /// Every published version of a definition, oldest first.
    pub fn versions(&self, session: &Session, definition_id: Uuid) -> ConsentResult<Vec<ConsentVersion>> {
        let (_, shared) = session.connection()?;
        let rows = {
            let conn = lock_conn(&shared);
            if definition_by_id(&conn, definition_id)?.is_none() {
                return Err(ConsentError::definition_not_found(definition_id));
            }
            let mut stmt = conn.prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM consent_versions v WHERE v.definition_id = ? ORDER BY v.version"
            ))?;
            stmt.query_map(params![definition_id.to_string()], VersionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(VersionRow::into_version).collect()
    }

    // ── Acceptances ──────────────────────────────────────────────

    /// Records that `subject` accepted `version_id`. Accepting the same
    /// version again returns the original acceptance.
    ///
    /// The subject's record is not looked up: callers check it exists
    /// through the repository first. Acceptances outlive the record, so a
    /// deleted subject keeps its consent history.
    pub fn accept(
        &self,
        session: &Session,
        subject: ConsentSubject,
        version_id: Uuid,
    ) -> ConsentResult<EntityConsentAcceptance> {
        let (ctx, shared) = session.connection()?;
        let mut conn = lock_conn(&shared);
        let tx = conn.transaction()?;

        let version = version_by_id(&tx, version_id)?.ok_or_else(|| ConsentError::version_not_found(version_id))?;
        let definition = definition_by_id(&tx, version.definition_id)?
            .ok_or_else(|| ConsentError::definition_not_found(version.definition_id))?;
        if definition.entity_kind != subject.kind {
            return Err(ConsentError::Invalid(format!(
                "definition {} applies to {}, not {}",
                definition.key,
                definition.entity_kind.as_str(),
                subject.kind.as_str()
            )));
        }

        let existing = tx.query_row(
            &format!(
                "SELECT {ACCEPTANCE_COLUMNS} FROM consent_acceptances a \
                 WHERE a.entity_type = ? AND a.entity_id = ? AND a.consent_version_id = ?"
            ),
            params![subject.kind.as_str(), subject.id.to_string(), version_id.to_string()],
            AcceptanceRow::from_row,
        );
        match existing {
            Ok(row) => {
                debug!(context = %ctx, subject = %subject, key = %definition.key, "consent already accepted");
                return row.into_acceptance();
            }
            Err(duckdb::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }

        let acceptance = EntityConsentAcceptance {
            id: Uuid::now_v7(),
            subject,
            consent_version_id: version_id,
            accepted_at: now_millis(),
        };
        tx.execute(
            "INSERT INTO consent_acceptances (id, entity_type, entity_id, consent_version_id, accepted_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                acceptance.id.to_string(),
                subject.kind.as_str(),
                subject.id.to_string(),
                version_id.to_string(),
                acceptance.accepted_at
            ],
        )?;
        tx.commit()?;

        info!(
            context = %ctx,
            subject = %subject,
            key = %definition.key,
            version = version.version,
            "consent accepted"
        );
        Ok(acceptance)
    }

    /// All acceptances recorded for `subject`, oldest first.
    pub fn acceptances_for(
        &self,
        session: &Session,
        subject: ConsentSubject,
    ) -> ConsentResult<Vec<EntityConsentAcceptance>> {
        let (_, shared) = session.connection()?;
        let rows = {
            let conn = lock_conn(&shared);
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACCEPTANCE_COLUMNS} FROM consent_acceptances a \
                 WHERE a.entity_type = ? AND a.entity_id = ? ORDER BY a.accepted_at, a.id"
            ))?;
            stmt.query_map(
                params![subject.kind.as_str(), subject.id.to_string()],
                AcceptanceRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(AcceptanceRow::into_acceptance).collect()
    }

    /// Live definitions of the subject's kind whose active version the
    /// subject has not accepted. Definitions never published are skipped.
    pub fn pending_for(&self, session: &Session, subject: ConsentSubject) -> ConsentResult<Vec<ConsentDefinition>> {
        let (_, shared) = session.connection()?;
        let rows = {
            let conn = lock_conn(&shared);
            let mut stmt = conn.prepare(&format!(
                "SELECT {DEFINITION_COLUMNS} {PENDING_SQL} ORDER BY d.created_at, d.key"
            ))?;
            stmt.query_map(
                params![subject.kind.as_str(), subject.kind.as_str(), subject.id.to_string()],
                DefinitionRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(DefinitionRow::into_definition).collect()
    }

    /// [`ConsentLedger::pending_for`] restricted to definitions presented
    /// at `trigger`.
    pub fn pending_for_trigger(
        &self,
        session: &Session,
        subject: ConsentSubject,
        trigger: TriggerPoint,
    ) -> ConsentResult<Vec<ConsentDefinition>> {
        Ok(self
            .pending_for(session, subject)?
            .into_iter()
            .filter(|definition| definition.presented_at(trigger))
            .collect())
    }

    /// True when every required, non-archived definition with an active
    /// version has been accepted by `subject`.
    pub fn has_accepted_all_required(&self, session: &Session, subject: ConsentSubject) -> ConsentResult<bool> {
        let (_, shared) = session.connection()?;
        let conn = lock_conn(&shared);
        let outstanding: i64 = conn.query_row(
            &format!("SELECT COUNT(*) {PENDING_SQL} AND d.is_required = TRUE"),
            params![subject.kind.as_str(), subject.kind.as_str(), subject.id.to_string()],
            |row| row.get(0),
        )?;
        Ok(outstanding == 0)
    }
}
