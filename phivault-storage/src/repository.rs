//! Encrypted record repository.
//!
//! Every declared field is sealed with [`FieldCipher`] before it reaches
//! DuckDB, and searchable fields additionally get a blind index row. All
//! key work happens before the connection is locked; the database only
//! ever sees finished envelopes and digests, written in one transaction.
//!
//! The repository holds no tenant state. Each call reads the active
//! context from the [`Session`] it is given and fails with
//! [`StorageError::NoTenantContext`] when there is none.

use crate::error::{StorageError, StorageResult};
use crate::lock_conn;
use crate::session::Session;
use duckdb::params;
use phivault_crypto::{BlindIndexer, FieldCipher, FieldPurpose, HmacBlindIndexer, StoredField};
use phivault_model::{EncryptedFieldRegistry, EncryptedModel, FieldSpec, IndexSpec, Record};
use phivault_types::{now_millis, ExternalRef, RecordId, TenantContext};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const SELECT_COLUMNS: &str = "r.id, r.entity_type, r.fields_json, r.attributes_json, r.external_ref_json, r.created_at, r.modified_at";

/// A row as read from `encrypted_records`, still sealed.
struct SealedRow {
    id: String,
    entity_type: String,
    fields_json: String,
    attributes_json: String,
    external_ref_json: Option<String>,
    created_at: i64,
    modified_at: i64,
}

impl SealedRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            fields_json: row.get(2)?,
            attributes_json: row.get(3)?,
            external_ref_json: row.get(4)?,
            created_at: row.get(5)?,
            modified_at: row.get(6)?,
        })
    }
}

/// Stores and retrieves [`Record`]s with field-level encryption.
pub struct EncryptedRepository {
    registry: Arc<EncryptedFieldRegistry>,
    indexer: Arc<dyn BlindIndexer>,
    /// Overrides `VaultConfig::collision_warn_threshold` when set.
    collision_warn_threshold: Option<usize>,
}

impl EncryptedRepository {
    pub fn new(registry: Arc<EncryptedFieldRegistry>) -> Self {
        Self {
            registry,
            indexer: Arc::new(HmacBlindIndexer),
            collision_warn_threshold: None,
        }
    }

    /// Replaces the blind indexer.
    pub fn with_indexer(mut self, indexer: Arc<dyn BlindIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_collision_warn_threshold(mut self, threshold: usize) -> Self {
        self.collision_warn_threshold = Some(threshold);
        self
    }

    pub fn registry(&self) -> &EncryptedFieldRegistry {
        &self.registry
    }

    /// Inserts or replaces a record in the current context's database.
    ///
    /// Either every field is sealed and every searchable field indexed, or
    /// nothing is written. An id already taken by another entity type is
    /// rejected with [`StorageError::IdConflict`].
    pub fn save(&self, session: &Session, record: &Record) -> StorageResult<RecordId> {
        let ctx = session.current()?;
        let specs = self.specs(&record.entity_type)?;
        validate_fields(&record.entity_type, specs, record)?;

        let write_key = session.key_material(&ctx, FieldPurpose::Write)?;
        let index_key = if specs.iter().any(FieldSpec::is_searchable) {
            Some(session.key_material(&ctx, FieldPurpose::Index)?)
        } else {
            None
        };

        let mut sealed: BTreeMap<&str, StoredField> = BTreeMap::new();
        let mut digests: Vec<(&str, String)> = Vec::new();
        for spec in specs {
            let value = record.get(&spec.field_name);
            sealed.insert(
                spec.field_name.as_str(),
                FieldCipher::seal_optional(value, &write_key, &spec.field_name)?,
            );
            if let (Some(index), Some(value), Some(key)) = (&spec.index, value, index_key.as_ref()) {
                let digest = self.indexer.compute(value, key, &index.name, index.normalization)?;
                digests.push((index.name.as_str(), digest.to_hex()));
            }
        }

        let fields_json = serde_json::to_string(&sealed)?;
        let attributes_json = serde_json::to_string(&record.attributes)?;
        let external_ref_json = record
            .external_ref
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let external_ref_key = record.external_ref.as_ref().map(ExternalRef::to_key);
        let id = record.id.to_string();
        let now = now_millis();

        let shared = session.router().connections().connection(&ctx)?;
        let mut conn = lock_conn(&shared);
        let tx = conn.transaction()?;

        let existing = match tx.query_row(
            "SELECT entity_type FROM encrypted_records WHERE id = ?",
            params![id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(entity_type) => Some(entity_type),
            Err(duckdb::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(stored_type) = existing.as_deref().filter(|t| *t != record.entity_type) {
            return Err(StorageError::IdConflict {
                id,
                existing: stored_type.to_string(),
                attempted: record.entity_type.clone(),
            });
        }
        let updated = existing.is_some();
        if updated {
            tx.execute(
                "UPDATE encrypted_records SET fields_json = ?, attributes_json = ?, \
                 external_ref_key = ?, external_ref_json = ?, modified_at = ? WHERE id = ?",
                params![
                    fields_json,
                    attributes_json,
                    external_ref_key,
                    external_ref_json,
                    now,
                    id
                ],
            )?;
            tx.execute("DELETE FROM blind_indexes WHERE record_id = ?", params![id])?;
        } else {
            tx.execute(
                "INSERT INTO encrypted_records (id, entity_type, fields_json, attributes_json, \
                 external_ref_key, external_ref_json, created_at, modified_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    record.entity_type,
                    fields_json,
                    attributes_json,
                    external_ref_key,
                    external_ref_json,
                    record.created_at,
                    now
                ],
            )?;
        }

        for (index_name, digest) in &digests {
            tx.execute(
                "INSERT INTO blind_indexes (entity_type, index_name, digest, record_id) VALUES (?, ?, ?, ?)",
                params![record.entity_type, index_name, digest, id],
            )?;
        }
        tx.commit()?;

        debug!(
            context = %ctx,
            entity_type = %record.entity_type,
            id = %id,
            indexes = digests.len(),
            updated,
            "saved encrypted record"
        );
        Ok(record.id)
    }

    /// Loads and decrypts one record. Any field that fails to decrypt fails
    /// the whole load.
    pub fn load(&self, session: &Session, entity_type: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        let ctx = session.current()?;
        let specs = self.specs(entity_type)?;

        let shared = session.router().connections().connection(&ctx)?;
        let row = {
            let conn = lock_conn(&shared);
            let result = conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM encrypted_records r WHERE r.entity_type = ? AND r.id = ?"),
                params![entity_type, id.to_string()],
                SealedRow::from_row,
            );
            match result {
                Ok(row) => row,
                Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        };

        self.open_row(session, &ctx, specs, row).map(Some)
    }

    /// Records whose searchable field equals `query` under the index's
    /// normalization.
    ///
    /// Digest matches are only candidates: each one is decrypted and
    /// compared against the query, and non-matching candidates are dropped.
    pub fn find_by_index(
        &self,
        session: &Session,
        entity_type: &str,
        index_name: &str,
        query: &str,
    ) -> StorageResult<Vec<Record>> {
        let ctx = session.current()?;
        let specs = self.specs(entity_type)?;
        let (spec, index) = self.index_spec(entity_type, index_name)?;

        let key = session.key_material(&ctx, FieldPurpose::Index)?;
        let digest = self.indexer.compute(query, &key, index_name, index.normalization)?;

        let shared = session.router().connections().connection(&ctx)?;
        let rows = {
            let conn = lock_conn(&shared);
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM encrypted_records r \
                 JOIN blind_indexes b ON b.record_id = r.id \
                 WHERE b.entity_type = ? AND b.index_name = ? AND b.digest = ? AND r.entity_type = ? \
                 ORDER BY r.created_at, r.id"
            ))?;
            stmt.query_map(
                params![entity_type, index_name, digest.to_hex(), entity_type],
                SealedRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?
        };

        let candidates = rows.len();
        let threshold = self
            .collision_warn_threshold
            .unwrap_or(session.router().config().collision_warn_threshold);
        if candidates > threshold {
            warn!(
                target: "phivault::collision",
                entity_type,
                index = index_name,
                candidates,
                threshold,
                "blind index lookup matched more candidates than expected"
            );
        }

        let mut matches = Vec::with_capacity(candidates);
        for row in rows {
            let record = self.open_row(session, &ctx, specs, row)?;
            let is_match = record
                .get(&spec.field_name)
                .is_some_and(|stored| index.normalization.matches(stored, query));
            if is_match {
                matches.push(record);
            }
        }

        if matches.len() < candidates {
            debug!(
                entity_type,
                index = index_name,
                discarded = candidates - matches.len(),
                "dropped blind index candidates that did not match"
            );
        }
        Ok(matches)
    }

    /// Records carrying the given cross-database reference.
    pub fn find_by_external_ref(
        &self,
        session: &Session,
        entity_type: &str,
        external_ref: &ExternalRef,
    ) -> StorageResult<Vec<Record>> {
        let ctx = session.current()?;
        let specs = self.specs(entity_type)?;

        let shared = session.router().connections().connection(&ctx)?;
        let rows = {
            let conn = lock_conn(&shared);
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM encrypted_records r \
                 WHERE r.entity_type = ? AND r.external_ref_key = ? ORDER BY r.created_at, r.id"
            ))?;
            stmt.query_map(params![entity_type, external_ref.to_key()], SealedRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|row| self.open_row(session, &ctx, specs, row))
            .collect()
    }

    /// All records of a type, oldest first.
    pub fn list(&self, session: &Session, entity_type: &str) -> StorageResult<Vec<Record>> {
        let ctx = session.current()?;
        let specs = self.specs(entity_type)?;

        let shared = session.router().connections().connection(&ctx)?;
        let rows = {
            let conn = lock_conn(&shared);
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM encrypted_records r WHERE r.entity_type = ? ORDER BY r.created_at, r.id"
            ))?;
            stmt.query_map(params![entity_type], SealedRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|row| self.open_row(session, &ctx, specs, row))
            .collect()
    }

    /// Deletes a record and its index rows. Returns whether it existed.
    pub fn delete(&self, session: &Session, entity_type: &str, id: &RecordId) -> StorageResult<bool> {
        let ctx = session.current()?;
        self.specs(entity_type)?;
        let id = id.to_string();

        let shared = session.router().connections().connection(&ctx)?;
        let mut conn = lock_conn(&shared);
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM encrypted_records WHERE entity_type = ? AND id = ?",
            params![entity_type, id],
        )?;
        if removed > 0 {
            tx.execute(
                "DELETE FROM blind_indexes WHERE entity_type = ? AND record_id = ?",
                params![entity_type, id],
            )?;
        }
        tx.commit()?;

        debug!(context = %ctx, entity_type, id = %id, removed, "deleted encrypted record");
        Ok(removed > 0)
    }

    pub fn count(&self, session: &Session, entity_type: &str) -> StorageResult<usize> {
        let ctx = session.current()?;
        self.specs(entity_type)?;

        let shared = session.router().connections().connection(&ctx)?;
        let conn = lock_conn(&shared);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM encrypted_records WHERE entity_type = ?",
            params![entity_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Typed models ─────────────────────────────────────────────

    pub fn save_model<M: EncryptedModel>(&self, session: &Session, model: &M) -> StorageResult<RecordId> {
        self.save(session, &model.to_record())
    }

    pub fn load_model<M: EncryptedModel>(&self, session: &Session, id: &RecordId) -> StorageResult<Option<M>> {
        match self.load(session, M::ENTITY_TYPE, id)? {
            Some(record) => Ok(Some(M::from_record(&record)?)),
            None => Ok(None),
        }
    }

    pub fn find_models<M: EncryptedModel>(
        &self,
        session: &Session,
        index_name: &str,
        query: &str,
    ) -> StorageResult<Vec<M>> {
        self.find_by_index(session, M::ENTITY_TYPE, index_name, query)?
            .iter()
            .map(|record| M::from_record(record).map_err(StorageError::from))
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────

    fn specs(&self, entity_type: &str) -> StorageResult<&[FieldSpec]> {
        self.registry
            .fields_for(entity_type)
            .ok_or_else(|| StorageError::UnknownEntityType(entity_type.to_string()))
    }

    fn index_spec(&self, entity_type: &str, index_name: &str) -> StorageResult<(&FieldSpec, &IndexSpec)> {
        self.registry
            .index(entity_type, index_name)
            .and_then(|spec| spec.index.as_ref().map(|index| (spec, index)))
            .ok_or_else(|| StorageError::UnknownIndex {
                entity_type: entity_type.to_string(),
                index: index_name.to_string(),
            })
    }

    /// Decrypts every stored field of a row.
    fn open_row(
        &self,
        session: &Session,
        ctx: &TenantContext,
        specs: &[FieldSpec],
        row: SealedRow,
    ) -> StorageResult<Record> {
        let sealed: BTreeMap<String, StoredField> = serde_json::from_str(&row.fields_json)
            .map_err(|e| StorageError::DecryptionFailed(format!("record {}: malformed envelopes: {e}", row.id)))?;

        let mut fields = BTreeMap::new();
        for (name, stored) in &sealed {
            if !specs.iter().any(|spec| spec.field_name == *name) {
                return Err(StorageError::DecryptionFailed(format!(
                    "record {}: stored field {name} is not declared",
                    row.id
                )));
            }
            let value = match stored {
                StoredField::Absent => None,
                StoredField::Sealed(envelope) => {
                    if envelope.field_name != *name {
                        return Err(StorageError::DecryptionFailed(format!(
                            "record {}: envelope for {} stored under {name}",
                            row.id, envelope.field_name
                        )));
                    }
                    let key_ref = envelope.layer2_ref();
                    let key = session.key_material(ctx, FieldPurpose::Read(&key_ref))?;
                    Some(FieldCipher::decrypt(envelope, &key)?)
                }
            };
            fields.insert(name.clone(), value);
        }
        // Fields added to the registry after this row was written.
        for spec in specs {
            fields.entry(spec.field_name.clone()).or_insert(None);
        }

        let id = RecordId::parse(&row.id)
            .map_err(|e| StorageError::DecryptionFailed(format!("record {}: {e}", row.id)))?;
        let attributes = serde_json::from_str(&row.attributes_json)?;
        let external_ref = row
            .external_ref_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Record {
            id,
            entity_type: row.entity_type,
            fields,
            attributes,
            external_ref,
            created_at: row.created_at,
            modified_at: row.modified_at,
        })
    }
}

fn validate_fields(entity_type: &str, specs: &[FieldSpec], record: &Record) -> StorageResult<()> {
    if let Some(undeclared) = record
        .fields
        .keys()
        .find(|name| !specs.iter().any(|spec| spec.field_name == **name))
    {
        return Err(StorageError::UndeclaredField {
            entity_type: entity_type.to_string(),
            field: undeclared.clone(),
        });
    }
    if let Some(missing) = specs
        .iter()
        .find(|spec| spec.required && record.get(&spec.field_name).is_none())
    {
        return Err(StorageError::MissingRequiredField {
            entity_type: entity_type.to_string(),
            field: missing.field_name.clone(),
        });
    }
    Ok(())
}
