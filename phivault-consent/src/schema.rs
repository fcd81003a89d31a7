//! DDL for the consent tables.

use duckdb::Connection;

/// `key` uniqueness and the single-ACTIVE rule are enforced by the ledger
/// inside its transactions. Acceptances never change after insert, so
/// their uniqueness lives in the table.
const CONSENT_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS consent_definitions (
    id VARCHAR PRIMARY KEY,
    key VARCHAR NOT NULL,
    entity_type VARCHAR NOT NULL,
    is_required BOOLEAN NOT NULL,
    trigger_points TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    archived_at BIGINT
);

CREATE TABLE IF NOT EXISTS consent_versions (
    id VARCHAR PRIMARY KEY,
    definition_id VARCHAR NOT NULL,
    version INTEGER NOT NULL,
    body TEXT NOT NULL,
    status VARCHAR NOT NULL,
    published_at BIGINT NOT NULL,
    archived_at BIGINT
);

CREATE TABLE IF NOT EXISTS consent_acceptances (
    id VARCHAR PRIMARY KEY,
    entity_type VARCHAR NOT NULL,
    entity_id VARCHAR NOT NULL,
    consent_version_id VARCHAR NOT NULL,
    accepted_at BIGINT NOT NULL,
    UNIQUE (entity_type, entity_id, consent_version_id)
);
"#;

pub fn initialize_consent_schema(conn: &Connection) -> duckdb::Result<()> {
    conn.execute_batch(CONSENT_DDL)
}
