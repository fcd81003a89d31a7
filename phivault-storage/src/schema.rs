//! DDL for encrypted records and their blind indexes.

use duckdb::Connection;

/// Encrypted records. `fields_json` maps field name to a stored envelope
/// (or the absent marker); nothing in this table is PHI plaintext.
const RECORDS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS encrypted_records (
    id VARCHAR PRIMARY KEY,
    entity_type VARCHAR NOT NULL,
    fields_json TEXT NOT NULL,
    attributes_json TEXT NOT NULL,
    external_ref_key VARCHAR,
    external_ref_json TEXT,
    created_at BIGINT NOT NULL,
    modified_at BIGINT NOT NULL
);
"#;

/// Blind index rows, digest stored as lowercase hex. Non-unique: distinct
/// records may share a digest.
const BLIND_INDEXES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS blind_indexes (
    entity_type VARCHAR NOT NULL,
    index_name VARCHAR NOT NULL,
    digest VARCHAR NOT NULL,
    record_id VARCHAR NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_blind_indexes_lookup ON blind_indexes(entity_type, index_name, digest);
"#;

/// Initialize the record tables on a freshly opened database.
pub fn initialize_record_schema(conn: &Connection) -> duckdb::Result<()> {
    conn.execute_batch(RECORDS_DDL)?;
    conn.execute_batch(BLIND_INDEXES_DDL)?;
    Ok(())
}
