//! Tenant-routed DuckDB storage for phivault.
//!
//! # Architecture
//!
//! - The central database and every clinic database are separate DuckDB
//!   files (or in-memory databases in tests), opened lazily by
//!   [`ConnectionRegistry`].
//! - A [`Session`] is created per request. It carries the [`TenantScope`]
//!   stack that decides which database and which key bucket apply, and the
//!   request's key-material cache.
//! - [`EncryptedRepository`] stores records with every declared field
//!   sealed in an envelope and searchable fields indexed by blind digest.
//!   It holds no tenant state of its own.

pub mod config;
mod connections;
mod error;
mod repository;
mod schema;
mod scope;
mod session;

pub use config::VaultConfig;
pub use connections::{ConnectionRegistry, SchemaInitializer, SharedConnection};
pub use error::{StorageError, StorageResult};
pub use repository::EncryptedRepository;
pub use schema::initialize_record_schema;
pub use scope::TenantScope;
pub use session::{Session, TenantRouter};

use std::sync::MutexGuard;
use tracing::warn;

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once.
pub fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    wal = %wal_path.display(),
                    "DuckDB open failed, removing stale WAL and retrying"
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Apply memory and thread limits to a DuckDB connection.
fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit.replace('\'', "''"),
        threads
    ))?;
    Ok(())
}

/// Acquire a connection lock, recovering from poison.
pub fn lock_conn(conn: &SharedConnection) -> MutexGuard<'_, duckdb::Connection> {
    conn.lock().unwrap_or_else(|poisoned| {
        warn!("recovering from poisoned connection mutex");
        poisoned.into_inner()
    })
}
