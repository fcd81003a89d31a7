//! Lazily opened per-context DuckDB connections.

use crate::config::VaultConfig;
use crate::error::StorageResult;
use crate::schema::initialize_record_schema;
use duckdb::Connection;
use phivault_types::{TenantContext, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

/// A connection shared by every session routed to the same database.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// DDL hook run once on every database when it is opened.
pub type SchemaInitializer = fn(&Connection) -> duckdb::Result<()>;

/// Maps tenant contexts to their physical databases.
pub struct ConnectionRegistry {
    config: VaultConfig,
    initializers: Vec<SchemaInitializer>,
    central: SharedConnection,
    tenants: RwLock<HashMap<TenantId, SharedConnection>>,
}

impl ConnectionRegistry {
    /// Opens the central database; tenant databases open on first use.
    pub fn open(config: VaultConfig, extra_schemas: Vec<SchemaInitializer>) -> StorageResult<Self> {
        let mut initializers: Vec<SchemaInitializer> = vec![initialize_record_schema];
        initializers.extend(extra_schemas);

        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir.join("tenants"))?;
        }

        let central = open_database(&config, config.central_db_path().as_deref(), &initializers)?;
        info!(data_dir = ?config.data_dir, "central database opened");

        Ok(Self {
            config,
            initializers,
            central: Arc::new(Mutex::new(central)),
            tenants: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Connection for `ctx`, opening the tenant database if needed.
    pub fn connection(&self, ctx: &TenantContext) -> StorageResult<SharedConnection> {
        let tenant = match ctx {
            TenantContext::Central => return Ok(Arc::clone(&self.central)),
            TenantContext::Tenant(id) => id,
        };

        if let Some(conn) = self
            .tenants
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(tenant)
        {
            return Ok(Arc::clone(conn));
        }

        let mut tenants = self.tenants.write().unwrap_or_else(|p| p.into_inner());
        if let Some(conn) = tenants.get(tenant) {
            return Ok(Arc::clone(conn));
        }

        let conn = open_database(
            &self.config,
            self.config.tenant_db_path(tenant).as_deref(),
            &self.initializers,
        )?;
        info!(tenant = %tenant, "tenant database opened");

        let shared = Arc::new(Mutex::new(conn));
        tenants.insert(tenant.clone(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Tenants whose databases are currently open.
    pub fn open_tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self
            .tenants
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

fn open_database(
    config: &VaultConfig,
    path: Option<&std::path::Path>,
    initializers: &[SchemaInitializer],
) -> StorageResult<Connection> {
    let conn = match path {
        Some(p) => crate::open_duckdb_with_wal_recovery(p, &config.memory_limit, config.threads)?,
        None => Connection::open_in_memory()?,
    };
    for init in initializers {
        init(&conn)?;
    }
    Ok(conn)
}
