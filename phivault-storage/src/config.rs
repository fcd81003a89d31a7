//! Storage and key configuration.

use crate::error::{StorageError, StorageResult};
use phivault_crypto::DEFAULT_MAX_KMS_WORKERS;
use phivault_types::TenantId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the tenant router and repository.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding the central database and `tenants/<id>.duckdb`.
    /// `None` keeps every database in memory.
    pub data_dir: Option<PathBuf>,

    /// File name of the central database inside `data_dir`.
    pub central_db_name: String,

    /// DuckDB memory cap per database.
    pub memory_limit: String,

    /// DuckDB worker threads per database.
    pub threads: u32,

    /// Upper bound on each key-management call.
    pub kms_timeout_ms: u64,

    /// KMS worker threads allowed at once across all sessions. Calls that
    /// timed out keep their worker until the KMS answers.
    pub kms_max_workers: usize,

    /// Candidate count above which an index lookup logs a collision warning.
    pub collision_warn_threshold: usize,

    /// Base64 layer-1 application key (32 bytes).
    pub application_key: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            central_db_name: "central.duckdb".to_string(),
            memory_limit: "256MB".to_string(),
            threads: 2,
            kms_timeout_ms: 3_000,
            kms_max_workers: DEFAULT_MAX_KMS_WORKERS,
            collision_warn_threshold: 8,
            application_key: None,
        }
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("data_dir", &self.data_dir)
            .field("central_db_name", &self.central_db_name)
            .field("memory_limit", &self.memory_limit)
            .field("threads", &self.threads)
            .field("kms_timeout_ms", &self.kms_timeout_ms)
            .field("kms_max_workers", &self.kms_max_workers)
            .field("collision_warn_threshold", &self.collision_warn_threshold)
            .field(
                "application_key",
                &self.application_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl VaultConfig {
    /// In-memory configuration with the given base64 application key.
    pub fn in_memory(application_key: &str) -> Self {
        Self {
            application_key: Some(application_key.to_string()),
            ..Self::default()
        }
    }

    /// Reads a JSON configuration file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> StorageResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `PHIVAULT_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> StorageResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> StorageResult<Self> {
        if let Some(dir) = lookup("PHIVAULT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(key) = lookup("PHIVAULT_APPLICATION_KEY") {
            self.application_key = Some(key);
        }
        if let Some(raw) = lookup("PHIVAULT_KMS_TIMEOUT_MS") {
            self.kms_timeout_ms = raw.parse().map_err(|e| {
                StorageError::Config(format!("PHIVAULT_KMS_TIMEOUT_MS={raw}: {e}"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.kms_timeout_ms == 0 {
            return Err(StorageError::Config("kms_timeout_ms must be positive".into()));
        }
        if self.kms_max_workers == 0 {
            return Err(StorageError::Config("kms_max_workers must be positive".into()));
        }
        if self.threads == 0 {
            return Err(StorageError::Config("threads must be positive".into()));
        }
        if self.central_db_name.is_empty() {
            return Err(StorageError::Config("central_db_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn kms_timeout(&self) -> Duration {
        Duration::from_millis(self.kms_timeout_ms)
    }

    pub fn central_db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join(&self.central_db_name))
    }

    pub fn tenant_db_path(&self, tenant: &TenantId) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|d| d.join("tenants").join(format!("{tenant}.duckdb")))
    }
}
