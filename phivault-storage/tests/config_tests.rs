use phivault_storage::{StorageError, VaultConfig};
use phivault_types::TenantId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn defaults_are_in_memory() {
    let config = VaultConfig::default();
    assert!(config.data_dir.is_none());
    assert!(config.central_db_path().is_none());
    assert!(config.application_key.is_none());
    assert_eq!(config.central_db_name, "central.duckdb");
}

#[test]
fn default_kms_timeout() {
    let config = VaultConfig::default();
    assert_eq!(config.kms_timeout(), Duration::from_millis(3_000));
}

#[test]
fn default_collision_threshold() {
    assert_eq!(VaultConfig::default().collision_warn_threshold, 8);
}

#[test]
fn kms_worker_cap_defaults_and_must_be_positive() {
    assert_eq!(VaultConfig::default().kms_max_workers, 16);

    let config = VaultConfig {
        kms_max_workers: 0,
        ..VaultConfig::default()
    };
    assert!(matches!(config.validate(), Err(StorageError::Config(msg)) if msg.contains("kms_max_workers")));
}

#[test]
fn database_paths() {
    let config = VaultConfig {
        data_dir: Some(PathBuf::from("/var/lib/phivault")),
        ..VaultConfig::default()
    };
    let clinic = TenantId::parse("clinic-7").unwrap();
    assert_eq!(
        config.central_db_path(),
        Some(PathBuf::from("/var/lib/phivault/central.duckdb"))
    );
    assert_eq!(
        config.tenant_db_path(&clinic),
        Some(PathBuf::from("/var/lib/phivault/tenants/clinic-7.duckdb"))
    );
}

#[test]
fn debug_redacts_application_key() {
    let config = VaultConfig::in_memory("c2VjcmV0LWtleS1tYXRlcmlhbA==");
    let rendered = format!("{config:?}");
    assert!(rendered.contains("[REDACTED]"));
    assert!(!rendered.contains("c2VjcmV0"));
}

#[test]
fn json_file_fills_missing_keys_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.json");
    std::fs::write(&path, r#"{"kms_timeout_ms": 500, "threads": 4}"#).unwrap();

    let config = VaultConfig::from_json_file(&path).unwrap();
    assert_eq!(config.kms_timeout_ms, 500);
    assert_eq!(config.threads, 4);
    assert_eq!(config.memory_limit, "256MB");
}

#[test]
fn json_file_rejects_zero_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.json");
    std::fs::write(&path, r#"{"kms_timeout_ms": 0}"#).unwrap();

    let err = VaultConfig::from_json_file(&path).unwrap_err();
    assert!(matches!(err, StorageError::Config(_)));
}

#[test]
fn missing_json_file_is_io_error() {
    let err = VaultConfig::from_json_file(std::path::Path::new("/nonexistent/vault.json")).unwrap_err();
    assert!(matches!(err, StorageError::Io(_)));
}

#[test]
fn overrides_apply() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("PHIVAULT_DATA_DIR", "/srv/vault"),
        ("PHIVAULT_APPLICATION_KEY", "a2V5"),
        ("PHIVAULT_KMS_TIMEOUT_MS", "1200"),
    ]);
    let config = VaultConfig::default()
        .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(config.data_dir, Some(PathBuf::from("/srv/vault")));
    assert_eq!(config.application_key.as_deref(), Some("a2V5"));
    assert_eq!(config.kms_timeout_ms, 1200);
}

#[test]
fn unparseable_timeout_override_is_config_error() {
    let err = VaultConfig::default()
        .with_overrides(|name| (name == "PHIVAULT_KMS_TIMEOUT_MS").then(|| "soon".to_string()))
        .unwrap_err();
    assert!(matches!(err, StorageError::Config(ref msg) if msg.contains("PHIVAULT_KMS_TIMEOUT_MS")));
}

#[test]
fn serialization_roundtrip() {
    let config = VaultConfig {
        data_dir: Some(PathBuf::from("/data")),
        threads: 8,
        ..VaultConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: VaultConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.data_dir, config.data_dir);
    assert_eq!(back.threads, 8);
}
