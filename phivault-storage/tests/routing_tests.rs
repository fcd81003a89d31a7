mod support;

use phivault_crypto::{KeyManagementService, LocalKms};
use phivault_model::{CentralPatient, EncryptedModel, Patient};
use phivault_storage::{StorageError, TenantRouter, VaultConfig};
use phivault_types::{ExternalRef, TenantContext};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{repository, router, tenant, APP_KEY};

#[test]
fn tenants_do_not_see_each_other() -> anyhow::Result<()> {
    let router = router();
    let repo = repository();
    let session = router.session();

    let mut patient = Patient::new("Jane", "Doe");
    patient.health_number = Some("HC123456".into());

    session.run_as_tenant(&tenant("clinic-a"), |s| repo.save_model(s, &patient))?;

    session.run_as_tenant(&tenant("clinic-b"), |s| -> anyhow::Result<()> {
        assert!(repo.load(s, "patient", &patient.id)?.is_none());
        assert!(repo.find_by_index(s, "patient", "health_number_index", "HC123456")?.is_empty());
        assert_eq!(repo.count(s, "patient")?, 0);
        Ok(())
    })?;

    session.run_as_central(|s| -> anyhow::Result<()> {
        assert_eq!(repo.count(s, "patient")?, 0);
        Ok(())
    })?;

    assert_eq!(
        router.connections().open_tenants(),
        vec![tenant("clinic-a"), tenant("clinic-b")]
    );
    Ok(())
}

#[test]
fn nested_contexts_route_to_the_innermost_database() -> anyhow::Result<()> {
    let router = router();
    let repo = repository();
    let session = router.session();

    session.run_as_tenant(&tenant("clinic-a"), |s| -> anyhow::Result<()> {
        repo.save_model(s, &Patient::new("Outer", "Tenant"))?;

        s.run_as_central(|s| -> anyhow::Result<()> {
            assert_eq!(s.current()?, TenantContext::Central);
            assert_eq!(repo.count(s, "patient")?, 0);
            Ok(())
        })?;

        assert_eq!(s.current()?, TenantContext::tenant(tenant("clinic-a")));
        assert_eq!(repo.count(s, "patient")?, 1);
        Ok(())
    })?;

    assert!(matches!(session.current(), Err(StorageError::NoTenantContext)));
    Ok(())
}

#[test]
fn error_inside_scope_restores_outer_context() {
    let router = router();
    let repo = repository();
    let session = router.session();

    session.run_as_central(|s| {
        let result = s.run_as_tenant(&tenant("clinic-a"), |s| {
            repo.save(s, &phivault_model::Record::new("nope"))
        });
        assert!(result.is_err());
        assert_eq!(s.current().ok(), Some(TenantContext::Central));
    });
}

#[test]
fn central_and_tenant_rows_link_by_reference() -> anyhow::Result<()> {
    support::init_tracing();
    let router = router();
    let repo = repository();
    let session = router.session();
    let clinic = tenant("clinic-a");

    let mut full = Patient::new("Jane", "Doe");
    full.health_number = Some("HC123456".into());
    let central = CentralPatient {
        id: phivault_types::RecordId::new(),
        first_name: "Jane".into(),
        last_name: "Doe".into(),
        email: Some("jane@example.com".into()),
        health_number: Some("HC123456".into()),
        tenant_ref: Some(ExternalRef::tenant(clinic.clone(), full.id)),
    };
    full.central_ref = Some(ExternalRef::central(central.id));

    session.run_as_central(|s| repo.save_model(s, &central))?;
    session.run_as_tenant(&clinic, |s| repo.save_model(s, &full))?;

    let linked = session.run_as_central(|s| {
        repo.find_by_external_ref(s, CentralPatient::ENTITY_TYPE, &ExternalRef::tenant(clinic.clone(), full.id))
    })?;
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, central.id);

    let back = session.run_as_tenant(&clinic, |s| {
        repo.find_by_external_ref(s, Patient::ENTITY_TYPE, &ExternalRef::central(central.id))
    })?;
    assert_eq!(back.len(), 1);
    assert_eq!(Patient::from_record(&back[0])?, full);
    Ok(())
}

#[test]
fn tenant_named_central_does_not_match_central_links() -> anyhow::Result<()> {
    let router = router();
    let repo = repository();
    let session = router.session();
    let linked_id = phivault_types::RecordId::new();

    let mut via_central = Patient::new("Jane", "Doe");
    via_central.central_ref = Some(ExternalRef::central(linked_id));
    let mut via_tenant = Patient::new("John", "Roe");
    via_tenant.central_ref = Some(ExternalRef::tenant(tenant("central"), linked_id));

    session.run_as_tenant(&tenant("clinic-a"), |s| -> anyhow::Result<()> {
        repo.save_model(s, &via_central)?;
        repo.save_model(s, &via_tenant)?;

        let central_hits = repo.find_by_external_ref(s, Patient::ENTITY_TYPE, &ExternalRef::central(linked_id))?;
        assert_eq!(central_hits.len(), 1);
        assert_eq!(central_hits[0].id, via_central.id);

        let tenant_hits = repo.find_by_external_ref(
            s,
            Patient::ENTITY_TYPE,
            &ExternalRef::tenant(tenant("central"), linked_id),
        )?;
        assert_eq!(tenant_hits.len(), 1);
        assert_eq!(tenant_hits[0].id, via_tenant.id);
        Ok(())
    })?;
    Ok(())
}

#[test]
fn key_material_is_cached_per_context() -> anyhow::Result<()> {
    let router = router();
    let repo = repository();
    let session = router.session();

    session.run_as_tenant(&tenant("clinic-a"), |s| repo.save_model(s, &Patient::new("A", "B")))?;
    session.run_as_tenant(&tenant("clinic-b"), |s| repo.save_model(s, &Patient::new("C", "D")))?;
    assert_eq!(session.keys().cached_contexts(), 2);

    session.keys().purge(&TenantContext::tenant(tenant("clinic-a")));
    assert_eq!(session.keys().cached_contexts(), 1);
    Ok(())
}

#[test]
fn records_written_by_one_session_are_readable_by_another() -> anyhow::Result<()> {
    let router = router();
    let repo = repository();
    let patient = Patient::new("Jane", "Doe");

    router
        .session()
        .run_as_tenant(&tenant("clinic-a"), |s| repo.save_model(s, &patient))?;

    let fresh = router.session();
    let loaded: Option<Patient> = fresh.run_as_tenant(&tenant("clinic-a"), |s| repo.load_model(s, &patient.id))?;
    assert_eq!(loaded, Some(patient));
    Ok(())
}

#[test]
fn missing_application_key_is_key_unavailable() {
    let router = TenantRouter::open(VaultConfig::default(), Arc::new(LocalKms::generate())).unwrap();
    let repo = repository();
    let session = router.session();

    let err = session
        .run_as_tenant(&tenant("clinic-a"), |s| repo.save_model(s, &Patient::new("A", "B")))
        .unwrap_err();
    assert!(matches!(err, StorageError::KeyUnavailable(_)));
}

#[test]
fn malformed_application_key_is_key_unavailable() {
    let router = TenantRouter::open(VaultConfig::in_memory("not base64!"), Arc::new(LocalKms::generate())).unwrap();
    let repo = repository();
    let session = router.session();

    let err = session
        .run_as_central(|s| repo.save_model(s, &Patient::new("A", "B")))
        .unwrap_err();
    assert!(matches!(err, StorageError::KeyUnavailable(_)));
}

#[test]
fn file_backed_databases_survive_reopen() -> anyhow::Result<()> {
    support::init_tracing();
    let dir = tempfile::tempdir()?;
    let kms: Arc<dyn KeyManagementService> = Arc::new(LocalKms::generate());
    let config = VaultConfig {
        data_dir: Some(dir.path().to_path_buf()),
        application_key: Some(APP_KEY.to_string()),
        ..VaultConfig::default()
    };
    let repo = repository();
    let mut patient = Patient::new("Jane", "Doe");
    patient.health_number = Some("HC123456".into());

    {
        let router = TenantRouter::open(config.clone(), Arc::clone(&kms))?;
        router
            .session()
            .run_as_tenant(&tenant("clinic-a"), |s| repo.save_model(s, &patient))?;
    }

    assert!(dir.path().join("central.duckdb").exists());
    assert!(dir.path().join("tenants").join("clinic-a.duckdb").exists());

    let router = TenantRouter::open(config, kms)?;
    let found: Vec<Patient> = router.session().run_as_tenant(&tenant("clinic-a"), |s| {
        repo.find_models(s, "health_number_index", "HC123456")
    })?;
    assert_eq!(found, vec![patient]);
    Ok(())
}

#[test]
fn rotated_kms_still_reads_old_rows() -> anyhow::Result<()> {
    let kms = Arc::new(LocalKms::generate());
    let router = support::router_with_kms(kms.clone());
    let repo = repository();
    let old = Patient::new("Old", "Key");

    router
        .session()
        .run_as_tenant(&tenant("clinic-a"), |s| repo.save_model(s, &old))?;
    kms.rotate();

    let session = router.session();
    let new = Patient::new("New", "Key");
    session.run_as_tenant(&tenant("clinic-a"), |s| -> anyhow::Result<()> {
        repo.save_model(s, &new)?;
        assert_eq!(repo.load_model::<Patient>(s, &old.id)?, Some(old.clone()));
        assert_eq!(repo.load_model::<Patient>(s, &new.id)?, Some(new.clone()));
        Ok(())
    })?;
    Ok(())
}
