//! Request sessions and the tenant router that creates them.

use crate::config::VaultConfig;
use crate::connections::{ConnectionRegistry, SchemaInitializer, SharedConnection};
use crate::error::StorageResult;
use crate::scope::TenantScope;
use phivault_crypto::{
    DerivedKey, FieldPurpose, KeyManagementService, KeyMaterial, KeyMaterialProvider, KmsWorkerPool,
};
use phivault_types::{TenantContext, TenantId};
use std::sync::Arc;
use tracing::warn;

struct RouterInner {
    connections: ConnectionRegistry,
    kms: Arc<dyn KeyManagementService>,
    kms_workers: KmsWorkerPool,
    layer1: Option<DerivedKey>,
}

/// Process-wide entry point: owns the databases and key service and hands
/// out one [`Session`] per request.
#[derive(Clone)]
pub struct TenantRouter {
    inner: Arc<RouterInner>,
}

impl TenantRouter {
    pub fn open(config: VaultConfig, kms: Arc<dyn KeyManagementService>) -> StorageResult<Self> {
        Self::open_with_schemas(config, kms, Vec::new())
    }

    /// Like [`TenantRouter::open`], also running `extra_schemas` on every
    /// database as it is opened.
    pub fn open_with_schemas(
        config: VaultConfig,
        kms: Arc<dyn KeyManagementService>,
        extra_schemas: Vec<SchemaInitializer>,
    ) -> StorageResult<Self> {
        config.validate()?;
        // A missing or malformed key only fails the operations that need it.
        let layer1 = match config.application_key.as_deref().map(DerivedKey::from_base64) {
            Some(Ok(key)) => Some(key),
            Some(Err(e)) => {
                warn!(error = %e, "application key is malformed, key resolution will fail");
                None
            }
            None => None,
        };

        let kms_workers = KmsWorkerPool::new(config.kms_max_workers);
        let connections = ConnectionRegistry::open(config, extra_schemas)?;
        Ok(Self {
            inner: Arc::new(RouterInner {
                connections,
                kms,
                kms_workers,
                layer1,
            }),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        self.inner.connections.config()
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    /// A fresh session with an empty scope and an empty key cache.
    pub fn session(&self) -> Session {
        let keys = KeyMaterialProvider::new(
            self.inner.layer1.clone(),
            Arc::clone(&self.inner.kms),
            self.config().kms_timeout(),
        )
        .with_workers(self.inner.kms_workers.clone());
        Session {
            router: self.clone(),
            scope: TenantScope::new(),
            keys,
        }
    }
}

/// Per-request state: the tenant-context stack and the key cache.
///
/// Not `Sync`; every concurrently running request needs its own session.
pub struct Session {
    router: TenantRouter,
    scope: TenantScope,
    keys: KeyMaterialProvider,
}

impl Session {
    /// Runs `body` with `ctx` as the active context.
    pub fn with_context<R>(&self, ctx: TenantContext, body: impl FnOnce(&Session) -> R) -> R {
        self.scope.with_context(ctx, || body(self))
    }

    pub fn run_as_central<R>(&self, body: impl FnOnce(&Session) -> R) -> R {
        self.with_context(TenantContext::Central, body)
    }

    pub fn run_as_tenant<R>(&self, tenant: &TenantId, body: impl FnOnce(&Session) -> R) -> R {
        self.with_context(TenantContext::tenant(tenant.clone()), body)
    }

    pub fn current(&self) -> StorageResult<TenantContext> {
        self.scope.current()
    }

    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }

    /// Active context together with its database connection.
    pub fn connection(&self) -> StorageResult<(TenantContext, SharedConnection)> {
        let ctx = self.current()?;
        let conn = self.router.connections().connection(&ctx)?;
        Ok((ctx, conn))
    }

    pub fn key_material(&self, ctx: &TenantContext, purpose: FieldPurpose<'_>) -> StorageResult<KeyMaterial> {
        Ok(self.keys.resolve(ctx, purpose)?)
    }

    pub fn keys(&self) -> &KeyMaterialProvider {
        &self.keys
    }

    pub fn router(&self) -> &TenantRouter {
        &self.router
    }
}
