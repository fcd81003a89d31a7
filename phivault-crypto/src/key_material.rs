//! Resolution and request-scoped caching of the two key layers.
//!
//! A [`KeyMaterialProvider`] belongs to exactly one request. Its cache is
//! bucketed by [`TenantContext`] and lives in a `RefCell`, which makes the
//! provider `!Sync`: it cannot be shared between concurrently running
//! requests.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use crate::kms::{KeyManagementService, KmsResult};
use phivault_types::TenantContext;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reference to a wrapped layer-2 key, as carried inside an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Layer2Ref {
    pub key_id: String,
    pub wrapped_dek: Vec<u8>,
}

/// Unwrapped layer-2 key together with the reference it came from.
#[derive(Clone, Debug)]
pub struct Layer2Handle {
    pub(crate) key_ref: Layer2Ref,
    pub(crate) dek: DerivedKey,
}

impl Layer2Handle {
    pub fn key_id(&self) -> &str {
        &self.key_ref.key_id
    }

    pub fn key_ref(&self) -> &Layer2Ref {
        &self.key_ref
    }
}

/// Both key layers for one operation.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    pub(crate) layer1: DerivedKey,
    pub(crate) layer2: Layer2Handle,
}

impl KeyMaterial {
    /// Assembles key material directly. Intended for tests and tools that
    /// manage keys outside a provider.
    pub fn new(layer1: DerivedKey, key_ref: Layer2Ref, dek: DerivedKey) -> Self {
        Self {
            layer1,
            layer2: Layer2Handle { key_ref, dek },
        }
    }

    pub fn layer1(&self) -> &DerivedKey {
        &self.layer1
    }

    pub fn layer2(&self) -> &Layer2Handle {
        &self.layer2
    }
}

/// What the key material is needed for.
#[derive(Clone, Copy, Debug)]
pub enum FieldPurpose<'a> {
    /// Encrypting new values: uses the context's active DEK, minting one on
    /// first use.
    Write,
    /// Computing blind indexes. Resolves the same material as `Write`, so a
    /// record is either fully encryptable and indexable or not at all.
    Index,
    /// Decrypting a stored value sealed under the referenced DEK.
    Read(&'a Layer2Ref),
}

/// Default cap on KMS worker threads alive at once.
pub const DEFAULT_MAX_KMS_WORKERS: usize = 16;

/// Caps the worker threads used for KMS calls.
///
/// A timed-out call cannot be cancelled, so its worker keeps running until
/// the KMS answers. Once `limit` workers are alive, further calls fail with
/// `KeyUnavailable` instead of spawning another thread. Clones share the
/// same count.
#[derive(Clone, Debug)]
pub struct KmsWorkerPool {
    live: Arc<AtomicUsize>,
    limit: usize,
}

impl KmsWorkerPool {
    pub fn new(limit: usize) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            limit: limit.max(1),
        }
    }

    /// Workers currently running, including ones whose caller timed out.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn reserve(&self) -> Option<WorkerSlot> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.limit).then_some(live + 1)
            })
            .ok()
            .map(|_| WorkerSlot(Arc::clone(&self.live)))
    }

    /// Runs one KMS call on a worker thread and waits at most `timeout`.
    ///
    /// Failures and timeouts both surface as `KeyUnavailable`; nothing is
    /// retried here.
    fn call<T, F>(&self, timeout: Duration, op: &'static str, call: F) -> CryptoResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> KmsResult<T> + Send + 'static,
    {
        let slot = self.reserve().ok_or_else(|| {
            warn!(op, limit = self.limit, "kms worker limit reached");
            CryptoError::KeyUnavailable(format!(
                "{op}: {} kms calls still pending",
                self.limit
            ))
        })?;

        let (tx, rx) = mpsc::sync_channel(1);
        std::thread::Builder::new()
            .name("phivault-kms".to_string())
            .spawn(move || {
                let _slot = slot;
                let _ = tx.send(call());
            })
            .map_err(|e| CryptoError::KeyUnavailable(format!("{op}: cannot start kms worker: {e}")))?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CryptoError::KeyUnavailable(format!("{op}: {e}"))),
            Err(RecvTimeoutError::Timeout) => {
                warn!(op, timeout_ms = timeout.as_millis() as u64, "kms call timed out");
                Err(CryptoError::KeyUnavailable(format!(
                    "{op} timed out after {}ms",
                    timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(CryptoError::KeyUnavailable(format!(
                "{op}: kms worker exited without a result"
            ))),
        }
    }
}

impl Default for KmsWorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KMS_WORKERS)
    }
}

/// Releases a worker reservation when the worker finishes, even by panic.
struct WorkerSlot(Arc<AtomicUsize>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ContextKeys {
    active: Option<Layer2Handle>,
    unwrapped: HashMap<Layer2Ref, DerivedKey>,
}

/// Resolves [`KeyMaterial`] for a tenant context.
pub struct KeyMaterialProvider {
    layer1: Option<DerivedKey>,
    kms: Arc<dyn KeyManagementService>,
    kms_timeout: Duration,
    workers: KmsWorkerPool,
    cache: RefCell<HashMap<TenantContext, ContextKeys>>,
}

impl KeyMaterialProvider {
    /// `layer1` is the process-held application key; `None` means it was not
    /// configured and every resolution fails with `KeyUnavailable`.
    pub fn new(
        layer1: Option<DerivedKey>,
        kms: Arc<dyn KeyManagementService>,
        kms_timeout: Duration,
    ) -> Self {
        Self {
            layer1,
            kms,
            kms_timeout,
            workers: KmsWorkerPool::default(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Shares a worker pool, so the cap holds across providers.
    pub fn with_workers(mut self, workers: KmsWorkerPool) -> Self {
        self.workers = workers;
        self
    }

    pub fn resolve(&self, ctx: &TenantContext, purpose: FieldPurpose<'_>) -> CryptoResult<KeyMaterial> {
        let layer1 = self
            .layer1
            .clone()
            .ok_or_else(|| CryptoError::KeyUnavailable("application key not configured".to_string()))?;

        let layer2 = match purpose {
            FieldPurpose::Write | FieldPurpose::Index => self.active_handle(ctx)?,
            FieldPurpose::Read(key_ref) => self.unwrapped_handle(ctx, key_ref)?,
        };

        Ok(KeyMaterial { layer1, layer2 })
    }

    /// Drops all cached material for `ctx`.
    pub fn purge(&self, ctx: &TenantContext) {
        if self.cache.borrow_mut().remove(ctx).is_some() {
            debug!(context = %ctx, "purged cached key material");
        }
    }

    /// Number of contexts with cached material.
    pub fn cached_contexts(&self) -> usize {
        self.cache.borrow().len()
    }

    fn active_handle(&self, ctx: &TenantContext) -> CryptoResult<Layer2Handle> {
        if let Some(handle) = self
            .cache
            .borrow()
            .get(ctx)
            .and_then(|keys| keys.active.clone())
        {
            return Ok(handle);
        }

        let kms = Arc::clone(&self.kms);
        let scope = ctx.label();
        let data_key = self.workers.call(self.kms_timeout, "generate_data_key", move || {
            kms.generate_data_key(&scope)
        })?;

        let key_ref = Layer2Ref {
            key_id: data_key.key_id,
            wrapped_dek: data_key.wrapped,
        };
        let handle = Layer2Handle {
            key_ref: key_ref.clone(),
            dek: data_key.plaintext,
        };
        debug!(context = %ctx, key_id = %key_ref.key_id, "minted data key");

        let mut cache = self.cache.borrow_mut();
        let keys = cache.entry(ctx.clone()).or_default();
        keys.unwrapped.insert(key_ref, handle.dek.clone());
        keys.active = Some(handle.clone());
        Ok(handle)
    }

    fn unwrapped_handle(&self, ctx: &TenantContext, key_ref: &Layer2Ref) -> CryptoResult<Layer2Handle> {
        if let Some(dek) = self
            .cache
            .borrow()
            .get(ctx)
            .and_then(|keys| keys.unwrapped.get(key_ref).cloned())
        {
            return Ok(Layer2Handle {
                key_ref: key_ref.clone(),
                dek,
            });
        }

        let kms = Arc::clone(&self.kms);
        let scope = ctx.label();
        let key_id = key_ref.key_id.clone();
        let wrapped = key_ref.wrapped_dek.clone();
        let dek = self.workers.call(self.kms_timeout, "unwrap_data_key", move || {
            kms.unwrap_data_key(&key_id, &wrapped, &scope)
        })?;

        self.cache
            .borrow_mut()
            .entry(ctx.clone())
            .or_default()
            .unwrapped
            .insert(key_ref.clone(), dek.clone());

        Ok(Layer2Handle {
            key_ref: key_ref.clone(),
            dek,
        })
    }
}
