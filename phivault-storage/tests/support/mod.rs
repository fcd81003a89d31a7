//! Shared fixtures and test doubles for storage tests.

#![allow(dead_code)]

use phivault_crypto::{
    BlindIndexer, CryptoError, CryptoResult, DataKey, DerivedKey, Digest, HmacBlindIndexer,
    KeyManagementService, KeyMaterial, KmsError, KmsResult, LocalKms, Normalization,
};
use phivault_model::default_registry;
use phivault_storage::{EncryptedRepository, TenantRouter, VaultConfig};
use phivault_types::TenantId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::EnvFilter;

/// Base64 of bytes 0x01..=0x20.
pub const APP_KEY: &str = "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyA=";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn router() -> TenantRouter {
    router_with_kms(Arc::new(LocalKms::generate()))
}

pub fn router_with_kms(kms: Arc<dyn KeyManagementService>) -> TenantRouter {
    router_with_config(VaultConfig::in_memory(APP_KEY), kms)
}

pub fn router_with_config(config: VaultConfig, kms: Arc<dyn KeyManagementService>) -> TenantRouter {
    TenantRouter::open(config, kms).expect("open router")
}

pub fn repository() -> EncryptedRepository {
    EncryptedRepository::new(Arc::new(default_registry().expect("default registry")))
}

pub fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).expect("valid tenant id")
}

/// KMS that is never reachable.
pub struct UnreachableKms;

impl KeyManagementService for UnreachableKms {
    fn generate_data_key(&self, _scope: &str) -> KmsResult<DataKey> {
        Err(KmsError::Unreachable("connection refused".into()))
    }

    fn unwrap_data_key(&self, _key_id: &str, _wrapped: &[u8], _scope: &str) -> KmsResult<DerivedKey> {
        Err(KmsError::Unreachable("connection refused".into()))
    }
}

/// Indexer that maps every value to the same digest.
pub struct ConstantDigestIndexer;

impl BlindIndexer for ConstantDigestIndexer {
    fn compute(
        &self,
        _plaintext: &str,
        _key: &KeyMaterial,
        _index_name: &str,
        _normalization: Normalization,
    ) -> CryptoResult<Digest> {
        Ok(Digest::from_bytes([0x42; 16]))
    }
}

/// Indexer that fails for one index and delegates to HMAC otherwise.
pub struct FailingIndexer {
    pub fail_on: &'static str,
}

impl BlindIndexer for FailingIndexer {
    fn compute(
        &self,
        plaintext: &str,
        key: &KeyMaterial,
        index_name: &str,
        normalization: Normalization,
    ) -> CryptoResult<Digest> {
        if index_name == self.fail_on {
            return Err(CryptoError::KeyUnavailable(format!("index key for {index_name} unavailable")));
        }
        HmacBlindIndexer.compute(plaintext, key, index_name, normalization)
    }
}

/// One tracing event seen by [`EventCapture`].
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub target: String,
    pub level: Level,
    pub fields: BTreeMap<String, String>,
}

/// Layer that records every event emitted while [`EventCapture::run`] is on
/// the stack.
#[derive(Clone, Default)]
pub struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    pub fn run<T>(&self, body: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::with_default(subscriber, body)
    }

    pub fn with_target(&self, target: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .expect("capture lock")
            .iter()
            .filter(|event| event.target == target)
            .cloned()
            .collect()
    }
}

struct FieldRecorder<'a>(&'a mut BTreeMap<String, String>);

impl Visit for FieldRecorder<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();
        event.record(&mut FieldRecorder(&mut fields));
        self.events.lock().expect("capture lock").push(CapturedEvent {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            fields,
        });
    }
}
