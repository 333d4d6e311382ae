//! Test fixtures
//!
//! Config objects, a simulated second device, and collaborators that
//! record what the sync core asked of them.

use crate::core_config::errors::{SyncError, SyncResult};
use crate::core_config::handlers::{ConfigUpdateHandler, SyncScheduler, UpdateContext};
use crate::core_config::object::{ConfigObject, ConfigObjectFactory};
use crate::core_config::sync_job::{ConfigTransport, StoreResponse};
use crate::core_config::types::SharedConfigMessage;
use crate::core_config::variant::{ConfigVariant, Namespace};
use crate::core_crdt::{LwwConfig, LwwConfigFactory, SecretKey, XChaChaCrypto};
use crate::core_store::WriteTransaction;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Account secret shared by every test device
pub const TEST_SECRET: [u8; 32] = [7u8; 32];

/// Local account public key
pub const TEST_PUBKEY: &str = "05aa11";

pub fn test_factory() -> LwwConfigFactory {
    LwwConfigFactory::new(Arc::new(XChaChaCrypto))
}

/// Fresh config object for `variant`
pub fn test_object(variant: ConfigVariant) -> Box<dyn ConfigObject> {
    Box::new(test_config(variant))
}

pub fn test_config(variant: ConfigVariant) -> LwwConfig {
    LwwConfig::new(variant, SecretKey::from_bytes(&TEST_SECRET).unwrap(), Arc::new(XChaChaCrypto))
}

/// Another device on the same account producing swarm messages
pub struct RemoteDevice {
    configs: HashMap<ConfigVariant, LwwConfig>,
}

impl RemoteDevice {
    pub fn new() -> Self {
        let configs = ConfigVariant::REQUIRED
            .into_iter()
            .map(|variant| (variant, test_config(variant)))
            .collect();
        RemoteDevice { configs }
    }

    pub fn config(&mut self, variant: ConfigVariant) -> &mut LwwConfig {
        self.configs.get_mut(&variant).unwrap()
    }

    pub fn set(&mut self, variant: ConfigVariant, key: &str, value: &[u8]) {
        self.config(variant).set(key, value.to_vec());
    }

    /// Push the current generation, confirm it under `hash` and return it
    /// as a received message
    pub fn publish(&mut self, variant: ConfigVariant, hash: &str, sent_timestamp_ms: i64) -> SharedConfigMessage {
        let config = self.config(variant);
        let push = config.push().unwrap();
        config.confirm_pushed(push.seq_no, hash);
        SharedConfigMessage::received(variant, push.seq_no, push.payload, hash, sent_timestamp_ms)
    }
}

impl Default for RemoteDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// One call to `ConfigUpdateHandler::apply`
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdate {
    pub variant: ConfigVariant,
    pub entries: Vec<(String, Vec<u8>)>,
    pub needs_dump: bool,
    pub latest_sent_timestamp_ms: i64,
}

/// Handler that records every merge it is given
#[derive(Debug, Default)]
pub struct RecordingHandler {
    applied: Mutex<Vec<AppliedUpdate>>,
    fail_on: Mutex<Option<ConfigVariant>>,
}

impl RecordingHandler {
    /// A handler that fails whenever it is handed `variant`
    pub fn failing_on(variant: ConfigVariant) -> Self {
        RecordingHandler { applied: Mutex::new(Vec::new()), fail_on: Mutex::new(Some(variant)) }
    }

    /// Let every later update through
    pub fn recover(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn applied(&self) -> Vec<AppliedUpdate> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_variants(&self) -> Vec<ConfigVariant> {
        self.applied().into_iter().map(|update| update.variant).collect()
    }
}

impl ConfigUpdateHandler for RecordingHandler {
    fn apply(
        &self,
        _tx: &mut WriteTransaction<'_>,
        config: &dyn ConfigObject,
        ctx: &UpdateContext<'_>,
    ) -> SyncResult<()> {
        if *self.fail_on.lock().unwrap() == Some(config.variant()) {
            return Err(SyncError::Handler {
                variant: config.variant(),
                reason: "domain write failed".to_string(),
            });
        }
        self.applied.lock().unwrap().push(AppliedUpdate {
            variant: config.variant(),
            entries: config.entries(),
            needs_dump: ctx.needs_dump,
            latest_sent_timestamp_ms: ctx.latest_sent_timestamp_ms,
        });
        Ok(())
    }
}

/// Scheduler that records every account it was asked to sync
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<String>>,
}

impl RecordingScheduler {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SyncScheduler for RecordingScheduler {
    fn enqueue_sync(&self, public_key: &str) {
        self.calls.lock().unwrap().push(public_key.to_string());
    }
}

/// In-memory swarm
#[derive(Debug, Default)]
pub struct MockTransport {
    stored: Mutex<Vec<(Namespace, SharedConfigMessage, String)>>,
    deleted: Mutex<Vec<String>>,
    failing: Mutex<HashSet<ConfigVariant>>,
    delay: Option<Duration>,
    next_hash: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every store call sleeps for `delay` first
    pub fn with_delay(delay: Duration) -> Self {
        MockTransport { delay: Some(delay), ..Self::default() }
    }

    pub fn fail_variant(&self, variant: ConfigVariant) {
        self.failing.lock().unwrap().insert(variant);
    }

    pub fn recover_variant(&self, variant: ConfigVariant) {
        self.failing.lock().unwrap().remove(&variant);
    }

    /// `(namespace, message, assigned hash)` for every stored message
    pub fn stored(&self) -> Vec<(Namespace, SharedConfigMessage, String)> {
        self.stored.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigTransport for MockTransport {
    async fn store(
        &self,
        _public_key: &str,
        namespace: Namespace,
        message: &SharedConfigMessage,
    ) -> SyncResult<StoreResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&message.kind) {
            return Err(SyncError::Transport("swarm unreachable".to_string()));
        }
        let hash = format!("stored-{}", self.next_hash.fetch_add(1, Ordering::SeqCst));
        self.stored.lock().unwrap().push((namespace, message.clone(), hash.clone()));
        Ok(StoreResponse { hash })
    }

    async fn delete(&self, _public_key: &str, hashes: &[String]) -> SyncResult<()> {
        self.deleted.lock().unwrap().extend(hashes.iter().cloned());
        Ok(())
    }
}

/// Factory whose objects fail to load from any dump
pub struct RejectingDumpFactory;

impl ConfigObjectFactory for RejectingDumpFactory {
    fn init(
        &self,
        variant: ConfigVariant,
        secret_key: &[u8],
        dump: Option<&[u8]>,
    ) -> SyncResult<Box<dyn ConfigObject>> {
        match dump {
            Some(_) => Err(SyncError::library(variant, "init", "unreadable dump")),
            None => test_factory().init(variant, secret_key, None),
        }
    }
}
