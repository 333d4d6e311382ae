/*
    coordinator.rs - ConfigSync facade

    Owns the registry for the logged-in session together with the
    collaborators every sync path needs. Constructed at login and
    dropped (or cleared) at logout.
*/

use crate::core_config::dump::create_dump;
use crate::core_config::errors::SyncResult;
use crate::core_config::handlers::{
    schedule_sync, HandlerTable, IdentityProvider, NoopScheduler, SyncScheduler,
};
use crate::core_config::incoming::{self, MergeOutcome, MergeTargets};
use crate::core_config::interceptor::{self, LocalMutation};
use crate::core_config::loader;
use crate::core_config::object::{ConfigObject, ConfigObjectFactory};
use crate::core_config::outgoing;
use crate::core_config::registry::ConfigRegistry;
use crate::core_config::types::{now_ms, ConfigDump, OutgoingConfResult, SharedConfigMessage};
use crate::core_config::variant::ConfigVariant;
use crate::core_store::{dumps, ConfigDumpStore, WriteTransaction};
use crate::metrics::{SyncStats, SyncStatsSnapshot};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// In-memory state of one loaded config, for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantStatus {
    pub variant: ConfigVariant,
    pub needs_push: bool,
    pub needs_dump: bool,
    pub hashes: Vec<String>,
}

/// Entry point to the config sync core
pub struct ConfigSync {
    registry: ConfigRegistry,
    factory: Arc<dyn ConfigObjectFactory>,
    store: ConfigDumpStore,
    handlers: HandlerTable,
    scheduler: Arc<dyn SyncScheduler>,
    identity: Arc<dyn IdentityProvider>,
    stats: SyncStats,
}

impl ConfigSync {
    pub fn new(
        store: ConfigDumpStore,
        factory: Arc<dyn ConfigObjectFactory>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        ConfigSync {
            registry: ConfigRegistry::new(),
            factory,
            store,
            handlers: HandlerTable::default(),
            scheduler: Arc::new(NoopScheduler),
            identity,
            stats: SyncStats::new(),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn SyncScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn store(&self) -> &ConfigDumpStore {
        &self.store
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    fn targets(&self) -> MergeTargets<'_> {
        MergeTargets {
            registry: &self.registry,
            handlers: &self.handlers,
            scheduler: &self.scheduler,
        }
    }

    /// Restore the account's configs from their dumps
    pub fn load_state(
        &self,
        public_key: &str,
        secret_key: Option<&[u8]>,
    ) -> SyncResult<Vec<ConfigVariant>> {
        self.store.read(|conn| {
            loader::load_state(conn, &self.registry, self.factory.as_ref(), public_key, secret_key)
        })
    }

    pub fn pending_changes(
        &self,
        conn: &Connection,
        public_key: &str,
    ) -> SyncResult<Vec<OutgoingConfResult>> {
        let pending =
            outgoing::pending_changes(conn, &self.registry, self.identity.as_ref(), public_key)?;
        for _ in &pending {
            self.stats.record_push_generated();
        }
        Ok(pending)
    }

    pub fn handle_config_messages(
        &self,
        tx: &mut WriteTransaction<'_>,
        messages: &[SharedConfigMessage],
        public_key: &str,
    ) -> SyncResult<Vec<MergeOutcome>> {
        let outcomes = incoming::handle_config_messages(tx, &self.targets(), messages, public_key)?;
        for outcome in &outcomes {
            self.stats.record_merge(outcome.received, outcome.result.message_hashes.len());
            if outcome.result.needs_dump {
                self.stats.record_dump();
            }
        }
        Ok(outcomes)
    }

    pub fn marking_as_pushed(
        &self,
        message: &SharedConfigMessage,
        server_hash: &str,
        public_key: &str,
    ) -> SyncResult<Option<ConfigDump>> {
        let Some(confirmation) =
            outgoing::marking_as_pushed(&self.registry, message, server_hash, public_key)?
        else {
            return Ok(None);
        };
        if confirmation.applied {
            self.stats.record_push_confirmed();
        }
        if confirmation.dump.is_some() {
            self.stats.record_dump();
        }
        Ok(confirmation.dump)
    }

    /// Every server hash currently backing the account's configs
    pub fn config_hashes(&self, public_key: &str) -> SyncResult<Vec<String>> {
        let mut hashes = Vec::new();
        for variant in self.registry.variants_for(public_key)? {
            if let Some(current) = self.registry.mutate(variant, public_key, |config| config.current_hashes())? {
                hashes.extend(current);
            }
        }
        Ok(hashes)
    }

    /// True if any loaded config has unpushed changes
    pub fn needs_sync(&self) -> SyncResult<bool> {
        for handle in self.registry.handles()? {
            if handle.mutate(|config| config.needs_push())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn status(&self, public_key: &str) -> SyncResult<Vec<VariantStatus>> {
        let mut statuses = Vec::new();
        for variant in self.registry.variants_for(public_key)? {
            let status = self.registry.mutate(variant, public_key, |config| VariantStatus {
                variant,
                needs_push: config.needs_push(),
                needs_dump: config.needs_dump(),
                hashes: config.current_hashes(),
            })?;
            statuses.extend(status);
        }
        Ok(statuses)
    }

    /// Logout: drop every loaded config
    pub fn clear_memory_state(&self) -> SyncResult<()> {
        self.registry.clear()?;
        info!("Cleared config memory state");
        Ok(())
    }

    /// Drop an account's configs from memory and its dumps from storage
    pub fn remove_account(&self, tx: &mut WriteTransaction<'_>, public_key: &str) -> SyncResult<usize> {
        let unloaded = self.registry.remove_account(public_key)?;
        let removed = dumps::remove_all(tx, public_key)?;
        info!(public_key, unloaded, removed, "Removed account config state");
        Ok(removed)
    }

    /// Apply a local mutation to one config.
    ///
    /// Persists a dump if the mutation left unsaved state and schedules a
    /// sync if it left unpushed changes. Returns `None` when the config is
    /// not loaded.
    pub fn mutate_config<R>(
        &self,
        tx: &mut WriteTransaction<'_>,
        variant: ConfigVariant,
        public_key: &str,
        body: impl FnOnce(&mut dyn ConfigObject) -> R,
    ) -> SyncResult<Option<R>> {
        let Some(handle) = self.registry.get(variant, public_key)? else {
            return Ok(None);
        };
        handle.checkpoint(tx)?;

        let (value, needs_push) = handle.mutate(|config| -> SyncResult<(R, bool)> {
            let value = body(&mut *config);
            if let Some(dump) = create_dump(Some(&mut *config), variant, public_key, now_ms())? {
                dumps::upsert(tx, &dump)?;
                self.stats.record_dump();
            }
            Ok((value, config.needs_push()))
        })??;

        if needs_push {
            schedule_sync(tx, &self.scheduler, public_key);
        }
        Ok(Some(value))
    }

    /// Feed local database writes through the synced-settings filter
    pub fn intercept(
        &self,
        tx: &mut WriteTransaction<'_>,
        mutations: &[LocalMutation],
    ) -> SyncResult<bool> {
        let Some(local_key) = self.identity.local_public_key() else {
            return Ok(false);
        };
        let outcome = interceptor::intercept(tx, &self.targets(), &local_key, mutations)?;
        for _ in 0..outcome.dumps_written {
            self.stats.record_dump();
        }
        Ok(outcome.changed)
    }
}
