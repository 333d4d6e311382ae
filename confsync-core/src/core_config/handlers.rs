/*
    handlers.rs - Collaborators the sync core calls out to

    - ConfigUpdateHandler: applies merged config state to domain tables
      and local edits to config objects, one per variant
    - HandlerTable: the single variant -> handler mapping
    - SyncScheduler: "please sync this account now"
    - IdentityProvider: who the local account is
*/

use crate::core_config::errors::SyncResult;
use crate::core_config::object::ConfigObject;
use crate::core_config::variant::ConfigVariant;
use crate::core_store::WriteTransaction;
use std::sync::Arc;
use tracing::debug;

/// What a downstream handler is told about a merge
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateContext<'a> {
    pub public_key: &'a str,
    /// The config holds state not yet written to its dump
    pub needs_dump: bool,
    /// Newest sender timestamp among the accepted messages
    pub latest_sent_timestamp_ms: i64,
}

/// A local value change bound for a config object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    /// Entry key inside the config object
    pub key: String,
    /// `None` removes the entry
    pub value: Option<Vec<u8>>,
}

/// Applies config state to and from the domain tables for one variant
pub trait ConfigUpdateHandler: Send + Sync {
    /// Materialize freshly merged state inside the caller's transaction.
    ///
    /// Returning an error aborts the whole incoming batch.
    fn apply(
        &self,
        tx: &mut WriteTransaction<'_>,
        config: &dyn ConfigObject,
        ctx: &UpdateContext<'_>,
    ) -> SyncResult<()>;

    /// Write a local change into the config object, returning whether it
    /// changed anything.
    fn apply_local(&self, config: &mut dyn ConfigObject, change: &LocalChange) -> SyncResult<bool> {
        Ok(match &change.value {
            Some(value) => config.set(&change.key, value.clone()),
            None => config.erase(&change.key),
        })
    }
}

/// Handler that only logs merged state
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl ConfigUpdateHandler for LoggingHandler {
    fn apply(
        &self,
        _tx: &mut WriteTransaction<'_>,
        config: &dyn ConfigObject,
        ctx: &UpdateContext<'_>,
    ) -> SyncResult<()> {
        debug!(
            variant = %config.variant(),
            entries = config.entries().len(),
            needs_dump = ctx.needs_dump,
            latest_sent_timestamp_ms = ctx.latest_sent_timestamp_ms,
            "Merged config state"
        );
        Ok(())
    }
}

/// One handler per variant
#[derive(Clone)]
pub struct HandlerTable {
    user_profile: Arc<dyn ConfigUpdateHandler>,
    contacts: Arc<dyn ConfigUpdateHandler>,
    convo_info_volatile: Arc<dyn ConfigUpdateHandler>,
    user_groups: Arc<dyn ConfigUpdateHandler>,
}

impl HandlerTable {
    pub fn new(
        user_profile: Arc<dyn ConfigUpdateHandler>,
        contacts: Arc<dyn ConfigUpdateHandler>,
        convo_info_volatile: Arc<dyn ConfigUpdateHandler>,
        user_groups: Arc<dyn ConfigUpdateHandler>,
    ) -> Self {
        HandlerTable { user_profile, contacts, convo_info_volatile, user_groups }
    }

    /// The same handler for every variant
    pub fn uniform(handler: Arc<dyn ConfigUpdateHandler>) -> Self {
        Self::new(handler.clone(), handler.clone(), handler.clone(), handler)
    }

    pub fn get(&self, variant: ConfigVariant) -> &dyn ConfigUpdateHandler {
        match variant {
            ConfigVariant::UserProfile => self.user_profile.as_ref(),
            ConfigVariant::Contacts => self.contacts.as_ref(),
            ConfigVariant::ConvoInfoVolatile => self.convo_info_volatile.as_ref(),
            ConfigVariant::UserGroups => self.user_groups.as_ref(),
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::uniform(Arc::new(LoggingHandler))
    }
}

/// Receives the coalesced "sync this account" signal
pub trait SyncScheduler: Send + Sync {
    fn enqueue_sync(&self, public_key: &str);
}

/// Scheduler that drops every request
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

impl SyncScheduler for NoopScheduler {
    fn enqueue_sync(&self, _public_key: &str) {}
}

/// Dedupe key for the per-account sync hook
pub fn sync_dedupe_key(public_key: &str) -> String {
    format!("config-sync-{}", public_key)
}

/// Schedule one sync for `public_key` when `tx` commits, however many
/// times this is called within the transaction.
pub fn schedule_sync(
    tx: &mut WriteTransaction<'_>,
    scheduler: &Arc<dyn SyncScheduler>,
    public_key: &str,
) {
    let scheduler = scheduler.clone();
    let account = public_key.to_string();
    if tx.after_commit_once(sync_dedupe_key(public_key), move || scheduler.enqueue_sync(&account)) {
        debug!(public_key, "Scheduled config sync after commit");
    }
}

/// Source of the local account identity
pub trait IdentityProvider: Send + Sync {
    /// `None` until the account has been created
    fn local_public_key(&self) -> Option<String>;
}

/// Fixed identity
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn new(public_key: impl Into<String>) -> Self {
        StaticIdentity(Some(public_key.into()))
    }

    pub fn none() -> Self {
        StaticIdentity(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn local_public_key(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::ConfigDumpStore;
    use crate::test_utils::fixtures::{test_object, RecordingHandler, RecordingScheduler};

    #[test]
    fn test_table_routes_each_variant() {
        let profile = Arc::new(RecordingHandler::default());
        let other = Arc::new(RecordingHandler::default());
        let table = HandlerTable::new(profile.clone(), other.clone(), other.clone(), other.clone());
        let store = ConfigDumpStore::in_memory().unwrap();

        store
            .write(|tx| {
                for variant in ConfigVariant::REQUIRED {
                    let config = test_object(variant);
                    let ctx = UpdateContext {
                        public_key: "05aa",
                        needs_dump: false,
                        latest_sent_timestamp_ms: 1,
                    };
                    table.get(variant).apply(tx, config.as_ref(), &ctx)?;
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(profile.applied_variants(), vec![ConfigVariant::UserProfile]);
        assert_eq!(other.applied_variants().len(), 3);
    }

    #[test]
    fn test_default_apply_local_sets_and_erases() {
        let handler = LoggingHandler;
        let mut config = test_object(ConfigVariant::Contacts);

        let set = LocalChange { key: "k".to_string(), value: Some(b"v".to_vec()) };
        assert!(handler.apply_local(config.as_mut(), &set).unwrap());
        assert!(!handler.apply_local(config.as_mut(), &set).unwrap());
        assert_eq!(config.get("k"), Some(b"v".to_vec()));

        let erase = LocalChange { key: "k".to_string(), value: None };
        assert!(handler.apply_local(config.as_mut(), &erase).unwrap());
        assert_eq!(config.get("k"), None);
    }

    #[test]
    fn test_schedule_sync_fires_once_per_transaction() {
        let recorder = Arc::new(RecordingScheduler::default());
        let scheduler: Arc<dyn SyncScheduler> = recorder.clone();
        let store = ConfigDumpStore::in_memory().unwrap();

        store
            .write(|tx| {
                schedule_sync(tx, &scheduler, "05aa");
                schedule_sync(tx, &scheduler, "05aa");
                schedule_sync(tx, &scheduler, "05bb");
                Ok(())
            })
            .unwrap();

        assert_eq!(recorder.calls(), vec!["05aa".to_string(), "05bb".to_string()]);
    }

    #[test]
    fn test_static_identity() {
        assert_eq!(StaticIdentity::new("05aa").local_public_key().as_deref(), Some("05aa"));
        assert_eq!(StaticIdentity::none().local_public_key(), None);
    }
}
