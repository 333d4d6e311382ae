/*
    registry.rs - Per-account config object registry

    Holds exactly one config object per (variant, account). Every access
    to an object's state goes through `mutate`, which holds that object's
    own mutex for the duration of the closure:
    - callers on the same key serialize
    - callers on different keys never block each other
    The map lock is only held long enough to clone the handle out.

    Writers that change an object inside a database transaction first
    checkpoint it against that transaction, so a rollback also puts the
    in-memory object back the way it was.
*/

use crate::core_config::errors::{handle_poison, SyncError, SyncResult};
use crate::core_config::object::ConfigObject;
use crate::core_config::variant::{ConfigKey, ConfigVariant};
use crate::core_store::WriteTransaction;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, trace, warn};

/// Exclusive-access wrapper around one loaded config object
#[derive(Clone)]
pub struct ConfigHandle {
    key: ConfigKey,
    inner: Arc<Mutex<Box<dyn ConfigObject>>>,
}

impl ConfigHandle {
    fn new(key: ConfigKey, object: Box<dyn ConfigObject>) -> Self {
        ConfigHandle { key, inner: Arc::new(Mutex::new(object)) }
    }

    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    /// Run `body` with exclusive access to the object
    pub fn mutate<R>(&self, body: impl FnOnce(&mut dyn ConfigObject) -> R) -> SyncResult<R> {
        let mut guard = self.inner.lock().map_err(handle_poison)?;
        Ok(body(guard.as_mut()))
    }

    /// Swap in a previously taken snapshot
    pub fn restore(&self, object: Box<dyn ConfigObject>) -> SyncResult<()> {
        *self.inner.lock().map_err(handle_poison)? = object;
        Ok(())
    }

    /// Arrange for the object to be restored to its current state if `tx`
    /// rolls back. Only the first checkpoint per transaction is kept.
    pub fn checkpoint(&self, tx: &mut WriteTransaction<'_>) -> SyncResult<()> {
        let dedupe_key = format!("config-restore-{}-{}", self.key.variant, self.key.public_key);
        if tx.has_rollback_hook(&dedupe_key) {
            return Ok(());
        }

        let snapshot = self.mutate(|config| config.snapshot())?;
        let handle = self.clone();
        tx.on_rollback_once(dedupe_key, move || {
            let variant = handle.key.variant;
            match handle.restore(snapshot) {
                Ok(()) => trace!(%variant, "Restored config after rollback"),
                Err(err) => warn!(%variant, error = %err, "Unable to restore config after rollback"),
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle").field("key", &self.key).finish()
    }
}

/// Registry of loaded config objects, created at login and cleared at logout
#[derive(Default)]
pub struct ConfigRegistry {
    handles: RwLock<HashMap<ConfigKey, ConfigHandle>>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.handles.read().map_err(handle_poison)?.is_empty())
    }

    /// Register an object, replacing any previous one for the same key
    pub fn register(&self, key: ConfigKey, object: Box<dyn ConfigObject>) -> SyncResult<()> {
        let handle = ConfigHandle::new(key.clone(), object);
        self.handles.write().map_err(handle_poison)?.insert(key, handle);
        Ok(())
    }

    /// Look up a loaded object. Never creates one.
    pub fn get(&self, variant: ConfigVariant, public_key: &str) -> SyncResult<Option<ConfigHandle>> {
        let key = ConfigKey::new(variant, public_key);
        Ok(self.handles.read().map_err(handle_poison)?.get(&key).cloned())
    }

    /// Run `body` against the object for `(variant, public_key)`.
    ///
    /// Returns `Ok(None)` when no object is loaded for the key; callers
    /// treat that as "nothing to do".
    pub fn mutate<R>(
        &self,
        variant: ConfigVariant,
        public_key: &str,
        body: impl FnOnce(&mut dyn ConfigObject) -> R,
    ) -> SyncResult<Option<R>> {
        match self.get(variant, public_key)? {
            Some(handle) => handle.mutate(body).map(Some),
            None => Ok(None),
        }
    }

    /// Variants loaded for an account, in processing order
    pub fn variants_for(&self, public_key: &str) -> SyncResult<Vec<ConfigVariant>> {
        let mut variants: Vec<ConfigVariant> = self
            .handles
            .read()
            .map_err(handle_poison)?
            .keys()
            .filter(|key| key.public_key == public_key)
            .map(|key| key.variant)
            .collect();
        variants.sort_by_key(|v| v.ordering_key());
        Ok(variants)
    }

    /// Snapshot of every loaded handle
    pub fn handles(&self) -> SyncResult<Vec<ConfigHandle>> {
        Ok(self.handles.read().map_err(handle_poison)?.values().cloned().collect())
    }

    /// Drop every object belonging to `public_key`
    pub fn remove_account(&self, public_key: &str) -> SyncResult<usize> {
        let mut handles = self.handles.write().map_err(handle_poison)?;
        let before = handles.len();
        handles.retain(|key, _| key.public_key != public_key);
        Ok(before - handles.len())
    }

    /// Drop every object (logout)
    pub fn clear(&self) -> SyncResult<()> {
        self.handles.write().map_err(handle_poison)?.clear();
        Ok(())
    }
}

/// Call into the merge library, turning a panic into a typed error.
///
/// Errors are logged with the variant and operation before being handed
/// back so the caller never has to.
pub(crate) fn guarded<T>(
    variant: ConfigVariant,
    operation: &'static str,
    call: impl FnOnce() -> SyncResult<T>,
) -> SyncResult<T> {
    let result = match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SyncError::library(variant, operation, reason))
        }
    };

    result.map_err(|err| {
        error!(%variant, operation, error = %err, "Config library call failed");
        match err {
            SyncError::Library { .. } => err,
            other => SyncError::library(variant, operation, other),
        }
    })
}
