//! Write transactions with post-commit and rollback hooks
//!
//! Work that must only happen once the surrounding write is durable
//! (scheduling a sync, for instance) is registered against the
//! transaction under a dedupe key. Hooks run after a successful commit,
//! at most once per key, and are dropped on rollback.
//!
//! Rollback hooks are the mirror image: they undo in-memory changes made
//! alongside the write and run only when the transaction is rolled back.
//! Dropping a transaction without committing or rolling back discards
//! both kinds.

use crate::core_config::errors::SyncResult;
use rusqlite::{Connection, Transaction};
use std::collections::HashSet;
use std::ops::Deref;
use tracing::trace;

type Hook = Box<dyn FnOnce() + Send>;

/// An open write transaction
pub struct WriteTransaction<'conn> {
    tx: Transaction<'conn>,
    hook_keys: HashSet<String>,
    hooks: Vec<Hook>,
    undo_keys: HashSet<String>,
    undo: Vec<Hook>,
}

impl<'conn> WriteTransaction<'conn> {
    pub fn begin(conn: &'conn mut Connection) -> SyncResult<Self> {
        Ok(WriteTransaction {
            tx: conn.transaction()?,
            hook_keys: HashSet::new(),
            hooks: Vec::new(),
            undo_keys: HashSet::new(),
            undo: Vec::new(),
        })
    }

    /// Register `hook` to run after commit unless `dedupe_key` is
    /// already registered. Returns whether the hook was added.
    pub fn after_commit_once(
        &mut self,
        dedupe_key: impl Into<String>,
        hook: impl FnOnce() + Send + 'static,
    ) -> bool {
        let dedupe_key = dedupe_key.into();
        if !self.hook_keys.insert(dedupe_key.clone()) {
            trace!(%dedupe_key, "Post-commit hook already registered");
            return false;
        }
        self.hooks.push(Box::new(hook));
        true
    }

    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    /// True if a rollback hook is registered under `dedupe_key`
    pub fn has_rollback_hook(&self, dedupe_key: &str) -> bool {
        self.undo_keys.contains(dedupe_key)
    }

    /// Register `hook` to run if the transaction rolls back, unless
    /// `dedupe_key` is already registered. The first registration wins.
    pub fn on_rollback_once(
        &mut self,
        dedupe_key: impl Into<String>,
        hook: impl FnOnce() + Send + 'static,
    ) -> bool {
        let dedupe_key = dedupe_key.into();
        if !self.undo_keys.insert(dedupe_key.clone()) {
            trace!(%dedupe_key, "Rollback hook already registered");
            return false;
        }
        self.undo.push(Box::new(hook));
        true
    }

    /// Commit, then run the registered hooks in registration order
    pub fn commit(self) -> SyncResult<()> {
        self.tx.commit()?;
        for hook in self.hooks {
            hook();
        }
        Ok(())
    }

    /// Roll back, discard post-commit hooks and run rollback hooks in
    /// reverse registration order.
    ///
    /// Rollback hooks run even if SQLite reports a rollback failure.
    pub fn rollback(self) -> SyncResult<()> {
        let result = self.tx.rollback();
        for hook in self.undo.into_iter().rev() {
            hook();
        }
        result?;
        Ok(())
    }
}

impl Deref for WriteTransaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}
