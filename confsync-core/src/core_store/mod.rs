//! SQLite persistence for config dumps
//!
//! The sync core never opens transactions on its own; callers open one
//! through [`ConfigDumpStore::write`] and hand the [`WriteTransaction`] to
//! every operation that produces a dump, so domain writes and dump rows
//! commit together.

pub mod dumps;
pub mod migrations;
pub mod transaction;

pub use transaction::WriteTransaction;

use crate::core_config::errors::SyncResult;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, warn};

/// Pooled SQLite database holding the `config_dump` table
#[derive(Clone)]
pub struct ConfigDumpStore {
    pool: Pool<SqliteConnectionManager>,
}

impl ConfigDumpStore {
    /// Open (or create) a database file and bring its schema up to date
    pub fn open<P: AsRef<Path>>(db_path: P, pool_size: u32) -> SyncResult<Self> {
        let manager = SqliteConnectionManager::file(db_path.as_ref());
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        debug!(path = %db_path.as_ref().display(), pool_size, "Opened config dump database");
        Self::from_pool(pool)
    }

    /// In-memory database. Every pooled connection to `:memory:` is its own
    /// database, so the pool holds exactly one.
    pub fn in_memory() -> SyncResult<Self> {
        let pool = Pool::builder().max_size(1).build(SqliteConnectionManager::memory())?;
        Self::from_pool(pool)
    }

    pub fn from_pool(pool: Pool<SqliteConnectionManager>) -> SyncResult<Self> {
        migrations::migrate(&pool)?;
        Ok(ConfigDumpStore { pool })
    }

    /// Run `body` against a pooled connection outside any transaction
    pub fn read<R>(&self, body: impl FnOnce(&Connection) -> SyncResult<R>) -> SyncResult<R> {
        let conn = self.pool.get()?;
        body(&conn)
    }

    /// Run `body` inside a write transaction.
    ///
    /// Commits when `body` returns `Ok` (then runs post-commit hooks) and
    /// rolls back otherwise, returning the body's error.
    pub fn write<R>(
        &self,
        body: impl FnOnce(&mut WriteTransaction<'_>) -> SyncResult<R>,
    ) -> SyncResult<R> {
        let mut conn = self.pool.get()?;
        let mut tx = WriteTransaction::begin(&mut conn)?;
        match body(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_config::errors::SyncError;
    use crate::core_config::types::ConfigDump;
    use crate::core_config::variant::ConfigVariant;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn dump() -> ConfigDump {
        ConfigDump {
            variant: ConfigVariant::Contacts,
            public_key: "05aa".to_string(),
            data: vec![1, 2, 3],
            timestamp_ms: 10,
        }
    }

    #[test]
    fn test_write_commits_and_runs_hooks() {
        let store = ConfigDumpStore::in_memory().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let hook_flag = fired.clone();

        store
            .write(|tx| {
                dumps::upsert(tx, &dump())?;
                tx.after_commit_once("sync-05aa", move || hook_flag.store(true, Ordering::SeqCst));
                Ok(())
            })
            .unwrap();

        assert!(fired.load(Ordering::SeqCst));
        let stored = store.read(|conn| dumps::fetch_all(conn, "05aa")).unwrap();
        assert_eq!(stored, vec![dump()]);
    }

    #[test]
    fn test_failed_body_rolls_back() {
        let store = ConfigDumpStore::in_memory().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let hook_flag = fired.clone();

        let result: SyncResult<()> = store.write(|tx| {
            dumps::upsert(tx, &dump())?;
            tx.after_commit_once("sync-05aa", move || hook_flag.store(true, Ordering::SeqCst));
            Err(SyncError::Handler {
                variant: ConfigVariant::Contacts,
                reason: "boom".to_string(),
            })
        });

        assert!(matches!(result, Err(SyncError::Handler { .. })));
        assert!(!fired.load(Ordering::SeqCst));
        assert!(store.read(|conn| dumps::fetch_all(conn, "05aa")).unwrap().is_empty());
    }

    #[test]
    fn test_file_database_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");

        {
            let store = ConfigDumpStore::open(&path, 4).unwrap();
            store.write(|tx| dumps::upsert(tx, &dump())).unwrap();
        }

        let reopened = ConfigDumpStore::open(&path, 4).unwrap();
        let stored = reopened.read(|conn| dumps::fetch_all(conn, "05aa")).unwrap();
        assert_eq!(stored.len(), 1);
    }
}
