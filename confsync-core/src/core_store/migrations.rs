//! Database migrations for config dumps
//!
//! Versioned migrations for the config dump schema. Each migration is
//! applied atomically and tracked in the config_schema_version table.

use crate::core_config::types::now_ms;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use tracing::info;

/// Current schema version for config storage
pub const CURRENT_CONFIG_SCHEMA_VERSION: i32 = 2;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial config dump schema",
            up_sql: r#"
                -- One persisted snapshot per (variant, account)
                CREATE TABLE IF NOT EXISTS config_dump (
                    variant TEXT NOT NULL CHECK(variant IN
                        ('userProfile', 'contacts', 'convoInfoVolatile', 'userGroups')),
                    public_key TEXT NOT NULL,
                    data BLOB NOT NULL,
                    PRIMARY KEY (variant, public_key)
                );

                CREATE INDEX IF NOT EXISTS idx_config_dump_public_key ON config_dump(public_key);
            "#,
        },
        Migration {
            version: 2,
            description: "Track when each dump was last refreshed",
            up_sql: r#"
                ALTER TABLE config_dump ADD COLUMN timestamp_ms INTEGER NOT NULL DEFAULT 0;
            "#,
        },
    ]
}

fn ensure_version_table(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS config_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get current schema version from database
pub fn get_current_version(conn: &Connection) -> Result<i32, rusqlite::Error> {
    ensure_version_table(conn)?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM config_schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations on one connection
pub fn migrate_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_current_version(conn)?;

    let pending: Vec<_> =
        get_migrations().into_iter().filter(|m| m.version > current_version).collect();

    for migration in pending {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO config_schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, now_ms()],
        )?;
        tx.commit()?;

        info!(version = migration.version, description = migration.description, "Applied migration");
    }

    Ok(())
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> Result<(), crate::core_config::SyncError> {
    let mut conn = pool.get()?;
    migrate_connection(&mut conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_migration() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_connection(&mut conn).expect("Migration failed");

        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('config_dump')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(columns, vec!["variant", "public_key", "data", "timestamp_ms"]);
    }

    #[test]
    fn test_idempotent_migrations() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_connection(&mut conn).expect("First migration failed");
        migrate_connection(&mut conn).expect("Second migration failed");

        assert_eq!(get_current_version(&conn).unwrap(), CURRENT_CONFIG_SCHEMA_VERSION);
    }

    #[test]
    fn test_one_dump_per_variant_and_account() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_connection(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO config_dump (variant, public_key, data) VALUES ('contacts', '05aa', x'01')",
            [],
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO config_dump (variant, public_key, data) VALUES ('contacts', '05aa', x'02')",
            [],
        );
        assert!(duplicate.is_err());

        let bad_variant = conn.execute(
            "INSERT INTO config_dump (variant, public_key, data) VALUES ('groupKeys', '05aa', x'02')",
            [],
        );
        assert!(bad_variant.is_err());
    }
}
