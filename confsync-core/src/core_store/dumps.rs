//! `config_dump` table access
//!
//! Plain functions over a borrowed connection so they can run inside a
//! caller's open write transaction.

use crate::core_config::errors::SyncResult;
use crate::core_config::types::ConfigDump;
use crate::core_config::variant::ConfigVariant;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use tracing::trace;

fn dump_from_row(row: &Row<'_>) -> rusqlite::Result<(String, ConfigDump)> {
    let variant: String = row.get(0)?;
    Ok((
        variant,
        ConfigDump {
            // Replaced once the tag is parsed
            variant: ConfigVariant::UserProfile,
            public_key: row.get(1)?,
            data: row.get(2)?,
            timestamp_ms: row.get(3)?,
        },
    ))
}

fn parse(rows: Vec<(String, ConfigDump)>) -> SyncResult<Vec<ConfigDump>> {
    rows.into_iter()
        .map(|(tag, mut dump)| {
            dump.variant = tag.parse()?;
            Ok(dump)
        })
        .collect()
}

/// All dumps stored for an account
pub fn fetch_all(conn: &Connection, public_key: &str) -> SyncResult<Vec<ConfigDump>> {
    let mut stmt = conn.prepare(
        "SELECT variant, public_key, data, timestamp_ms FROM config_dump
         WHERE public_key = ? ORDER BY variant",
    )?;
    let rows = stmt
        .query_map(params![public_key], dump_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    parse(rows)
}

pub fn fetch(
    conn: &Connection,
    variant: ConfigVariant,
    public_key: &str,
) -> SyncResult<Option<ConfigDump>> {
    let row = conn
        .query_row(
            "SELECT variant, public_key, data, timestamp_ms FROM config_dump
             WHERE variant = ? AND public_key = ?",
            params![variant.as_str(), public_key],
            dump_from_row,
        )
        .optional()?;
    Ok(parse(row.into_iter().collect())?.pop())
}

/// Variants that have a stored dump for an account
pub fn variants_for(conn: &Connection, public_key: &str) -> SyncResult<BTreeSet<ConfigVariant>> {
    let mut stmt = conn.prepare("SELECT variant FROM config_dump WHERE public_key = ?")?;
    let tags = stmt
        .query_map(params![public_key], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    tags.iter().map(|tag| tag.parse()).collect()
}

/// Insert or replace the dump for its (variant, account)
pub fn upsert(conn: &Connection, dump: &ConfigDump) -> SyncResult<()> {
    conn.execute(
        "INSERT INTO config_dump (variant, public_key, data, timestamp_ms) VALUES (?, ?, ?, ?)
         ON CONFLICT(variant, public_key) DO UPDATE SET
             data = excluded.data,
             timestamp_ms = excluded.timestamp_ms",
        params![dump.variant.as_str(), dump.public_key, dump.data, dump.timestamp_ms],
    )?;
    trace!(variant = %dump.variant, bytes = dump.data.len(), "Stored config dump");
    Ok(())
}

/// Bump only the timestamp of an existing dump. Returns rows touched.
pub fn touch_timestamp(
    conn: &Connection,
    variant: ConfigVariant,
    public_key: &str,
    timestamp_ms: i64,
) -> SyncResult<usize> {
    Ok(conn.execute(
        "UPDATE config_dump SET timestamp_ms = ? WHERE variant = ? AND public_key = ?",
        params![timestamp_ms, variant.as_str(), public_key],
    )?)
}

/// Delete every dump for an account. Returns rows removed.
pub fn remove_all(conn: &Connection, public_key: &str) -> SyncResult<usize> {
    Ok(conn.execute("DELETE FROM config_dump WHERE public_key = ?", params![public_key])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::migrations::migrate_connection;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_connection(&mut conn).unwrap();
        conn
    }

    fn dump(variant: ConfigVariant, data: &[u8], timestamp_ms: i64) -> ConfigDump {
        ConfigDump { variant, public_key: "05aa".to_string(), data: data.to_vec(), timestamp_ms }
    }

    #[test]
    fn test_upsert_replaces_existing_row() {
        let conn = conn();
        upsert(&conn, &dump(ConfigVariant::Contacts, b"one", 1)).unwrap();
        upsert(&conn, &dump(ConfigVariant::Contacts, b"two", 2)).unwrap();

        let all = fetch_all(&conn, "05aa").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data, b"two");
        assert_eq!(all[0].timestamp_ms, 2);
        assert_eq!(all[0].variant, ConfigVariant::Contacts);
    }

    #[test]
    fn test_touch_timestamp_keeps_data() {
        let conn = conn();
        upsert(&conn, &dump(ConfigVariant::UserProfile, b"profile", 1)).unwrap();

        assert_eq!(touch_timestamp(&conn, ConfigVariant::UserProfile, "05aa", 99).unwrap(), 1);
        assert_eq!(touch_timestamp(&conn, ConfigVariant::UserGroups, "05aa", 99).unwrap(), 0);

        let stored = fetch(&conn, ConfigVariant::UserProfile, "05aa").unwrap().unwrap();
        assert_eq!(stored.data, b"profile");
        assert_eq!(stored.timestamp_ms, 99);
    }

    #[test]
    fn test_variants_for_and_remove_all() {
        let conn = conn();
        upsert(&conn, &dump(ConfigVariant::UserProfile, b"p", 1)).unwrap();
        upsert(&conn, &dump(ConfigVariant::UserGroups, b"g", 1)).unwrap();

        let variants = variants_for(&conn, "05aa").unwrap();
        assert_eq!(
            variants.into_iter().collect::<Vec<_>>(),
            vec![ConfigVariant::UserProfile, ConfigVariant::UserGroups]
        );
        assert!(variants_for(&conn, "05bb").unwrap().is_empty());

        assert_eq!(remove_all(&conn, "05aa").unwrap(), 2);
        assert!(fetch_all(&conn, "05aa").unwrap().is_empty());
    }
}
