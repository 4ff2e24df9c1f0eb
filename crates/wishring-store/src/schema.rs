//! Database schema and migrations.
//!
//! Version 1 is the legacy single-wish layout. Version 2 adds the JSON wish
//! list, the active wish index and the `ble_event_logs` table. Fresh databases
//! are built by applying version 1 and then the same migration existing
//! installs go through, so the current layout is defined in one place.

use rusqlite::{Connection, params};
use tracing::{debug, info};

use wishring_types::{DEFAULT_TARGET_COUNT, WishEntry, date::parse_date, encode_wishes};

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Event type written for reset rows in `ble_event_logs`.
pub const RESET_EVENT_TYPE: &str = "RESET";

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version > SCHEMA_VERSION {
        return Err(Error::UnsupportedSchema {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    if version == 0 {
        // Fresh database, or a legacy file that predates version tracking.
        create_schema_v1(conn)?;
        set_schema_version(conn, 1)?;
        migrate(conn, 1)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Get the current schema version.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the legacy single-wish schema (version 1).
pub(crate) fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- One row per calendar day
        CREATE TABLE IF NOT EXISTS wish_counts (
            date TEXT PRIMARY KEY NOT NULL,
            total_count INTEGER NOT NULL DEFAULT 0,
            wish_text TEXT NOT NULL DEFAULT '',
            target_count INTEGER NOT NULL DEFAULT 1000,
            is_completed INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}

/// Run migrations from old_version to current.
fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    if old_version < 2 {
        migrate_to_v2(conn)?;
    }
    Ok(())
}

/// Move every day onto the multi-wish layout and add the event log.
///
/// Runs in a single transaction; a failure leaves the database at version 1.
fn migrate_to_v2(conn: &Connection) -> Result<()> {
    info!("Migrating database schema to version 2");
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        r#"
        ALTER TABLE wish_counts ADD COLUMN wishes_json TEXT NOT NULL DEFAULT '[]';
        ALTER TABLE wish_counts ADD COLUMN active_wish_index INTEGER NOT NULL DEFAULT 0;

        CREATE TABLE IF NOT EXISTS ble_event_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            value INTEGER NOT NULL DEFAULT 0,
            device_address TEXT,
            additional TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_ble_event_logs_type_time
            ON ble_event_logs(event_type, timestamp);
        "#,
    )?;

    let rows: Vec<(String, Option<String>, Option<i64>)> = {
        let mut stmt = tx.prepare("SELECT date, wish_text, target_count FROM wish_counts")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    for (date_key, wish_text, target_count) in &rows {
        let wishes = legacy_wishes(date_key, wish_text.as_deref(), *target_count);
        tx.execute(
            "UPDATE wish_counts SET wishes_json = ?1, active_wish_index = 0 WHERE date = ?2",
            params![encode_wishes(&wishes)?, date_key],
        )?;
    }
    debug!("Converted {} legacy day(s) to wish lists", rows.len());

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}

/// Wrap a legacy single wish into a list; blank text yields an empty list.
///
/// The text is kept verbatim so the migrated value equals the legacy one.
pub(crate) fn legacy_wishes(
    date_key: &str,
    wish_text: Option<&str>,
    target_count: Option<i64>,
) -> Vec<WishEntry> {
    let Some(text) = wish_text.filter(|t| !t.trim().is_empty()) else {
        return Vec::new();
    };

    let target_count = target_count
        .and_then(|t| u32::try_from(t).ok())
        .filter(|t| *t > 0)
        .unwrap_or(DEFAULT_TARGET_COUNT);

    vec![WishEntry {
        id: uuid::Uuid::new_v4(),
        text: text.to_string(),
        target_count,
        created_at: parse_date(date_key).ok(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use wishring_types::decode_wishes;

    fn legacy_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();
        conn
    }

    fn insert_legacy(conn: &Connection, date: &str, total: i64, text: &str, target: i64) {
        conn.execute(
            "INSERT INTO wish_counts (date, total_count, wish_text, target_count, is_completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 1642204800000, 1642204800000)",
            params![date, total, text, target],
        )
        .unwrap();
    }

    fn migrated_row(conn: &Connection, date: &str) -> (i64, String, i64, i64, i64) {
        conn.query_row(
            "SELECT total_count, wishes_json, active_wish_index, created_at, updated_at
             FROM wish_counts WHERE date = ?",
            [date],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .unwrap()
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables = table_names(&conn);
        assert!(tables.contains(&"wish_counts".to_string()));
        assert!(tables.contains(&"ble_event_logs".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // Re-initializing is a no-op.
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrates_ordinary_wish() {
        let conn = legacy_connection();
        insert_legacy(&conn, "2024-01-15", 150, "My first wish", 1000);

        initialize(&conn).unwrap();

        let (total, json, active, created, updated) = migrated_row(&conn, "2024-01-15");
        assert_eq!(total, 150);
        assert_eq!(active, 0);
        assert_eq!(created, 1_642_204_800_000);
        assert_eq!(updated, 1_642_204_800_000);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["text"], "My first wish");
        assert_eq!(value[0]["targetCount"], 1000);

        let wishes = decode_wishes(&json).unwrap();
        assert_eq!(wishes.len(), 1);
        assert_eq!(wishes[0].text, "My first wish");
        assert_eq!(wishes[0].target_count, 1000);
        assert_eq!(
            wishes[0].created_at,
            Some(time::macros::date!(2024 - 01 - 15))
        );
    }

    #[test]
    fn test_migrates_quotes_and_backslashes() {
        let conn = legacy_connection();
        let text = r#"Wish with "quotes" and \backslash"#;
        insert_legacy(&conn, "2024-01-16", 200, text, 2000);

        initialize(&conn).unwrap();

        let (total, json, active, _, _) = migrated_row(&conn, "2024-01-16");
        assert_eq!(total, 200);
        assert_eq!(active, 0);
        let wishes = decode_wishes(&json).unwrap();
        assert_eq!(wishes[0].text, text);
        assert_eq!(wishes[0].target_count, 2000);
    }

    #[test]
    fn test_migrates_blank_text_to_empty_list() {
        let conn = legacy_connection();
        insert_legacy(&conn, "2024-01-17", 0, "", 1000);
        insert_legacy(&conn, "2024-01-18", 5, "   ", 1000);

        initialize(&conn).unwrap();

        for date in ["2024-01-17", "2024-01-18"] {
            let (_, json, active, _, _) = migrated_row(&conn, date);
            assert_eq!(json, "[]");
            assert_eq!(active, 0);
            assert!(decode_wishes(&json).unwrap().is_empty());
        }
    }

    #[test]
    fn test_migration_creates_event_log_without_data() {
        let conn = legacy_connection();
        insert_legacy(&conn, "2024-01-15", 150, "My first wish", 1000);

        initialize(&conn).unwrap();

        assert!(table_names(&conn).contains(&"ble_event_logs".to_string()));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ble_event_logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unversioned_legacy_file_is_migrated() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE wish_counts (
                date TEXT PRIMARY KEY NOT NULL,
                total_count INTEGER NOT NULL DEFAULT 0,
                wish_text TEXT NOT NULL DEFAULT '',
                target_count INTEGER NOT NULL DEFAULT 1000,
                is_completed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .unwrap();
        insert_legacy(&conn, "2023-12-31", 42, "old", 100);

        initialize(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let (total, json, _, _, _) = migrated_row(&conn, "2023-12-31");
        assert_eq!(total, 42);
        assert_eq!(decode_wishes(&json).unwrap()[0].text, "old");
    }

    #[test]
    fn test_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        assert!(matches!(
            initialize(&conn),
            Err(Error::UnsupportedSchema { found: 3, .. })
        ));
    }

    #[test]
    fn test_legacy_wishes_fallbacks() {
        assert!(legacy_wishes("2024-01-01", None, Some(10)).is_empty());

        let wishes = legacy_wishes("not-a-date", Some("x"), Some(0));
        assert_eq!(wishes[0].target_count, DEFAULT_TARGET_COUNT);
        assert_eq!(wishes[0].created_at, None);

        let wishes = legacy_wishes("2024-01-01", Some("x"), Some(-5));
        assert_eq!(wishes[0].target_count, DEFAULT_TARGET_COUNT);
    }
}
