//! On-disk migration tests for wishring-store.

use rusqlite::{Connection, params};
use time::macros::{date, datetime};

use wishring_store::{RecordQuery, SCHEMA_VERSION, Store};
use wishring_types::{MAX_DAILY_COUNT, ResetCause, ResetEvent};

/// Write a database file exactly as the legacy single-wish layout left it.
fn write_legacy_file(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        INSERT INTO schema_version (id, version) VALUES (1, 1);
        CREATE TABLE wish_counts (
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

    let rows: [(&str, i64, &str, i64); 3] = [
        ("2024-01-15", 150, "My first wish", 1000),
        ("2024-01-16", 200, r#"Wish with "quotes" and \backslash"#, 2000),
        ("2024-01-17", 0, "", 1000),
    ];
    for (date, total, text, target) in rows {
        conn.execute(
            "INSERT INTO wish_counts (date, total_count, wish_text, target_count, is_completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 1705305600000, 1705309200000)",
            params![date, total, text, target],
        )
        .unwrap();
    }
}

#[test]
fn test_legacy_file_migrates_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wishring.db");
    write_legacy_file(&path);

    let store = Store::open(&path).unwrap();
    assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);

    let first = store.get_record(date!(2024 - 01 - 15)).unwrap().unwrap();
    assert_eq!(first.total_count, 150);
    assert_eq!(first.active_wish_index, 0);
    assert_eq!(first.wishes.len(), 1);
    assert_eq!(first.wishes[0].text, "My first wish");
    assert_eq!(first.wishes[0].target_count, 1000);
    assert_eq!(first.wishes[0].created_at, Some(date!(2024 - 01 - 15)));
    assert_eq!(first.created_at, datetime!(2024-01-15 08:00 UTC));
    assert_eq!(first.updated_at, datetime!(2024-01-15 09:00 UTC));

    let quoted = store.get_record(date!(2024 - 01 - 16)).unwrap().unwrap();
    assert_eq!(quoted.wishes[0].text, r#"Wish with "quotes" and \backslash"#);
    assert_eq!(quoted.wishes[0].target_count, 2000);

    let blank = store.get_record(date!(2024 - 01 - 17)).unwrap().unwrap();
    assert!(blank.wishes.is_empty());
    assert_eq!(blank.active_wish_index, 0);
}

#[test]
fn test_migration_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wishring.db");
    write_legacy_file(&path);

    let first_id = {
        let store = Store::open(&path).unwrap();
        store.get_record(date!(2024 - 01 - 15)).unwrap().unwrap().wishes[0].id
    };

    // Reopening must not regenerate wish ids.
    let store = Store::open(&path).unwrap();
    let record = store.get_record(date!(2024 - 01 - 15)).unwrap().unwrap();
    assert_eq!(record.wishes[0].id, first_id);
    assert_eq!(store.query_records(&RecordQuery::new()).unwrap().len(), 3);
}

#[test]
fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("wishring.db");

    {
        let store = Store::open(&path).unwrap();
        let now = datetime!(2024-02-01 07:00 UTC);
        let mut record = wishring_types::DailyCounterRecord::new(
            date!(2024 - 02 - 01),
            Vec::new(),
            0,
            1000,
            now,
        );
        record.add(33, MAX_DAILY_COUNT, now);
        store.save_record(&record).unwrap();
        store
            .insert_reset_event(&ResetEvent::new(33, ResetCause::ManualButton, None, now))
            .unwrap();
    }

    let store = Store::open(&path).unwrap();
    let record = store.get_record(date!(2024 - 02 - 01)).unwrap().unwrap();
    assert_eq!(record.total_count, 33);
    let resets = store
        .reset_events_between(
            datetime!(2024-02-01 00:00 UTC),
            datetime!(2024-02-02 00:00 UTC),
        )
        .unwrap();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].previous_count, 33);
}

#[test]
fn test_read_only_store_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wishring.db");
    let now = datetime!(2024-02-01 07:00 UTC);
    let record =
        wishring_types::DailyCounterRecord::new(date!(2024 - 02 - 01), Vec::new(), 0, 1000, now);

    let writer = Store::open(&path).unwrap();
    writer.save_record(&record).unwrap();

    let reader = Store::open_read_only(&path).unwrap();
    assert_eq!(reader.schema_version().unwrap(), SCHEMA_VERSION);
    assert!(reader.get_record(date!(2024 - 02 - 01)).unwrap().is_some());
    assert!(reader.save_record(&record).is_err());
    assert!(
        reader
            .insert_reset_event(&ResetEvent::new(1, ResetCause::ManualButton, None, now))
            .is_err()
    );
}

#[test]
fn test_read_only_store_refuses_legacy_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    write_legacy_file(&path);

    assert!(matches!(
        Store::open_read_only(&path),
        Err(wishring_store::Error::UnsupportedSchema { found: 1, .. })
    ));
}

#[tokio::test]
async fn test_store_usable_from_blocking_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wishring.db");

    let count = tokio::task::spawn_blocking(move || {
        let store = Store::open(&path).unwrap();
        store.count_records().unwrap()
    })
    .await
    .unwrap();

    assert_eq!(count, 0);
}
