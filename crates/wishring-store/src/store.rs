//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Time, UtcOffset};
use tracing::{debug, info};

use wishring_types::date::{format_date, from_millis, parse_date, to_millis};
use wishring_types::{DailyCounterRecord, ResetCause, ResetEvent, decode_wishes, encode_wishes};

use crate::error::{Error, Result};
use crate::models::{CounterStatistics, DailySummary, ResetStatistics, StreakInfo};
use crate::queries::{RecordQuery, ResetQuery};
use crate::schema;

/// Column list shared by every `wish_counts` select.
pub(crate) const RECORD_COLUMNS: &str = "date, total_count, wishes_json, active_wish_index, \
     target_count, is_completed, created_at, updated_at";

/// SQLite-based store for daily counter records and reset events.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path, migrating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an existing, current database without write access.
    ///
    /// Reads work as usual; every write fails with [`Error::Database`].
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database read-only at {}", path.display());
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let found = schema::get_schema_version(&conn)?;
        if found != schema::SCHEMA_VERSION {
            return Err(Error::UnsupportedSchema {
                found,
                supported: schema::SCHEMA_VERSION,
            });
        }

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Schema version of the open database.
    pub fn schema_version(&self) -> Result<i32> {
        schema::get_schema_version(&self.conn)
    }
}

/// Raw `wish_counts` row before the JSON wish list is decoded.
struct RecordRow {
    date: String,
    total_count: i64,
    wishes_json: String,
    active_wish_index: i64,
    target_count: i64,
    is_completed: bool,
    created_at: i64,
    updated_at: i64,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            date: row.get(0)?,
            total_count: row.get(1)?,
            wishes_json: row.get(2)?,
            active_wish_index: row.get(3)?,
            target_count: row.get(4)?,
            is_completed: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl TryFrom<RecordRow> for DailyCounterRecord {
    type Error = Error;

    fn try_from(row: RecordRow) -> Result<Self> {
        let wishes = decode_wishes(&row.wishes_json)?;
        let active_wish_index = usize::try_from(row.active_wish_index)
            .unwrap_or(0)
            .min(wishes.len().saturating_sub(1));

        Ok(DailyCounterRecord {
            date: parse_date(&row.date)?,
            total_count: u32::try_from(row.total_count).unwrap_or(0),
            wishes,
            active_wish_index,
            target_count: u32::try_from(row.target_count).unwrap_or(0),
            is_completed: row.is_completed,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

// Daily record operations
impl Store {
    /// Get the record for a date, if one exists.
    pub fn get_record(&self, date: Date) -> Result<Option<DailyCounterRecord>> {
        let sql = format!("SELECT {} FROM wish_counts WHERE date = ?", RECORD_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [format_date(date)], RecordRow::from_row)
            .optional()?;

        row.map(DailyCounterRecord::try_from).transpose()
    }

    /// Insert or replace the record for its date.
    ///
    /// The legacy `wish_text` and `target_count` columns are written from the
    /// active wish so older readers keep seeing a meaningful value.
    pub fn save_record(&self, record: &DailyCounterRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO wish_counts (date, total_count, wish_text, target_count, is_completed,
                created_at, updated_at, wishes_json, active_wish_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(date) DO UPDATE SET
                total_count = ?2,
                wish_text = ?3,
                target_count = ?4,
                is_completed = ?5,
                updated_at = ?7,
                wishes_json = ?8,
                active_wish_index = ?9",
            params![
                format_date(record.date),
                record.total_count,
                record.wish_text(),
                record.target_count,
                record.is_completed,
                to_millis(record.created_at),
                to_millis(record.updated_at),
                encode_wishes(&record.wishes)?,
                record.active_wish_index as i64,
            ],
        )?;

        debug!(
            "Saved record {}: total={}, active_wish={}",
            record.date, record.total_count, record.active_wish_index
        );
        Ok(())
    }

    /// Save a new day's record together with the rollover event closing the
    /// previous day, in one transaction.
    ///
    /// Returns the row id of the rollover event, if one was given.
    pub fn start_day(
        &self,
        record: &DailyCounterRecord,
        rollover: Option<&ResetEvent>,
    ) -> Result<Option<i64>> {
        let tx = self.conn.unchecked_transaction()?;
        let id = rollover
            .map(|event| self.insert_reset_event(event))
            .transpose()?;
        self.save_record(record)?;
        tx.commit()?;
        Ok(id)
    }

    /// The most recent record strictly before `date`.
    pub fn latest_record_before(&self, date: Date) -> Result<Option<DailyCounterRecord>> {
        let sql = format!(
            "SELECT {} FROM wish_counts WHERE date < ? ORDER BY date DESC LIMIT 1",
            RECORD_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, [format_date(date)], RecordRow::from_row)
            .optional()?;

        row.map(DailyCounterRecord::try_from).transpose()
    }

    /// Query records with filters.
    pub fn query_records(&self, query: &RecordQuery) -> Result<Vec<DailyCounterRecord>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), RecordRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(DailyCounterRecord::try_from).collect()
    }

    /// Count stored days.
    pub fn count_records(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM wish_counts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete every record dated strictly before `date`.
    pub fn delete_records_before(&self, date: Date) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM wish_counts WHERE date < ?", [format_date(date)])?;
        info!("Deleted {} record(s) before {}", deleted, date);
        Ok(deleted)
    }

    /// Delete all records and reset events.
    pub fn clear_all(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM wish_counts", [])?;
        tx.execute("DELETE FROM ble_event_logs", [])?;
        tx.commit()?;
        info!("Cleared all stored data");
        Ok(())
    }
}

/// JSON payload kept in `ble_event_logs.additional` for reset rows.
#[derive(Debug, Serialize, Deserialize)]
struct ResetDetails {
    cause: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

/// `(id, timestamp, value, device_address, additional)`
type ResetRow = (i64, i64, i64, Option<String>, Option<String>);

fn reset_event_from_row(row: &Row<'_>) -> rusqlite::Result<ResetRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_reset_row((id, timestamp, value, device_address, additional): ResetRow) -> ResetEvent {
    // A payload we can't read still records that a reset happened.
    let details = additional
        .as_deref()
        .and_then(|json| serde_json::from_str::<ResetDetails>(json).ok());
    let (cause, notes) = match details {
        Some(details) => (ResetCause::from_name(&details.cause), details.notes),
        None => (ResetCause::Unknown, None),
    };

    ResetEvent {
        id: Some(id),
        timestamp: from_millis(timestamp),
        previous_count: u32::try_from(value).unwrap_or(0),
        device_id: device_address,
        cause,
        notes,
    }
}

// Reset event operations
impl Store {
    /// Append a reset event. Returns the new row id.
    pub fn insert_reset_event(&self, event: &ResetEvent) -> Result<i64> {
        let details = serde_json::to_string(&ResetDetails {
            cause: event.cause.as_str().to_string(),
            notes: event.notes.clone(),
        })?;

        self.conn.execute(
            "INSERT INTO ble_event_logs (timestamp, event_type, value, device_address, additional)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                to_millis(event.timestamp),
                schema::RESET_EVENT_TYPE,
                event.previous_count,
                event.device_id,
                details,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(
            "Logged reset #{}: previous_count={}, cause={}",
            id, event.previous_count, event.cause
        );
        Ok(id)
    }

    /// Query reset events with filters.
    pub fn query_reset_events(&self, query: &ResetQuery) -> Result<Vec<ResetEvent>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_ref.as_slice(), reset_event_from_row)?
            .map(|row| row.map(decode_reset_row))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some(cause) = query.cause else {
            return Ok(events);
        };

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(events
            .into_iter()
            .filter(|e| e.cause == cause)
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// Reset events in `[from, to)`, oldest first.
    pub fn reset_events_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<ResetEvent>> {
        self.query_reset_events(&ResetQuery::new().since(from).before(to).oldest_first())
    }

    /// Reset events logged during a local calendar day.
    pub fn reset_events_on(&self, date: Date, offset: UtcOffset) -> Result<Vec<ResetEvent>> {
        let (start, end) = day_bounds(date, offset);
        self.reset_events_between(start, end)
    }

    /// Delete reset events older than `cutoff`.
    pub fn delete_events_before(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM ble_event_logs WHERE event_type = ?1 AND timestamp < ?2",
            params![schema::RESET_EVENT_TYPE, to_millis(cutoff)],
        )?;
        info!("Pruned {} reset event(s) older than {}", deleted, cutoff);
        Ok(deleted)
    }
}

/// Start and end instants of a local calendar day.
fn day_bounds(date: Date, offset: UtcOffset) -> (OffsetDateTime, OffsetDateTime) {
    let start = date.with_time(Time::MIDNIGHT).assume_offset(offset);
    let end = date
        .next_day()
        .map(|next| next.with_time(Time::MIDNIGHT).assume_offset(offset))
        .unwrap_or_else(|| start + time::Duration::DAY);
    (start, end)
}

// Aggregates
impl Store {
    /// Counter statistics over `[from, to]`, inclusive.
    pub fn statistics(&self, from: Date, to: Date) -> Result<CounterStatistics> {
        let records = self.query_records(&RecordQuery::new().since(from).until(to).oldest_first())?;
        Ok(CounterStatistics::from_records(&records))
    }

    /// Streaks of days with a non-zero total, relative to `today`.
    pub fn streak_info(&self, today: Date) -> Result<StreakInfo> {
        let mut stmt = self
            .conn
            .prepare("SELECT date FROM wish_counts WHERE total_count > 0 ORDER BY date")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let dates = keys
            .iter()
            .map(|key| parse_date(key))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(StreakInfo::from_active_dates(dates, today))
    }

    /// A day's record with its resets, or `None` if the day was never recorded.
    pub fn daily_summary(&self, date: Date, offset: UtcOffset) -> Result<Option<DailySummary>> {
        let Some(record) = self.get_record(date)? else {
            return Ok(None);
        };

        let resets = self.reset_events_on(date, offset)?;
        Ok(Some(DailySummary {
            record,
            reset_count: resets.len() as u32,
            lost_count: resets.iter().map(|e| u64::from(e.previous_count)).sum(),
        }))
    }

    /// Reset statistics for events at or after `since`.
    pub fn reset_statistics(&self, since: OffsetDateTime) -> Result<ResetStatistics> {
        let events = self.query_reset_events(&ResetQuery::new().since(since))?;
        Ok(ResetStatistics::from_events(&events))
    }
}
