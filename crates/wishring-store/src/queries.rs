//! Query builders for daily records and reset events.
//!
//! Both builders follow the same fluent style. All filters are optional and
//! results default to newest first.
//!
//! # Example
//!
//! ```
//! use wishring_store::{RecordQuery, ResetQuery, Store};
//! use time::macros::date;
//!
//! let store = Store::open_in_memory()?;
//!
//! let january = RecordQuery::new()
//!     .since(date!(2024 - 01 - 01))
//!     .until(date!(2024 - 01 - 31))
//!     .oldest_first();
//! let days = store.query_records(&january)?;
//!
//! let resets = store.query_reset_events(&ResetQuery::new().limit(20))?;
//! # Ok::<(), wishring_store::Error>(())
//! ```

use time::{Date, OffsetDateTime};

use wishring_types::ResetCause;
use wishring_types::date::{format_date, to_millis};

/// Fluent query builder for daily records.
#[derive(Debug, Default, Clone)]
pub struct RecordQuery {
    /// Include only days on or after this date.
    pub since: Option<Date>,
    /// Include only days on or before this date.
    pub until: Option<Date>,
    /// Include only days whose target was reached.
    pub completed_only: bool,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by date descending (newest first).
    pub newest_first: bool,
}

impl RecordQuery {
    /// Create a new query returning every day, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter to days on or after this date.
    pub fn since(mut self, date: Date) -> Self {
        self.since = Some(date);
        self
    }

    /// Filter to days on or before this date.
    pub fn until(mut self, date: Date) -> Self {
        self.until = Some(date);
        self
    }

    /// Only days whose target was reached.
    pub fn completed_only(mut self) -> Self {
        self.completed_only = true;
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results chronologically.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(since) = self.since {
            conditions.push("date >= ?");
            params.push(Box::new(format_date(since)));
        }

        if let Some(until) = self.until {
            conditions.push("date <= ?");
            params.push(Box::new(format_date(until)));
        }

        if self.completed_only {
            conditions.push("is_completed = 1");
        }

        (where_clause(&conditions), params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT {} FROM wish_counts {} ORDER BY date {}",
            crate::store::RECORD_COLUMNS,
            where_clause,
            order
        );
        push_pagination(&mut sql, self.limit, self.offset);
        sql
    }
}

/// Fluent query builder for logged reset events.
#[derive(Debug, Default, Clone)]
pub struct ResetQuery {
    /// Include only events at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include only events strictly before this time.
    pub before: Option<OffsetDateTime>,
    /// Filter by reporting device.
    pub device_id: Option<String>,
    /// Filter by cause.
    pub cause: Option<ResetCause>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub newest_first: bool,
}

impl ResetQuery {
    /// Create a new query returning every reset, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn before(mut self, time: OffsetDateTime) -> Self {
        self.before = Some(time);
        self
    }

    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    /// Filter by cause. Applied after decoding, since the cause lives in the
    /// JSON payload column.
    pub fn cause(mut self, cause: ResetCause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = vec!["event_type = ?"];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(crate::schema::RESET_EVENT_TYPE)];

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(before) = self.before {
            conditions.push("timestamp < ?");
            params.push(Box::new(to_millis(before)));
        }

        if let Some(ref device_id) = self.device_id {
            conditions.push("device_address = ?");
            params.push(Box::new(device_id.clone()));
        }

        (where_clause(&conditions), params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, timestamp, value, device_address, additional \
             FROM ble_event_logs {} ORDER BY timestamp {}, id {}",
            where_clause, order, order
        );
        // A cause filter is applied in Rust, so SQL pagination would skip rows
        // that never reach it.
        if self.cause.is_none() {
            push_pagination(&mut sql, self.limit, self.offset);
        }
        sql
    }
}

fn where_clause(conditions: &[&str]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

fn push_pagination(sql: &mut String, limit: Option<u32>, offset: Option<u32>) {
    match (limit, offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
        // SQLite requires a LIMIT before OFFSET.
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
        (None, None) => {}
    }
}
