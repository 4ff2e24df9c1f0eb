//! Local persistence for WishRing daily counters.
//!
//! This crate provides SQLite-based storage for daily counter records and the
//! reset event log, and migrates databases written by the legacy single-wish
//! layout.
//!
//! # Features
//!
//! - One record per local calendar day, keyed `YYYY-MM-DD`
//! - Up to three wishes per day, stored as a JSON list
//! - Append-only reset event log with age-based pruning
//! - Statistics, streaks and per-day summaries
//! - In-place migration from schema version 1
//!
//! # Example
//!
//! ```no_run
//! use wishring_store::{RecordQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! // Last week of records
//! let recent = store.query_records(&RecordQuery::new().limit(7))?;
//! # Ok::<(), wishring_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{CounterStatistics, DailySummary, ResetStatistics, StreakInfo};
pub use queries::{RecordQuery, ResetQuery};
pub use schema::{RESET_EVENT_TYPE, SCHEMA_VERSION};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/wishring/wishring.db`
/// - macOS: `~/Library/Application Support/wishring/wishring.db`
/// - Windows: `C:\Users\<user>\AppData\Local\wishring\wishring.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("wishring")
        .join("wishring.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_db_path() {
        let path = default_db_path();
        assert!(path.ends_with("wishring/wishring.db"));
    }
}
