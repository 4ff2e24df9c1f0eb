//! JSON views printed by the CLI subcommands.

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use wishring_core::{CounterEngine, DailyCounterRecord, Result};
use wishring_store::{CounterStatistics, RecordQuery, ResetStatistics, StreakInfo};

/// Today's record with the current streak.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub date: String,
    pub total_count: u32,
    pub target_count: u32,
    pub is_completed: bool,
    pub active_wish_index: usize,
    pub active_wish: String,
    pub wishes: Vec<String>,
    pub streak: StreakInfo,
}

impl StatusReport {
    pub async fn collect(engine: &CounterEngine) -> Result<Self> {
        let record = engine.today().await?;
        let streak = engine.streak().await?;

        Ok(Self {
            date: record.date.to_string(),
            total_count: record.total_count,
            target_count: record.target_count,
            is_completed: record.is_completed,
            active_wish_index: record.active_wish_index,
            active_wish: record.wish_text().to_string(),
            wishes: record.wishes.iter().map(|w| w.text.clone()).collect(),
            streak,
        })
    }
}

/// Counter and reset statistics over the last `days` days.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub from: String,
    pub to: String,
    pub counter: CounterStatistics,
    pub resets: ResetStatistics,
}

impl StatsReport {
    pub async fn collect(engine: &CounterEngine, days: u32) -> Result<Self> {
        let to = engine.today().await?.date;
        let from = to - Duration::days(i64::from(days.saturating_sub(1)));
        let since = OffsetDateTime::now_utc() - Duration::days(i64::from(days));

        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            counter: engine.statistics(from, to).await?,
            resets: engine.reset_statistics(since).await?,
        })
    }
}

/// Records for the last `days` days, newest first.
pub async fn recent_history(engine: &CounterEngine, days: u32) -> Result<Vec<DailyCounterRecord>> {
    let today = engine.today().await?.date;
    let since = today - Duration::days(i64::from(days.saturating_sub(1)));
    engine.history(&RecordQuery::new().since(since)).await
}
