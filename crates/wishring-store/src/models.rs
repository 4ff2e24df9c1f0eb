//! Derived read models computed from stored days and reset events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use wishring_types::{DailyCounterRecord, ImpactLevel};

/// A day's record together with the resets logged on that day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub record: DailyCounterRecord,
    /// Number of reset events logged during the day.
    pub reset_count: u32,
    /// Sum of the counts discarded by those resets.
    pub lost_count: u64,
}

/// Aggregate figures over a range of days.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterStatistics {
    pub total_days: u32,
    pub completed_days: u32,
    pub total_count: u64,
    pub total_target: u64,
    pub average_count: f64,
    pub average_target: f64,
    /// Fraction of days completed, in `0.0..=1.0`.
    pub completion_rate: f64,
    /// Day with the highest total.
    pub best_day: Option<DailyCounterRecord>,
    /// Day with the lowest non-zero total.
    pub worst_day: Option<DailyCounterRecord>,
}

impl CounterStatistics {
    /// Compute statistics over a set of records.
    pub fn from_records(records: &[DailyCounterRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let total_days = records.len() as u32;
        let completed_days = records.iter().filter(|r| r.is_completed).count() as u32;
        let total_count: u64 = records.iter().map(|r| u64::from(r.total_count)).sum();
        let total_target: u64 = records.iter().map(|r| u64::from(r.target_count)).sum();
        let days = f64::from(total_days);

        Self {
            total_days,
            completed_days,
            total_count,
            total_target,
            average_count: total_count as f64 / days,
            average_target: total_target as f64 / days,
            completion_rate: f64::from(completed_days) / days,
            best_day: records.iter().max_by_key(|r| r.total_count).cloned(),
            worst_day: records
                .iter()
                .filter(|r| r.total_count > 0)
                .min_by_key(|r| r.total_count)
                .cloned(),
        }
    }
}

/// Consecutive-day activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakInfo {
    /// Active days in a row ending today, or yesterday if today is still empty.
    pub current_streak: u32,
    pub best_streak: u32,
    #[serde(default, with = "wishring_types::date::serde_date::option")]
    pub last_active_date: Option<Date>,
    #[serde(default, with = "wishring_types::date::serde_date::option")]
    pub streak_start_date: Option<Date>,
    pub is_active_today: bool,
}

impl StreakInfo {
    /// Compute streaks from the dates that had a non-zero total.
    pub fn from_active_dates(mut active: Vec<Date>, today: Date) -> Self {
        active.sort_unstable();
        active.dedup();

        let Some(&last_active) = active.last() else {
            return Self::default();
        };
        let is_active_today = last_active == today;

        let mut best_streak = 0;
        let mut run = 0;
        let mut previous: Option<Date> = None;
        for &day in &active {
            run = match previous {
                Some(prev) if prev.next_day() == Some(day) => run + 1,
                _ => 1,
            };
            best_streak = best_streak.max(run);
            previous = Some(day);
        }

        let mut current_streak = 0;
        let mut streak_start_date = None;
        let mut expected = if is_active_today {
            Some(today)
        } else {
            today.previous_day()
        };
        for &day in active.iter().rev() {
            if Some(day) != expected {
                break;
            }
            current_streak += 1;
            streak_start_date = Some(day);
            expected = day.previous_day();
        }

        Self {
            current_streak,
            best_streak,
            last_active_date: Some(last_active),
            streak_start_date,
            is_active_today,
        }
    }
}

/// Aggregate figures over logged resets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetStatistics {
    pub total_resets: u32,
    pub total_lost: u64,
    pub average_lost: f64,
    pub max_lost: u32,
    /// Number of resets per cause name.
    pub by_cause: BTreeMap<String, u32>,
    /// Worst impact among the resets, if any.
    pub highest_impact: Option<ImpactLevel>,
}

impl ResetStatistics {
    pub fn from_events(events: &[wishring_types::ResetEvent]) -> Self {
        if events.is_empty() {
            return Self::default();
        }

        let mut by_cause = BTreeMap::new();
        for event in events {
            *by_cause.entry(event.cause.as_str().to_string()).or_insert(0) += 1;
        }
        let total_lost: u64 = events.iter().map(|e| u64::from(e.previous_count)).sum();

        Self {
            total_resets: events.len() as u32,
            total_lost,
            average_lost: total_lost as f64 / events.len() as f64,
            max_lost: events.iter().map(|e| e.previous_count).max().unwrap_or(0),
            by_cause,
            highest_impact: events.iter().map(|e| e.impact()).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};
    use wishring_types::{ResetCause, ResetEvent};

    fn record(day: Date, total: u32, target: u32) -> DailyCounterRecord {
        let now = datetime!(2024-01-15 08:00 UTC);
        let mut record = DailyCounterRecord::new(day, Vec::new(), 0, target, now);
        record.add(total, u32::MAX, now);
        record
    }

    #[test]
    fn test_statistics_empty() {
        let stats = CounterStatistics::from_records(&[]);
        assert_eq!(stats.total_days, 0);
        assert!(stats.best_day.is_none());
    }

    #[test]
    fn test_statistics() {
        let records = vec![
            record(date!(2024 - 01 - 01), 0, 10),
            record(date!(2024 - 01 - 02), 10, 10),
            record(date!(2024 - 01 - 03), 4, 10),
            record(date!(2024 - 01 - 04), 30, 10),
        ];
        let stats = CounterStatistics::from_records(&records);

        assert_eq!(stats.total_days, 4);
        assert_eq!(stats.completed_days, 2);
        assert_eq!(stats.total_count, 44);
        assert_eq!(stats.total_target, 40);
        assert!((stats.average_count - 11.0).abs() < f64::EPSILON);
        assert!((stats.completion_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.best_day.unwrap().date, date!(2024 - 01 - 04));
        assert_eq!(stats.worst_day.unwrap().date, date!(2024 - 01 - 03));
    }

    #[test]
    fn test_streak_active_today() {
        let today = date!(2024 - 01 - 10);
        let streak = StreakInfo::from_active_dates(
            vec![
                date!(2024 - 01 - 10),
                date!(2024 - 01 - 09),
                date!(2024 - 01 - 08),
                date!(2024 - 01 - 05),
                date!(2024 - 01 - 04),
            ],
            today,
        );
        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.best_streak, 3);
        assert!(streak.is_active_today);
        assert_eq!(streak.streak_start_date, Some(date!(2024 - 01 - 08)));
        assert_eq!(streak.last_active_date, Some(today));
    }

    #[test]
    fn test_streak_continues_from_yesterday() {
        let today = date!(2024 - 01 - 10);
        let streak = StreakInfo::from_active_dates(
            vec![date!(2024 - 01 - 09), date!(2024 - 01 - 08)],
            today,
        );
        assert_eq!(streak.current_streak, 2);
        assert!(!streak.is_active_today);
    }

    #[test]
    fn test_streak_broken() {
        let today = date!(2024 - 01 - 10);
        let streak = StreakInfo::from_active_dates(
            vec![
                date!(2024 - 01 - 01),
                date!(2024 - 01 - 02),
                date!(2024 - 01 - 03),
                date!(2024 - 01 - 04),
                date!(2024 - 01 - 07),
            ],
            today,
        );
        assert_eq!(streak.current_streak, 0);
        assert_eq!(streak.best_streak, 4);
        assert_eq!(streak.streak_start_date, None);
        assert_eq!(streak.last_active_date, Some(date!(2024 - 01 - 07)));
    }

    #[test]
    fn test_streak_empty() {
        assert_eq!(
            StreakInfo::from_active_dates(Vec::new(), date!(2024 - 01 - 10)),
            StreakInfo::default()
        );
    }

    #[test]
    fn test_reset_statistics() {
        let at = datetime!(2024-01-15 08:00 UTC);
        let events = vec![
            ResetEvent::new(5, ResetCause::ManualButton, None, at),
            ResetEvent::new(120, ResetCause::LowBattery, None, at),
            ResetEvent::new(0, ResetCause::ManualButton, None, at),
        ];
        let stats = ResetStatistics::from_events(&events);
        assert_eq!(stats.total_resets, 3);
        assert_eq!(stats.total_lost, 125);
        assert_eq!(stats.max_lost, 120);
        assert_eq!(stats.by_cause["manual_button"], 2);
        assert_eq!(stats.by_cause["low_battery"], 1);
        assert_eq!(stats.highest_impact, Some(ImpactLevel::Critical));
    }
}
