//! Counter reconciliation engine.
//!
//! The [`CounterEngine`] owns the [`Store`] and is the only writer of daily
//! records and reset events. Device-derived events and in-app calls go
//! through the same methods, and every read-modify-write runs under one
//! `tokio::sync::Mutex`, so concurrent increments are applied one at a time
//! in arrival order.
//!
//! Records are keyed by the local calendar date reported by the engine's
//! [`Clock`]. There is no midnight timer: the first operation on a new date
//! creates that day's record, copying the wish list from the latest earlier
//! day.
//!
//! # Broadcast Channel Behavior
//!
//! Resets, updated records and battery readings are published on broadcast
//! channels after they are persisted. A subscriber that falls behind loses
//! the oldest messages; senders never block.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime, Time, UtcOffset};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use wishring_store::{
    CounterStatistics, DailySummary, RecordQuery, ResetStatistics, Store, StreakInfo,
};
use wishring_types::{
    BatteryReading, DEFAULT_TARGET_COUNT, DEFAULT_WISH_TEXT, DailyCounterRecord, MAX_DAILY_COUNT,
    ResetCause, ResetEvent, WishEntry, validate_wishes,
};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, RingEvent};

/// Default retention window for reset events.
pub const DEFAULT_RESET_RETENTION: Duration = Duration::days(30);

/// What a reset signal from the ring does to today's total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Log the reset and leave the total alone.
    #[default]
    LogOnly,
    /// Log the reset and zero today's total.
    LogAndZero,
}

/// Where an increment came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementSource {
    /// A tap in the app or CLI.
    App,
    /// A unit reported by a ring.
    Device { device_id: String },
}

impl fmt::Display for IncrementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => write!(f, "app"),
            Self::Device { device_id } => write!(f, "device {}", device_id),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Wish text for a day with no earlier record to copy from.
    pub default_wish_text: String,
    /// Target used when a day has no wishes.
    pub default_target: u32,
    /// Daily totals are clamped to this value.
    pub max_daily_count: u32,
    pub reset_policy: ResetPolicy,
    /// Retention window for reset events.
    pub reset_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_wish_text: DEFAULT_WISH_TEXT.to_string(),
            default_target: DEFAULT_TARGET_COUNT,
            max_daily_count: MAX_DAILY_COUNT,
            reset_policy: ResetPolicy::default(),
            reset_retention: DEFAULT_RESET_RETENTION,
        }
    }
}

impl EngineConfig {
    /// Check that targets and limits are usable.
    pub fn validate(&self) -> Result<()> {
        if self.default_target == 0 {
            return Err(Error::invalid_config("default_target must be > 0"));
        }
        if self.max_daily_count == 0 || self.max_daily_count > MAX_DAILY_COUNT {
            return Err(Error::invalid_config(format!(
                "max_daily_count must be in 1..={}",
                MAX_DAILY_COUNT
            )));
        }
        if self.reset_retention.is_negative() {
            return Err(Error::invalid_config("reset_retention must not be negative"));
        }
        Ok(())
    }
}

struct EngineState {
    store: Store,
    /// Record of the date the engine last worked on.
    current: Option<DailyCounterRecord>,
    /// Last battery level reported by a ring.
    battery: Option<u8>,
}

/// Serializes all counter mutations against the store.
pub struct CounterEngine {
    state: Mutex<EngineState>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    resets: EventDispatcher<ResetEvent>,
    records: EventDispatcher<DailyCounterRecord>,
    battery: EventDispatcher<BatteryReading>,
}

impl fmt::Debug for CounterEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CounterEngine {
    /// Create an engine on the system clock.
    pub fn new(store: Store, config: EngineConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create an engine on a specific clock.
    pub fn with_clock(store: Store, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(EngineState {
                store,
                current: None,
                battery: None,
            }),
            clock,
            config,
            resets: EventDispatcher::default(),
            records: EventDispatcher::default(),
            battery: EventDispatcher::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to persisted reset events.
    pub fn subscribe_resets(&self) -> broadcast::Receiver<ResetEvent> {
        self.resets.subscribe()
    }

    /// Subscribe to records as they are saved.
    pub fn subscribe_records(&self) -> broadcast::Receiver<DailyCounterRecord> {
        self.records.subscribe()
    }

    /// Subscribe to battery readings from the ring.
    pub fn subscribe_battery(&self) -> broadcast::Receiver<BatteryReading> {
        self.battery.subscribe()
    }

    /// Add `amount` to today's total.
    ///
    /// Fails with [`Error::InvalidAmount`] when `amount < 1`. The total is
    /// clamped to the configured maximum.
    pub async fn increment(&self, amount: i64, source: IncrementSource) -> Result<DailyCounterRecord> {
        if amount < 1 {
            return Err(Error::InvalidAmount(amount));
        }
        let units = u32::try_from(amount).unwrap_or(u32::MAX);

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut record = self.load_today(&mut state, now)?;

        let applied = record.add(units, self.config.max_daily_count, now);
        if applied < units {
            debug!(
                "Daily total clamped at {} ({} of {} applied)",
                self.config.max_daily_count, applied, units
            );
        }
        debug!("Increment +{} from {} -> {}", applied, source, record.total_count);

        self.commit(&mut state, record)
    }

    /// Make `index` the active wish for today.
    ///
    /// The total is unchanged; completion is recomputed against the new
    /// target.
    pub async fn switch_active_wish(&self, index: usize) -> Result<DailyCounterRecord> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut record = self.load_today(&mut state, now)?;

        if !record.select_wish(index, now) {
            return Err(Error::index_out_of_range(index, record.wishes.len()));
        }
        info!("Active wish switched to {} ({})", index, record.wish_text());
        self.commit(&mut state, record)
    }

    /// Today's active wish index.
    pub async fn active_wish_index(&self) -> Result<usize> {
        Ok(self.today().await?.active_wish_index)
    }

    /// Replace today's wish list.
    pub async fn set_wishes(
        &self,
        wishes: Vec<WishEntry>,
        active_index: usize,
    ) -> Result<DailyCounterRecord> {
        validate_wishes(&wishes)?;

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut record = self.load_today(&mut state, now)?;

        record.replace_wishes(wishes, active_index, self.config.default_target, now);
        info!("Wish list replaced ({} wish(es))", record.wishes.len());
        self.commit(&mut state, record)
    }

    /// Log a reset reported for `device_id`.
    ///
    /// Under [`ResetPolicy::LogOnly`] today's total is not touched.
    pub async fn handle_reset_event(
        &self,
        previous_count: u32,
        cause: ResetCause,
        device_id: Option<String>,
    ) -> Result<ResetEvent> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut record = self.load_today(&mut state, now)?;

        let event = self.log_reset(
            &mut state,
            ResetEvent::new(previous_count, cause, device_id, now),
        )?;

        if self.config.reset_policy == ResetPolicy::LogAndZero {
            record.clear_total(now);
            self.commit(&mut state, record)?;
        }
        Ok(event)
    }

    /// Zero today's total, logging the discarded count as a manual reset.
    pub async fn reset_today(&self, notes: Option<String>) -> Result<DailyCounterRecord> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut record = self.load_today(&mut state, now)?;

        let mut event = ResetEvent::new(record.total_count, ResetCause::ManualButton, None, now);
        if let Some(notes) = notes {
            event = event.with_notes(notes);
        }
        self.log_reset(&mut state, event)?;

        record.clear_total(now);
        self.commit(&mut state, record)
    }

    /// Apply one event decoded from the ring.
    pub async fn apply(&self, event: RingEvent) -> Result<()> {
        match event {
            RingEvent::Increment { device_id } => {
                self.increment(1, IncrementSource::Device { device_id })
                    .await?;
            }
            RingEvent::Reset {
                device_id,
                previous_count,
            } => {
                let cause = self.device_reset_cause().await;
                self.handle_reset_event(previous_count, cause, Some(device_id))
                    .await?;
            }
            RingEvent::Battery {
                reading, critical, ..
            } => {
                if critical {
                    warn!("Ring battery critical: {}%", reading.level);
                }
                self.state.lock().await.battery = Some(reading.level);
                self.battery.send(reading);
            }
        }
        Ok(())
    }

    /// A reset arriving while the battery is critical is attributed to it.
    async fn device_reset_cause(&self) -> ResetCause {
        let state = self.state.lock().await;
        match state.battery {
            Some(level) if level <= wishring_types::CRITICAL_BATTERY_THRESHOLD => {
                ResetCause::LowBattery
            }
            _ => ResetCause::ManualButton,
        }
    }

    /// Today's record, created if needed.
    pub async fn today(&self) -> Result<DailyCounterRecord> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        self.load_today(&mut state, now)
    }

    /// A day's record with its resets.
    pub async fn daily_summary(&self, date: Date) -> Result<Option<DailySummary>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        self.load_today(&mut state, now)?;
        Ok(state.store.daily_summary(date, now.offset())?)
    }

    /// Stored records matching `query`.
    pub async fn history(&self, query: &RecordQuery) -> Result<Vec<DailyCounterRecord>> {
        let state = self.state.lock().await;
        Ok(state.store.query_records(query)?)
    }

    /// Statistics over `[from, to]`.
    pub async fn statistics(&self, from: Date, to: Date) -> Result<CounterStatistics> {
        let state = self.state.lock().await;
        Ok(state.store.statistics(from, to)?)
    }

    /// Current and best streak of active days.
    pub async fn streak(&self) -> Result<StreakInfo> {
        let today = self.clock.today();
        let state = self.state.lock().await;
        Ok(state.store.streak_info(today)?)
    }

    /// Reset statistics since `since`.
    pub async fn reset_statistics(&self, since: OffsetDateTime) -> Result<ResetStatistics> {
        let state = self.state.lock().await;
        Ok(state.store.reset_statistics(since)?)
    }

    /// Delete reset events older than `retention`.
    pub async fn prune_reset_events(&self, retention: Duration) -> Result<usize> {
        let cutoff = self.clock.now() - retention;
        let state = self.state.lock().await;
        Ok(state.store.delete_events_before(cutoff)?)
    }

    /// Delete records for days before `date`.
    pub async fn delete_records_before(&self, date: Date) -> Result<usize> {
        let mut state = self.state.lock().await;
        let deleted = state.store.delete_records_before(date)?;
        if state.current.as_ref().is_some_and(|r| r.date < date) {
            state.current = None;
        }
        Ok(deleted)
    }

    /// Delete every record and reset event.
    pub async fn clear_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.store.clear_all()?;
        state.current = None;
        warn!("All counter data cleared");
        Ok(())
    }

    /// Today's record, rolling over from the previous day if the date moved.
    ///
    /// The rollover is derived from the store, not from what this process
    /// last saw, so a restart across midnight still closes the previous day.
    /// Its reset event is filed on the last millisecond of that day.
    fn load_today(&self, state: &mut EngineState, now: OffsetDateTime) -> Result<DailyCounterRecord> {
        let today = now.date();
        if let Some(ref record) = state.current
            && record.date == today
        {
            return Ok(record.clone());
        }

        let record = match state.store.get_record(today)? {
            Some(record) => record,
            None => {
                let previous = state.store.latest_record_before(today)?;
                let record = self.new_day(previous.as_ref(), today, now);
                let rollover = previous.filter(|p| p.total_count > 0).map(|p| {
                    ResetEvent::new(
                        p.total_count,
                        ResetCause::DailyRollover,
                        None,
                        end_of_day(p.date, now.offset()),
                    )
                });

                let id = state.store.start_day(&record, rollover.as_ref())?;
                info!("Started counter for {}", today);
                if let Some(mut event) = rollover {
                    event.id = id;
                    self.announce_reset(&event);
                }
                record
            }
        };

        state.current = Some(record.clone());
        Ok(record)
    }

    /// An empty record for `today`, inheriting `template`'s wishes.
    fn new_day(
        &self,
        template: Option<&DailyCounterRecord>,
        today: Date,
        now: OffsetDateTime,
    ) -> DailyCounterRecord {
        let (wishes, active) = match template {
            Some(template) => (template.wishes.clone(), template.active_wish_index),
            None => {
                let wish = WishEntry::new(
                    self.config.default_wish_text.as_str(),
                    self.config.default_target,
                    today,
                );
                (wish.into_iter().collect(), 0)
            }
        };
        DailyCounterRecord::new(today, wishes, active, self.config.default_target, now)
    }

    fn log_reset(&self, state: &mut EngineState, mut event: ResetEvent) -> Result<ResetEvent> {
        event.id = Some(state.store.insert_reset_event(&event)?);
        self.announce_reset(&event);
        Ok(event)
    }

    fn announce_reset(&self, event: &ResetEvent) {
        info!(
            "Reset logged: {} lost {} ({:?} impact)",
            event.cause.as_str(),
            event.previous_count,
            event.impact()
        );
        self.resets.send(event.clone());
    }

    fn commit(&self, state: &mut EngineState, record: DailyCounterRecord) -> Result<DailyCounterRecord> {
        state.store.save_record(&record)?;
        state.current = Some(record.clone());
        self.records.send(record.clone());
        Ok(record)
    }
}

/// Last millisecond of `date` at `offset`.
fn end_of_day(date: Date, offset: UtcOffset) -> OffsetDateTime {
    date.with_time(Time::MIDNIGHT).assume_offset(offset) + Duration::DAY
        - Duration::milliseconds(1)
}
