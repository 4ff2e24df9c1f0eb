//! Core types for daily wish counting.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::WishError;

/// Highest total a single day can reach; increments beyond it are clamped.
pub const MAX_DAILY_COUNT: u32 = 99_999;

/// Maximum number of wishes tracked for one day.
pub const MAX_WISHES_PER_DAY: usize = 3;

/// Maximum wish text length in characters.
pub const MAX_WISH_TEXT_LEN: usize = 100;

/// Target used when no wish is configured.
pub const DEFAULT_TARGET_COUNT: u32 = 1000;

/// Wish text used when a day is created without prior configuration.
pub const DEFAULT_WISH_TEXT: &str = "I am growing every day.";

/// Battery percentage at or below which the ring is considered low.
pub const LOW_BATTERY_THRESHOLD: u8 = 15;

/// Battery percentage at or below which the ring is considered critical.
pub const CRITICAL_BATTERY_THRESHOLD: u8 = 5;

/// A single wish and its daily repetition target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct WishEntry {
    /// Stable identifier; generated when missing from stored data.
    #[cfg_attr(feature = "serde", serde(default = "Uuid::new_v4"))]
    pub id: Uuid,
    /// Free text of the wish.
    pub text: String,
    /// Repetitions required to complete the wish.
    pub target_count: u32,
    /// Day the wish was created, unknown for hand-written entries.
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            with = "crate::date::serde_date::option",
            skip_serializing_if = "Option::is_none"
        )
    )]
    pub created_at: Option<Date>,
}

impl WishEntry {
    /// Create a validated wish entry.
    pub fn new(
        text: impl Into<String>,
        target_count: u32,
        created_at: Date,
    ) -> Result<Self, WishError> {
        let entry = Self {
            id: Uuid::new_v4(),
            text: text.into().trim().to_string(),
            target_count,
            created_at: Some(created_at),
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Check that the text is non-blank, not too long, and the target positive.
    pub fn validate(&self) -> Result<(), WishError> {
        if self.text.trim().is_empty() {
            return Err(WishError::BlankText);
        }
        let len = self.text.chars().count();
        if len > MAX_WISH_TEXT_LEN {
            return Err(WishError::TextTooLong {
                len,
                max: MAX_WISH_TEXT_LEN,
            });
        }
        if self.target_count == 0 {
            return Err(WishError::ZeroTarget);
        }
        Ok(())
    }
}

/// Validate a full wish list for one day.
pub fn validate_wishes(wishes: &[WishEntry]) -> Result<(), WishError> {
    if wishes.len() > MAX_WISHES_PER_DAY {
        return Err(WishError::TooManyWishes {
            count: wishes.len(),
            max: MAX_WISHES_PER_DAY,
        });
    }
    wishes.iter().try_for_each(WishEntry::validate)
}

/// Clamp an active wish index into a list of `len` entries.
#[must_use]
pub fn clamp_wish_index(index: usize, len: usize) -> usize {
    if len == 0 { 0 } else { index.min(len - 1) }
}

/// Encode a wish list as the JSON stored in `wishes_json`.
#[cfg(feature = "serde")]
pub fn encode_wishes(wishes: &[WishEntry]) -> Result<String, crate::error::DecodeError> {
    serde_json::to_string(wishes)
        .map_err(|e| crate::error::DecodeError::InvalidWishList(e.to_string()))
}

/// Decode the JSON stored in `wishes_json`. Blank input decodes to an empty list.
#[cfg(feature = "serde")]
pub fn decode_wishes(json: &str) -> Result<Vec<WishEntry>, crate::error::DecodeError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).map_err(|e| crate::error::DecodeError::InvalidWishList(e.to_string()))
}

/// The authoritative counter for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DailyCounterRecord {
    /// Local calendar date this record belongs to.
    #[cfg_attr(feature = "serde", serde(with = "crate::date::serde_date"))]
    pub date: Date,
    /// Repetitions counted today, clamped to the daily maximum.
    pub total_count: u32,
    /// Wishes tracked today, in display order.
    pub wishes: Vec<WishEntry>,
    /// Index into `wishes` of the wish being counted.
    pub active_wish_index: usize,
    /// Target the total is measured against.
    pub target_count: u32,
    /// Whether `total_count` has reached `target_count`.
    pub is_completed: bool,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub created_at: OffsetDateTime,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub updated_at: OffsetDateTime,
}

impl DailyCounterRecord {
    /// Create an empty record for `date`.
    ///
    /// `fallback_target` is used as the target whenever the wish list is empty.
    pub fn new(
        date: Date,
        wishes: Vec<WishEntry>,
        active_wish_index: usize,
        fallback_target: u32,
        now: OffsetDateTime,
    ) -> Self {
        let mut record = Self {
            date,
            total_count: 0,
            active_wish_index: clamp_wish_index(active_wish_index, wishes.len()),
            wishes,
            target_count: fallback_target,
            is_completed: false,
            created_at: now,
            updated_at: now,
        };
        record.refresh_target(fallback_target);
        record
    }

    /// The wish currently being counted.
    pub fn active_wish(&self) -> Option<&WishEntry> {
        self.wishes.get(self.active_wish_index)
    }

    /// Text of the active wish, empty when there is none.
    pub fn wish_text(&self) -> &str {
        self.active_wish().map(|w| w.text.as_str()).unwrap_or("")
    }

    /// Add `amount` to the total, clamping to `max`.
    ///
    /// A total already above `max` is kept as is; the total never decreases.
    /// Returns the number of units actually applied.
    pub fn add(&mut self, amount: u32, max: u32, now: OffsetDateTime) -> u32 {
        let before = self.total_count;
        self.total_count = before.saturating_add(amount).min(max).max(before);
        self.touch(now);
        self.total_count.saturating_sub(before)
    }

    /// Zero the total.
    pub fn clear_total(&mut self, now: OffsetDateTime) {
        self.total_count = 0;
        self.touch(now);
    }

    /// Select the active wish. Returns `false` when the index is out of range.
    pub fn select_wish(&mut self, index: usize, now: OffsetDateTime) -> bool {
        if index >= self.wishes.len() {
            return false;
        }
        self.active_wish_index = index;
        self.refresh_target(self.target_count);
        self.touch(now);
        true
    }

    /// Replace the wish list, clamping the active index into it.
    pub fn replace_wishes(
        &mut self,
        wishes: Vec<WishEntry>,
        active_wish_index: usize,
        fallback_target: u32,
        now: OffsetDateTime,
    ) {
        self.active_wish_index = clamp_wish_index(active_wish_index, wishes.len());
        self.wishes = wishes;
        self.refresh_target(fallback_target);
        self.touch(now);
    }

    /// Progress towards the target in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        if self.target_count == 0 {
            return 0.0;
        }
        (self.total_count as f32 / self.target_count as f32).min(1.0)
    }

    fn refresh_target(&mut self, fallback_target: u32) {
        self.target_count = self
            .active_wish()
            .map(|w| w.target_count)
            .unwrap_or(fallback_target);
        self.is_completed = self.total_count >= self.target_count;
    }

    fn touch(&mut self, now: OffsetDateTime) {
        self.is_completed = self.total_count >= self.target_count;
        self.updated_at = now;
    }
}

/// Why a reset was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum ResetCause {
    /// The ring's reset button was pressed, or the user reset from the app.
    ManualButton,
    /// A new calendar day started.
    DailyRollover,
    /// The ring reset itself on low battery.
    LowBattery,
    /// The ring reset after an internal error.
    Error,
    /// Cause could not be determined.
    Unknown,
}

impl ResetCause {
    /// Stable name used in persisted payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualButton => "manual_button",
            Self::DailyRollover => "daily_rollover",
            Self::LowBattery => "low_battery",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a persisted name; anything unrecognized maps to [`ResetCause::Unknown`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "manual_button" | "manual" => Self::ManualButton,
            "daily_rollover" | "daily" | "midnight" => Self::DailyRollover,
            "low_battery" | "battery" => Self::LowBattery,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ResetCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much progress a reset discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ImpactLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    /// Classify a lost count.
    pub fn from_lost_count(count: u32) -> Self {
        match count {
            0 => Self::None,
            1..10 => Self::Low,
            10..50 => Self::Medium,
            50..100 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// An immutable log entry describing a counter reset.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResetEvent {
    /// Row id once persisted.
    pub id: Option<i64>,
    /// When the reset was observed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Count immediately before the reset.
    pub previous_count: u32,
    /// Address of the ring that reported it, if any.
    pub device_id: Option<String>,
    pub cause: ResetCause,
    /// Free-form note, e.g. the reason a user gave for a manual reset.
    pub notes: Option<String>,
}

impl ResetEvent {
    /// Create a new, not yet persisted, reset event.
    pub fn new(
        previous_count: u32,
        cause: ResetCause,
        device_id: Option<String>,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            previous_count,
            device_id,
            cause,
            notes: None,
        }
    }

    /// Attach a note.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Impact classification of the discarded count.
    pub fn impact(&self) -> ImpactLevel {
        ImpactLevel::from_lost_count(self.previous_count)
    }
}

/// A battery level reported by the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatteryReading {
    /// Percentage in `0..=100`.
    pub level: u8,
    pub device_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl BatteryReading {
    pub fn is_low(&self) -> bool {
        self.level <= LOW_BATTERY_THRESHOLD
    }

    pub fn is_critical(&self) -> bool {
        self.level <= CRITICAL_BATTERY_THRESHOLD
    }
}
