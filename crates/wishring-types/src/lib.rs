//! Wire codec and data model for the WishRing counter ring.
//!
//! This crate has no I/O. It is shared by the link layer (wishring-core)
//! and the persistence layer (wishring-store).
//!
//! # Features
//!
//! - Fixed-layout codec for the counter, battery and reset characteristics
//! - UUID constants and advertising name matching
//! - Daily counter records, wish entries and reset events
//! - `YYYY-MM-DD` date keys and epoch-millisecond timestamps
//!
//! # Example
//!
//! ```
//! use wishring_types::codec::{decode_battery, decode_counter};
//!
//! assert_eq!(decode_counter(&[0, 0, 0, 42]), Ok(42));
//! assert_eq!(decode_battery(&[180]), Ok(100));
//! ```

pub mod codec;
pub mod date;
pub mod error;
pub mod types;
pub mod uuid;

pub use codec::{decode_battery, decode_counter, decode_reset, decode_reset_payload, encode_counter};
pub use error::{DecodeError, DecodeResult, WishError};
pub use types::{
    BatteryReading, CRITICAL_BATTERY_THRESHOLD, DEFAULT_TARGET_COUNT, DEFAULT_WISH_TEXT,
    DailyCounterRecord, ImpactLevel, LOW_BATTERY_THRESHOLD, MAX_DAILY_COUNT, MAX_WISH_TEXT_LEN,
    MAX_WISHES_PER_DAY, ResetCause, ResetEvent, WishEntry, clamp_wish_index, validate_wishes,
};
#[cfg(feature = "serde")]
pub use types::{decode_wishes, encode_wishes};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn wish(text: &str, target: u32) -> WishEntry {
        WishEntry::new(text, target, date!(2024 - 01 - 15)).unwrap()
    }

    // --- WishEntry tests ---

    #[test]
    fn test_wish_entry_trims_text() {
        let entry = wish("  keep going  ", 10);
        assert_eq!(entry.text, "keep going");
        assert_eq!(entry.created_at, Some(date!(2024 - 01 - 15)));
    }

    #[test]
    fn test_wish_entry_rejects_invalid() {
        let day = date!(2024 - 01 - 15);
        assert_eq!(WishEntry::new("   ", 10, day), Err(WishError::BlankText));
        assert_eq!(WishEntry::new("ok", 0, day), Err(WishError::ZeroTarget));
        let long = "x".repeat(MAX_WISH_TEXT_LEN + 1);
        assert!(matches!(
            WishEntry::new(long, 5, day),
            Err(WishError::TextTooLong { len: 101, max: 100 })
        ));
        // Length is counted in characters, not bytes.
        assert!(WishEntry::new("가".repeat(MAX_WISH_TEXT_LEN), 5, day).is_ok());
    }

    #[test]
    fn test_validate_wishes_limits_list() {
        let four = vec![wish("a", 1), wish("b", 1), wish("c", 1), wish("d", 1)];
        assert_eq!(
            validate_wishes(&four),
            Err(WishError::TooManyWishes { count: 4, max: 3 })
        );
        assert!(validate_wishes(&four[..3]).is_ok());
        assert!(validate_wishes(&[]).is_ok());
    }

    #[test]
    fn test_clamp_wish_index() {
        assert_eq!(clamp_wish_index(0, 0), 0);
        assert_eq!(clamp_wish_index(5, 0), 0);
        assert_eq!(clamp_wish_index(5, 3), 2);
        assert_eq!(clamp_wish_index(1, 3), 1);
    }

    // --- DailyCounterRecord tests ---

    #[test]
    fn test_record_targets_active_wish() {
        let now = datetime!(2024-01-15 08:00 UTC);
        let record = DailyCounterRecord::new(
            date!(2024 - 01 - 15),
            vec![wish("first", 10), wish("second", 20)],
            1,
            DEFAULT_TARGET_COUNT,
            now,
        );
        assert_eq!(record.target_count, 20);
        assert_eq!(record.wish_text(), "second");
        assert!(!record.is_completed);
    }

    #[test]
    fn test_record_without_wishes_uses_fallback_target() {
        let now = datetime!(2024-01-15 08:00 UTC);
        let record = DailyCounterRecord::new(date!(2024 - 01 - 15), Vec::new(), 4, 500, now);
        assert_eq!(record.active_wish_index, 0);
        assert_eq!(record.target_count, 500);
        assert_eq!(record.wish_text(), "");
    }

    #[test]
    fn test_record_add_clamps_and_completes() {
        let now = datetime!(2024-01-15 08:00 UTC);
        let later = datetime!(2024-01-15 09:00 UTC);
        let mut record =
            DailyCounterRecord::new(date!(2024 - 01 - 15), vec![wish("w", 3)], 0, 1000, now);

        assert_eq!(record.add(2, MAX_DAILY_COUNT, later), 2);
        assert!(!record.is_completed);
        assert_eq!(record.add(1, MAX_DAILY_COUNT, later), 1);
        assert!(record.is_completed);
        assert_eq!(record.updated_at, later);
        assert_eq!(record.created_at, now);

        assert_eq!(record.add(u32::MAX, MAX_DAILY_COUNT, later), MAX_DAILY_COUNT - 3);
        assert_eq!(record.total_count, MAX_DAILY_COUNT);
        assert_eq!(record.add(1, MAX_DAILY_COUNT, later), 0);
    }

    #[test]
    fn test_record_add_never_lowers_total() {
        let now = datetime!(2024-01-15 08:00 UTC);
        let mut record =
            DailyCounterRecord::new(date!(2024 - 01 - 15), vec![wish("w", 1000)], 0, 1000, now);
        assert_eq!(record.add(500, MAX_DAILY_COUNT, now), 500);

        // The ceiling was lowered below today's total.
        assert_eq!(record.add(1, 100, now), 0);
        assert_eq!(record.total_count, 500);
        assert_eq!(record.add(1, 500, now), 0);
        assert_eq!(record.add(1, 501, now), 1);
        assert_eq!(record.total_count, 501);
    }

    #[test]
    fn test_record_select_wish() {
        let now = datetime!(2024-01-15 08:00 UTC);
        let mut record = DailyCounterRecord::new(
            date!(2024 - 01 - 15),
            vec![wish("small", 5), wish("big", 50)],
            0,
            1000,
            now,
        );
        record.add(10, MAX_DAILY_COUNT, now);
        assert!(record.is_completed);

        assert!(record.select_wish(1, now));
        assert_eq!(record.target_count, 50);
        assert!(!record.is_completed);
        assert_eq!(record.total_count, 10);

        assert!(!record.select_wish(2, now));
        assert_eq!(record.active_wish_index, 1);
    }

    #[test]
    fn test_record_replace_wishes_clamps_index() {
        let now = datetime!(2024-01-15 08:00 UTC);
        let mut record = DailyCounterRecord::new(date!(2024 - 01 - 15), Vec::new(), 0, 1000, now);
        record.replace_wishes(vec![wish("only", 7)], 2, 1000, now);
        assert_eq!(record.active_wish_index, 0);
        assert_eq!(record.target_count, 7);

        record.replace_wishes(Vec::new(), 0, 1000, now);
        assert_eq!(record.target_count, 1000);
    }

    // --- Reset tests ---

    #[test]
    fn test_impact_levels() {
        assert_eq!(ImpactLevel::from_lost_count(0), ImpactLevel::None);
        assert_eq!(ImpactLevel::from_lost_count(9), ImpactLevel::Low);
        assert_eq!(ImpactLevel::from_lost_count(10), ImpactLevel::Medium);
        assert_eq!(ImpactLevel::from_lost_count(49), ImpactLevel::Medium);
        assert_eq!(ImpactLevel::from_lost_count(99), ImpactLevel::High);
        assert_eq!(ImpactLevel::from_lost_count(100), ImpactLevel::Critical);
    }

    #[test]
    fn test_reset_cause_names() {
        for cause in [
            ResetCause::ManualButton,
            ResetCause::DailyRollover,
            ResetCause::LowBattery,
            ResetCause::Error,
            ResetCause::Unknown,
        ] {
            assert_eq!(ResetCause::from_name(cause.as_str()), cause);
        }
        assert_eq!(ResetCause::from_name("MIDNIGHT".to_lowercase().as_str()), ResetCause::DailyRollover);
        assert_eq!(ResetCause::from_name("cosmic_ray"), ResetCause::Unknown);
    }

    #[test]
    fn test_battery_thresholds() {
        let reading = |level| BatteryReading {
            level,
            device_id: None,
            timestamp: datetime!(2024-01-15 08:00 UTC),
        };
        assert!(!reading(16).is_low());
        assert!(reading(15).is_low());
        assert!(!reading(15).is_critical());
        assert!(reading(5).is_critical());
    }

    // --- Serialization tests ---

    #[test]
    fn test_wish_json_shape() {
        let json = encode_wishes(&[wish("My first wish", 1000)]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["text"], "My first wish");
        assert_eq!(value[0]["targetCount"], 1000);
        assert_eq!(value[0]["createdAt"], "2024-01-15");
        assert!(value[0]["id"].is_string());
    }

    #[test]
    fn test_decode_wishes_accepts_minimal_entries() {
        let wishes = decode_wishes(r#"[{"text":"My first wish","targetCount":1000}]"#).unwrap();
        assert_eq!(wishes.len(), 1);
        assert_eq!(wishes[0].text, "My first wish");
        assert_eq!(wishes[0].target_count, 1000);
        assert_eq!(wishes[0].created_at, None);

        assert!(decode_wishes("[]").unwrap().is_empty());
        assert!(decode_wishes("").unwrap().is_empty());
        assert!(matches!(
            decode_wishes("{not json"),
            Err(DecodeError::InvalidWishList(_))
        ));
    }

    #[test]
    fn test_reset_cause_serialization() {
        assert_eq!(
            serde_json::to_string(&ResetCause::ManualButton).unwrap(),
            "\"manual_button\""
        );
        assert_eq!(
            serde_json::to_string(&ImpactLevel::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let now = datetime!(2024-01-15 08:00 UTC);
        let record =
            DailyCounterRecord::new(date!(2024 - 01 - 15), vec![wish("w", 3)], 0, 1000, now);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"date\":\"2024-01-15\""));
        let back: DailyCounterRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
