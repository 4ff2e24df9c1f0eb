//! Calendar date keys.
//!
//! Daily records are keyed by a local calendar date rendered as `YYYY-MM-DD`.

use time::{Date, OffsetDateTime};
use time::macros::format_description;

use crate::error::{DecodeError, DecodeResult};

/// Render a date as its storage key.
///
/// # Examples
///
/// ```
/// use time::macros::date;
/// use wishring_types::date::format_date;
///
/// assert_eq!(format_date(date!(2024 - 01 - 05)), "2024-01-05");
/// ```
#[must_use]
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parse a `YYYY-MM-DD` storage key.
pub fn parse_date(value: &str) -> DecodeResult<Date> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| DecodeError::InvalidDate(value.to_string()))
}

/// Milliseconds since the Unix epoch, the unit used by persisted timestamps.
#[must_use]
pub fn to_millis(timestamp: OffsetDateTime) -> i64 {
    (timestamp.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert persisted epoch milliseconds back to a UTC timestamp.
///
/// Out-of-range values saturate to the Unix epoch.
#[must_use]
pub fn from_millis(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Serde adapter storing a [`Date`] as a `YYYY-MM-DD` string.
#[cfg(feature = "serde")]
pub mod serde_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_date(&value).map_err(serde::de::Error::custom)
    }

    /// Same as the parent module, for optional dates.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;

        pub fn serialize<S: Serializer>(
            date: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => serializer.serialize_some(&crate::date::format_date(*date)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|value| crate::date::parse_date(&value).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn test_format_and_parse() {
        let day = date!(2024 - 01 - 15);
        assert_eq!(format_date(day), "2024-01-15");
        assert_eq!(parse_date("2024-01-15"), Ok(day));
        assert_eq!(parse_date(" 2024-01-15 "), Ok(day));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_date("15/01/2024"),
            Err(DecodeError::InvalidDate(_))
        ));
        assert!(parse_date("2024-02-30").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_millis_conversion() {
        let ts = datetime!(2022-01-15 00:00:00 UTC);
        assert_eq!(to_millis(ts), 1_642_204_800_000);
        assert_eq!(from_millis(1_642_204_800_000), ts);
        assert_eq!(from_millis(0), OffsetDateTime::UNIX_EPOCH);
    }
}
