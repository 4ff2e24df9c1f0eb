//! Wall-clock abstraction.
//!
//! The counter engine keys records by local calendar date, so it asks a
//! [`Clock`] for the time instead of reading the system clock directly.
//! Tests drive rollover with [`ManualClock`].

use std::sync::atomic::{AtomicI64, Ordering};

use time::{Date, Duration, OffsetDateTime, UtcOffset};

use wishring_types::date::{from_millis, to_millis};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time in the clock's local offset.
    fn now(&self) -> OffsetDateTime;

    /// Current local calendar date.
    fn today(&self) -> Date {
        self.now().date()
    }
}

/// The system clock in the local offset, or UTC when the offset is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
    offset: UtcOffset,
}

impl ManualClock {
    /// Create a clock frozen at `start`, reporting times in its offset.
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            millis: AtomicI64::new(to_millis(start)),
            offset: start.offset(),
        }
    }

    /// Jump to `time`.
    pub fn set(&self, time: OffsetDateTime) {
        self.millis.store(to_millis(time), Ordering::SeqCst);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.whole_milliseconds() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        from_millis(self.millis.load(Ordering::SeqCst)).to_offset(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2024-01-15 23:59 +9));
        assert_eq!(clock.today(), date!(2024 - 01 - 15));

        clock.advance(Duration::minutes(2));
        assert_eq!(clock.today(), date!(2024 - 01 - 16));
        assert_eq!(clock.now().offset(), time::macros::offset!(+9));
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(datetime!(2024-01-15 08:00 UTC));
        clock.set(datetime!(2024-03-01 12:00 UTC));
        assert_eq!(clock.now(), datetime!(2024-03-01 12:00 UTC));
    }

    #[test]
    fn test_system_clock_is_close_to_utc_now() {
        let now = SystemClock.now();
        let utc = OffsetDateTime::now_utc();
        assert!((utc - now).abs() < Duration::minutes(1));
    }
}
