//! Protocol adapter: raw notifications in, domain events out.
//!
//! Counter notifications carry the ring's running total. The adapter keeps
//! the last accepted raw value as a baseline and turns each increase into
//! that many unit [`RingEvent::Increment`]s, so the engine applies device
//! taps exactly like in-app taps. A value at or below the baseline emits
//! nothing; the first value of a session with no baseline only primes it.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use wishring_types::uuids::{BATTERY, COUNTER, RESET};
use wishring_types::{BatteryReading, MAX_DAILY_COUNT, decode_battery, decode_counter, decode_reset_payload};

use crate::events::RingEvent;
use crate::link::LinkState;
use crate::traits::Notification;

/// Connection state as seen by consumers of the sync service.
///
/// `ServicesDiscovered` and `Ready` both report as [`ConnectionState::Connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Error,
}

impl From<&LinkState> for ConnectionState {
    fn from(state: &LinkState) -> Self {
        match state {
            LinkState::Disconnected => Self::Disconnected,
            LinkState::Scanning => Self::Scanning,
            LinkState::Connecting => Self::Connecting,
            LinkState::Connected | LinkState::ServicesDiscovered | LinkState::Ready => {
                Self::Connected
            }
            LinkState::Error(_) => Self::Error,
        }
    }
}

/// Per-session decoding state.
#[derive(Debug, Clone)]
pub struct ProtocolAdapter {
    device_id: String,
    baseline: Option<u32>,
    battery: Option<u8>,
    max_expansion: u32,
}

impl ProtocolAdapter {
    /// Create an adapter for `device_id`, optionally seeded with a baseline
    /// carried over from an earlier session with the same ring.
    pub fn new(device_id: impl Into<String>, baseline: Option<u32>) -> Self {
        Self {
            device_id: device_id.into(),
            baseline,
            battery: None,
            max_expansion: MAX_DAILY_COUNT,
        }
    }

    /// Cap the number of unit events a single read may expand into.
    #[must_use]
    pub fn with_max_expansion(mut self, max: u32) -> Self {
        self.max_expansion = max;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Last accepted raw counter value.
    pub fn baseline(&self) -> Option<u32> {
        self.baseline
    }

    /// Last reported battery percentage.
    pub fn battery(&self) -> Option<u8> {
        self.battery
    }

    /// Accept a raw counter value and return how many units it adds.
    ///
    /// The baseline moves to `raw` on every call, including downward moves
    /// after a device-side reset.
    pub fn accept_counter(&mut self, raw: u32) -> u32 {
        let previous = self.baseline.replace(raw);
        let Some(previous) = previous else {
            debug!("Counter baseline primed at {} for {}", raw, self.device_id);
            return 0;
        };

        let delta = raw.saturating_sub(previous);
        if delta > self.max_expansion {
            warn!(
                "Counter jumped by {} on {}; truncating to {}",
                delta, self.device_id, self.max_expansion
            );
            return self.max_expansion;
        }
        delta
    }

    /// Decode one notification into domain events.
    ///
    /// Undecodable counter payloads are logged and dropped. Notifications on
    /// unknown characteristics are ignored.
    pub fn handle(&mut self, notification: &Notification, now: OffsetDateTime) -> Vec<RingEvent> {
        match notification.characteristic {
            c if c == COUNTER => match decode_counter(&notification.value) {
                Ok(raw) => {
                    let units = self.accept_counter(raw);
                    let event = RingEvent::Increment {
                        device_id: self.device_id.clone(),
                    };
                    std::iter::repeat_n(event, units as usize).collect()
                }
                Err(e) => {
                    warn!("Dropping counter payload from {}: {}", self.device_id, e);
                    Vec::new()
                }
            },
            c if c == BATTERY => match decode_battery(&notification.value) {
                Ok(level) => {
                    self.battery = Some(level);
                    vec![RingEvent::battery(BatteryReading {
                        level,
                        device_id: Some(self.device_id.clone()),
                        timestamp: now,
                    })]
                }
                Err(e) => {
                    warn!("Dropping battery payload from {}: {}", self.device_id, e);
                    Vec::new()
                }
            },
            c if c == RESET => {
                if decode_reset_payload(&notification.value) {
                    vec![RingEvent::Reset {
                        device_id: self.device_id.clone(),
                        previous_count: self.baseline.unwrap_or(0),
                    }]
                } else {
                    Vec::new()
                }
            }
            other => {
                debug!("Ignoring notification on {}", other);
                Vec::new()
            }
        }
    }
}
