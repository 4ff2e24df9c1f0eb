//! Domain events and broadcast plumbing.
//!
//! The protocol adapter turns raw notifications into [`RingEvent`]s, which
//! travel over an ordered `mpsc` channel to the reconciliation task. Link
//! state changes, resets, battery readings and updated records fan out to
//! subscribers through [`EventDispatcher`]s.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use wishring_types::BatteryReading;

use crate::link::LinkState;

/// Default capacity of broadcast channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Events decoded from a ring's notifications.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RingEvent {
    /// One repetition counted on the ring.
    Increment { device_id: String },
    /// The ring signalled a reset.
    Reset {
        device_id: String,
        /// Raw counter value last seen before the reset.
        previous_count: u32,
    },
    /// Battery level report.
    Battery {
        reading: BatteryReading,
        low: bool,
        critical: bool,
    },
}

impl RingEvent {
    /// Build a battery event with its threshold flags filled in.
    pub fn battery(reading: BatteryReading) -> Self {
        Self::Battery {
            low: reading.is_low(),
            critical: reading.is_critical(),
            reading,
        }
    }
}

/// One transition of the link state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: LinkState,
    pub to: LinkState,
    /// Ring the link was talking to, once known.
    pub device_id: Option<String>,
}

/// Broadcast fan-out for one kind of event.
#[derive(Debug, Clone)]
pub struct EventDispatcher<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventDispatcher<T> {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: T) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_ring_event_serialization() {
        let event = RingEvent::Reset {
            device_id: "AA".to_string(),
            previous_count: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reset");
        assert_eq!(json["previous_count"], 12);
    }

    #[test]
    fn test_battery_event_flags() {
        let reading = BatteryReading {
            level: 5,
            device_id: None,
            timestamp: datetime!(2024-01-15 08:00 UTC),
        };
        match RingEvent::battery(reading) {
            RingEvent::Battery { low, critical, .. } => {
                assert!(low);
                assert!(critical);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_fans_out() {
        let dispatcher = EventDispatcher::<u32>::default();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(7);
        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.recv().await.unwrap(), 7);

        drop(a);
        assert_eq!(dispatcher.receiver_count(), 1);
    }

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::<u32>::new(4);
        dispatcher.send(1);
    }
}
