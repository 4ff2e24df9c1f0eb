//! Bluetooth UUIDs and advertising names for WishRing devices.
//!
//! The ring exposes a single vendor service with three characteristics:
//! a notifying counter, a battery level and a reset signal.

use uuid::{Uuid, uuid};

// --- WishRing Service ---

/// Vendor counter service advertised by the ring.
pub const SERVICE: Uuid = uuid!("0000fff0-0000-1000-8000-00805f9b34fb");

// --- WishRing Characteristics ---

/// Button press counter (4-byte big-endian, notify + read).
pub const COUNTER: Uuid = uuid!("0000fff1-0000-1000-8000-00805f9b34fb");

/// Battery level percentage (1 byte, notify + read).
pub const BATTERY: Uuid = uuid!("0000fff2-0000-1000-8000-00805f9b34fb");

/// Reset signal (1 byte sentinel, notify).
pub const RESET: Uuid = uuid!("0000fff3-0000-1000-8000-00805f9b34fb");

// --- Standard Descriptors ---

/// Client Characteristic Configuration Descriptor used to enable notifications.
pub const CCCD: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Characteristics the link subscribes to once services are discovered.
pub const NOTIFY_CHARACTERISTICS: [Uuid; 3] = [COUNTER, BATTERY, RESET];

/// Advertised name prefixes that identify a ring (matched case-insensitively).
pub const DEVICE_NAME_PREFIXES: [&str; 3] = ["WISH_RING", "WishRing", "MRD"];

/// Check whether an advertised name belongs to a ring.
///
/// # Examples
///
/// ```
/// use wishring_types::uuid::is_ring_name;
///
/// assert!(is_ring_name("WISH_RING_01"));
/// assert!(is_ring_name("mrd-4411"));
/// assert!(!is_ring_name("HRM-Pro 4471"));
/// ```
#[must_use]
pub fn is_ring_name(name: &str) -> bool {
    matches_prefix(name, &DEVICE_NAME_PREFIXES)
}

/// Check an advertised name against a custom set of prefixes.
#[must_use]
pub fn matches_prefix<S: AsRef<str>>(name: &str, prefixes: &[S]) -> bool {
    let name = name.trim().to_lowercase();
    prefixes
        .iter()
        .any(|prefix| name.starts_with(&prefix.as_ref().to_lowercase()))
}
