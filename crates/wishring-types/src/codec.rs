//! Wire codec for the ring's fixed-layout characteristic payloads.
//!
//! | Characteristic | Layout                       | Failure mode           |
//! |----------------|------------------------------|------------------------|
//! | Counter        | 4 bytes, unsigned big-endian | `BadLength`            |
//! | Battery        | 1 byte percentage            | clamped to `0..=100`   |
//! | Reset          | 1 byte, `0x01` = reset       | never fails            |
//!
//! Battery telemetry is advisory and therefore clamped; the counter drives
//! reconciliation and is rejected when malformed.

use bytes::Buf;

use crate::error::{DecodeError, DecodeResult};

/// Exact size of a counter payload.
pub const COUNTER_PAYLOAD_LEN: usize = 4;

/// Sentinel byte the ring sends on the reset characteristic.
pub const RESET_SIGNAL: u8 = 0x01;

/// Upper bound of a battery percentage.
pub const MAX_BATTERY_PERCENT: u8 = 100;

/// Decode the raw counter value.
///
/// # Examples
///
/// ```
/// use wishring_types::codec::decode_counter;
///
/// assert_eq!(decode_counter(&[0x00, 0x00, 0x01, 0x2C]), Ok(300));
/// assert!(decode_counter(&[0x01, 0x2C]).is_err());
/// ```
pub fn decode_counter(data: &[u8]) -> DecodeResult<u32> {
    if data.len() != COUNTER_PAYLOAD_LEN {
        return Err(DecodeError::bad_length(COUNTER_PAYLOAD_LEN, data.len()));
    }
    let mut buf = data;
    Ok(buf.get_u32())
}

/// Encode a counter value in the device's byte order.
#[must_use]
pub fn encode_counter(value: u32) -> [u8; COUNTER_PAYLOAD_LEN] {
    value.to_be_bytes()
}

/// Decode a battery percentage, clamping out-of-range values to 100.
///
/// Only the first byte is significant; an empty payload is rejected.
pub fn decode_battery(data: &[u8]) -> DecodeResult<u8> {
    let mut buf = data;
    if !buf.has_remaining() {
        return Err(DecodeError::bad_length(1, 0));
    }
    Ok(buf.get_u8().min(MAX_BATTERY_PERCENT))
}

/// Whether a single byte is the reset sentinel.
#[must_use]
pub fn decode_reset(byte: u8) -> bool {
    byte == RESET_SIGNAL
}

/// Whether a reset notification carries the sentinel in its first byte.
#[must_use]
pub fn decode_reset_payload(data: &[u8]) -> bool {
    data.first().copied().is_some_and(decode_reset)
}

/// Encode the reset sentinel as written to the reset characteristic.
#[must_use]
pub fn encode_reset() -> [u8; 1] {
    [RESET_SIGNAL]
}
