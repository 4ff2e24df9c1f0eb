//! Peripheral identifier helpers.

use btleplug::platform::PeripheralId;

/// Address reported by CoreBluetooth, which hides real addresses.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// Bluetooth address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_debug_wrapper(&format!("{:?}", id))
}

/// Create an identifier string from an address and peripheral ID.
///
/// Uses the peripheral ID where the address is hidden, the address elsewhere.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_hidden_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn is_hidden_address(address: &str) -> bool {
    address == HIDDEN_ADDRESS
}

fn strip_debug_wrapper(debug: &str) -> String {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_address() {
        assert!(is_hidden_address("00:00:00:00:00:00"));
        assert!(!is_hidden_address("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_strip_debug_wrapper() {
        assert_eq!(
            strip_debug_wrapper("PeripheralId(AA:BB:CC:DD:EE:FF)"),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(strip_debug_wrapper("plain"), "plain");
    }
}
