//! Ring discovery.
//!
//! A peripheral is accepted when it advertises the WishRing service UUID or
//! its name starts (case-insensitively) with one of the configured prefixes.
//! A configured address narrows the match to that one ring.

use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use wishring_types::uuids::{DEVICE_NAME_PREFIXES, SERVICE, matches_prefix};

use crate::error::LinkError;
use crate::util::create_identifier;

/// A ring seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// The BLE address as a string (all zeros on macOS).
    pub address: String,
    /// Connection identifier: peripheral id on macOS, address elsewhere.
    pub identifier: String,
    /// RSSI signal strength.
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl DiscoveredDevice {
    /// Create a device with just an identifier and name.
    pub fn new(identifier: impl Into<String>, name: Option<&str>) -> Self {
        let identifier = identifier.into();
        Self {
            name: name.map(str::to_string),
            address: identifier.clone(),
            identifier,
            rssi: None,
            services: Vec::new(),
        }
    }

    /// Mark the ring service as advertised.
    #[must_use]
    pub fn with_service(mut self) -> Self {
        if !self.services.contains(&SERVICE) {
            self.services.push(SERVICE);
        }
        self
    }
}

/// Which peripherals count as the ring to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Only accept this address or identifier.
    pub address: Option<String>,
    /// Accepted advertising name prefixes.
    pub name_prefixes: Vec<String>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            address: None,
            name_prefixes: DEVICE_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl DeviceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Narrow the filter to one address or identifier.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Replace the accepted name prefixes.
    #[must_use]
    pub fn name_prefixes<S: Into<String>>(mut self, prefixes: impl IntoIterator<Item = S>) -> Self {
        self.name_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `device` is a ring this filter accepts.
    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        if let Some(ref wanted) = self.address
            && !same_identifier(wanted, &device.identifier)
            && !same_identifier(wanted, &device.address)
        {
            return false;
        }

        device.services.contains(&SERVICE)
            || device
                .name
                .as_deref()
                .is_some_and(|name| matches_prefix(name, &self.name_prefixes))
    }
}

/// Compare identifiers ignoring case and address separators.
fn same_identifier(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.trim().replace([':', '-'], "").to_lowercase();
    !a.trim().is_empty() && normalize(a) == normalize(b)
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter, LinkError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(LinkError::NoAdapter)
}

/// Start scanning on `adapter`.
pub(crate) async fn start_scan(adapter: &Adapter) -> Result<(), LinkError> {
    adapter.start_scan(ScanFilter::default()).await?;
    Ok(())
}

/// Look through the adapter's known peripherals for a matching ring.
pub(crate) async fn find_matching(
    adapter: &Adapter,
    filter: &DeviceFilter,
) -> Result<Option<(Peripheral, DiscoveredDevice)>, LinkError> {
    for peripheral in adapter.peripherals().await? {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                debug!("Error reading peripheral properties: {}", e);
                continue;
            }
        };

        let device = discovered_from_properties(&peripheral, &properties);
        if filter.matches(&device) {
            debug!("Matched ring {:?} ({})", device.name, device.identifier);
            return Ok(Some((peripheral, device)));
        }
    }

    Ok(None)
}

fn discovered_from_properties(
    peripheral: &Peripheral,
    properties: &PeripheralProperties,
) -> DiscoveredDevice {
    let address = properties.address.to_string();
    let mut services = properties.services.clone();
    services.extend(properties.service_data.keys().copied());

    DiscoveredDevice {
        name: properties.local_name.clone(),
        identifier: create_identifier(&address, &peripheral.id()),
        address,
        rssi: properties.rssi,
        services,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_by_name_prefix() {
        let filter = DeviceFilter::default();
        assert!(filter.matches(&DiscoveredDevice::new("A", Some("WISH_RING_01"))));
        assert!(filter.matches(&DiscoveredDevice::new("A", Some("wishring"))));
        assert!(filter.matches(&DiscoveredDevice::new("A", Some("mrd-42"))));
        assert!(!filter.matches(&DiscoveredDevice::new("A", Some("HRM-Pro 4471"))));
        assert!(!filter.matches(&DiscoveredDevice::new("A", None)));
    }

    #[test]
    fn test_matches_by_service() {
        let filter = DeviceFilter::default();
        let device = DiscoveredDevice::new("A", None).with_service();
        assert!(filter.matches(&device));
    }

    #[test]
    fn test_address_narrows_match() {
        let filter = DeviceFilter::default().address("aa-bb-cc-dd-ee-ff");
        let ring = DiscoveredDevice::new("AA:BB:CC:DD:EE:FF", Some("WishRing"));
        let other = DiscoveredDevice::new("11:22:33:44:55:66", Some("WishRing"));
        assert!(filter.matches(&ring));
        assert!(!filter.matches(&other));
    }

    #[test]
    fn test_custom_prefixes() {
        let filter = DeviceFilter::default().name_prefixes(["Bead"]);
        assert!(filter.matches(&DiscoveredDevice::new("A", Some("bead 7"))));
        assert!(!filter.matches(&DiscoveredDevice::new("A", Some("WishRing"))));
    }
}
