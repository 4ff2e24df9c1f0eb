//! BLE transport built on btleplug.
//!
//! [`BleTransport`] scans the first Bluetooth adapter for a ring and opens
//! [`BleConnection`]s to it. Notification streams end when the adapter
//! reports the peripheral as disconnected, which the link treats as a drop.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LinkError;
use crate::scan::{DeviceFilter, DiscoveredDevice, find_matching, get_adapter, start_scan};
use crate::traits::{Connection, Notification, NotificationStream, Transport};

/// How often the adapter's peripheral list is checked during a scan.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timeout for a single characteristic read or write.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// BLE transport over the first available adapter.
pub struct BleTransport {
    adapter: Adapter,
    seen: Mutex<HashMap<String, Peripheral>>,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport").finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Open the first Bluetooth adapter.
    pub async fn new() -> Result<Self, LinkError> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    #[tracing::instrument(level = "info", skip_all, fields(address = ?filter.address))]
    async fn scan(
        &self,
        filter: &DeviceFilter,
        scan_timeout: Duration,
    ) -> Result<DiscoveredDevice, LinkError> {
        start_scan(&self.adapter).await?;
        let deadline = Instant::now() + scan_timeout;

        let found = loop {
            if let Some(found) = find_matching(&self.adapter, filter).await? {
                break Some(found);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        let (peripheral, device) =
            found.ok_or_else(|| LinkError::device_not_found(filter.address.as_deref()))?;
        info!("Found ring {:?} ({})", device.name, device.identifier);
        self.seen
            .lock()
            .await
            .insert(device.identifier.clone(), peripheral);
        Ok(device)
    }

    #[tracing::instrument(level = "info", skip_all, fields(identifier = %device.identifier))]
    async fn connect(
        &self,
        device: &DiscoveredDevice,
        connect_timeout: Duration,
    ) -> Result<Box<dyn Connection>, LinkError> {
        let peripheral = self
            .seen
            .lock()
            .await
            .get(&device.identifier)
            .cloned()
            .ok_or_else(|| LinkError::device_not_found(Some(&device.identifier)))?;

        info!("Connecting to device...");
        timeout(connect_timeout, peripheral.connect())
            .await
            .map_err(|_| LinkError::timeout("connect to device", connect_timeout))??;
        info!("Connected!");

        Ok(Box::new(BleConnection {
            adapter: self.adapter.clone(),
            peripheral,
            device_id: device.identifier.clone(),
            characteristics: RwLock::new(HashMap::new()),
        }))
    }
}

/// An open BLE connection to a ring.
pub struct BleConnection {
    adapter: Adapter,
    peripheral: Peripheral,
    device_id: String,
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl BleConnection {
    async fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic, LinkError> {
        self.characteristics
            .read()
            .await
            .get(&uuid)
            .cloned()
            .ok_or_else(|| {
                LinkError::characteristic_not_found(uuid.to_string(), self.peripheral.services().len())
            })
    }
}

#[async_trait]
impl Connection for BleConnection {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn discover(&self, discovery_timeout: Duration) -> Result<Vec<Uuid>, LinkError> {
        info!("Discovering services...");
        timeout(discovery_timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| LinkError::timeout("discover services", discovery_timeout))??;

        let services = self.peripheral.services();
        debug!("Found {} services", services.len());

        let mut cache = self.characteristics.write().await;
        cache.clear();
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for characteristic in &service.characteristics {
                debug!("    Characteristic: {}", characteristic.uuid);
                cache.insert(characteristic.uuid, characteristic.clone());
            }
        }
        Ok(cache.keys().copied().collect())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), LinkError> {
        let characteristic = self.find_characteristic(characteristic).await?;
        self.peripheral.subscribe(&characteristic).await?;
        debug!("Subscribed to {}", characteristic.uuid);
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, LinkError> {
        let characteristic = self.find_characteristic(characteristic).await?;
        let data = timeout(OPERATION_TIMEOUT, self.peripheral.read(&characteristic))
            .await
            .map_err(|_| {
                LinkError::timeout(
                    format!("read characteristic {}", characteristic.uuid),
                    OPERATION_TIMEOUT,
                )
            })??;
        Ok(data)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), LinkError> {
        let characteristic = self.find_characteristic(characteristic).await?;
        timeout(
            OPERATION_TIMEOUT,
            self.peripheral
                .write(&characteristic, data, WriteType::WithResponse),
        )
        .await
        .map_err(|_| {
            LinkError::timeout(
                format!("write characteristic {}", characteristic.uuid),
                OPERATION_TIMEOUT,
            )
        })??;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream, LinkError> {
        let values = self.peripheral.notifications().await?;
        let disconnected = wait_for_disconnect(self.adapter.clone(), self.peripheral.id());

        Ok(Box::pin(
            values
                .map(|n| Notification::new(n.uuid, n.value))
                .take_until(disconnected),
        ))
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        info!("Disconnecting from device...");
        if self.peripheral.is_connected().await.unwrap_or(false) {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

/// Resolves once the adapter reports `id` as disconnected.
///
/// Notification streams do not end on every platform when the link drops,
/// so the adapter event stream is watched as well.
async fn wait_for_disconnect(adapter: Adapter, id: PeripheralId) {
    match adapter.events().await {
        Ok(mut events) => {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event
                    && gone == id
                {
                    info!("Device {:?} disconnected", gone);
                    return;
                }
            }
        }
        Err(e) => {
            warn!("Could not subscribe to adapter events: {}", e);
            futures::future::pending::<()>().await;
        }
    }
}
