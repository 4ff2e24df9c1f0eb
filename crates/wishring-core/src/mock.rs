//! Mock transport for testing.
//!
//! [`MockTransport`] implements [`Transport`] without BLE hardware. Tests
//! script the ring from outside: push notifications, drop the connection,
//! or make scans fail.
//!
//! # Features
//!
//! - **Failure injection**: fail every scan, or only the next N
//! - **Latency simulation**: delay connects to exercise timeouts and cancellation
//! - **Scripted notifications**: push counter, battery and reset payloads
//!
//! ```
//! use std::sync::Arc;
//! use wishring_core::{Link, LinkConfig, MockTransport};
//!
//! let mock = MockTransport::new("AA:BB:CC:DD:EE:FF", Some("WishRing"));
//! let link = Link::new(Arc::new(mock.clone()), LinkConfig::default());
//! mock.set_counter(12);
//! # let _ = link;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use wishring_types::codec::encode_reset;
use wishring_types::encode_counter;
use wishring_types::uuids::{BATTERY, COUNTER, NOTIFY_CHARACTERISTICS, RESET};

use crate::error::LinkError;
use crate::scan::{DeviceFilter, DiscoveredDevice};
use crate::traits::{Connection, Notification, NotificationStream, Transport};

#[derive(Debug)]
struct MockState {
    device: DiscoveredDevice,
    characteristics: Mutex<Vec<Uuid>>,
    counter: AtomicU32,
    battery: AtomicU8,
    should_fail: AtomicBool,
    remaining_failures: AtomicU32,
    connect_latency_ms: AtomicU64,
    discover_latency_ms: AtomicU64,
    scan_count: AtomicU32,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
    live: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
}

/// A scriptable ring. Clones share state.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Create a mock ring that advertises the ring service.
    pub fn new(identifier: &str, name: Option<&str>) -> Self {
        Self {
            state: Arc::new(MockState {
                device: DiscoveredDevice::new(identifier, name).with_service(),
                characteristics: Mutex::new(NOTIFY_CHARACTERISTICS.to_vec()),
                counter: AtomicU32::new(0),
                battery: AtomicU8::new(85),
                should_fail: AtomicBool::new(false),
                remaining_failures: AtomicU32::new(0),
                connect_latency_ms: AtomicU64::new(0),
                discover_latency_ms: AtomicU64::new(0),
                scan_count: AtomicU32::new(0),
                connect_count: AtomicU32::new(0),
                disconnect_count: AtomicU32::new(0),
                live: Mutex::new(None),
                writes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The device this mock advertises.
    pub fn device(&self) -> &DiscoveredDevice {
        &self.state.device
    }

    /// Make every scan fail (or succeed again).
    pub fn set_should_fail(&self, fail: bool) {
        self.state.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` scans, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.state.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Remaining transient failures.
    pub fn remaining_failures(&self) -> u32 {
        self.state.remaining_failures.load(Ordering::SeqCst)
    }

    /// Delay every connect by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.state
            .connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every service discovery by `latency`.
    pub fn set_discover_latency(&self, latency: Duration) {
        self.state
            .discover_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Replace the characteristics reported by discovery.
    pub fn set_characteristics(&self, characteristics: Vec<Uuid>) {
        *lock(&self.state.characteristics) = characteristics;
    }

    /// Set the raw counter value returned by reads.
    pub fn set_counter(&self, raw: u32) {
        self.state.counter.store(raw, Ordering::SeqCst);
    }

    /// Set the battery level returned by reads.
    pub fn set_battery(&self, level: u8) {
        self.state.battery.store(level, Ordering::SeqCst);
    }

    /// Number of scans attempted.
    pub fn scan_count(&self) -> u32 {
        self.state.scan_count.load(Ordering::SeqCst)
    }

    /// Number of connections opened.
    pub fn connect_count(&self) -> u32 {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    /// Number of disconnects requested.
    pub fn disconnect_count(&self) -> u32 {
        self.state.disconnect_count.load(Ordering::SeqCst)
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        lock(&self.state.live).is_some()
    }

    /// Values written through the connection, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.state.writes).clone()
    }

    /// Push a raw notification. Returns false when no connection is open.
    pub fn notify(&self, notification: Notification) -> bool {
        lock(&self.state.live)
            .as_ref()
            .is_some_and(|tx| tx.send(notification).is_ok())
    }

    /// Move the counter to `raw` and notify it.
    pub fn notify_counter(&self, raw: u32) -> bool {
        self.set_counter(raw);
        self.notify(Notification::new(COUNTER, encode_counter(raw)))
    }

    /// Notify a battery level.
    pub fn notify_battery(&self, level: u8) -> bool {
        self.set_battery(level);
        self.notify(Notification::new(BATTERY, vec![level]))
    }

    /// Signal a device-side reset.
    pub fn notify_reset(&self) -> bool {
        self.notify(Notification::new(RESET, encode_reset()))
    }

    /// Drop the open connection, ending its notification stream.
    pub fn drop_connection(&self) {
        lock(&self.state.live).take();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn scan(
        &self,
        filter: &DeviceFilter,
        _timeout: Duration,
    ) -> Result<DiscoveredDevice, LinkError> {
        let state = &self.state;
        state.scan_count.fetch_add(1, Ordering::SeqCst);

        if state.should_fail.load(Ordering::SeqCst) {
            return Err(LinkError::Transport("Mock failure".to_string()));
        }
        let transient = state
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if transient.is_ok() {
            return Err(LinkError::Transport("Mock transient failure".to_string()));
        }

        if filter.matches(&state.device) {
            Ok(state.device.clone())
        } else {
            Err(LinkError::device_not_found(filter.address.as_deref()))
        }
    }

    async fn connect(
        &self,
        device: &DiscoveredDevice,
        _timeout: Duration,
    ) -> Result<Box<dyn Connection>, LinkError> {
        let latency = self.state.connect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.state.live) = Some(tx);
        self.state.connect_count.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockConnection {
            device_id: device.identifier.clone(),
            state: Arc::clone(&self.state),
            notifications: Mutex::new(Some(rx)),
        }))
    }
}

struct MockConnection {
    device_id: String,
    state: Arc<MockState>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn discover(&self, _timeout: Duration) -> Result<Vec<Uuid>, LinkError> {
        let latency = self.state.discover_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        Ok(lock(&self.state.characteristics).clone())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), LinkError> {
        if lock(&self.state.characteristics).contains(&characteristic) {
            Ok(())
        } else {
            Err(LinkError::characteristic_not_found(characteristic.to_string(), 1))
        }
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, LinkError> {
        match characteristic {
            c if c == COUNTER => {
                Ok(encode_counter(self.state.counter.load(Ordering::SeqCst)).to_vec())
            }
            c if c == BATTERY => Ok(vec![self.state.battery.load(Ordering::SeqCst)]),
            other => Err(LinkError::characteristic_not_found(other.to_string(), 1)),
        }
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), LinkError> {
        lock(&self.state.writes).push((characteristic, data.to_vec()));
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream, LinkError> {
        let rx = lock(&self.notifications)
            .take()
            .ok_or_else(|| LinkError::Transport("notification stream already taken".to_string()))?;

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (n, rx))
        })))
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        lock(&self.state.live).take();
        self.state.disconnect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scan_failure_injection() {
        let mock = MockTransport::new("AA", Some("WishRing"));
        let filter = DeviceFilter::default();

        mock.set_transient_failures(2);
        assert!(mock.scan(&filter, Duration::from_secs(1)).await.is_err());
        assert!(mock.scan(&filter, Duration::from_secs(1)).await.is_err());
        assert!(mock.scan(&filter, Duration::from_secs(1)).await.is_ok());
        assert_eq!(mock.remaining_failures(), 0);
        assert_eq!(mock.scan_count(), 3);

        mock.set_should_fail(true);
        assert!(mock.scan(&filter, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_respects_filter() {
        let mock = MockTransport::new("AA:BB", Some("WishRing"));
        let filter = DeviceFilter::default().address("CC:DD");
        let err = mock.scan(&filter, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LinkError::DeviceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_notifications_end_on_drop() {
        let mock = MockTransport::new("AA", Some("WishRing"));
        let device = mock.device().clone();
        let conn = mock.connect(&device, Duration::from_secs(1)).await.unwrap();
        let mut stream = conn.notifications().await.unwrap();

        assert!(mock.notify_counter(5));
        assert_eq!(
            stream.next().await,
            Some(Notification::new(COUNTER, encode_counter(5)))
        );
        assert_eq!(conn.read(COUNTER).await.unwrap(), encode_counter(5).to_vec());

        mock.drop_connection();
        assert!(!mock.is_connected());
        assert_eq!(stream.next().await, None);
        assert!(!mock.notify_battery(50));
    }

    #[tokio::test]
    async fn test_writes_recorded() {
        let mock = MockTransport::new("AA", None);
        let device = mock.device().clone();
        let conn = mock.connect(&device, Duration::from_secs(1)).await.unwrap();
        conn.write(RESET, &[0x01]).await.unwrap();
        assert_eq!(mock.writes(), vec![(RESET, vec![0x01])]);
    }
}
