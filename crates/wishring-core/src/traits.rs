//! Transport abstractions for the ring link.
//!
//! The link state machine drives a [`Transport`] to find and connect to a
//! ring and then talks to the resulting [`Connection`]. The BLE
//! implementation lives in [`crate::device`]; [`crate::mock`] provides a
//! scriptable one for tests.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use crate::error::LinkError;
use crate::scan::{DeviceFilter, DiscoveredDevice};

/// A value pushed by the ring on a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Characteristic the value arrived on.
    pub characteristic: Uuid,
    /// Raw payload.
    pub value: Vec<u8>,
}

impl Notification {
    pub fn new(characteristic: Uuid, value: impl Into<Vec<u8>>) -> Self {
        Self {
            characteristic,
            value: value.into(),
        }
    }
}

/// Stream of notifications. It ends when the connection drops.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// Finds rings and opens connections to them.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Scan until a ring matching `filter` is seen or `timeout` elapses.
    async fn scan(
        &self,
        filter: &DeviceFilter,
        timeout: Duration,
    ) -> Result<DiscoveredDevice, LinkError>;

    /// Open a connection to a discovered ring.
    async fn connect(
        &self,
        device: &DiscoveredDevice,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, LinkError>;
}

/// An open connection to one ring.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity of the connected ring (address, or peripheral id on macOS).
    fn device_id(&self) -> &str;

    /// Discover services and return the characteristic UUIDs found.
    async fn discover(&self, timeout: Duration) -> Result<Vec<Uuid>, LinkError>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<(), LinkError>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, LinkError>;

    /// Write a characteristic value.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), LinkError>;

    /// Notifications for every subscribed characteristic.
    async fn notifications(&self) -> Result<NotificationStream, LinkError>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<(), LinkError>;
}
