//! BLE link and counter reconciliation for the WishRing counter ring.
//!
//! A WishRing reports a running repetition count, a battery level and a
//! reset signal over Bluetooth Low Energy. This crate connects to the ring,
//! turns its notifications into domain events, and folds them into one
//! authoritative counter per calendar day stored by `wishring-store`.
//!
//! # Features
//!
//! - **Link state machine**: scan, connect, discover and subscribe, with
//!   bounded retries and exponential backoff
//! - **Protocol adapter**: raw counter values expanded into unit increments
//!   against a per-session baseline, so reconnects never double count
//! - **Counter engine**: serialized read-modify-write per day, lazy daily
//!   rollover, wish switching and an append-only reset log
//! - **Sync service**: the above wired together with broadcast streams for
//!   connection state, resets, battery and records
//! - **Mock transport**: scriptable ring for tests without hardware
//!
//! # Platform Differences
//!
//! - **macOS**: rings are identified by a CoreBluetooth UUID, which differs
//!   between Macs.
//! - **Linux/Windows**: rings are identified by their Bluetooth address
//!   (e.g., `AA:BB:CC:DD:EE:FF`).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wishring_core::{BleTransport, CounterEngine, EngineConfig, Link, LinkConfig, SyncService};
//! use wishring_store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(CounterEngine::new(Store::open_default()?, EngineConfig::default())?);
//!     let transport = Arc::new(BleTransport::new().await?);
//!     let link = Arc::new(Link::new(transport, LinkConfig::default()));
//!
//!     let service = SyncService::new(engine, link);
//!     service.start().await;
//!
//!     let record = service.increment(1).await?;
//!     println!("Today: {}", record.total_count);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod clock;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod link;
pub mod mock;
pub mod reconnect;
pub mod scan;
pub mod session;
pub mod sync;
pub mod traits;
pub mod util;

// Re-export the data model
pub use wishring_types::codec;
pub use wishring_types::types;
pub use wishring_types::uuids;
pub use wishring_types::{BatteryReading, DailyCounterRecord, ResetCause, ResetEvent, WishEntry};

// Core exports
pub use adapter::{ConnectionState, ProtocolAdapter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{BleConnection, BleTransport};
pub use engine::{CounterEngine, DEFAULT_RESET_RETENTION, EngineConfig, IncrementSource, ResetPolicy};
pub use error::{Error, LinkError, Result};
pub use events::{EventDispatcher, RingEvent, StateChange};
pub use link::{CONNECTION_TIMEOUT, DISCOVERY_TIMEOUT, Link, LinkConfig, LinkState, SCAN_TIMEOUT};
pub use mock::MockTransport;
pub use reconnect::ReconnectOptions;
pub use scan::{DeviceFilter, DiscoveredDevice, get_adapter};
pub use session::{SessionClaim, SessionRegistry};
pub use sync::{SyncFailure, SyncService, default_apply_retry};
pub use traits::{Connection, Notification, NotificationStream, Transport};
pub use util::{create_identifier, format_peripheral_id};
