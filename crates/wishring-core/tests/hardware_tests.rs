//! Hardware tests against a real ring.
//!
//! These need a powered WishRing in range and run with:
//! ```text
//! cargo test --package wishring-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `WISHRING_DEVICE` to a Bluetooth address (or CoreBluetooth UUID on
//! macOS) to pick a specific ring; otherwise the first ring advertising the
//! WishRing service or name prefix is used.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use wishring_core::codec::{decode_battery, decode_counter};
use wishring_core::uuids::{BATTERY, COUNTER};
use wishring_core::{
    BleTransport, DeviceFilter, Link, LinkConfig, LinkState, ReconnectOptions, Transport,
};

const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn filter() -> DeviceFilter {
    match env::var("WISHRING_DEVICE").ok().filter(|s| !s.is_empty()) {
        Some(address) => DeviceFilter::default().address(address),
        None => DeviceFilter::default(),
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("wishring_core=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_for_ring() {
    init_logging();
    let transport = BleTransport::new().await.expect("no Bluetooth adapter");

    let device = transport
        .scan(&filter(), Duration::from_secs(10))
        .await
        .expect("no ring found");
    println!("Found {:?} at {}", device.name, device.identifier);
    assert!(!device.identifier.is_empty());
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_link_reads_counter_and_battery() {
    init_logging();
    let transport = Arc::new(BleTransport::new().await.expect("no Bluetooth adapter"));
    let config = LinkConfig::default()
        .filter(filter())
        .reconnect(ReconnectOptions::none());
    let link = Arc::new(Link::new(transport, config));

    let mut states = link.subscribe_states();
    let (tx, _rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let task = {
        let link = Arc::clone(&link);
        let cancel = cancel.clone();
        tokio::spawn(async move { link.run(tx, cancel).await })
    };

    timeout(BLE_TIMEOUT, async {
        while states.recv().await.expect("link stopped").to != LinkState::Ready {}
    })
    .await
    .expect("ring never became ready");

    let counter = link.read(COUNTER).await.expect("counter read failed");
    println!("Counter: {:?}", decode_counter(&counter));
    assert!(decode_counter(&counter).is_ok());

    if let Ok(battery) = link.read(BATTERY).await {
        println!("Battery: {:?}", decode_battery(&battery));
    }

    cancel.cancel();
    let _ = task.await;
    assert_eq!(link.state().await, LinkState::Disconnected);
}
