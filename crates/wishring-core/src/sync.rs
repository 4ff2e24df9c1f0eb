//! Sync service: a link and a counter engine wired together.
//!
//! [`SyncService::start`] spawns three tasks:
//!
//! - the link, which decodes notifications into [`RingEvent`]s;
//! - a consumer that drains those events, in order, into the engine,
//!   retrying failed store writes before giving up on an event;
//! - a forwarder that reduces link state changes to [`ConnectionState`].
//!
//! All mutation goes through the engine. The subscribe methods are
//! read-only views. An event the engine could not apply is published as a
//! [`SyncFailure`] on [`SyncService::subscribe_failures`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wishring_types::{BatteryReading, DailyCounterRecord, ResetEvent};

use crate::adapter::ConnectionState;
use crate::engine::{CounterEngine, IncrementSource};
use crate::error::{Error, LinkError, Result};
use crate::events::{EventDispatcher, RingEvent};
use crate::link::Link;
use crate::reconnect::ReconnectOptions;

/// Capacity of the ordered channel from the link to the engine.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default policy for re-applying an event whose store write failed:
/// two retries, 100 ms apart and doubling.
pub fn default_apply_retry() -> ReconnectOptions {
    ReconnectOptions::default()
        .max_attempts(2)
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_secs(1))
}

/// A ring event the engine gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub event: RingEvent,
    /// The last error, rendered.
    pub error: String,
    /// Apply attempts made, the first included.
    pub attempts: u32,
    /// The store refused the write, so the event may succeed later.
    pub recoverable: bool,
}

struct Running {
    cancel: CancellationToken,
    link_task: Option<JoinHandle<std::result::Result<(), LinkError>>>,
    consumer: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

/// Keeps a ring's counter in sync with the store.
pub struct SyncService {
    engine: Arc<CounterEngine>,
    link: Arc<Link>,
    connection_state: EventDispatcher<ConnectionState>,
    failures: EventDispatcher<SyncFailure>,
    dropped: Arc<AtomicU64>,
    apply_retry: ReconnectOptions,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("engine", &self.engine)
            .field("link", &self.link)
            .field("dropped", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

impl SyncService {
    pub fn new(engine: Arc<CounterEngine>, link: Arc<Link>) -> Self {
        Self {
            engine,
            link,
            connection_state: EventDispatcher::default(),
            failures: EventDispatcher::default(),
            dropped: Arc::new(AtomicU64::new(0)),
            apply_retry: default_apply_retry(),
            running: Mutex::new(None),
        }
    }

    /// Replace the retry policy for events whose store write failed.
    #[must_use]
    pub fn with_apply_retry(mut self, options: ReconnectOptions) -> Self {
        self.apply_retry = options;
        self
    }

    pub fn engine(&self) -> &Arc<CounterEngine> {
        &self.engine
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Start syncing. Does nothing if already started.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Sync service already running");
            return;
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let forwarder = self.spawn_forwarder(cancel.clone());
        let consumer = tokio::spawn(consume(
            Consumer {
                engine: Arc::clone(&self.engine),
                retry: self.apply_retry.clone(),
                failures: self.failures.clone(),
                dropped: Arc::clone(&self.dropped),
            },
            rx,
        ));

        let link = Arc::clone(&self.link);
        let link_cancel = cancel.clone();
        let link_task = tokio::spawn(async move { link.run(tx, link_cancel).await });

        info!("Sync service started");
        *running = Some(Running {
            cancel,
            link_task: Some(link_task),
            consumer,
            forwarder,
        });
    }

    /// Wait for the link to stop on its own.
    ///
    /// Returns immediately with `Ok(())` if the service is not running.
    pub async fn wait(&self) -> std::result::Result<(), LinkError> {
        let handle = match self.running.lock().await.as_mut() {
            Some(running) => running.link_task.take(),
            None => None,
        };
        match handle {
            Some(handle) => join_link(handle).await,
            None => Ok(()),
        }
    }

    /// Cancel the link and wait for queued events to be applied.
    ///
    /// No state change is published for the cancellation itself;
    /// [`SyncService::connection_state`] reports `Disconnected` afterwards.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.cancel.cancel();
        if let Some(handle) = running.link_task {
            match join_link(handle).await {
                Ok(()) | Err(LinkError::Cancelled) => {}
                Err(e) => debug!("Link had already stopped: {}", e),
            }
        }
        if let Err(e) = running.consumer.await {
            error!("Event consumer panicked: {}", e);
        }
        running.forwarder.abort();
        info!("Sync service stopped");
    }

    /// Restart the link, typically after it ended in `Error`.
    pub async fn reconnect(&self) {
        info!("Reconnecting");
        self.shutdown().await;
        self.start().await;
    }

    /// Current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        ConnectionState::from(&self.link.state().await)
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    /// Subscribe to persisted reset events.
    pub fn subscribe_resets(&self) -> broadcast::Receiver<ResetEvent> {
        self.engine.subscribe_resets()
    }

    /// Subscribe to battery readings.
    pub fn subscribe_battery(&self) -> broadcast::Receiver<BatteryReading> {
        self.engine.subscribe_battery()
    }

    /// Subscribe to ring events the engine could not apply.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.failures.subscribe()
    }

    /// Ring events given up on since the service was created.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Subscribe to updated daily records.
    pub fn subscribe_records(&self) -> broadcast::Receiver<DailyCounterRecord> {
        self.engine.subscribe_records()
    }

    /// Add `amount` to today's total from the app.
    pub async fn increment(&self, amount: i64) -> Result<DailyCounterRecord> {
        self.engine.increment(amount, IncrementSource::App).await
    }

    pub async fn switch_active_wish(&self, index: usize) -> Result<DailyCounterRecord> {
        self.engine.switch_active_wish(index).await
    }

    pub async fn active_wish_index(&self) -> Result<usize> {
        self.engine.active_wish_index().await
    }

    fn spawn_forwarder(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut changes = self.link.subscribe_states();
        let out = self.connection_state.clone();

        tokio::spawn(async move {
            let mut last: Option<ConnectionState> = None;
            loop {
                let change = tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = changes.recv() => change,
                };
                match change {
                    Ok(change) => {
                        let reduced = ConnectionState::from(&change.to);
                        if last != Some(reduced) {
                            last = Some(reduced);
                            out.send(reduced);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Connection state forwarder lagged by {} change(s)", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

struct Consumer {
    engine: Arc<CounterEngine>,
    retry: ReconnectOptions,
    failures: EventDispatcher<SyncFailure>,
    dropped: Arc<AtomicU64>,
}

impl Consumer {
    /// Apply one event, retrying store failures. Later events wait.
    async fn apply(&self, event: RingEvent) {
        let mut retries = 0;
        let err = loop {
            let err = match self.engine.apply(event.clone()).await {
                Ok(()) => return,
                Err(e) => e,
            };
            if !matches!(err, Error::Persistence(_)) || retries >= self.retry.max_attempts {
                break err;
            }
            let delay = self.retry.delay_for_attempt(retries);
            retries += 1;
            warn!(
                "Failed to persist ring event (retry {}/{} in {:?}): {}",
                retries, self.retry.max_attempts, delay, err
            );
            tokio::time::sleep(delay).await;
        };

        let recoverable = matches!(err, Error::Persistence(_));
        if recoverable {
            error!("Dropping ring event after {} attempt(s): {}", retries + 1, err);
        } else {
            warn!("Ring event rejected: {}", err);
        }
        self.dropped.fetch_add(1, Ordering::SeqCst);
        self.failures.send(SyncFailure {
            event,
            error: err.to_string(),
            attempts: retries + 1,
            recoverable,
        });
    }
}

/// Apply events in arrival order until the link drops its sender.
async fn consume(consumer: Consumer, mut events: mpsc::Receiver<RingEvent>) {
    while let Some(event) = events.recv().await {
        consumer.apply(event).await;
    }
    debug!("Event consumer finished");
}

async fn join_link(
    handle: JoinHandle<std::result::Result<(), LinkError>>,
) -> std::result::Result<(), LinkError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(LinkError::Transport(format!("link task failed: {}", e))),
    }
}
