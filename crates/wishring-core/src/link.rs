//! Link state machine.
//!
//! A [`Link`] owns the connection lifecycle for one ring:
//!
//! ```text
//! Disconnected -> Scanning -> Connecting -> Connected -> ServicesDiscovered -> Ready
//! ```
//!
//! Any state may fall into `Error(reason)`. After a backoff the link moves
//! back to `Disconnected` and tries again, up to the configured number of
//! retries; once they are used up the link stays in `Error` and
//! [`Link::run`] returns. An unexpected drop from `Ready` goes straight back
//! to `Scanning` with a fresh retry budget.
//!
//! Every transition is checked against [`LinkState::can_transition_to`] and
//! published on a broadcast channel. Notifications received while `Ready`
//! are decoded by a [`ProtocolAdapter`] and sent, in order, on the domain
//! event channel handed to [`Link::run`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use wishring_types::uuids::{COUNTER, NOTIFY_CHARACTERISTICS};

use crate::adapter::ProtocolAdapter;
use crate::error::LinkError;
use crate::events::{EventDispatcher, RingEvent, StateChange};
use crate::reconnect::ReconnectOptions;
use crate::scan::{DeviceFilter, DiscoveredDevice};
use crate::session::{SessionClaim, SessionRegistry};
use crate::traits::{Connection, Notification, NotificationStream, Transport};

/// Time allowed for a scan to find a ring.
pub const SCAN_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Time allowed for a connection to open.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Time allowed for service discovery.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// States of the link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    ServicesDiscovered,
    /// Notifications are flowing; payload operations are allowed.
    Ready,
    /// A failure, with its reason.
    Error(String),
}

impl LinkState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &LinkState) -> bool {
        use LinkState::*;

        match (self, next) {
            (Error(_), Error(_)) => false,
            (_, Error(_)) => true,
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,
            (Disconnected, Scanning)
            | (Scanning, Connecting)
            | (Connecting, Connected)
            | (Connected, ServicesDiscovered)
            | (ServicesDiscovered, Ready)
            | (Ready, Scanning) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::ServicesDiscovered => write!(f, "ServicesDiscovered"),
            Self::Ready => write!(f, "Ready"),
            Self::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Timeouts, retry policy and device selection for a link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Which ring to connect to.
    pub filter: DeviceFilter,
    pub scan_timeout: Duration,
    pub connection_timeout: Duration,
    pub discovery_timeout: Duration,
    /// Retry policy for failed attempts and drops.
    pub reconnect: ReconnectOptions,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            filter: DeviceFilter::default(),
            scan_timeout: SCAN_TIMEOUT,
            connection_timeout: CONNECTION_TIMEOUT,
            discovery_timeout: DISCOVERY_TIMEOUT,
            reconnect: ReconnectOptions::default(),
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: DeviceFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn reconnect(mut self, options: ReconnectOptions) -> Self {
        self.reconnect = options;
        self
    }

    /// Validate timeouts and the retry policy.
    pub fn validate(&self) -> Result<(), LinkError> {
        for (name, value) in [
            ("scan_timeout", self.scan_timeout),
            ("connection_timeout", self.connection_timeout),
            ("discovery_timeout", self.discovery_timeout),
        ] {
            if value.is_zero() {
                return Err(LinkError::invalid_config(format!("{} must be > 0", name)));
            }
        }
        self.reconnect.validate()
    }
}

/// One physical connection to a ring. Rebuilt on every reconnect.
struct LinkSession {
    connection: Arc<dyn Connection>,
    characteristics: Vec<Uuid>,
    adapter: ProtocolAdapter,
    notifications: NotificationStream,
    _claim: SessionClaim,
}

#[derive(Debug)]
struct Status {
    state: LinkState,
    device_id: Option<String>,
}

enum PumpOutcome {
    /// The notification stream ended.
    Dropped,
    /// Nobody is listening for domain events any more.
    ConsumerClosed,
}

/// Connection lifecycle for one ring.
///
/// [`Link::run`] must not be called concurrently on the same link.
pub struct Link {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    registry: SessionRegistry,
    status: RwLock<Status>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    baselines: Mutex<HashMap<String, u32>>,
    states: EventDispatcher<StateChange>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Create a link with its own session registry.
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Self {
        Self {
            transport,
            config,
            registry: SessionRegistry::new(),
            status: RwLock::new(Status {
                state: LinkState::Disconnected,
                device_id: None,
            }),
            connection: RwLock::new(None),
            baselines: Mutex::new(HashMap::new()),
            states: EventDispatcher::default(),
        }
    }

    /// Share a session registry with other links.
    #[must_use]
    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Current state.
    pub async fn state(&self) -> LinkState {
        self.status.read().await.state.clone()
    }

    /// Identity of the ring the link last selected.
    pub async fn device_id(&self) -> Option<String> {
        self.status.read().await.device_id.clone()
    }

    /// Last accepted raw counter value seen from `device_id` in this process.
    pub async fn baseline_for(&self, device_id: &str) -> Option<u32> {
        self.baselines.lock().await.get(device_id).copied()
    }

    /// Subscribe to state transitions.
    pub fn subscribe_states(&self) -> broadcast::Receiver<StateChange> {
        self.states.subscribe()
    }

    /// Read a characteristic. Only allowed while `Ready`.
    pub async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, LinkError> {
        self.ready_connection().await?.read(characteristic).await
    }

    /// Write a characteristic. Only allowed while `Ready`.
    pub async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), LinkError> {
        self.ready_connection().await?.write(characteristic, data).await
    }

    /// Enable notifications on a characteristic. Only allowed while `Ready`.
    pub async fn subscribe(&self, characteristic: Uuid) -> Result<(), LinkError> {
        self.ready_connection().await?.subscribe(characteristic).await
    }

    /// Drive the link until it gives up, the event receiver closes, or
    /// `cancel` fires.
    ///
    /// Domain events decoded while `Ready` are sent on `events` in arrival
    /// order. On cancellation the link disconnects and returns
    /// [`LinkError::Cancelled`] without publishing further state changes.
    /// A link that ended in `Error` can be run again.
    pub async fn run(
        &self,
        events: mpsc::Sender<RingEvent>,
        cancel: CancellationToken,
    ) -> Result<(), LinkError> {
        self.config.validate()?;
        if self.state().await.is_error() {
            self.transition(LinkState::Disconnected).await;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LinkError::Cancelled),
            result = self.drive(&events) => result,
        };

        if matches!(result, Err(LinkError::Cancelled)) {
            self.settle_cancelled().await;
        }
        result
    }

    async fn drive(&self, events: &mpsc::Sender<RingEvent>) -> Result<(), LinkError> {
        let policy = &self.config.reconnect;
        let mut retries = 0u32;

        loop {
            match self.establish().await {
                Ok(mut session) => {
                    retries = 0;
                    let outcome = self.pump(&mut session, events).await;
                    self.connection.write().await.take();

                    match outcome {
                        PumpOutcome::Dropped => {
                            warn!("Connection to {} dropped", session.adapter.device_id());
                            drop(session);
                            self.transition(LinkState::Scanning).await;
                        }
                        PumpOutcome::ConsumerClosed => {
                            info!("Event consumer closed, disconnecting");
                            if let Err(e) = session.connection.disconnect().await {
                                debug!("Disconnect failed: {}", e);
                            }
                            drop(session);
                            self.transition(LinkState::Disconnected).await;
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    self.transition(LinkState::Error(reason.clone())).await;

                    if !e.is_retryable() {
                        error!("Link failed: {}", reason);
                        return Err(e);
                    }
                    if retries >= policy.max_attempts {
                        error!("Link gave up after {} attempt(s): {}", retries + 1, reason);
                        return Err(LinkError::RetriesExhausted {
                            attempts: retries + 1,
                            last_error: reason,
                        });
                    }

                    let delay = policy.delay_for_attempt(retries);
                    retries += 1;
                    warn!(
                        "Link attempt failed ({}), retry {}/{} in {:?}",
                        reason, retries, policy.max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    self.transition(LinkState::Disconnected).await;
                }
            }
        }
    }

    /// Scan, connect, discover and subscribe.
    async fn establish(&self) -> Result<LinkSession, LinkError> {
        let cfg = &self.config;
        if self.state().await != LinkState::Scanning {
            self.transition(LinkState::Scanning).await;
        }

        let device = timeout(
            cfg.scan_timeout,
            self.transport.scan(&cfg.filter, cfg.scan_timeout),
        )
        .await
        .map_err(|_| LinkError::timeout("scan", cfg.scan_timeout))??;

        let claim = self.registry.claim(&device.identifier)?;
        self.status.write().await.device_id = Some(device.identifier.clone());
        self.transition(LinkState::Connecting).await;

        let connection: Arc<dyn Connection> = timeout(
            cfg.connection_timeout,
            self.transport.connect(&device, cfg.connection_timeout),
        )
        .await
        .map_err(|_| LinkError::timeout("connect", cfg.connection_timeout))??
        .into();
        // Held from here on so a cancel during setup still disconnects.
        *self.connection.write().await = Some(Arc::clone(&connection));

        let (characteristics, notifications) = match self.prepare(&connection).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.connection.write().await.take();
                if let Err(err) = connection.disconnect().await {
                    debug!("Disconnect after failed setup: {}", err);
                }
                return Err(e);
            }
        };

        let baseline = self.baseline_for(&device.identifier).await;
        let session = LinkSession {
            connection: Arc::clone(&connection),
            characteristics,
            adapter: ProtocolAdapter::new(device.identifier.clone(), baseline),
            notifications,
            _claim: claim,
        };

        self.transition(LinkState::Ready).await;
        info!(
            "Link ready with {} ({} characteristic(s))",
            describe(&device),
            session.characteristics.len()
        );
        Ok(session)
    }

    async fn prepare(
        &self,
        connection: &Arc<dyn Connection>,
    ) -> Result<(Vec<Uuid>, NotificationStream), LinkError> {
        let cfg = &self.config;
        self.transition(LinkState::Connected).await;

        let characteristics = timeout(
            cfg.discovery_timeout,
            connection.discover(cfg.discovery_timeout),
        )
        .await
        .map_err(|_| LinkError::timeout("discover", cfg.discovery_timeout))??;

        if !characteristics.contains(&COUNTER) {
            return Err(LinkError::characteristic_not_found(
                COUNTER.to_string(),
                characteristics.len(),
            ));
        }
        self.transition(LinkState::ServicesDiscovered).await;

        for uuid in NOTIFY_CHARACTERISTICS
            .iter()
            .filter(|uuid| characteristics.contains(uuid))
        {
            connection.subscribe(*uuid).await?;
        }
        let notifications = connection.notifications().await?;

        Ok((characteristics, notifications))
    }

    /// Forward notifications until the stream ends or the consumer goes away.
    async fn pump(
        &self,
        session: &mut LinkSession,
        events: &mpsc::Sender<RingEvent>,
    ) -> PumpOutcome {
        // A direct read catches up on taps made while disconnected.
        match self.read(COUNTER).await {
            Ok(value) => {
                let primed = Notification::new(COUNTER, value);
                if !self.forward(session, &primed, events).await {
                    return PumpOutcome::ConsumerClosed;
                }
            }
            Err(e) => debug!("Initial counter read failed: {}", e),
        }

        while let Some(notification) = session.notifications.next().await {
            if !self.forward(session, &notification, events).await {
                return PumpOutcome::ConsumerClosed;
            }
        }
        PumpOutcome::Dropped
    }

    async fn forward(
        &self,
        session: &mut LinkSession,
        notification: &Notification,
        events: &mpsc::Sender<RingEvent>,
    ) -> bool {
        let produced = session
            .adapter
            .handle(notification, OffsetDateTime::now_utc());

        if let Some(baseline) = session.adapter.baseline() {
            self.baselines
                .lock()
                .await
                .insert(session.adapter.device_id().to_string(), baseline);
        }

        for event in produced {
            if events.send(event).await.is_err() {
                return false;
            }
        }
        true
    }

    async fn ready_connection(&self) -> Result<Arc<dyn Connection>, LinkError> {
        let state = self.state().await;
        if !state.is_ready() {
            return Err(LinkError::NotReady { state });
        }
        self.connection
            .read()
            .await
            .clone()
            .ok_or(LinkError::NotReady {
                state: LinkState::Disconnected,
            })
    }

    async fn transition(&self, to: LinkState) {
        let mut status = self.status.write().await;
        if !status.state.can_transition_to(&to) {
            error!("Rejected link transition {} -> {}", status.state, to);
            return;
        }

        let from = std::mem::replace(&mut status.state, to.clone());
        debug!("Link {} -> {}", from, to);
        self.states.send(StateChange {
            from,
            to,
            device_id: status.device_id.clone(),
        });
    }

    /// Tear down after cancellation without publishing anything.
    async fn settle_cancelled(&self) {
        if let Some(connection) = self.connection.write().await.take()
            && let Err(e) = connection.disconnect().await
        {
            debug!("Disconnect on cancel failed: {}", e);
        }
        self.status.write().await.state = LinkState::Disconnected;
        info!("Link cancelled");
    }
}

fn describe(device: &DiscoveredDevice) -> String {
    match device.name {
        Some(ref name) => format!("{} ({})", name, device.identifier),
        None => device.identifier.clone(),
    }
}
