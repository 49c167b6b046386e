//! Device-link client for the UnoQ controller
//!
//! [`DeviceLinkClient`] owns one logical connection to the controller,
//! mirrors its angle set, shared state, and client roster, and exposes
//! rate-limited command primitives so rapid manual input never saturates
//! the link. A background link task owns the transport and multiplexes
//! outbound commands and inbound events through one `tokio::select!`
//! loop, so server events are always applied in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::LinkError;
use super::events::{EventBus, EventKind, LinkEvent, SubscriptionId};
use super::protocol::{Command, ServerEvent};
use super::throttle::Throttle;
use super::transport::{Transport, WsTransport};
use super::types::{
    sanitize_angle, ActuatorKind, AngleSet, ConnectionState, RawAngleSet, SharedState,
};

/// Default per-axis command throttle window
const DEFAULT_THROTTLE_MS: u64 = 50;

/// Tuning knobs for a [`DeviceLinkClient`]
///
/// The timeouts bound every suspend-until-event point (handshake steps,
/// `update_state`, `set_angles`, `tare_angle`, disconnect confirmation)
/// so a silent controller can never hang a caller indefinitely.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Window of the per-axis and whole-set command throttles
    pub throttle_interval: Duration,
    /// Deadline for each bootstrap fetch during the connect handshake
    pub handshake_timeout: Duration,
    /// Deadline for command replies (`angles`/`state` echoes)
    pub request_timeout: Duration,
    /// Deadline for the transport to confirm a graceful close
    pub disconnect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(DEFAULT_THROTTLE_MS),
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(2),
        }
    }
}

impl LinkConfig {
    /// Set the command throttle window
    #[must_use]
    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    /// Set the per-step handshake deadline
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the command reply deadline
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the graceful close deadline
    #[must_use]
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }
}

/// Client handle for the UnoQ device link
///
/// Cheap to clone; all clones share one link. Mutable state is private —
/// reads go through the accessors, writes through the command methods.
#[derive(Clone)]
pub struct DeviceLinkClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: LinkConfig,
    /// Self-reference handed to lazily-created throttles
    weak: Weak<Inner>,
    status_tx: watch::Sender<ConnectionState>,
    address: Mutex<Option<String>>,
    angles: RwLock<AngleSet>,
    shared: RwLock<SharedState>,
    roster: RwLock<Vec<String>>,
    bus: EventBus,
    outbound: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    close_tx: Mutex<Option<oneshot::Sender<()>>>,
    link_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every link start/teardown so a stale link task cannot
    /// clobber the state of its successor
    generation: AtomicU64,
    /// One throttle per actuator address, created on first use
    axis_throttles: DashMap<(ActuatorKind, usize), Throttle<Command>>,
    /// Gate for whole-set `setAngles` commands
    set_angles_throttle: Throttle<Command>,
}

fn send_via(weak: Weak<Inner>) -> impl Fn(Command) + Send + Sync + 'static {
    move |command| {
        if let Some(inner) = weak.upgrade() {
            inner.send_command(command);
        }
    }
}

impl Default for DeviceLinkClient {
    fn default() -> Self {
        Self::new(LinkConfig::default())
    }
}

impl DeviceLinkClient {
    /// Create a client; no connection is opened until [`connect`](Self::connect)
    pub fn new(config: LinkConfig) -> Self {
        let interval = config.throttle_interval;
        let (status_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            set_angles_throttle: Throttle::new(interval, send_via(weak.clone())),
            weak: weak.clone(),
            config,
            status_tx,
            address: Mutex::new(None),
            angles: RwLock::new(AngleSet::default()),
            shared: RwLock::new(SharedState::new()),
            roster: RwLock::new(Vec::new()),
            bus: EventBus::new(),
            outbound: Mutex::new(None),
            close_tx: Mutex::new(None),
            link_task: Mutex::new(None),
            generation: AtomicU64::new(0),
            axis_throttles: DashMap::new(),
        });
        Self { inner }
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Connect to the controller
    ///
    /// Without an explicit `address` the previously-known one is reused;
    /// fails fast with [`LinkError::NoAddress`] when neither exists. Any
    /// existing link is torn down first. The call suspends through the
    /// bootstrap handshake (roster, shared state, angle set — in that
    /// order) and resumes once the link reaches `Connected`. Each
    /// handshake step is bounded by `handshake_timeout`.
    pub async fn connect(&self, address: Option<&str>) -> Result<(), LinkError> {
        let addr = match address {
            Some(a) => {
                *self.inner.address.lock() = Some(a.to_string());
                a.to_string()
            }
            None => self
                .inner
                .address
                .lock()
                .clone()
                .ok_or(LinkError::NoAddress)?,
        };

        self.disconnect().await?;

        info!("🔗 Connecting to controller at {}", addr);
        self.inner.set_status(ConnectionState::Connecting);

        let transport = match WsTransport::connect(&addr).await {
            Ok(t) => t,
            Err(e) => {
                warn!("🔌 Failed to reach {}: {}", addr, e);
                self.inner.set_status(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        // A disconnect may have raced the websocket handshake.
        if self.status() != ConnectionState::Connecting {
            return Err(LinkError::Cancelled);
        }

        self.start_link(Box::new(transport)).await
    }

    /// Connect over an already-open transport
    ///
    /// Same lifecycle as [`connect`](Self::connect), minus the websocket
    /// dial. This is the seam alternative transports (and tests) use.
    pub async fn connect_with(&self, transport: Box<dyn Transport>) -> Result<(), LinkError> {
        self.disconnect().await?;
        self.inner.set_status(ConnectionState::Connecting);
        self.start_link(transport).await
    }

    /// Disconnect from the controller
    ///
    /// No-op when already disconnected. When the handshake is still in
    /// flight, cancels it immediately without waiting for any transport
    /// acknowledgment. When connected, requests a transport close and
    /// suspends until the `Disconnected` transition is observed (bounded
    /// by `disconnect_timeout`, then forced).
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        match self.status() {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connecting => {
                info!("🔌 Cancelling in-flight connection");
                self.inner.teardown_link();
                self.inner.set_status(ConnectionState::Disconnected);
                Ok(())
            }
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                self.inner.set_status(ConnectionState::Disconnecting);
                if let Some(close_tx) = self.inner.close_tx.lock().take() {
                    let _ = close_tx.send(());
                }

                let mut status_rx = self.inner.status_tx.subscribe();
                let observed = async move {
                    loop {
                        if *status_rx.borrow_and_update() == ConnectionState::Disconnected {
                            return;
                        }
                        if status_rx.changed().await.is_err() {
                            return;
                        }
                    }
                };
                let deadline = self.inner.config.disconnect_timeout;
                if tokio::time::timeout(deadline, observed).await.is_err() {
                    warn!("⚠️  Transport did not confirm close in time, forcing disconnect");
                    self.inner.teardown_link();
                    self.inner.set_status(ConnectionState::Disconnected);
                }
                Ok(())
            }
        }
    }

    /// Disconnect when connected or connecting, otherwise connect
    pub async fn toggle_connection(&self, address: Option<&str>) -> Result<(), LinkError> {
        match self.status() {
            ConnectionState::Connected | ConnectionState::Connecting => self.disconnect().await,
            _ => self.connect(address).await,
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Move one actuator, absolute or relative to the last known angle
    ///
    /// The target is sanitized (servo clamp, integer rounding); writing
    /// the already-known angle is a no-op that transmits nothing. The
    /// mirror updates optimistically and the command goes through the
    /// per-axis throttle, so independent actuators never cross-throttle.
    pub fn set_angle(
        &self,
        kind: ActuatorKind,
        index: usize,
        angle: f64,
        offset: bool,
    ) -> Result<(), LinkError> {
        let target = {
            let mut angles = self.inner.angles.write();
            let slots = angles.kind_mut(kind);
            if index >= slots.len() {
                return Err(LinkError::InvalidIndex {
                    kind,
                    index,
                    count: slots.len(),
                });
            }
            let last = slots[index];
            let requested = if offset {
                f64::from(last.unwrap_or(0)) + angle
            } else {
                angle
            };
            let Some(target) = sanitize_angle(kind, requested) else {
                debug!("dropping non-finite {kind} angle for index {index}");
                return Ok(());
            };
            if last == Some(target) {
                return Ok(());
            }
            slots[index] = Some(target);
            target
        };

        self.inner.submit_axis(
            kind,
            index,
            Command::SetAngle {
                kind,
                index,
                angle: target,
            },
        );
        Ok(())
    }

    /// Transmit a whole angle set atomically
    ///
    /// Every entry is sanitized (servo clamp, rounding; non-finite
    /// entries become `null` and are dropped by the controller). The
    /// command goes through the whole-set throttle, and the call
    /// suspends until the controller's next `angles` broadcast.
    pub async fn set_angles(&self, raw: &RawAngleSet) -> Result<AngleSet, LinkError> {
        self.inner.require_link()?;
        let sanitized = raw.sanitize();
        let waiter = self.inner.bus.wait_for(EventKind::Angles);
        self.inner
            .set_angles_throttle
            .submit(Command::SetAngles(sanitized));
        self.inner
            .await_event(waiter, EventKind::Angles, self.inner.config.request_timeout)
            .await?;
        Ok(self.angles())
    }

    /// Ask the controller to re-zero one actuator
    ///
    /// No-op when the mirror already reads zero; otherwise suspends
    /// until the next `angles` broadcast confirms the new zero.
    pub async fn tare_angle(&self, kind: ActuatorKind, index: usize) -> Result<(), LinkError> {
        self.inner.require_link()?;
        {
            let angles = self.inner.angles.read();
            let count = angles.count(kind);
            if index >= count {
                return Err(LinkError::InvalidIndex { kind, index, count });
            }
            if angles.get(kind, index) == Some(0) {
                return Ok(());
            }
        }
        let waiter = self.inner.bus.wait_for(EventKind::Angles);
        self.inner.send_command(Command::TareAngle { kind, index });
        self.inner
            .await_event(waiter, EventKind::Angles, self.inner.config.request_timeout)
            .await?;
        Ok(())
    }

    /// Propose a wholesale shared-state replacement
    ///
    /// Fire-and-forget: the controller decides the merge and pushes the
    /// result back as a `state` update. The local mirror is untouched
    /// until that confirmation arrives.
    pub fn set_state(&self, state: SharedState) -> Result<(), LinkError> {
        self.inner.require_link()?;
        self.inner.send_command(Command::SetState(state));
        Ok(())
    }

    /// Propose an incremental shared-state patch
    ///
    /// Suspends until the controller echoes a `state` update, then
    /// returns the confirmed mirror.
    pub async fn update_state(&self, diff: SharedState) -> Result<SharedState, LinkError> {
        self.inner.require_link()?;
        let waiter = self.inner.bus.wait_for(EventKind::State);
        self.inner.send_command(Command::UpdateState(diff));
        self.inner
            .await_event(waiter, EventKind::State, self.inner.config.request_timeout)
            .await?;
        Ok(self.shared_state())
    }

    /// Write the shared-state entry of one connected client
    ///
    /// Aborts locally with [`LinkError::UnknownClient`] when the id is
    /// not in the roster; nothing is transmitted in that case.
    pub async fn update_client_state(
        &self,
        client: &str,
        value: Value,
    ) -> Result<SharedState, LinkError> {
        if !self.inner.roster.read().iter().any(|c| c == client) {
            error!("cannot write state for unknown client {client:?}");
            return Err(LinkError::UnknownClient(client.to_string()));
        }
        let mut diff = SharedState::new();
        diff.insert(client.to_string(), value);
        self.update_state(diff).await
    }

    /// Relay an arbitrary payload to all peers via the controller
    ///
    /// Fire-and-forget; no local effect and no acknowledgment.
    pub fn broadcast(&self, payload: Value) -> Result<(), LinkError> {
        self.inner.require_link()?;
        self.inner.send_command(Command::Broadcast(payload));
        Ok(())
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Subscribe to an event kind
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, callback)
    }

    /// Subscribe for a single dispatch
    pub fn once<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.inner.bus.once(kind, callback)
    }

    /// Unsubscribe; returns false when the id is unknown
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.inner.bus.off(kind, id)
    }

    /// Suspend until the next event of `kind` is dispatched
    pub async fn wait_for_event(&self, kind: EventKind) -> Result<LinkEvent, LinkError> {
        self.inner
            .bus
            .wait_for(kind)
            .await
            .map_err(|_| LinkError::Cancelled)
    }

    /// [`wait_for_event`](Self::wait_for_event) with an explicit deadline
    pub async fn wait_for_event_timeout(
        &self,
        kind: EventKind,
        timeout: Duration,
    ) -> Result<LinkEvent, LinkError> {
        let waiter = self.inner.bus.wait_for(kind);
        self.inner.await_event(waiter, kind, timeout).await
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Current lifecycle state
    pub fn status(&self) -> ConnectionState {
        *self.inner.status_tx.borrow()
    }

    /// True in the `Connected` steady state
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionState::Connected
    }

    /// Watch receiver for lifecycle transitions
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    /// Snapshot of the angle mirror
    pub fn angles(&self) -> AngleSet {
        self.inner.angles.read().clone()
    }

    /// Snapshot of the shared-state mirror
    pub fn shared_state(&self) -> SharedState {
        self.inner.shared.read().clone()
    }

    /// Snapshot of the client roster, in arrival order
    pub fn clients(&self) -> Vec<String> {
        self.inner.roster.read().clone()
    }

    /// Last known controller address
    pub fn address(&self) -> Option<String> {
        self.inner.address.lock().clone()
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Spawn the link task and run the bootstrap handshake
    async fn start_link(&self, transport: Box<dyn Transport>) -> Result<(), LinkError> {
        // Waiters are registered before the link task starts so replies
        // can never slip past the handshake, however fast they arrive.
        let clients_rx = self.inner.bus.wait_for(EventKind::Clients);
        let state_rx = self.inner.bus.wait_for(EventKind::State);
        let angles_rx = self.inner.bus.wait_for(EventKind::Angles);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.outbound.lock() = Some(cmd_tx);
        *self.inner.close_tx.lock() = Some(close_tx);
        let task = tokio::spawn(link_loop(
            transport,
            cmd_rx,
            close_rx,
            Arc::downgrade(&self.inner),
            generation,
        ));
        *self.inner.link_task.lock() = Some(task);

        let handshake = self.inner.config.handshake_timeout;
        let bootstrap = async {
            self.inner.send_command(Command::GetClients {});
            self.inner
                .await_event(clients_rx, EventKind::Clients, handshake)
                .await?;
            self.inner.send_command(Command::GetState {});
            self.inner
                .await_event(state_rx, EventKind::State, handshake)
                .await?;
            self.inner.send_command(Command::GetAngles {});
            self.inner
                .await_event(angles_rx, EventKind::Angles, handshake)
                .await?;
            Ok(())
        };

        match bootstrap.await {
            Ok(()) => {
                self.inner.set_status(ConnectionState::Connected);
                let (servos, steppers) = {
                    let angles = self.inner.angles.read();
                    (angles.servo.len(), angles.stepper.len())
                };
                info!(
                    "✅ Link established ({} servos, {} steppers, {} clients)",
                    servos,
                    steppers,
                    self.inner.roster.read().len()
                );
                Ok(())
            }
            Err(e) => {
                warn!("🔌 Handshake failed: {}", e);
                if self.status() != ConnectionState::Disconnected {
                    self.inner.teardown_link();
                    self.inner.set_status(ConnectionState::Disconnected);
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for DeviceLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLinkClient")
            .field("status", &self.status())
            .field("address", &self.address())
            .field("clients", &self.inner.roster.read().len())
            .finish()
    }
}

impl Inner {
    /// Record a lifecycle transition and dispatch the derived events
    fn set_status(&self, next: ConnectionState) {
        let prev = *self.status_tx.borrow();
        if prev == next {
            return;
        }
        self.status_tx.send_replace(next);
        debug!("connection status: {} → {}", prev, next);
        self.bus.dispatch(LinkEvent::ConnectionStatus(next));
        match next {
            ConnectionState::Connected => {
                self.bus.dispatch(LinkEvent::IsConnected(true));
                self.bus.dispatch(LinkEvent::Connected);
            }
            ConnectionState::Disconnected => {
                self.bus.dispatch(LinkEvent::IsConnected(false));
                self.bus.dispatch(LinkEvent::Disconnected);
            }
            _ => {}
        }
    }

    /// Queue a command to the link task
    fn send_command(&self, command: Command) {
        match self.outbound.lock().as_ref() {
            Some(tx) => {
                if tx.send(command).is_err() {
                    debug!("link task gone, dropping command");
                }
            }
            None => debug!("no open link, dropping command"),
        }
    }

    fn require_link(&self) -> Result<(), LinkError> {
        if self.outbound.lock().is_none() {
            return Err(LinkError::NotConnected);
        }
        Ok(())
    }

    /// Route a command through the throttle of one actuator address
    fn submit_axis(&self, kind: ActuatorKind, index: usize, command: Command) {
        let throttle = self.axis_throttles.entry((kind, index)).or_insert_with(|| {
            Throttle::new(self.config.throttle_interval, send_via(self.weak.clone()))
        });
        throttle.submit(command);
    }

    /// Forcefully dismantle the current link, if any
    fn teardown_link(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(close_tx) = self.close_tx.lock().take() {
            let _ = close_tx.send(());
        }
        self.outbound.lock().take();
        if let Some(task) = self.link_task.lock().take() {
            task.abort();
        }
    }

    /// Called by the link task when its transport closes
    fn on_link_closed(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return; // stale link, a newer one owns the state
        }
        self.outbound.lock().take();
        self.close_tx.lock().take();
        self.link_task.lock().take();
        if *self.status_tx.borrow() != ConnectionState::Disconnected {
            info!("🔌 Link closed");
            self.set_status(ConnectionState::Disconnected);
        }
    }

    /// Await a one-shot waiter, bounded by `timeout` and cancelled by a
    /// transition to `Disconnected`
    async fn await_event(
        &self,
        waiter: oneshot::Receiver<LinkEvent>,
        kind: EventKind,
        timeout: Duration,
    ) -> Result<LinkEvent, LinkError> {
        let mut status_rx = self.status_tx.subscribe();
        let disconnected = async move {
            loop {
                if *status_rx.borrow_and_update() == ConnectionState::Disconnected {
                    return;
                }
                if status_rx.changed().await.is_err() {
                    return;
                }
            }
        };
        // Biased so a reply that arrived together with a status change is
        // still delivered instead of reported as cancelled.
        tokio::select! {
            biased;
            event = waiter => event.map_err(|_| LinkError::Cancelled),
            _ = disconnected => Err(LinkError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(LinkError::Timeout(kind.as_str())),
        }
    }

    /// Apply one inbound event to the mirrors and notify subscribers
    fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Broadcast(payload) => {
                self.bus.dispatch(LinkEvent::Broadcast(payload));
            }
            ServerEvent::State(full) => {
                let changed = {
                    let mut shared = self.shared.write();
                    let mut changed: Vec<String> = shared
                        .keys()
                        .filter(|key| !full.contains_key(*key))
                        .cloned()
                        .collect();
                    for (key, value) in &full {
                        if shared.get(key) != Some(value) {
                            changed.push(key.clone());
                        }
                    }
                    *shared = full.clone();
                    changed
                };
                self.bus.dispatch(LinkEvent::State {
                    state: full,
                    changed: changed.clone(),
                });
                self.dispatch_client_state(&changed);
            }
            ServerEvent::StateDiff(diff) => {
                let changed: Vec<String> = diff.keys().cloned().collect();
                let merged = {
                    let mut shared = self.shared.write();
                    for (key, value) in diff {
                        if value.is_null() {
                            shared.remove(&key);
                        } else {
                            shared.insert(key, value);
                        }
                    }
                    shared.clone()
                };
                self.bus.dispatch(LinkEvent::State {
                    state: merged,
                    changed: changed.clone(),
                });
                self.dispatch_client_state(&changed);
            }
            ServerEvent::Angles(set) => {
                *self.angles.write() = set.clone();
                self.bus.dispatch(LinkEvent::Angles(set));
            }
            ServerEvent::ClientJoin { client } => {
                let added = {
                    let mut roster = self.roster.write();
                    if roster.iter().any(|c| c == &client) {
                        false
                    } else {
                        roster.push(client.clone());
                        true
                    }
                };
                if added {
                    self.bus.dispatch(LinkEvent::ClientJoin(client));
                } else {
                    debug!("duplicate clientJoin for {client:?} ignored");
                }
            }
            ServerEvent::ClientExit { client } => {
                let removed = {
                    let mut roster = self.roster.write();
                    let before = roster.len();
                    roster.retain(|c| c != &client);
                    roster.len() != before
                };
                if removed {
                    self.bus.dispatch(LinkEvent::ClientExit(client));
                }
            }
            ServerEvent::Clients(list) => {
                let mut deduped: Vec<String> = Vec::with_capacity(list.len());
                for client in list {
                    if !deduped.contains(&client) {
                        deduped.push(client);
                    }
                }
                *self.roster.write() = deduped.clone();
                self.bus.dispatch(LinkEvent::Clients(deduped));
            }
        }
    }

    /// Fire `clientState` once per changed key that names a roster member
    fn dispatch_client_state(&self, changed: &[String]) {
        let roster = self.roster.read().clone();
        let shared = self.shared.read().clone();
        for key in changed {
            if roster.iter().any(|c| c == key) {
                let value = shared.get(key).cloned().unwrap_or(Value::Null);
                self.bus.dispatch(LinkEvent::ClientState {
                    client: key.clone(),
                    state: value,
                });
            }
        }
    }
}

/// Background task owning the transport for one connection
///
/// Exits when the transport closes, errors, or a close is requested.
/// Inbound frames are applied in arrival order.
async fn link_loop(
    mut transport: Box<dyn Transport>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut close_rx: oneshot::Receiver<()>,
    inner: Weak<Inner>,
    generation: u64,
) {
    debug!("link task started");
    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(command) => match serde_json::to_string(&command) {
                    Ok(frame) => {
                        if let Err(e) = transport.send(frame).await {
                            warn!("link send failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => error!("failed to encode command: {}", e),
                },
                // Every sender dropped — the client is going away.
                None => {
                    let _ = transport.close().await;
                    break;
                }
            },
            _ = &mut close_rx => {
                debug!("close requested");
                let _ = transport.close().await;
                break;
            }
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => match inner.upgrade() {
                        Some(inner) => inner.handle_server_event(event),
                        None => break,
                    },
                    Err(e) => warn!("malformed frame from controller: {} — raw: {}", e, text),
                },
                Some(Err(e)) => {
                    warn!("link receive error: {}", e);
                    break;
                }
                None => {
                    debug!("transport closed by controller");
                    break;
                }
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.on_link_closed(generation);
    }
    debug!("link task exited");
}
