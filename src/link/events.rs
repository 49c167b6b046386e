//! Typed link events and the subscriber registry
//!
//! Events form a closed set of variants dispatched synchronously, in
//! arrival order, to per-kind subscriber lists. `once` subscriptions are
//! consumed after their first dispatch; one-shot waiters back the
//! suspend-until-event points in the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::types::{AngleSet, ConnectionState, SharedState};

/// Event dispatched to link subscribers
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The link reached the connected steady state
    Connected,
    /// The link reached the disconnected steady state
    Disconnected,
    /// Link health as a boolean, fired alongside the steady-state events
    IsConnected(bool),
    /// Every lifecycle transition, including the transient states
    ConnectionStatus(ConnectionState),
    /// Payload relayed from a peer
    Broadcast(Value),
    /// Shared-state mirror after a `state` or `stateDiff` message, with
    /// the changed top-level keys
    State {
        state: SharedState,
        changed: Vec<String>,
    },
    /// Authoritative angle set
    Angles(AngleSet),
    /// One client joined
    ClientJoin(String),
    /// One client left
    ClientExit(String),
    /// Full roster refresh
    Clients(Vec<String>),
    /// A changed state key that matches a roster member; `state` is the
    /// key's new value (`Null` when the key was deleted)
    ClientState { client: String, state: Value },
}

impl LinkEvent {
    /// The registry key for this event
    pub fn kind(&self) -> EventKind {
        match self {
            LinkEvent::Connected => EventKind::Connected,
            LinkEvent::Disconnected => EventKind::Disconnected,
            LinkEvent::IsConnected(_) => EventKind::IsConnected,
            LinkEvent::ConnectionStatus(_) => EventKind::ConnectionStatus,
            LinkEvent::Broadcast(_) => EventKind::Broadcast,
            LinkEvent::State { .. } => EventKind::State,
            LinkEvent::Angles(_) => EventKind::Angles,
            LinkEvent::ClientJoin(_) => EventKind::ClientJoin,
            LinkEvent::ClientExit(_) => EventKind::ClientExit,
            LinkEvent::Clients(_) => EventKind::Clients,
            LinkEvent::ClientState { .. } => EventKind::ClientState,
        }
    }
}

/// Fieldless discriminant of [`LinkEvent`], used as the registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    IsConnected,
    ConnectionStatus,
    Broadcast,
    State,
    Angles,
    ClientJoin,
    ClientExit,
    Clients,
    ClientState,
}

impl EventKind {
    /// Event name as exposed to subscribers and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::IsConnected => "isConnected",
            EventKind::ConnectionStatus => "connectionStatus",
            EventKind::Broadcast => "broadcast",
            EventKind::State => "state",
            EventKind::Angles => "angles",
            EventKind::ClientJoin => "clientJoin",
            EventKind::ClientExit => "clientExit",
            EventKind::Clients => "clients",
            EventKind::ClientState => "clientState",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle for unregistering a subscription
pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(&LinkEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    callback: Callback,
    once: bool,
}

/// Per-kind subscriber registry with one-shot waiter support
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<EventKind, Vec<Subscription>>>,
    waiters: Mutex<HashMap<EventKind, Vec<oneshot::Sender<LinkEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event kind
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(callback), false)
    }

    /// Register a callback removed automatically after its first dispatch
    pub fn once<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(callback), true)
    }

    /// Unregister a callback; returns false when the id is unknown
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|sub| sub.id != id);
        list.len() != before
    }

    /// One-shot waiter resolving with the next event of `kind`
    pub fn wait_for(&self, kind: EventKind) -> oneshot::Receiver<LinkEvent> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(kind).or_default().push(tx);
        rx
    }

    /// Dispatch an event to subscribers, then drain matching waiters
    ///
    /// Callbacks are collected first and invoked outside the registry
    /// lock, so a callback may re-subscribe without deadlocking.
    pub fn dispatch(&self, event: LinkEvent) {
        let kind = event.kind();

        let callbacks: Vec<Callback> = {
            let mut subscribers = self.subscribers.lock();
            match subscribers.get_mut(&kind) {
                Some(list) => {
                    let callbacks = list.iter().map(|sub| Arc::clone(&sub.callback)).collect();
                    list.retain(|sub| !sub.once);
                    callbacks
                }
                None => Vec::new(),
            }
        };
        for callback in callbacks {
            callback(&event);
        }

        let waiters = self.waiters.lock().remove(&kind).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(event.clone());
        }
    }

    fn register(&self, kind: EventKind, callback: Callback, once: bool) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().entry(kind).or_default().push(Subscription {
            id,
            callback,
            once,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_on_and_dispatch() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.on(EventKind::Connected, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch(LinkEvent::Connected);
        bus.dispatch(LinkEvent::Connected);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_once_consumed_after_first_dispatch() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.once(EventKind::Angles, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch(LinkEvent::Angles(AngleSet::default()));
        bus.dispatch(LinkEvent::Angles(AngleSet::default()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_subscription() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let id = bus.on(EventKind::Broadcast, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.off(EventKind::Broadcast, id));
        assert!(!bus.off(EventKind::Broadcast, id));

        bus.dispatch(LinkEvent::Broadcast(Value::Null));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_only_matching_kind() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.on(EventKind::ClientJoin, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch(LinkEvent::ClientExit("a".into()));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        bus.dispatch(LinkEvent::ClientJoin("a".into()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiter_resolves_with_next_event() {
        let bus = EventBus::new();
        let rx = bus.wait_for(EventKind::Clients);

        bus.dispatch(LinkEvent::Clients(vec!["unoq".into()]));

        let event = rx.await.unwrap();
        match event {
            LinkEvent::Clients(list) => assert_eq!(list, vec!["unoq".to_string()]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_waiter_fires_once() {
        let bus = EventBus::new();
        let rx = bus.wait_for(EventKind::Connected);
        bus.dispatch(LinkEvent::Connected);
        assert!(rx.await.is_ok());

        // A second dispatch finds no registered waiter and must not panic.
        bus.dispatch(LinkEvent::Connected);
    }

    #[test]
    fn test_callback_can_resubscribe_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let bus_clone = Arc::clone(&bus);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.once(EventKind::Connected, move |_| {
            let counter = Arc::clone(&counter_clone);
            bus_clone.once(EventKind::Connected, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        bus.dispatch(LinkEvent::Connected);
        bus.dispatch(LinkEvent::Connected);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
