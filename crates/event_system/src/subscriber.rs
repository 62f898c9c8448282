//! Subscriber filters, queues and receive handles.

use crate::events::{Event, EventType};
use aegis_types::ServerId;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use uuid::Uuid;

/// Unique identifier for a bus subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub Uuid);

impl SubscriberId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event filter: accepted types and accepted server ids.
///
/// An empty set accepts everything on that dimension. Events without a
/// server id (platform events) always pass the server dimension.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Accepted event types; empty accepts all types
    pub types: HashSet<EventType>,
    /// Accepted server ids; empty accepts all servers
    pub server_ids: HashSet<ServerId>,
}

impl EventFilter {
    /// Accept-everything filter.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter accepting only the given event types.
    pub fn types(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            types: types.into_iter().collect(),
            server_ids: HashSet::new(),
        }
    }

    /// Restricts the filter to the given server ids.
    pub fn with_servers(mut self, servers: impl IntoIterator<Item = ServerId>) -> Self {
        self.server_ids = servers.into_iter().collect();
        self
    }

    /// Whether this filter accepts the event, given the subscriber's scope.
    ///
    /// A subscriber bound to a server scope additionally receives only
    /// events for that server or platform events carrying no server id.
    pub fn accepts(&self, event: &Event, scope: Option<ServerId>) -> bool {
        if !self.types.is_empty() && !self.types.contains(&event.event_type()) {
            return false;
        }
        match event.server_id {
            None => {}
            Some(server) => {
                if !self.server_ids.is_empty() && !self.server_ids.contains(&server) {
                    return false;
                }
                if let Some(scoped) = scope {
                    if server != scoped {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Shared per-subscriber state owned jointly by the bus and the handle.
pub(crate) struct SubscriberState {
    pub(crate) id: SubscriberId,
    pub(crate) filter: EventFilter,
    pub(crate) scope: Option<ServerId>,
    pub(crate) capacity: usize,
    pub(crate) queue: Mutex<VecDeque<Arc<Event>>>,
    pub(crate) notify: Notify,
    pub(crate) dropped: AtomicU64,
    pub(crate) closed: AtomicBool,
}

impl SubscriberState {
    pub(crate) fn new(
        filter: EventFilter,
        scope: Option<ServerId>,
        capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: SubscriberId::new(),
            filter,
            scope,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Enqueues an event, evicting the oldest entry when full.
    pub(crate) fn enqueue(&self, event: Arc<Event>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.queue.lock();
            if queue.len() == self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Marks the subscriber closed and discards anything still queued.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue.lock().clear();
        self.notify.notify_waiters();
    }
}

/// Trait used by [`Subscription`] to detach itself from the owning bus.
pub(crate) trait Unsubscriber: Send + Sync {
    fn remove(&self, id: SubscriberId);
}

/// Receive handle for one subscriber.
///
/// Dropping the subscription unregisters it from the bus, so a subscriber
/// owned by a canceled task disappears with the task.
pub struct Subscription {
    state: Arc<SubscriberState>,
    bus: Weak<dyn Unsubscriber>,
}

impl Subscription {
    pub(crate) fn new(state: Arc<SubscriberState>, bus: Weak<dyn Unsubscriber>) -> Self {
        Self { state, bus }
    }

    /// This subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.state.id
    }

    /// Number of events dropped from this subscriber's queue so far.
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.state.queue.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receives the next event in publication order.
    ///
    /// Returns `None` once the subscriber has been unsubscribed.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            // Arm the wakeup before checking state so a publish or close
            // landing in between is never missed.
            let notified = self.state.notify.notified();
            if let Some(event) = self.state.queue.lock().pop_front() {
                return Some(event);
            }
            if self.state.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        if self.state.closed.load(Ordering::Acquire) {
            return None;
        }
        self.state.queue.lock().pop_front()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.state.id)
            .field("queued", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.state.id);
        }
        self.state.close();
    }
}
