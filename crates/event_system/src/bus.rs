//! The event bus: total-order publish with per-subscriber fan-out.

use crate::error::EventError;
use crate::events::{Event, EventPayload};
use crate::subscriber::{
    EventFilter, SubscriberId, SubscriberState, Subscription, Unsubscriber,
};
use aegis_types::ServerId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Bus counters for health reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    /// Total events published since the bus was created
    pub events_published: u64,
    /// Currently registered subscribers
    pub subscribers: usize,
    /// Events dropped across all subscriber queues
    pub events_dropped: u64,
}

struct BusInner {
    subscribers: RwLock<HashMap<SubscriberId, Arc<SubscriberState>>>,
    /// Serializes sequence assignment and fan-out so all subscribers see
    /// one global interleaving.
    publish_lock: Mutex<()>,
    next_seq: AtomicU64,
    published: AtomicU64,
}

impl Unsubscriber for BusInner {
    fn remove(&self, id: SubscriberId) {
        if let Some(state) = self.subscribers.write().remove(&id) {
            state.close();
            debug!("Subscriber {} unregistered", id);
        }
    }
}

/// Multi-producer / multi-consumer typed event broker.
///
/// Cheap to clone; all clones share the same subscriber registry. See the
/// crate docs for the delivery model.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                publish_lock: Mutex::new(()),
                next_seq: AtomicU64::new(1),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Publishes an event to every matching subscriber.
    ///
    /// Never suspends: each matching subscriber gets a bounded enqueue
    /// attempt that evicts that queue's oldest entry when full. Returns the
    /// published event with its assigned sequence number.
    pub fn publish(&self, server_id: Option<ServerId>, payload: EventPayload) -> Arc<Event> {
        let subscribers = self.inner.subscribers.read();
        let _order = self.inner.publish_lock.lock();

        let mut event = Event::new(server_id, payload);
        event.seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(event);
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        for state in subscribers.values() {
            if state.filter.accepts(&event, state.scope) {
                state.enqueue(event.clone());
            }
        }
        event
    }

    /// Registers a subscriber and returns its receive handle.
    ///
    /// `capacity` bounds the subscriber's queue; `0` selects the default of
    /// [`DEFAULT_QUEUE_CAPACITY`]. A `server_scope` additionally restricts
    /// delivery to that server's events plus platform events.
    pub fn subscribe(
        &self,
        filter: EventFilter,
        server_scope: Option<ServerId>,
        capacity: usize,
    ) -> Subscription {
        let capacity = if capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            capacity
        };
        let state = SubscriberState::new(filter, server_scope, capacity);
        self.inner
            .subscribers
            .write()
            .insert(state.id, state.clone());
        debug!("Subscriber {} registered (capacity {})", state.id, capacity);

        let inner_dyn: Arc<dyn Unsubscriber> = self.inner.clone();
        let weak: std::sync::Weak<dyn Unsubscriber> = Arc::downgrade(&inner_dyn);
        Subscription::new(state, weak)
    }

    /// Removes a subscriber; its queue is closed and drained.
    ///
    /// Publishing continues to ignore the id afterwards. Unknown ids report
    /// [`EventError::UnknownSubscriber`].
    pub fn unsubscribe(&self, id: SubscriberId) -> Result<(), EventError> {
        let removed = self.inner.subscribers.write().remove(&id);
        match removed {
            Some(state) => {
                state.close();
                debug!("Subscriber {} unregistered", id);
                Ok(())
            }
            None => Err(EventError::UnknownSubscriber(id.0)),
        }
    }

    /// Current bus counters.
    pub fn stats(&self) -> BusStats {
        let subscribers = self.inner.subscribers.read();
        let events_dropped = subscribers
            .values()
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .sum();
        BusStats {
            events_published: self.inner.published.load(Ordering::Relaxed),
            subscribers: subscribers.len(),
            events_dropped,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("EventBus")
            .field("subscribers", &stats.subscribers)
            .field("events_published", &stats.events_published)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChatChannel, EventType, PlayerRef};

    fn chat(message: &str) -> EventPayload {
        EventPayload::ChatMessage {
            channel: ChatChannel::All,
            player: PlayerRef::named("tester"),
            message: message.to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_with_identical_filters_agree_on_order() {
        let bus = EventBus::new();
        let filter = EventFilter::types([EventType::ChatMessage]);
        let mut first = bus.subscribe(filter.clone(), None, 16);
        let mut second = bus.subscribe(filter, None, 16);

        for i in 0..8 {
            bus.publish(None, chat(&format!("msg {i}")));
        }

        for _ in 0..8 {
            let a = first.recv().await.unwrap();
            let b = second.recv().await.unwrap();
            assert_eq!(a.seq, b.seq);
            assert_eq!(a.payload, b.payload);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_queue_drops_oldest_not_newest() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::types([EventType::ChatMessage]), None, 2);

        bus.publish(None, chat("one"));
        bus.publish(None, chat("two"));
        bus.publish(None, chat("three"));

        assert_eq!(sub.dropped(), 1);
        let kept: Vec<_> = [sub.recv().await.unwrap(), sub.recv().await.unwrap()]
            .iter()
            .map(|e| match &e.payload {
                EventPayload::ChatMessage { message, .. } => message.clone(),
                other => panic!("unexpected payload: {other:?}"),
            })
            .collect();
        assert_eq!(kept, vec!["two".to_string(), "three".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::all(), None, 16);
        let id = sub.id();

        bus.publish(None, chat("before"));
        bus.unsubscribe(id).unwrap();
        bus.publish(None, chat("after"));

        assert!(sub.recv().await.is_none());
        assert!(matches!(
            bus.unsubscribe(id),
            Err(EventError::UnknownSubscriber(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn type_filter_excludes_other_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::types([EventType::TickRate]), None, 16);

        bus.publish(None, chat("not for us"));
        bus.publish(None, EventPayload::TickRate { tick_rate: 30.0 });

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type(), EventType::TickRate);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_scope_admits_platform_events() {
        let bus = EventBus::new();
        let ours = ServerId::new();
        let theirs = ServerId::new();
        let mut sub = bus.subscribe(EventFilter::all(), Some(ours), 16);

        bus.publish(Some(theirs), chat("other server"));
        bus.publish(Some(ours), chat("our server"));
        bus.publish(None, EventPayload::TickRate { tick_rate: 20.0 });

        let first = sub.recv().await.unwrap();
        assert_eq!(first.server_id, Some(ours));
        let second = sub.recv().await.unwrap();
        assert_eq!(second.server_id, None);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_subscription_unregisters() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::all(), None, 16);
        assert_eq!(bus.stats().subscribers, 1);
        drop(sub);
        assert_eq!(bus.stats().subscribers, 0);
    }
}
