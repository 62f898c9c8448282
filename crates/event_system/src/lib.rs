//! # Aegis Event System
//!
//! In-process, typed publish/subscribe broker decoupling event producers
//! (the RCON manager, plugin runtime, transport handlers) from consumers
//! (plugins, live feeds, the columnar ingestor).
//!
//! ## Delivery model
//!
//! - Multi-producer / multi-consumer within a single process.
//! - Every subscriber owns a bounded FIFO queue. When the queue is full the
//!   **oldest** event is dropped to make room and a per-subscriber drop
//!   counter is incremented; publishers are never blocked by slow consumers.
//! - Publication is serialized under a single lock, so two subscribers with
//!   identical filters observe exactly the same interleaving. The ingestor
//!   and replay-style plugins rely on this property.
//!
//! ## Example
//!
//! ```rust
//! use event_system::{EventBus, EventFilter, EventPayload, EventType};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new();
//! let mut sub = bus.subscribe(EventFilter::types([EventType::TickRate]), None, 16);
//!
//! bus.publish(None, EventPayload::TickRate { tick_rate: 42.5 });
//!
//! let event = sub.recv().await.unwrap();
//! assert_eq!(event.event_type(), EventType::TickRate);
//! # }
//! ```

mod bus;
mod error;
mod events;
mod subscriber;

pub use bus::{BusStats, EventBus};
pub use error::EventError;
pub use events::{ChatChannel, Event, EventPayload, EventType, LogLevel, PlayerRef};
pub use subscriber::{EventFilter, SubscriberId, Subscription};
