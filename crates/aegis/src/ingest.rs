//! Wiring between the RCON pool, the event bus and the columnar store.
//!
//! Three bridges live here:
//!
//! 1. Broadcast frames decoded by the RCON crate become typed bus events.
//! 2. Connection lifecycle transitions become `rcon-connected` /
//!    `rcon-degraded` bus events.
//! 3. A bus subscriber (the ingestor) writes game events into the columnar
//!    store's per-event-type tables.

use aegis_types::ServerId;
use chrono::{DateTime, Utc};
use event_system::{
    ChatChannel, Event, EventBus, EventFilter, EventPayload, PlayerRef,
};
use persistence::{ColumnarStore, EventRow, PlayerColumns};
use rcon_manager::{parse_broadcast, BroadcastEvent, ConnectionObserver, RconError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Converts a decoded broadcast into a bus payload.
pub fn payload_from_broadcast(broadcast: BroadcastEvent) -> EventPayload {
    match broadcast {
        BroadcastEvent::ChatMessage {
            channel,
            name,
            steam_id,
            eos_id,
            message,
        } => EventPayload::ChatMessage {
            channel: match channel {
                rcon_manager::ChatChannel::All => ChatChannel::All,
                rcon_manager::ChatChannel::Team => ChatChannel::Team,
                rcon_manager::ChatChannel::Squad => ChatChannel::Squad,
                rcon_manager::ChatChannel::Admin => ChatChannel::Admin,
            },
            player: PlayerRef {
                name,
                steam_id,
                eos_id,
            },
            message,
        },
        BroadcastEvent::AdminCameraPossessed {
            name,
            steam_id,
            eos_id,
        } => EventPayload::AdminCameraPossessed {
            admin: PlayerRef {
                name,
                steam_id,
                eos_id,
            },
        },
        BroadcastEvent::AdminCameraUnpossessed {
            name,
            steam_id,
            eos_id,
        } => EventPayload::AdminCameraUnpossessed {
            admin: PlayerRef {
                name,
                steam_id,
                eos_id,
            },
        },
        BroadcastEvent::PlayerWarned { name, reason } => EventPayload::PlayerWarned {
            player_name: name,
            reason,
        },
        BroadcastEvent::PlayerKicked {
            name,
            steam_id,
            eos_id,
        } => EventPayload::PlayerKicked {
            player: PlayerRef {
                name,
                steam_id,
                eos_id,
            },
        },
        BroadcastEvent::PlayerBanned {
            name,
            steam_id,
            interval,
        } => EventPayload::PlayerBanned {
            player: PlayerRef {
                name,
                steam_id,
                eos_id: None,
            },
            interval,
        },
        BroadcastEvent::SquadCreated {
            name,
            steam_id,
            eos_id,
            squad_id,
            squad_name,
            team_name,
        } => EventPayload::SquadCreated {
            creator: PlayerRef {
                name,
                steam_id,
                eos_id,
            },
            squad_id,
            squad_name,
            team_name,
        },
    }
}

/// Registers the broadcast decoder on the RCON pool.
pub fn wire_broadcasts(rcon: &rcon_manager::RconManager, bus: EventBus) {
    rcon.on_broadcast(move |server_id, text| {
        if let Some(broadcast) = parse_broadcast(text) {
            bus.publish(Some(server_id), payload_from_broadcast(broadcast));
        }
    });
}

/// Bridges RCON connection lifecycle transitions onto the bus.
pub struct RconEventBridge {
    bus: EventBus,
}

impl RconEventBridge {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl ConnectionObserver for RconEventBridge {
    fn on_connected(&self, server_id: ServerId) {
        self.bus
            .publish(Some(server_id), EventPayload::RconConnected {});
    }

    fn on_degraded(&self, server_id: ServerId, consecutive_failures: u32) {
        self.bus.publish(
            Some(server_id),
            EventPayload::RconDegraded {
                consecutive_failures,
            },
        );
    }

    fn on_fatal(&self, server_id: ServerId, error: &RconError) {
        error!("RCON fatal for {server_id}: {error}; operator action required");
    }
}

fn columns(player: &PlayerRef) -> PlayerColumns {
    PlayerColumns {
        steam_id: player.steam_id,
        eos_id: player.eos_id.clone(),
        name: if player.name.is_empty() {
            None
        } else {
            Some(player.name.clone())
        },
    }
}

/// Maps a bus event to its columnar row, when the event is persisted.
///
/// Plugin logs are persisted by the plugin runtime's own flusher and
/// connection-health events stay in-memory, so both map to `None`.
pub fn event_row(event: &Event) -> Option<EventRow> {
    let server_id = event.server_id?;
    let event_time: DateTime<Utc> = DateTime::from_timestamp(event.timestamp as i64, 0)?;

    match &event.payload {
        EventPayload::ChatMessage {
            channel,
            player,
            message,
        } => Some(EventRow::ChatMessage {
            server_id,
            channel: format!("{channel:?}").to_lowercase(),
            player: columns(player),
            message: message.clone(),
            event_time,
        }),
        EventPayload::PlayerConnected { player, ip } => Some(EventRow::JoinSucceeded {
            server_id,
            player: columns(player),
            ip: ip.clone(),
            event_time,
        }),
        EventPayload::PlayerDisconnected { player } => Some(EventRow::Disconnected {
            server_id,
            player: columns(player),
            event_time,
        }),
        EventPayload::PlayerPossess { player, pawn } => Some(EventRow::Possess {
            server_id,
            player: columns(player),
            pawn: pawn.clone(),
            event_time,
        }),
        EventPayload::PlayerDied {
            victim,
            attacker,
            weapon,
            damage,
            teamkill,
        } => Some(EventRow::Died {
            server_id,
            victim: columns(victim),
            attacker: columns(attacker),
            weapon: weapon.clone(),
            damage: *damage,
            teamkill: *teamkill,
            event_time,
        }),
        EventPayload::PlayerWounded {
            victim,
            attacker,
            weapon,
            damage,
            teamkill,
        } => Some(EventRow::Wounded {
            server_id,
            victim: columns(victim),
            attacker: columns(attacker),
            weapon: weapon.clone(),
            damage: *damage,
            teamkill: *teamkill,
            event_time,
        }),
        EventPayload::PlayerRevived { reviver, victim } => Some(EventRow::Revived {
            server_id,
            reviver: columns(reviver),
            victim: columns(victim),
            event_time,
        }),
        EventPayload::RoundEnded { winner, layer } => Some(EventRow::RoundEnded {
            server_id,
            winner: winner.clone(),
            layer: layer.clone(),
            event_time,
        }),
        EventPayload::TickRate { tick_rate } => Some(EventRow::TickRate {
            server_id,
            tick_rate: *tick_rate,
            event_time,
        }),
        EventPayload::AdminBroadcast { message, from } => Some(EventRow::AdminBroadcast {
            server_id,
            message: message.clone(),
            from: from.clone(),
            event_time,
        }),
        _ => None,
    }
}

/// Spawns the columnar ingestor: a bus subscriber persisting every game
/// event. Store failures are logged; ingestion is not a write path the
/// caller waits on.
pub fn spawn_ingestor(bus: &EventBus, store: Arc<dyn ColumnarStore>) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(EventFilter::all(), None, 1024);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if let Some(row) = event_row(&event) {
                if let Err(e) = store.insert_event(row).await {
                    warn!("Columnar ingest failed for event {}: {}", event.id, e);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryColumnarStore;
    use std::time::Duration;

    #[test]
    fn chat_broadcast_becomes_chat_payload() {
        let broadcast = BroadcastEvent::ChatMessage {
            channel: rcon_manager::ChatChannel::Admin,
            name: "OpsAdmin".to_string(),
            steam_id: None,
            eos_id: None,
            message: "hello".to_string(),
        };
        match payload_from_broadcast(broadcast) {
            EventPayload::ChatMessage {
                channel, message, ..
            } => {
                assert_eq!(channel, ChatChannel::Admin);
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn platform_events_are_not_persisted() {
        let event = Event::new(None, EventPayload::RconConnected {});
        assert!(event_row(&event).is_none());

        let plugin_log = Event::new(
            Some(ServerId::new()),
            EventPayload::PluginLog {
                instance_id: aegis_types::InstanceId::new(),
                level: event_system::LogLevel::Info,
                message: "hi".to_string(),
            },
        );
        assert!(event_row(&plugin_log).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ingestor_writes_game_events() {
        let bus = EventBus::new();
        let store = Arc::new(MemoryColumnarStore::new());
        let _task = spawn_ingestor(&bus, store.clone());

        bus.publish(
            Some(ServerId::new()),
            EventPayload::PlayerConnected {
                player: PlayerRef::named("joiner"),
                ip: None,
            },
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.event_count().await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("ingestor never wrote the event");
    }
}
