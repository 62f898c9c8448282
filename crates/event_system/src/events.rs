//! Event types and payloads.
//!
//! Events carry a discriminated-union payload keyed by a closed set of
//! [`EventType`] tags. An event is immutable after publication; consumers
//! receive shared `Arc<Event>` handles and never a mutable view.

use aegis_types::{current_timestamp, EosId, InstanceId, ServerId, SteamId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of event type tags.
///
/// The tag is what subscriber filters match on; the payload carries the
/// type-specific data. Adding a variant here requires a matching
/// [`EventPayload`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ChatMessage,
    PlayerConnected,
    PlayerDisconnected,
    PlayerDied,
    PlayerWounded,
    PlayerRevived,
    PlayerPossess,
    PlayerWarned,
    PlayerKicked,
    PlayerBanned,
    SquadCreated,
    AdminBroadcast,
    AdminCameraPossessed,
    AdminCameraUnpossessed,
    RconConnected,
    RconDegraded,
    RoundEnded,
    TickRate,
    PluginLog,
    ConnectorDown,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| format!("{self:?}"));
        write!(f, "{s}")
    }
}

/// Chat channel a message was sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatChannel {
    All,
    Team,
    Squad,
    Admin,
}

/// Severity level for plugin log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// A player reference as observed in RCON broadcast text.
///
/// Either identifier may be absent; combat events in particular can name a
/// player the platform has never seen a join record for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerRef {
    /// Player display name at the time of the event
    pub name: String,
    /// Steam id, when present in the broadcast
    pub steam_id: Option<SteamId>,
    /// EOS id, when present in the broadcast
    pub eos_id: Option<EosId>,
}

impl PlayerRef {
    /// A reference carrying only a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steam_id: None,
            eos_id: None,
        }
    }
}

/// Discriminated union of event payloads, keyed by [`EventType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    ChatMessage {
        channel: ChatChannel,
        player: PlayerRef,
        message: String,
    },
    PlayerConnected {
        player: PlayerRef,
        ip: Option<String>,
    },
    PlayerDisconnected {
        player: PlayerRef,
    },
    PlayerDied {
        victim: PlayerRef,
        attacker: PlayerRef,
        weapon: String,
        damage: f64,
        teamkill: bool,
    },
    PlayerWounded {
        victim: PlayerRef,
        attacker: PlayerRef,
        weapon: String,
        damage: f64,
        teamkill: bool,
    },
    PlayerRevived {
        reviver: PlayerRef,
        victim: PlayerRef,
    },
    PlayerPossess {
        player: PlayerRef,
        pawn: String,
    },
    PlayerWarned {
        player_name: String,
        reason: String,
    },
    PlayerKicked {
        player: PlayerRef,
    },
    PlayerBanned {
        player: PlayerRef,
        interval: String,
    },
    SquadCreated {
        creator: PlayerRef,
        squad_id: u32,
        squad_name: String,
        team_name: String,
    },
    AdminBroadcast {
        message: String,
        from: String,
    },
    AdminCameraPossessed {
        admin: PlayerRef,
    },
    AdminCameraUnpossessed {
        admin: PlayerRef,
    },
    RconConnected {},
    RconDegraded {
        consecutive_failures: u32,
    },
    RoundEnded {
        winner: Option<String>,
        layer: Option<String>,
    },
    TickRate {
        tick_rate: f64,
    },
    PluginLog {
        instance_id: InstanceId,
        level: LogLevel,
        message: String,
    },
    ConnectorDown {
        connector_id: Uuid,
        connector_type: String,
        error: String,
    },
}

impl EventPayload {
    /// The event type tag this payload corresponds to.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::ChatMessage { .. } => EventType::ChatMessage,
            EventPayload::PlayerConnected { .. } => EventType::PlayerConnected,
            EventPayload::PlayerDisconnected { .. } => EventType::PlayerDisconnected,
            EventPayload::PlayerDied { .. } => EventType::PlayerDied,
            EventPayload::PlayerWounded { .. } => EventType::PlayerWounded,
            EventPayload::PlayerRevived { .. } => EventType::PlayerRevived,
            EventPayload::PlayerPossess { .. } => EventType::PlayerPossess,
            EventPayload::PlayerWarned { .. } => EventType::PlayerWarned,
            EventPayload::PlayerKicked { .. } => EventType::PlayerKicked,
            EventPayload::PlayerBanned { .. } => EventType::PlayerBanned,
            EventPayload::SquadCreated { .. } => EventType::SquadCreated,
            EventPayload::AdminBroadcast { .. } => EventType::AdminBroadcast,
            EventPayload::AdminCameraPossessed { .. } => EventType::AdminCameraPossessed,
            EventPayload::AdminCameraUnpossessed { .. } => EventType::AdminCameraUnpossessed,
            EventPayload::RconConnected {} => EventType::RconConnected,
            EventPayload::RconDegraded { .. } => EventType::RconDegraded,
            EventPayload::RoundEnded { .. } => EventType::RoundEnded,
            EventPayload::TickRate { .. } => EventType::TickRate,
            EventPayload::PluginLog { .. } => EventType::PluginLog,
            EventPayload::ConnectorDown { .. } => EventType::ConnectorDown,
        }
    }
}

/// A published event.
///
/// `seq` is assigned under the bus's publish lock and is strictly increasing
/// across the life of the bus; for any single subscriber, received events
/// are strictly increasing in `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub id: Uuid,
    /// Publication sequence number (bus-global monotonic order)
    pub seq: u64,
    /// Server this event concerns; `None` for platform-level events
    pub server_id: Option<ServerId>,
    /// Unix timestamp (seconds) at publication
    pub timestamp: u64,
    /// Type-specific payload
    pub payload: EventPayload,
}

impl Event {
    /// Builds a new event with a fresh id and the current wall timestamp.
    ///
    /// The sequence number is assigned by the bus at publish time; events
    /// constructed directly carry `seq = 0`.
    pub fn new(server_id: Option<ServerId>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            server_id,
            timestamp: current_timestamp(),
            payload,
        }
    }

    /// The payload's event type tag.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tags_match_event_types() {
        let chat = EventPayload::ChatMessage {
            channel: ChatChannel::All,
            player: PlayerRef::named("pilot"),
            message: "hello".to_string(),
        };
        assert_eq!(chat.event_type(), EventType::ChatMessage);

        let degraded = EventPayload::RconDegraded {
            consecutive_failures: 3,
        };
        assert_eq!(degraded.event_type(), EventType::RconDegraded);
    }

    #[test]
    fn event_type_serializes_kebab_case() {
        let json = serde_json::to_string(&EventType::PlayerDied).unwrap();
        assert_eq!(json, "\"player-died\"");
        assert_eq!(EventType::ChatMessage.to_string(), "chat-message");
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = EventPayload::PlayerDied {
            victim: PlayerRef::named("victim"),
            attacker: PlayerRef::named("attacker"),
            weapon: "BP_Rifle".to_string(),
            damage: 120.5,
            teamkill: true,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: EventPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
