//! Mapping from bus events to feed frames.

use event_system::{Event, EventFilter, EventPayload, EventType};
use serde_json::json;
use std::collections::HashSet;

/// Feed channels a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedType {
    Chat,
    Connection,
    Teamkill,
}

impl FeedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Chat => "chat",
            FeedType::Connection => "connection",
            FeedType::Teamkill => "teamkill",
        }
    }

    /// Parses one query-string token; plural forms are accepted.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().trim_end_matches('s') {
            "chat" => Some(FeedType::Chat),
            "connection" => Some(FeedType::Connection),
            "teamkill" => Some(FeedType::Teamkill),
            _ => None,
        }
    }
}

/// Parses the `types=` query parameter into a feed selection.
///
/// Unknown tokens are ignored; an absent or empty parameter selects every
/// feed type.
pub fn parse_feed_types(query: Option<&str>) -> HashSet<FeedType> {
    let mut selected = HashSet::new();
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("types=") {
                for token in value.split(',') {
                    if let Some(feed_type) = FeedType::parse(token) {
                        selected.insert(feed_type);
                    }
                }
            }
        }
    }
    if selected.is_empty() {
        selected.insert(FeedType::Chat);
        selected.insert(FeedType::Connection);
        selected.insert(FeedType::Teamkill);
    }
    selected
}

/// Bus filter matching exactly the events the selection can render.
pub fn filter_for(selected: &HashSet<FeedType>) -> EventFilter {
    let mut types = Vec::new();
    if selected.contains(&FeedType::Chat) {
        types.push(EventType::ChatMessage);
    }
    if selected.contains(&FeedType::Connection) {
        types.push(EventType::PlayerConnected);
        types.push(EventType::PlayerDisconnected);
    }
    if selected.contains(&FeedType::Teamkill) {
        types.push(EventType::PlayerDied);
    }
    EventFilter::types(types)
}

/// The frame sent once on connect, naming the active selection.
pub fn connected_frame(selected: &HashSet<FeedType>) -> serde_json::Value {
    let mut types: Vec<&str> = selected.iter().map(FeedType::as_str).collect();
    types.sort();
    json!({ "type": "connected", "types": types })
}

/// Renders a bus event as a feed frame, or `None` when the selection does
/// not cover it (a non-teamkill death, for instance).
pub fn feed_frame(event: &Event, selected: &HashSet<FeedType>) -> Option<serde_json::Value> {
    match &event.payload {
        EventPayload::ChatMessage {
            channel,
            player,
            message,
        } if selected.contains(&FeedType::Chat) => Some(json!({
            "id": event.id,
            "type": "chat",
            "timestamp": event.timestamp,
            "data": {
                "server_id": event.server_id,
                "channel": channel,
                "player_name": player.name,
                "steam_id": player.steam_id,
                "eos_id": player.eos_id,
                "message": message,
            }
        })),
        EventPayload::PlayerConnected { player, ip } if selected.contains(&FeedType::Connection) => {
            Some(json!({
                "id": event.id,
                "type": "connection",
                "timestamp": event.timestamp,
                "data": {
                    "server_id": event.server_id,
                    "player_name": player.name,
                    "steam_id": player.steam_id,
                    "eos_id": player.eos_id,
                    "action": "connected",
                    "ip": ip,
                }
            }))
        }
        EventPayload::PlayerDisconnected { player } if selected.contains(&FeedType::Connection) => {
            Some(json!({
                "id": event.id,
                "type": "connection",
                "timestamp": event.timestamp,
                "data": {
                    "server_id": event.server_id,
                    "player_name": player.name,
                    "steam_id": player.steam_id,
                    "eos_id": player.eos_id,
                    "action": "disconnected",
                }
            }))
        }
        EventPayload::PlayerDied {
            victim,
            attacker,
            weapon,
            damage,
            teamkill: true,
        } if selected.contains(&FeedType::Teamkill) => Some(json!({
            "id": event.id,
            "type": "teamkill",
            "timestamp": event.timestamp,
            "data": {
                "server_id": event.server_id,
                "victim_name": victim.name,
                "attacker_name": attacker.name,
                "weapon": weapon,
                "damage": damage,
            }
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_system::{ChatChannel, PlayerRef};

    #[test]
    fn query_parsing_accepts_plurals_and_ignores_noise() {
        let selected = parse_feed_types(Some("types=chat,teamkills,bogus"));
        assert_eq!(selected.len(), 2);
        assert!(selected.contains(&FeedType::Chat));
        assert!(selected.contains(&FeedType::Teamkill));
    }

    #[test]
    fn absent_query_selects_everything() {
        assert_eq!(parse_feed_types(None).len(), 3);
        assert_eq!(parse_feed_types(Some("other=1")).len(), 3);
    }

    #[test]
    fn non_teamkill_death_is_not_rendered() {
        let selected = parse_feed_types(Some("types=teamkill"));
        let event = Event::new(
            None,
            EventPayload::PlayerDied {
                victim: PlayerRef::named("victim"),
                attacker: PlayerRef::named("attacker"),
                weapon: "BP_Rifle".to_string(),
                damage: 100.0,
                teamkill: false,
            },
        );
        assert!(feed_frame(&event, &selected).is_none());
    }

    #[test]
    fn teamkill_frame_carries_combat_data() {
        let selected = parse_feed_types(Some("types=teamkills"));
        let event = Event::new(
            None,
            EventPayload::PlayerDied {
                victim: PlayerRef::named("victim"),
                attacker: PlayerRef::named("attacker"),
                weapon: "BP_Rifle".to_string(),
                damage: 120.5,
                teamkill: true,
            },
        );
        let frame = feed_frame(&event, &selected).unwrap();
        assert_eq!(frame["type"], "teamkill");
        assert_eq!(frame["data"]["victim_name"], "victim");
        assert_eq!(frame["data"]["attacker_name"], "attacker");
        assert_eq!(frame["data"]["weapon"], "BP_Rifle");
        assert_eq!(frame["data"]["damage"], 120.5);
    }

    #[test]
    fn chat_outside_selection_is_dropped() {
        let selected = parse_feed_types(Some("types=teamkill"));
        let event = Event::new(
            None,
            EventPayload::ChatMessage {
                channel: ChatChannel::All,
                player: PlayerRef::named("talker"),
                message: "hi".to_string(),
            },
        );
        assert!(feed_frame(&event, &selected).is_none());
    }
}
