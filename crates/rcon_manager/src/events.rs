//! Parsers for the vendor's broadcast frame texts.
//!
//! The game server pushes unsolicited text lines over the broadcast channel
//! (chat, admin camera, kicks, bans, squad creation). Lines that match no
//! known pattern, or that match but carry malformed identifiers, are
//! logged and dropped, never fatal.

use aegis_types::{EosId, SteamId};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Chat channel named in a broadcast chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatChannel {
    All,
    Team,
    Squad,
    Admin,
}

impl ChatChannel {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ChatAll" => Some(ChatChannel::All),
            "ChatTeam" => Some(ChatChannel::Team),
            "ChatSquad" => Some(ChatChannel::Squad),
            "ChatAdmin" => Some(ChatChannel::Admin),
            _ => None,
        }
    }
}

/// A broadcast frame decoded into its typed form.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    ChatMessage {
        channel: ChatChannel,
        name: String,
        steam_id: Option<SteamId>,
        eos_id: Option<EosId>,
        message: String,
    },
    AdminCameraPossessed {
        name: String,
        steam_id: Option<SteamId>,
        eos_id: Option<EosId>,
    },
    AdminCameraUnpossessed {
        name: String,
        steam_id: Option<SteamId>,
        eos_id: Option<EosId>,
    },
    PlayerWarned {
        name: String,
        reason: String,
    },
    PlayerKicked {
        name: String,
        steam_id: Option<SteamId>,
        eos_id: Option<EosId>,
    },
    PlayerBanned {
        name: String,
        steam_id: Option<SteamId>,
        interval: String,
    },
    SquadCreated {
        name: String,
        steam_id: Option<SteamId>,
        eos_id: Option<EosId>,
        squad_id: u32,
        squad_name: String,
        team_name: String,
    },
}

static CHAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[(ChatAll|ChatTeam|ChatSquad|ChatAdmin)] \[Online IDs:EOS: ([0-9a-f]{32})(?: steam: (\d{17}))?] (.+?) : (.*)$",
    )
    .expect("chat pattern")
});

static CAMERA_POSSESSED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[Online I[dD]s:EOS: ([0-9a-f]{32})(?: steam: (\d{17}))?] (.+) has possessed admin camera\.$",
    )
    .expect("camera possessed pattern")
});

static CAMERA_UNPOSSESSED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[Online I[dD]s:EOS: ([0-9a-f]{32})(?: steam: (\d{17}))?] (.+) has unpossessed admin camera\.$",
    )
    .expect("camera unpossessed pattern")
});

static WARNED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^Remote admin has warned player (.*)\. Message was "(.*)"$"#)
        .expect("warned pattern")
});

static KICKED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^Kicked player \d+\. \[Online IDs=EOS: ([0-9a-f]{32})(?: steam: (\d{17}))?] (.*)$",
    )
    .expect("kicked pattern")
});

static BANNED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Banned player \d+\. \[steamid=(\d+)] (.*) for interval (.*)$")
        .expect("banned pattern")
});

static SQUAD_CREATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(.+) \(Online IDs: EOS: ([0-9a-f]{32})(?: steam: (\d{17}))?\) has created Squad (\d+) \(Squad Name: (.+)\) on (.+)$",
    )
    .expect("squad created pattern")
});

fn parse_steam(raw: Option<&str>) -> Option<SteamId> {
    let raw = raw?;
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Broadcast carried malformed Steam id: {raw}");
            None
        }
    }
}

fn parse_eos(raw: &str) -> Option<EosId> {
    match EosId::new(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Broadcast carried malformed EOS id: {raw}");
            None
        }
    }
}

/// Decodes one broadcast line.
///
/// Returns `None` for lines matching no known pattern; the caller treats
/// that as noise, not an error.
pub fn parse_broadcast(text: &str) -> Option<BroadcastEvent> {
    let text = text.trim_end_matches(['\r', '\n']);

    if let Some(caps) = CHAT.captures(text) {
        let channel = ChatChannel::from_tag(&caps[1])?;
        return Some(BroadcastEvent::ChatMessage {
            channel,
            eos_id: parse_eos(&caps[2]),
            steam_id: parse_steam(caps.get(3).map(|m| m.as_str())),
            name: caps[4].to_string(),
            message: caps[5].to_string(),
        });
    }

    if let Some(caps) = CAMERA_POSSESSED.captures(text) {
        return Some(BroadcastEvent::AdminCameraPossessed {
            eos_id: parse_eos(&caps[1]),
            steam_id: parse_steam(caps.get(2).map(|m| m.as_str())),
            name: caps[3].to_string(),
        });
    }

    if let Some(caps) = CAMERA_UNPOSSESSED.captures(text) {
        return Some(BroadcastEvent::AdminCameraUnpossessed {
            eos_id: parse_eos(&caps[1]),
            steam_id: parse_steam(caps.get(2).map(|m| m.as_str())),
            name: caps[3].to_string(),
        });
    }

    if let Some(caps) = WARNED.captures(text) {
        return Some(BroadcastEvent::PlayerWarned {
            name: caps[1].to_string(),
            reason: caps[2].to_string(),
        });
    }

    if let Some(caps) = KICKED.captures(text) {
        return Some(BroadcastEvent::PlayerKicked {
            eos_id: parse_eos(&caps[1]),
            steam_id: parse_steam(caps.get(2).map(|m| m.as_str())),
            name: caps[3].to_string(),
        });
    }

    if let Some(caps) = BANNED.captures(text) {
        return Some(BroadcastEvent::PlayerBanned {
            steam_id: parse_steam(Some(&caps[1])),
            name: caps[2].to_string(),
            interval: caps[3].to_string(),
        });
    }

    if let Some(caps) = SQUAD_CREATED.captures(text) {
        let squad_id = match caps[4].parse() {
            Ok(id) => id,
            Err(_) => {
                warn!("Squad-created broadcast carried a bad squad id: {}", &caps[4]);
                return None;
            }
        };
        return Some(BroadcastEvent::SquadCreated {
            name: caps[1].to_string(),
            eos_id: parse_eos(&caps[2]),
            steam_id: parse_steam(caps.get(3).map(|m| m.as_str())),
            squad_id,
            squad_name: caps[5].to_string(),
            team_name: caps[6].to_string(),
        });
    }

    debug!("Unrecognized broadcast line: {text}");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS: &str = "0002a10186d9414496bf20d22d3860ba";
    const STEAM: &str = "76561198012345678";

    #[test]
    fn parses_chat_all_with_both_ids() {
        let line = format!("[ChatAll] [Online IDs:EOS: {EOS} steam: {STEAM}] Froggy : hello squad");
        match parse_broadcast(&line) {
            Some(BroadcastEvent::ChatMessage {
                channel,
                name,
                steam_id,
                eos_id,
                message,
            }) => {
                assert_eq!(channel, ChatChannel::All);
                assert_eq!(name, "Froggy");
                assert_eq!(steam_id, Some(STEAM.parse().unwrap()));
                assert_eq!(eos_id.unwrap().as_str(), EOS);
                assert_eq!(message, "hello squad");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_chat_without_steam_id() {
        let line = format!("[ChatTeam] [Online IDs:EOS: {EOS}] NoSteam : epic only");
        match parse_broadcast(&line) {
            Some(BroadcastEvent::ChatMessage {
                channel, steam_id, ..
            }) => {
                assert_eq!(channel, ChatChannel::Team);
                assert_eq!(steam_id, None);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_admin_camera_possess_cycle() {
        let possessed =
            format!("[Online Ids:EOS: {EOS} steam: {STEAM}] AdminGuy has possessed admin camera.");
        assert!(matches!(
            parse_broadcast(&possessed),
            Some(BroadcastEvent::AdminCameraPossessed { .. })
        ));

        let unpossessed = format!(
            "[Online IDs:EOS: {EOS} steam: {STEAM}] AdminGuy has unpossessed admin camera."
        );
        assert!(matches!(
            parse_broadcast(&unpossessed),
            Some(BroadcastEvent::AdminCameraUnpossessed { .. })
        ));
    }

    #[test]
    fn parses_warn_kick_ban() {
        let warned = r#"Remote admin has warned player Froggy. Message was "stop teamkilling""#;
        assert_eq!(
            parse_broadcast(warned),
            Some(BroadcastEvent::PlayerWarned {
                name: "Froggy".to_string(),
                reason: "stop teamkilling".to_string(),
            })
        );

        let kicked = format!("Kicked player 3. [Online IDs=EOS: {EOS} steam: {STEAM}] Froggy");
        assert!(matches!(
            parse_broadcast(&kicked),
            Some(BroadcastEvent::PlayerKicked { .. })
        ));

        let banned = format!("Banned player 3. [steamid={STEAM}] Froggy for interval 7");
        match parse_broadcast(&banned) {
            Some(BroadcastEvent::PlayerBanned {
                name,
                steam_id,
                interval,
            }) => {
                assert_eq!(name, "Froggy");
                assert_eq!(steam_id, Some(STEAM.parse().unwrap()));
                assert_eq!(interval, "7");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_squad_created() {
        let line = format!(
            "Froggy (Online IDs: EOS: {EOS} steam: {STEAM}) has created Squad 2 (Squad Name: HELI) on Team US Army"
        );
        match parse_broadcast(&line) {
            Some(BroadcastEvent::SquadCreated {
                name,
                squad_id,
                squad_name,
                team_name,
                ..
            }) => {
                assert_eq!(name, "Froggy");
                assert_eq!(squad_id, 2);
                assert_eq!(squad_name, "HELI");
                assert_eq!(team_name, "Team US Army");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn unknown_lines_are_dropped() {
        assert_eq!(parse_broadcast("a line from some new game build"), None);
        assert_eq!(parse_broadcast(""), None);
    }
}
