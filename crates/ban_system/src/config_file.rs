//! Ban config file emission.
//!
//! The game server reads a plain-text ban list at boot, one ban per line:
//!
//! ```text
//! <adminName> [SteamID <adminSteamIdOrZero>] Banned:<targetSteamId>:<expiryUnixOrZero> //<reason>
//! ```
//!
//! Expired bans are omitted; permanent bans carry `0` as expiry. This file
//! is the reconciliation path after propagation failures: the next server
//! start-up reads it and silently converges.

use chrono::{DateTime, Utc};
use persistence::BanRecord;

/// Renders one ban line, or `None` when the ban has expired at `now`.
pub fn render_ban_line(ban: &BanRecord, now: DateTime<Utc>) -> Option<String> {
    if ban.is_expired(now) {
        return None;
    }
    let expiry = ban.expires_at().map(|t| t.timestamp()).unwrap_or(0);
    let admin_steam = ban.admin_steam_id.map(|s| s.raw()).unwrap_or(0);
    let mut line = format!(
        "{} [SteamID {}] Banned:{}:{}",
        ban.admin_name, admin_steam, ban.steam_id, expiry
    );
    if !ban.reason.is_empty() {
        line.push_str(&format!(" //{}", ban.reason));
    }
    Some(line)
}

/// Renders the full config file for one server.
///
/// `remote_bodies` are pre-rendered line blocks fetched from external ban
/// sources; they are appended verbatim after the locally managed bans.
pub fn render_ban_config(
    bans: &[BanRecord],
    remote_bodies: &[String],
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    for ban in bans {
        if let Some(line) = render_ban_line(ban, now) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    for body in remote_bodies {
        for line in body.lines() {
            let line = line.trim();
            if !line.is_empty() {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_types::{ServerId, SteamId};
    use chrono::Duration;
    use uuid::Uuid;

    fn ban(duration_days: u32, created_days_ago: i64, reason: &str) -> BanRecord {
        BanRecord {
            id: Uuid::new_v4(),
            server_id: ServerId::new(),
            steam_id: SteamId::new(76561198000000042),
            reason: reason.to_string(),
            duration_days,
            created_at: Utc::now() - Duration::days(created_days_ago),
            admin_id: Uuid::new_v4(),
            admin_name: "OpsAdmin".to_string(),
            admin_steam_id: Some(SteamId::new(76561198000000001)),
            ban_list_id: None,
        }
    }

    #[test]
    fn permanent_ban_renders_zero_expiry() {
        let line = render_ban_line(&ban(0, 100, "griefing"), Utc::now()).unwrap();
        assert_eq!(
            line,
            "OpsAdmin [SteamID 76561198000000001] Banned:76561198000000042:0 //griefing"
        );
    }

    #[test]
    fn expired_ban_is_omitted() {
        assert!(render_ban_line(&ban(7, 8, "afk"), Utc::now()).is_none());
    }

    #[test]
    fn timed_ban_renders_unix_expiry() {
        let b = ban(7, 0, "tk");
        let line = render_ban_line(&b, Utc::now()).unwrap();
        let expiry = b.expires_at().unwrap().timestamp();
        assert!(line.ends_with(&format!("Banned:76561198000000042:{expiry} //tk")));
    }

    #[test]
    fn missing_admin_steam_renders_zero() {
        let mut b = ban(0, 0, "");
        b.admin_steam_id = None;
        let line = render_ban_line(&b, Utc::now()).unwrap();
        assert_eq!(
            line,
            "OpsAdmin [SteamID 0] Banned:76561198000000042:0"
        );
    }

    #[test]
    fn config_appends_remote_source_lines() {
        let remote = "RemoteAdmin [SteamID 0] Banned:76561198000000099:0 //imported\n".to_string();
        let config = render_ban_config(&[ban(0, 0, "local")], &[remote], Utc::now());
        let lines: Vec<&str> = config.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("//local"));
        assert!(lines[1].contains("//imported"));
    }
}
