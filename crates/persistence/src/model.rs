//! Relational row types.
//!
//! Primary keys are uuids; ban Steam ids are 64-bit integers. These structs
//! mirror the `servers`, `server_bans`, `ban_lists`, `server_extensions`,
//! `connectors` and `remote_ban_sources` tables.

use aegis_types::{BanListId, ConfigValue, InstanceId, ServerId, SteamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A managed game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub host: String,
    pub game_port: u16,
    /// RCON host when it differs from the game host
    pub rcon_host: Option<String>,
    pub rcon_port: u16,
    pub rcon_password: String,
    pub created_at: DateTime<Utc>,
}

impl ServerRecord {
    /// Host to dial for RCON; falls back to the game host.
    pub fn rcon_address(&self) -> (&str, u16) {
        (
            self.rcon_host.as_deref().unwrap_or(&self.host),
            self.rcon_port,
        )
    }
}

/// A single ban row.
///
/// `ban_list_id` is `None` for bans local to one server; a value attaches
/// the ban to a list that fans it out to subscribed servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub id: Uuid,
    pub server_id: ServerId,
    pub steam_id: SteamId,
    pub reason: String,
    /// 0 means permanent
    pub duration_days: u32,
    pub created_at: DateTime<Utc>,
    pub admin_id: Uuid,
    pub admin_name: String,
    pub admin_steam_id: Option<SteamId>,
    pub ban_list_id: Option<BanListId>,
}

impl BanRecord {
    /// True for bans that never expire.
    pub fn is_permanent(&self) -> bool {
        self.duration_days == 0
    }

    /// Expiry instant; `None` for permanent bans.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.is_permanent() {
            None
        } else {
            Some(self.created_at + chrono::Duration::days(self.duration_days as i64))
        }
    }

    /// True once a timed ban has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }
}

/// A named ban list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanListRecord {
    pub id: BanListId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A plugin instance row (`server_extensions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub id: InstanceId,
    pub server_id: ServerId,
    /// Plugin type id from the static registry
    pub plugin_type_id: String,
    pub enabled: bool,
    /// Opaque, schema-validated configuration map (insertion-ordered)
    pub config: BTreeMap<String, ConfigValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A shared connector row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorRecord {
    pub id: Uuid,
    /// Connector type id from the static registry
    pub connector_type_id: String,
    pub config: BTreeMap<String, ConfigValue>,
    pub created_at: DateTime<Utc>,
}

/// An external ban list merged into the emitted config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBanSourceRecord {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// Last successfully fetched body, cached for emission
    pub cached_body: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// One audit log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRecord {
    pub id: Uuid,
    pub server_id: Option<ServerId>,
    pub actor: String,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ban(duration_days: u32, created_at: DateTime<Utc>) -> BanRecord {
        BanRecord {
            id: Uuid::new_v4(),
            server_id: ServerId::new(),
            steam_id: SteamId::new(76561198000000001),
            reason: "test".to_string(),
            duration_days,
            created_at,
            admin_id: Uuid::new_v4(),
            admin_name: "admin".to_string(),
            admin_steam_id: None,
            ban_list_id: None,
        }
    }

    #[test]
    fn permanent_ban_never_expires() {
        let b = ban(0, Utc::now() - chrono::Duration::days(10_000));
        assert!(b.is_permanent());
        assert!(!b.is_expired(Utc::now()));
        assert_eq!(b.expires_at(), None);
    }

    #[test]
    fn timed_ban_expires_after_duration() {
        let created = Utc::now() - chrono::Duration::days(8);
        let b = ban(7, created);
        assert!(b.is_expired(Utc::now()));

        let fresh = ban(7, Utc::now());
        assert!(!fresh.is_expired(Utc::now()));
    }
}
