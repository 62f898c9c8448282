//! Columnar store interface: one table per event type, plugin logs and the
//! derived identity tables.

use crate::error::StoreError;
use aegis_types::{EosId, InstanceId, ServerId, SteamId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One side of a combat or chat row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerColumns {
    pub steam_id: Option<SteamId>,
    pub eos_id: Option<EosId>,
    pub name: Option<String>,
}

impl PlayerColumns {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            steam_id: None,
            eos_id: None,
            name: Some(name.into()),
        }
    }

    /// True when the row references neither identifier nor a name.
    pub fn is_empty(&self) -> bool {
        self.steam_id.is_none() && self.eos_id.is_none() && self.name.is_none()
    }
}

/// A row destined for one of the per-event-type tables.
///
/// The variant selects the table (`server_join_succeeded_events`,
/// `server_player_died_events`, ...); rows are partitioned on event time by
/// the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum EventRow {
    JoinSucceeded {
        server_id: ServerId,
        player: PlayerColumns,
        ip: Option<String>,
        event_time: DateTime<Utc>,
    },
    Disconnected {
        server_id: ServerId,
        player: PlayerColumns,
        event_time: DateTime<Utc>,
    },
    Possess {
        server_id: ServerId,
        player: PlayerColumns,
        pawn: String,
        event_time: DateTime<Utc>,
    },
    Damaged {
        server_id: ServerId,
        victim: PlayerColumns,
        attacker: PlayerColumns,
        weapon: String,
        damage: f64,
        teamkill: bool,
        event_time: DateTime<Utc>,
    },
    Died {
        server_id: ServerId,
        victim: PlayerColumns,
        attacker: PlayerColumns,
        weapon: String,
        damage: f64,
        teamkill: bool,
        event_time: DateTime<Utc>,
    },
    Wounded {
        server_id: ServerId,
        victim: PlayerColumns,
        attacker: PlayerColumns,
        weapon: String,
        damage: f64,
        teamkill: bool,
        event_time: DateTime<Utc>,
    },
    Revived {
        server_id: ServerId,
        reviver: PlayerColumns,
        victim: PlayerColumns,
        event_time: DateTime<Utc>,
    },
    ChatMessage {
        server_id: ServerId,
        channel: String,
        player: PlayerColumns,
        message: String,
        event_time: DateTime<Utc>,
    },
    RoundEnded {
        server_id: ServerId,
        winner: Option<String>,
        layer: Option<String>,
        event_time: DateTime<Utc>,
    },
    TickRate {
        server_id: ServerId,
        tick_rate: f64,
        event_time: DateTime<Utc>,
    },
    AdminBroadcast {
        server_id: ServerId,
        message: String,
        from: String,
        event_time: DateTime<Utc>,
    },
}

impl EventRow {
    /// Event time of this row.
    pub fn event_time(&self) -> DateTime<Utc> {
        match self {
            EventRow::JoinSucceeded { event_time, .. }
            | EventRow::Disconnected { event_time, .. }
            | EventRow::Possess { event_time, .. }
            | EventRow::Damaged { event_time, .. }
            | EventRow::Died { event_time, .. }
            | EventRow::Wounded { event_time, .. }
            | EventRow::Revived { event_time, .. }
            | EventRow::ChatMessage { event_time, .. }
            | EventRow::RoundEnded { event_time, .. }
            | EventRow::TickRate { event_time, .. }
            | EventRow::AdminBroadcast { event_time, .. } => *event_time,
        }
    }

    /// Every player reference this row carries, with its role.
    ///
    /// Identity resolution must see references from *all* event tables, not
    /// only joins: some players appear in combat rows with no join record.
    pub fn player_refs(&self) -> Vec<(ObservationRole, &PlayerColumns)> {
        use ObservationRole::*;
        let refs: Vec<(ObservationRole, &PlayerColumns)> = match self {
            EventRow::JoinSucceeded { player, .. } => vec![(Join, player)],
            EventRow::Disconnected { player, .. } => vec![(Subject, player)],
            EventRow::Possess { player, .. } => vec![(Subject, player)],
            EventRow::Damaged {
                victim, attacker, ..
            }
            | EventRow::Died {
                victim, attacker, ..
            }
            | EventRow::Wounded {
                victim, attacker, ..
            } => vec![(Victim, victim), (Attacker, attacker)],
            EventRow::Revived {
                reviver, victim, ..
            } => vec![(Reviver, reviver), (Victim, victim)],
            EventRow::ChatMessage { player, .. } => vec![(Subject, player)],
            EventRow::RoundEnded { .. }
            | EventRow::TickRate { .. }
            | EventRow::AdminBroadcast { .. } => vec![],
        };
        refs.into_iter().filter(|(_, p)| !p.is_empty()).collect()
    }
}

/// Role a player reference played in its source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationRole {
    Join,
    Subject,
    Victim,
    Attacker,
    Reviver,
}

/// A flattened per-player reference extracted from the event tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub role: ObservationRole,
    pub steam_id: Option<SteamId>,
    pub eos_id: Option<EosId>,
    pub name: Option<String>,
    pub event_time: DateTime<Utc>,
}

/// The probe dimension for identity lookups.
///
/// This closed enum is the only value ever interpolated into a lookup's
/// where-clause; everything else is a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Steam,
    Eos,
}

/// A materialized identity class row (`player_identities`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerIdentityRecord {
    /// Deterministic representative: lexicographic minimum of member keys
    pub canonical_id: String,
    /// Most recent non-empty Steam id in the class
    pub primary_steam: Option<SteamId>,
    /// Most recent non-empty EOS id in the class
    pub primary_eos: Option<EosId>,
    pub all_steam_ids: Vec<SteamId>,
    pub all_eos_ids: Vec<EosId>,
    pub all_names: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Count of distinct join days across the whole class
    pub total_sessions: u64,
}

/// Combat statistics aggregated over a set of identity keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CombatStats {
    pub kills: u64,
    pub deaths: u64,
    pub teamkills: u64,
    pub damage_dealt: f64,
    pub revives: u64,
}

/// One plugin log row: `(server_id, instance_id, ts, level, message, fields)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginLogRecord {
    pub server_id: ServerId,
    pub instance_id: InstanceId,
    pub ts: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub fields: serde_json::Value,
}

/// Sort order for log queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter for plugin log fetches.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub server_id: Option<ServerId>,
    pub instance_id: Option<InstanceId>,
    /// Exact level match when set
    pub level: Option<String>,
    /// Case-insensitive substring over the message
    pub search: Option<String>,
    /// Only rows strictly before this cursor
    pub before: Option<DateTime<Utc>>,
    /// Only rows strictly after this cursor
    pub after: Option<DateTime<Utc>>,
    pub order: LogOrder,
    pub limit: usize,
}

impl LogQuery {
    /// True when the record passes every filter dimension.
    pub fn matches(&self, record: &PluginLogRecord) -> bool {
        if let Some(server_id) = self.server_id {
            if record.server_id != server_id {
                return false;
            }
        }
        if let Some(instance_id) = self.instance_id {
            if record.instance_id != instance_id {
                return false;
            }
        }
        if let Some(level) = &self.level {
            if !record.level.eq_ignore_ascii_case(level) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !record
                .message
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        if let Some(before) = self.before {
            if record.ts >= before {
                return false;
            }
        }
        if let Some(after) = self.after {
            if record.ts <= after {
                return false;
            }
        }
        true
    }
}

/// Columnar analytics store: per-event-type tables plus derived identity
/// tables and plugin logs.
#[async_trait]
pub trait ColumnarStore: Send + Sync {
    /// Appends one event row to its table.
    async fn insert_event(&self, row: EventRow) -> Result<(), StoreError>;

    /// Flattened player references across all event tables.
    async fn observations(&self) -> Result<Vec<Observation>, StoreError>;

    /// Combat statistics for the given identity keys.
    ///
    /// Callers expand a probe id to its full identity class before calling;
    /// counting against a lone probe id undercounts.
    async fn combat_stats(
        &self,
        steam_ids: &[SteamId],
        eos_ids: &[EosId],
    ) -> Result<CombatStats, StoreError>;

    /// Batched plugin log append.
    async fn insert_plugin_logs(&self, records: &[PluginLogRecord]) -> Result<(), StoreError>;

    /// Log fetch with level/search filters and time cursors.
    async fn plugin_logs(&self, query: &LogQuery) -> Result<Vec<PluginLogRecord>, StoreError>;

    /// Atomically replaces the materialized identity table.
    async fn replace_identities(
        &self,
        identities: &[PlayerIdentityRecord],
    ) -> Result<(), StoreError>;

    /// All materialized identity rows.
    async fn identities(&self) -> Result<Vec<PlayerIdentityRecord>, StoreError>;

    /// Looks up the identity row containing the given key, if any.
    async fn identity_by_key(
        &self,
        kind: IdentifierKind,
        value: &str,
    ) -> Result<Option<PlayerIdentityRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combat_rows_reference_both_sides() {
        let row = EventRow::Died {
            server_id: ServerId::new(),
            victim: PlayerColumns::named("victim"),
            attacker: PlayerColumns::named("attacker"),
            weapon: "BP_Rifle".to_string(),
            damage: 100.0,
            teamkill: false,
            event_time: Utc::now(),
        };
        let refs = row.player_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].0, ObservationRole::Victim);
        assert_eq!(refs[1].0, ObservationRole::Attacker);
    }

    #[test]
    fn empty_player_columns_are_skipped() {
        let row = EventRow::Died {
            server_id: ServerId::new(),
            victim: PlayerColumns::named("victim"),
            attacker: PlayerColumns::default(),
            weapon: String::new(),
            damage: 0.0,
            teamkill: false,
            event_time: Utc::now(),
        };
        assert_eq!(row.player_refs().len(), 1);
    }

    #[test]
    fn log_query_filters_compose() {
        let record = PluginLogRecord {
            server_id: ServerId::new(),
            instance_id: InstanceId::new(),
            ts: Utc::now(),
            level: "warn".to_string(),
            message: "Teamkill threshold reached".to_string(),
            fields: serde_json::json!({}),
        };

        let mut query = LogQuery {
            level: Some("WARN".to_string()),
            search: Some("threshold".to_string()),
            ..Default::default()
        };
        assert!(query.matches(&record));

        query.search = Some("no such text".to_string());
        assert!(!query.matches(&record));

        query.search = None;
        query.before = Some(record.ts);
        assert!(!query.matches(&record));
    }
}
