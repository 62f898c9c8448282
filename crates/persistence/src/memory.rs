//! In-memory store implementations.
//!
//! Used by the test suites and as the fallback backend when no database is
//! configured. Semantics (NotFound, Conflict, cursor filtering) match the
//! Postgres adapters.

use crate::columnar::{
    ColumnarStore, CombatStats, EventRow, IdentifierKind, LogOrder, LogQuery, Observation,
    PlayerColumns, PlayerIdentityRecord, PluginLogRecord,
};
use crate::error::StoreError;
use crate::model::{
    AuditLogRecord, BanListRecord, BanRecord, ConnectorRecord, ExtensionRecord,
    RemoteBanSourceRecord, ServerRecord,
};
use crate::relational::Db;
use aegis_types::{BanListId, EosId, InstanceId, ServerId, SteamId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct RelationalState {
    servers: HashMap<ServerId, ServerRecord>,
    bans: HashMap<Uuid, BanRecord>,
    ban_lists: HashMap<BanListId, BanListRecord>,
    subscriptions: HashSet<(BanListId, ServerId)>,
    extensions: HashMap<InstanceId, ExtensionRecord>,
    connectors: HashMap<Uuid, ConnectorRecord>,
    remote_ban_sources: Vec<RemoteBanSourceRecord>,
    audit_log: Vec<AuditLogRecord>,
}

/// In-memory relational store.
#[derive(Default)]
pub struct MemoryDb {
    state: RwLock<RelationalState>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a remote ban source; test helper.
    pub async fn add_remote_ban_source(&self, source: RemoteBanSourceRecord) {
        self.state.write().await.remote_ban_sources.push(source);
    }

    /// Audit entries appended so far; test helper.
    pub async fn audit_entries(&self) -> Vec<AuditLogRecord> {
        self.state.read().await.audit_log.clone()
    }
}

#[async_trait]
impl Db for MemoryDb {
    async fn insert_server(&self, server: &ServerRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.servers.contains_key(&server.id) {
            return Err(StoreError::Conflict(format!("server {}", server.id)));
        }
        state.servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn server(&self, id: ServerId) -> Result<ServerRecord, StoreError> {
        self.state
            .read()
            .await
            .servers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("server {id}")))
    }

    async fn servers(&self) -> Result<Vec<ServerRecord>, StoreError> {
        let mut servers: Vec<_> = self.state.read().await.servers.values().cloned().collect();
        servers.sort_by_key(|s| s.created_at);
        Ok(servers)
    }

    async fn update_server(&self, server: &ServerRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.servers.contains_key(&server.id) {
            return Err(StoreError::NotFound(format!("server {}", server.id)));
        }
        state.servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn delete_server(&self, id: ServerId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .servers
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("server {id}")))?;
        state.subscriptions.retain(|(_, server)| *server != id);
        Ok(())
    }

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.bans.contains_key(&ban.id) {
            return Err(StoreError::Conflict(format!("ban {}", ban.id)));
        }
        state.bans.insert(ban.id, ban.clone());
        Ok(())
    }

    async fn ban(&self, id: Uuid) -> Result<BanRecord, StoreError> {
        self.state
            .read()
            .await
            .bans
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("ban {id}")))
    }

    async fn bans_for_server(&self, server_id: ServerId) -> Result<Vec<BanRecord>, StoreError> {
        let state = self.state.read().await;
        let mut bans: Vec<_> = state
            .bans
            .values()
            .filter(|b| b.server_id == server_id)
            .cloned()
            .collect();
        bans.sort_by_key(|b| b.created_at);
        Ok(bans)
    }

    async fn bans_in_list(&self, list_id: BanListId) -> Result<Vec<BanRecord>, StoreError> {
        let state = self.state.read().await;
        let mut bans: Vec<_> = state
            .bans
            .values()
            .filter(|b| b.ban_list_id == Some(list_id))
            .cloned()
            .collect();
        bans.sort_by_key(|b| b.created_at);
        Ok(bans)
    }

    async fn delete_ban(&self, id: Uuid) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .bans
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("ban {id}")))
    }

    async fn insert_ban_list(&self, list: &BanListRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.ban_lists.contains_key(&list.id) {
            return Err(StoreError::Conflict(format!("ban list {}", list.id)));
        }
        state.ban_lists.insert(list.id, list.clone());
        Ok(())
    }

    async fn ban_list(&self, id: BanListId) -> Result<BanListRecord, StoreError> {
        self.state
            .read()
            .await
            .ban_lists
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("ban list {id}")))
    }

    async fn ban_lists(&self) -> Result<Vec<BanListRecord>, StoreError> {
        let mut lists: Vec<_> = self.state.read().await.ban_lists.values().cloned().collect();
        lists.sort_by_key(|l| l.created_at);
        Ok(lists)
    }

    async fn subscribe_server_to_list(
        &self,
        list_id: BanListId,
        server_id: ServerId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.ban_lists.contains_key(&list_id) {
            return Err(StoreError::NotFound(format!("ban list {list_id}")));
        }
        if !state.subscriptions.insert((list_id, server_id)) {
            return Err(StoreError::Conflict(format!(
                "server {server_id} already subscribed to {list_id}"
            )));
        }
        Ok(())
    }

    async fn unsubscribe_server_from_list(
        &self,
        list_id: BanListId,
        server_id: ServerId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.subscriptions.remove(&(list_id, server_id)) {
            return Err(StoreError::NotFound(format!(
                "subscription of {server_id} to {list_id}"
            )));
        }
        Ok(())
    }

    async fn list_subscribers(&self, list_id: BanListId) -> Result<Vec<ServerId>, StoreError> {
        let state = self.state.read().await;
        let mut servers: Vec<_> = state
            .subscriptions
            .iter()
            .filter(|(list, _)| *list == list_id)
            .map(|(_, server)| *server)
            .collect();
        servers.sort();
        Ok(servers)
    }

    async fn server_subscriptions(
        &self,
        server_id: ServerId,
    ) -> Result<Vec<BanListId>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|(_, server)| *server == server_id)
            .map(|(list, _)| *list)
            .collect())
    }

    async fn insert_extension(&self, extension: &ExtensionRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.extensions.contains_key(&extension.id) {
            return Err(StoreError::Conflict(format!("extension {}", extension.id)));
        }
        state.extensions.insert(extension.id, extension.clone());
        Ok(())
    }

    async fn extension(&self, id: InstanceId) -> Result<ExtensionRecord, StoreError> {
        self.state
            .read()
            .await
            .extensions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("extension {id}")))
    }

    async fn extensions_for_server(
        &self,
        server_id: ServerId,
    ) -> Result<Vec<ExtensionRecord>, StoreError> {
        let state = self.state.read().await;
        let mut extensions: Vec<_> = state
            .extensions
            .values()
            .filter(|e| e.server_id == server_id)
            .cloned()
            .collect();
        extensions.sort_by_key(|e| e.created_at);
        Ok(extensions)
    }

    async fn extensions(&self) -> Result<Vec<ExtensionRecord>, StoreError> {
        let mut extensions: Vec<_> =
            self.state.read().await.extensions.values().cloned().collect();
        extensions.sort_by_key(|e| e.created_at);
        Ok(extensions)
    }

    async fn update_extension(&self, extension: &ExtensionRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.extensions.contains_key(&extension.id) {
            return Err(StoreError::NotFound(format!("extension {}", extension.id)));
        }
        state.extensions.insert(extension.id, extension.clone());
        Ok(())
    }

    async fn set_extension_enabled(
        &self,
        id: InstanceId,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let extension = state
            .extensions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("extension {id}")))?;
        extension.enabled = enabled;
        extension.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn delete_extension(&self, id: InstanceId) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .extensions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("extension {id}")))
    }

    async fn insert_connector(&self, connector: &ConnectorRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.connectors.contains_key(&connector.id) {
            return Err(StoreError::Conflict(format!("connector {}", connector.id)));
        }
        state.connectors.insert(connector.id, connector.clone());
        Ok(())
    }

    async fn connector(&self, id: Uuid) -> Result<ConnectorRecord, StoreError> {
        self.state
            .read()
            .await
            .connectors
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("connector {id}")))
    }

    async fn connectors(&self) -> Result<Vec<ConnectorRecord>, StoreError> {
        let mut connectors: Vec<_> =
            self.state.read().await.connectors.values().cloned().collect();
        connectors.sort_by_key(|c| c.created_at);
        Ok(connectors)
    }

    async fn delete_connector(&self, id: Uuid) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .connectors
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("connector {id}")))
    }

    async fn remote_ban_sources(&self) -> Result<Vec<RemoteBanSourceRecord>, StoreError> {
        Ok(self.state.read().await.remote_ban_sources.clone())
    }

    async fn append_audit_log(&self, entry: &AuditLogRecord) -> Result<(), StoreError> {
        self.state.write().await.audit_log.push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
struct ColumnarState {
    events: Vec<EventRow>,
    plugin_logs: Vec<PluginLogRecord>,
    identities: Vec<PlayerIdentityRecord>,
}

/// In-memory columnar store.
#[derive(Default)]
pub struct MemoryColumnarStore {
    state: RwLock<ColumnarState>,
}

impl MemoryColumnarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of event rows stored; test helper.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

fn columns_match(columns: &PlayerColumns, steam_ids: &[SteamId], eos_ids: &[EosId]) -> bool {
    columns
        .steam_id
        .map(|s| steam_ids.contains(&s))
        .unwrap_or(false)
        || columns
            .eos_id
            .as_ref()
            .map(|e| eos_ids.contains(e))
            .unwrap_or(false)
}

#[async_trait]
impl ColumnarStore for MemoryColumnarStore {
    async fn insert_event(&self, row: EventRow) -> Result<(), StoreError> {
        self.state.write().await.events.push(row);
        Ok(())
    }

    async fn observations(&self) -> Result<Vec<Observation>, StoreError> {
        let state = self.state.read().await;
        let mut observations = Vec::new();
        for row in &state.events {
            for (role, columns) in row.player_refs() {
                observations.push(Observation {
                    role,
                    steam_id: columns.steam_id,
                    eos_id: columns.eos_id.clone(),
                    name: columns.name.clone(),
                    event_time: row.event_time(),
                });
            }
        }
        Ok(observations)
    }

    async fn combat_stats(
        &self,
        steam_ids: &[SteamId],
        eos_ids: &[EosId],
    ) -> Result<CombatStats, StoreError> {
        let state = self.state.read().await;
        let mut stats = CombatStats::default();
        for row in &state.events {
            match row {
                EventRow::Died {
                    victim,
                    attacker,
                    teamkill,
                    ..
                } => {
                    if columns_match(victim, steam_ids, eos_ids) {
                        stats.deaths += 1;
                    }
                    if columns_match(attacker, steam_ids, eos_ids) {
                        if *teamkill {
                            stats.teamkills += 1;
                        } else {
                            stats.kills += 1;
                        }
                    }
                }
                EventRow::Damaged {
                    attacker, damage, ..
                } => {
                    if columns_match(attacker, steam_ids, eos_ids) {
                        stats.damage_dealt += damage;
                    }
                }
                EventRow::Revived { reviver, .. } => {
                    if columns_match(reviver, steam_ids, eos_ids) {
                        stats.revives += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn insert_plugin_logs(&self, records: &[PluginLogRecord]) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .plugin_logs
            .extend_from_slice(records);
        Ok(())
    }

    async fn plugin_logs(&self, query: &LogQuery) -> Result<Vec<PluginLogRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .plugin_logs
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        match query.order {
            LogOrder::Asc => records.sort_by_key(|r| r.ts),
            LogOrder::Desc => records.sort_by_key(|r| std::cmp::Reverse(r.ts)),
        }
        if query.limit > 0 {
            records.truncate(query.limit);
        }
        Ok(records)
    }

    async fn replace_identities(
        &self,
        identities: &[PlayerIdentityRecord],
    ) -> Result<(), StoreError> {
        self.state.write().await.identities = identities.to_vec();
        Ok(())
    }

    async fn identities(&self) -> Result<Vec<PlayerIdentityRecord>, StoreError> {
        Ok(self.state.read().await.identities.clone())
    }

    async fn identity_by_key(
        &self,
        kind: IdentifierKind,
        value: &str,
    ) -> Result<Option<PlayerIdentityRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .identities
            .iter()
            .find(|identity| match kind {
                IdentifierKind::Steam => identity
                    .all_steam_ids
                    .iter()
                    .any(|s| s.to_string() == value),
                IdentifierKind::Eos => {
                    identity.all_eos_ids.iter().any(|e| e.as_str() == value)
                }
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn subscription_conflict_is_reported() {
        let db = MemoryDb::new();
        let list = BanListRecord {
            id: BanListId::new(),
            name: "community".to_string(),
            created_at: Utc::now(),
        };
        db.insert_ban_list(&list).await.unwrap();

        let server = ServerId::new();
        db.subscribe_server_to_list(list.id, server).await.unwrap();
        assert!(matches!(
            db.subscribe_server_to_list(list.id, server).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn combat_stats_only_count_matching_keys() {
        let store = MemoryColumnarStore::new();
        let killer = SteamId::new(76561198000000001);
        let victim = SteamId::new(76561198000000002);

        store
            .insert_event(EventRow::Died {
                server_id: ServerId::new(),
                victim: PlayerColumns {
                    steam_id: Some(victim),
                    eos_id: None,
                    name: Some("victim".to_string()),
                },
                attacker: PlayerColumns {
                    steam_id: Some(killer),
                    eos_id: None,
                    name: Some("killer".to_string()),
                },
                weapon: "BP_Rifle".to_string(),
                damage: 100.0,
                teamkill: false,
                event_time: Utc::now(),
            })
            .await
            .unwrap();

        let stats = store.combat_stats(&[killer], &[]).await.unwrap();
        assert_eq!(stats.kills, 1);
        assert_eq!(stats.deaths, 0);

        let stats = store.combat_stats(&[victim], &[]).await.unwrap();
        assert_eq!(stats.kills, 0);
        assert_eq!(stats.deaths, 1);
    }
}
