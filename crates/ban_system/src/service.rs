//! Ban writes and ban-list propagation.
//!
//! The database row is written first and is the source of truth; RCON
//! enforcement is best-effort on top with at-least-once semantics. A
//! propagation failure against one server never aborts the others; the
//! emitted config file reconciles on the next server boot.

use crate::config_file::render_ban_config;
use crate::error::BanError;
use aegis_types::{BanListId, ServerId, SteamId};
use async_trait::async_trait;
use chrono::Utc;
use persistence::relational::Db;
use persistence::BanRecord;
use rcon_manager::{RconError, RconManager};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Command transport the ban service enforces through.
///
/// Implemented by the RCON pool; tests substitute a recorder.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, server_id: ServerId, command: &str) -> Result<String, RconError>;
}

#[async_trait]
impl CommandRunner for RconManager {
    async fn run(&self, server_id: ServerId, command: &str) -> Result<String, RconError> {
        self.execute(server_id, command).await
    }
}

/// Admin attribution attached to a ban write.
#[derive(Debug, Clone)]
pub struct BanActor {
    pub admin_id: Uuid,
    pub admin_name: String,
    pub admin_steam_id: Option<SteamId>,
}

/// Enforces ban writes across the fleet.
pub struct BanService {
    db: Arc<dyn Db>,
    runner: Arc<dyn CommandRunner>,
}

impl BanService {
    pub fn new(db: Arc<dyn Db>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { db, runner }
    }

    /// Persists a ban and enforces it.
    ///
    /// Local bans (`ban_list_id = None`) hit only the target server. A ban
    /// attached to a list additionally fans out to every subscribed server.
    /// Returns the persisted record.
    pub async fn ban_player(
        &self,
        server_id: ServerId,
        steam_id: SteamId,
        duration_days: u32,
        reason: &str,
        actor: BanActor,
        ban_list_id: Option<BanListId>,
    ) -> Result<BanRecord, BanError> {
        if reason.contains('\n') {
            return Err(BanError::Validation(
                "ban reason must be a single line".to_string(),
            ));
        }

        let ban = BanRecord {
            id: Uuid::new_v4(),
            server_id,
            steam_id,
            reason: reason.to_string(),
            duration_days,
            created_at: Utc::now(),
            admin_id: actor.admin_id,
            admin_name: actor.admin_name,
            admin_steam_id: actor.admin_steam_id,
            ban_list_id,
        };
        self.db.insert_ban(&ban).await?;
        info!(
            "Ban recorded: {} on server {} ({} days)",
            steam_id, server_id, duration_days
        );

        self.enforce_on(server_id, &ban).await;

        if let Some(list_id) = ban_list_id {
            for subscriber in self.db.list_subscribers(list_id).await? {
                if subscriber != server_id {
                    self.enforce_on(subscriber, &ban).await;
                }
            }
        }
        Ok(ban)
    }

    /// Issues `AdminBan` then `AdminKick` against one server, best-effort.
    async fn enforce_on(&self, server_id: ServerId, ban: &BanRecord) {
        let ban_command = format!(
            "AdminBan {} {}d {}",
            ban.steam_id, ban.duration_days, ban.reason
        );
        if let Err(e) = self.runner.run(server_id, &ban_command).await {
            warn!("AdminBan against {server_id} failed: {e}");
        }
        let kick_command = format!("AdminKick {} {}", ban.steam_id, ban.reason);
        if let Err(e) = self.runner.run(server_id, &kick_command).await {
            warn!("AdminKick against {server_id} failed: {e}");
        }
    }

    /// Lifts a ban on one server.
    ///
    /// Unban does not propagate across a ban list; operators remove the ban
    /// row instead, which cascades evidence deletion.
    pub async fn unban(&self, server_id: ServerId, steam_id: SteamId) -> Result<(), BanError> {
        if let Err(e) = self
            .runner
            .run(server_id, &format!("AdminUnban {steam_id}"))
            .await
        {
            warn!("AdminUnban against {server_id} failed: {e}");
        }
        Ok(())
    }

    /// Deletes the ban row; evidence rows cascade with it.
    pub async fn remove_ban(&self, ban_id: Uuid) -> Result<(), BanError> {
        let ban = self.db.ban(ban_id).await?;
        self.db.delete_ban(ban_id).await?;
        self.unban(ban.server_id, ban.steam_id).await
    }

    /// Subscribes a server to a ban list and replays every existing ban in
    /// the list against it (at-least-once).
    pub async fn subscribe_server(
        &self,
        list_id: BanListId,
        server_id: ServerId,
    ) -> Result<usize, BanError> {
        self.db.subscribe_server_to_list(list_id, server_id).await?;

        let bans = self.db.bans_in_list(list_id).await?;
        let now = Utc::now();
        let mut replayed = 0;
        for ban in &bans {
            if ban.is_expired(now) {
                continue;
            }
            self.enforce_on(server_id, ban).await;
            replayed += 1;
        }
        info!(
            "Server {} subscribed to ban list {}; replayed {} bans",
            server_id, list_id, replayed
        );
        Ok(replayed)
    }

    /// Removes a server's subscription. Existing RCON-side bans are left in
    /// place; the next config file emission no longer includes the list.
    pub async fn unsubscribe_server(
        &self,
        list_id: BanListId,
        server_id: ServerId,
    ) -> Result<(), BanError> {
        self.db
            .unsubscribe_server_from_list(list_id, server_id)
            .await?;
        Ok(())
    }

    /// Renders the boot-time ban config file for one server.
    ///
    /// Includes the server's local bans, every ban from lists it subscribes
    /// to, and cached bodies from remote ban sources. Expired bans are
    /// omitted; permanent bans carry expiry `0`.
    pub async fn ban_config_for_server(&self, server_id: ServerId) -> Result<String, BanError> {
        let mut bans = self.db.bans_for_server(server_id).await?;
        for list_id in self.db.server_subscriptions(server_id).await? {
            for ban in self.db.bans_in_list(list_id).await? {
                if ban.server_id != server_id {
                    bans.push(ban);
                }
            }
        }
        bans.sort_by_key(|b| b.created_at);

        let remote_bodies: Vec<String> = self
            .db
            .remote_ban_sources()
            .await?
            .into_iter()
            .filter_map(|source| source.cached_body)
            .collect();

        Ok(render_ban_config(&bans, &remote_bodies, Utc::now()))
    }
}

impl std::fmt::Debug for BanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BanService").finish()
    }
}
