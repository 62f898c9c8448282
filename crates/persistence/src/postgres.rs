//! PostgreSQL adapters for the relational and columnar store traits.
//!
//! Every query is parameterized; the only strings chosen at runtime are
//! whole statements selected by the closed [`IdentifierKind`] enum.

use crate::columnar::{
    ColumnarStore, CombatStats, EventRow, IdentifierKind, LogOrder, LogQuery, Observation,
    ObservationRole, PlayerColumns, PlayerIdentityRecord, PluginLogRecord,
};
use crate::error::StoreError;
use crate::model::{
    AuditLogRecord, BanListRecord, BanRecord, ConnectorRecord, ExtensionRecord,
    RemoteBanSourceRecord, ServerRecord,
};
use crate::relational::Db;
use aegis_types::{BanListId, ConfigValue, EosId, InstanceId, ServerId, SteamId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Maps unique-violation database errors to [`StoreError::Conflict`].
fn map_insert_err(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(what.to_string());
        }
    }
    StoreError::Upstream(e)
}

/// Fails with [`StoreError::NotFound`] when an update/delete touched no row.
fn require_rows(result: sqlx::postgres::PgQueryResult, what: &str) -> Result<(), StoreError> {
    if result.rows_affected() == 0 {
        Err(StoreError::NotFound(what.to_string()))
    } else {
        Ok(())
    }
}

fn decode_config(value: serde_json::Value) -> Result<BTreeMap<String, ConfigValue>, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt(format!("config map: {e}")))
}

fn encode_config(config: &BTreeMap<String, ConfigValue>) -> serde_json::Value {
    serde_json::to_value(config).unwrap_or(serde_json::Value::Null)
}

fn steam_to_db(id: SteamId) -> i64 {
    id.raw() as i64
}

fn steam_from_db(raw: i64) -> SteamId {
    SteamId::new(raw as u64)
}

fn opt_steam_from_db(raw: Option<i64>) -> Option<SteamId> {
    raw.map(steam_from_db)
}

fn eos_from_db(raw: Option<String>) -> Result<Option<EosId>, StoreError> {
    raw.map(|s| EosId::new(s).map_err(|e| StoreError::Corrupt(e.to_string())))
        .transpose()
}

/// Relational store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgDb {
    pool: PgPool,
}

impl PgDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the relational tables when missing (idempotent).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                game_port INTEGER NOT NULL,
                rcon_host TEXT,
                rcon_port INTEGER NOT NULL,
                rcon_password TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ban_lists (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_bans (
                id UUID PRIMARY KEY,
                server_id UUID NOT NULL,
                steam_id BIGINT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                duration_days INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                admin_id UUID NOT NULL,
                admin_name TEXT NOT NULL DEFAULT '',
                admin_steam_id BIGINT,
                ban_list_id UUID REFERENCES ban_lists(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_ban_list_subscriptions (
                ban_list_id UUID NOT NULL REFERENCES ban_lists(id),
                server_id UUID NOT NULL,
                PRIMARY KEY (ban_list_id, server_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_extensions (
                id UUID PRIMARY KEY,
                server_id UUID NOT NULL,
                plugin_type_id TEXT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT FALSE,
                config JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connectors (
                id UUID PRIMARY KEY,
                connector_type_id TEXT NOT NULL,
                config JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remote_ban_sources (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                cached_body TEXT,
                last_fetched_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id UUID PRIMARY KEY,
                server_id UUID,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                details JSONB NOT NULL DEFAULT 'null'::jsonb,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::debug!("Relational tables migrated");
        Ok(())
    }

    fn server_from_row(row: &PgRow) -> Result<ServerRecord, StoreError> {
        Ok(ServerRecord {
            id: ServerId(row.try_get("id")?),
            name: row.try_get("name")?,
            host: row.try_get("host")?,
            game_port: row.try_get::<i32, _>("game_port")? as u16,
            rcon_host: row.try_get("rcon_host")?,
            rcon_port: row.try_get::<i32, _>("rcon_port")? as u16,
            rcon_password: row.try_get("rcon_password")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn ban_from_row(row: &PgRow) -> Result<BanRecord, StoreError> {
        Ok(BanRecord {
            id: row.try_get("id")?,
            server_id: ServerId(row.try_get("server_id")?),
            steam_id: steam_from_db(row.try_get("steam_id")?),
            reason: row.try_get("reason")?,
            duration_days: row.try_get::<i32, _>("duration_days")? as u32,
            created_at: row.try_get("created_at")?,
            admin_id: row.try_get("admin_id")?,
            admin_name: row.try_get("admin_name")?,
            admin_steam_id: opt_steam_from_db(row.try_get("admin_steam_id")?),
            ban_list_id: row
                .try_get::<Option<Uuid>, _>("ban_list_id")?
                .map(BanListId),
        })
    }

    fn extension_from_row(row: &PgRow) -> Result<ExtensionRecord, StoreError> {
        Ok(ExtensionRecord {
            id: InstanceId(row.try_get("id")?),
            server_id: ServerId(row.try_get("server_id")?),
            plugin_type_id: row.try_get("plugin_type_id")?,
            enabled: row.try_get("enabled")?,
            config: decode_config(row.try_get("config")?)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Db for PgDb {
    async fn insert_server(&self, server: &ServerRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO servers (id, name, host, game_port, rcon_host, rcon_port, rcon_password, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(server.id.0)
        .bind(&server.name)
        .bind(&server.host)
        .bind(server.game_port as i32)
        .bind(&server.rcon_host)
        .bind(server.rcon_port as i32)
        .bind(&server.rcon_password)
        .bind(server.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "server"))?;
        Ok(())
    }

    async fn server(&self, id: ServerId) -> Result<ServerRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("server {id}")))?;
        Self::server_from_row(&row)
    }

    async fn servers(&self) -> Result<Vec<ServerRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM servers ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::server_from_row).collect()
    }

    async fn update_server(&self, server: &ServerRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE servers
            SET name = $2, host = $3, game_port = $4, rcon_host = $5, rcon_port = $6, rcon_password = $7
            WHERE id = $1
            "#,
        )
        .bind(server.id.0)
        .bind(&server.name)
        .bind(&server.host)
        .bind(server.game_port as i32)
        .bind(&server.rcon_host)
        .bind(server.rcon_port as i32)
        .bind(&server.rcon_password)
        .execute(&self.pool)
        .await?;
        require_rows(result, "server")
    }

    async fn delete_server(&self, id: ServerId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM server_ban_list_subscriptions WHERE server_id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        require_rows(result, "server")
    }

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO server_bans
                (id, server_id, steam_id, reason, duration_days, created_at,
                 admin_id, admin_name, admin_steam_id, ban_list_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(ban.id)
        .bind(ban.server_id.0)
        .bind(steam_to_db(ban.steam_id))
        .bind(&ban.reason)
        .bind(ban.duration_days as i32)
        .bind(ban.created_at)
        .bind(ban.admin_id)
        .bind(&ban.admin_name)
        .bind(ban.admin_steam_id.map(steam_to_db))
        .bind(ban.ban_list_id.map(|l| l.0))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "ban"))?;
        Ok(())
    }

    async fn ban(&self, id: Uuid) -> Result<BanRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM server_bans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("ban {id}")))?;
        Self::ban_from_row(&row)
    }

    async fn bans_for_server(&self, server_id: ServerId) -> Result<Vec<BanRecord>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM server_bans WHERE server_id = $1 ORDER BY created_at")
                .bind(server_id.0)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::ban_from_row).collect()
    }

    async fn bans_in_list(&self, list_id: BanListId) -> Result<Vec<BanRecord>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM server_bans WHERE ban_list_id = $1 ORDER BY created_at")
                .bind(list_id.0)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::ban_from_row).collect()
    }

    async fn delete_ban(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM server_bans WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        require_rows(result, "ban")
    }

    async fn insert_ban_list(&self, list: &BanListRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO ban_lists (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(list.id.0)
            .bind(&list.name)
            .bind(list.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_err(e, "ban list"))?;
        Ok(())
    }

    async fn ban_list(&self, id: BanListId) -> Result<BanListRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM ban_lists WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("ban list {id}")))?;
        Ok(BanListRecord {
            id: BanListId(row.try_get("id")?),
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn ban_lists(&self) -> Result<Vec<BanListRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM ban_lists ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(BanListRecord {
                    id: BanListId(row.try_get("id")?),
                    name: row.try_get("name")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn subscribe_server_to_list(
        &self,
        list_id: BanListId,
        server_id: ServerId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO server_ban_list_subscriptions (ban_list_id, server_id) VALUES ($1, $2)",
        )
        .bind(list_id.0)
        .bind(server_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "ban list subscription"))?;
        Ok(())
    }

    async fn unsubscribe_server_from_list(
        &self,
        list_id: BanListId,
        server_id: ServerId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM server_ban_list_subscriptions WHERE ban_list_id = $1 AND server_id = $2",
        )
        .bind(list_id.0)
        .bind(server_id.0)
        .execute(&self.pool)
        .await?;
        require_rows(result, "ban list subscription")
    }

    async fn list_subscribers(&self, list_id: BanListId) -> Result<Vec<ServerId>, StoreError> {
        let rows = sqlx::query(
            "SELECT server_id FROM server_ban_list_subscriptions WHERE ban_list_id = $1 ORDER BY server_id",
        )
        .bind(list_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(ServerId(row.try_get("server_id")?)))
            .collect()
    }

    async fn server_subscriptions(
        &self,
        server_id: ServerId,
    ) -> Result<Vec<BanListId>, StoreError> {
        let rows = sqlx::query(
            "SELECT ban_list_id FROM server_ban_list_subscriptions WHERE server_id = $1",
        )
        .bind(server_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(BanListId(row.try_get("ban_list_id")?)))
            .collect()
    }

    async fn insert_extension(&self, extension: &ExtensionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO server_extensions
                (id, server_id, plugin_type_id, enabled, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(extension.id.0)
        .bind(extension.server_id.0)
        .bind(&extension.plugin_type_id)
        .bind(extension.enabled)
        .bind(encode_config(&extension.config))
        .bind(extension.created_at)
        .bind(extension.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "extension"))?;
        Ok(())
    }

    async fn extension(&self, id: InstanceId) -> Result<ExtensionRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM server_extensions WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("extension {id}")))?;
        Self::extension_from_row(&row)
    }

    async fn extensions_for_server(
        &self,
        server_id: ServerId,
    ) -> Result<Vec<ExtensionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM server_extensions WHERE server_id = $1 ORDER BY created_at",
        )
        .bind(server_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::extension_from_row).collect()
    }

    async fn extensions(&self) -> Result<Vec<ExtensionRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM server_extensions ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::extension_from_row).collect()
    }

    async fn update_extension(&self, extension: &ExtensionRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE server_extensions
            SET enabled = $2, config = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(extension.id.0)
        .bind(extension.enabled)
        .bind(encode_config(&extension.config))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        require_rows(result, "extension")
    }

    async fn set_extension_enabled(
        &self,
        id: InstanceId,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE server_extensions SET enabled = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id.0)
        .bind(enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        require_rows(result, "extension")
    }

    async fn delete_extension(&self, id: InstanceId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM server_extensions WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        require_rows(result, "extension")
    }

    async fn insert_connector(&self, connector: &ConnectorRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO connectors (id, connector_type_id, config, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(connector.id)
        .bind(&connector.connector_type_id)
        .bind(encode_config(&connector.config))
        .bind(connector.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "connector"))?;
        Ok(())
    }

    async fn connector(&self, id: Uuid) -> Result<ConnectorRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM connectors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("connector {id}")))?;
        Ok(ConnectorRecord {
            id: row.try_get("id")?,
            connector_type_id: row.try_get("connector_type_id")?,
            config: decode_config(row.try_get("config")?)?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn connectors(&self) -> Result<Vec<ConnectorRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM connectors ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ConnectorRecord {
                    id: row.try_get("id")?,
                    connector_type_id: row.try_get("connector_type_id")?,
                    config: decode_config(row.try_get("config")?)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn delete_connector(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM connectors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        require_rows(result, "connector")
    }

    async fn remote_ban_sources(&self) -> Result<Vec<RemoteBanSourceRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM remote_ban_sources ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(RemoteBanSourceRecord {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    url: row.try_get("url")?,
                    cached_body: row.try_get("cached_body")?,
                    last_fetched_at: row.try_get("last_fetched_at")?,
                })
            })
            .collect()
    }

    async fn append_audit_log(&self, entry: &AuditLogRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, server_id, actor, action, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.server_id.map(|s| s.0))
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Columnar store backed by PostgreSQL.
///
/// The production deployment fronts a column-oriented engine; the SQL here
/// sticks to portable aggregates so the dialect remains an adapter concern.
#[derive(Clone)]
pub struct PgColumnarStore {
    pool: PgPool,
}

impl PgColumnarStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the event, log and identity tables when missing (idempotent).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let single_player_tables = [
            "server_join_succeeded_events",
            "server_player_disconnected_events",
            "server_player_possess_events",
            "server_player_chat_messages",
        ];
        for table in single_player_tables {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    server_id UUID NOT NULL,
                    steam_id BIGINT,
                    eos_id TEXT,
                    player_name TEXT,
                    detail TEXT,
                    event_time TIMESTAMPTZ NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
        }

        let combat_tables = [
            "server_player_damaged_events",
            "server_player_died_events",
            "server_player_wounded_events",
        ];
        for table in combat_tables {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    server_id UUID NOT NULL,
                    victim_steam BIGINT,
                    victim_eos TEXT,
                    victim_name TEXT,
                    attacker_steam BIGINT,
                    attacker_eos TEXT,
                    attacker_name TEXT,
                    weapon TEXT NOT NULL DEFAULT '',
                    damage DOUBLE PRECISION NOT NULL DEFAULT 0,
                    teamkill BOOLEAN NOT NULL DEFAULT FALSE,
                    event_time TIMESTAMPTZ NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_player_revived_events (
                server_id UUID NOT NULL,
                reviver_steam BIGINT,
                reviver_eos TEXT,
                reviver_name TEXT,
                victim_steam BIGINT,
                victim_eos TEXT,
                victim_name TEXT,
                event_time TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_round_events (
                server_id UUID NOT NULL,
                winner TEXT,
                layer TEXT,
                tick_rate DOUBLE PRECISION,
                broadcast_message TEXT,
                broadcast_from TEXT,
                event_time TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plugin_logs (
                server_id UUID NOT NULL,
                instance_id UUID NOT NULL,
                ts TIMESTAMPTZ NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                fields JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS player_identities (
                canonical_id TEXT PRIMARY KEY,
                primary_steam BIGINT,
                primary_eos TEXT,
                all_steam_ids BIGINT[] NOT NULL DEFAULT '{}',
                all_eos_ids TEXT[] NOT NULL DEFAULT '{}',
                all_names TEXT[] NOT NULL DEFAULT '{}',
                first_seen TIMESTAMPTZ NOT NULL,
                last_seen TIMESTAMPTZ NOT NULL,
                total_sessions BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS player_identity_lookup (
                key_kind TEXT NOT NULL,
                key_value TEXT NOT NULL,
                canonical_id TEXT NOT NULL,
                PRIMARY KEY (key_kind, key_value)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::debug!("Columnar tables migrated");
        Ok(())
    }

    async fn insert_single_player(
        &self,
        table: &'static str,
        server_id: ServerId,
        player: &PlayerColumns,
        detail: Option<&str>,
        event_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (server_id, steam_id, eos_id, player_name, detail, event_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#
        ))
        .bind(server_id.0)
        .bind(player.steam_id.map(steam_to_db))
        .bind(player.eos_id.as_ref().map(|e| e.as_str().to_string()))
        .bind(&player.name)
        .bind(detail)
        .bind(event_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_combat(
        &self,
        table: &'static str,
        server_id: ServerId,
        victim: &PlayerColumns,
        attacker: &PlayerColumns,
        weapon: &str,
        damage: f64,
        teamkill: bool,
        event_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table}
                (server_id, victim_steam, victim_eos, victim_name,
                 attacker_steam, attacker_eos, attacker_name,
                 weapon, damage, teamkill, event_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        ))
        .bind(server_id.0)
        .bind(victim.steam_id.map(steam_to_db))
        .bind(victim.eos_id.as_ref().map(|e| e.as_str().to_string()))
        .bind(&victim.name)
        .bind(attacker.steam_id.map(steam_to_db))
        .bind(attacker.eos_id.as_ref().map(|e| e.as_str().to_string()))
        .bind(&attacker.name)
        .bind(weapon)
        .bind(damage)
        .bind(teamkill)
        .bind(event_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn identity_from_row(row: &PgRow) -> Result<PlayerIdentityRecord, StoreError> {
        let all_steam: Vec<i64> = row.try_get("all_steam_ids")?;
        let all_eos: Vec<String> = row.try_get("all_eos_ids")?;
        Ok(PlayerIdentityRecord {
            canonical_id: row.try_get("canonical_id")?,
            primary_steam: opt_steam_from_db(row.try_get("primary_steam")?),
            primary_eos: eos_from_db(row.try_get("primary_eos")?)?,
            all_steam_ids: all_steam.into_iter().map(steam_from_db).collect(),
            all_eos_ids: all_eos
                .into_iter()
                .map(|e| EosId::new(e).map_err(|e| StoreError::Corrupt(e.to_string())))
                .collect::<Result<_, _>>()?,
            all_names: row.try_get("all_names")?,
            first_seen: row.try_get("first_seen")?,
            last_seen: row.try_get("last_seen")?,
            total_sessions: row.try_get::<i64, _>("total_sessions")? as u64,
        })
    }

    fn observation_from_row(row: &PgRow, role: ObservationRole) -> Result<Observation, StoreError> {
        Ok(Observation {
            role,
            steam_id: opt_steam_from_db(row.try_get("steam_id")?),
            eos_id: eos_from_db(row.try_get("eos_id")?)?,
            name: row.try_get("player_name")?,
            event_time: row.try_get("event_time")?,
        })
    }
}

/// `(select statement, role)` pairs forming the observation union across all
/// event tables.
const OBSERVATION_SELECTS: &[(&str, ObservationRole)] = &[
    (
        "SELECT steam_id, eos_id, player_name, event_time FROM server_join_succeeded_events",
        ObservationRole::Join,
    ),
    (
        "SELECT steam_id, eos_id, player_name, event_time FROM server_player_disconnected_events",
        ObservationRole::Subject,
    ),
    (
        "SELECT steam_id, eos_id, player_name, event_time FROM server_player_possess_events",
        ObservationRole::Subject,
    ),
    (
        "SELECT steam_id, eos_id, player_name, event_time FROM server_player_chat_messages",
        ObservationRole::Subject,
    ),
    (
        "SELECT victim_steam AS steam_id, victim_eos AS eos_id, victim_name AS player_name, event_time FROM server_player_damaged_events",
        ObservationRole::Victim,
    ),
    (
        "SELECT attacker_steam AS steam_id, attacker_eos AS eos_id, attacker_name AS player_name, event_time FROM server_player_damaged_events",
        ObservationRole::Attacker,
    ),
    (
        "SELECT victim_steam AS steam_id, victim_eos AS eos_id, victim_name AS player_name, event_time FROM server_player_died_events",
        ObservationRole::Victim,
    ),
    (
        "SELECT attacker_steam AS steam_id, attacker_eos AS eos_id, attacker_name AS player_name, event_time FROM server_player_died_events",
        ObservationRole::Attacker,
    ),
    (
        "SELECT victim_steam AS steam_id, victim_eos AS eos_id, victim_name AS player_name, event_time FROM server_player_wounded_events",
        ObservationRole::Victim,
    ),
    (
        "SELECT attacker_steam AS steam_id, attacker_eos AS eos_id, attacker_name AS player_name, event_time FROM server_player_wounded_events",
        ObservationRole::Attacker,
    ),
    (
        "SELECT reviver_steam AS steam_id, reviver_eos AS eos_id, reviver_name AS player_name, event_time FROM server_player_revived_events",
        ObservationRole::Reviver,
    ),
    (
        "SELECT victim_steam AS steam_id, victim_eos AS eos_id, victim_name AS player_name, event_time FROM server_player_revived_events",
        ObservationRole::Victim,
    ),
];

#[async_trait]
impl ColumnarStore for PgColumnarStore {
    async fn insert_event(&self, row: EventRow) -> Result<(), StoreError> {
        match &row {
            EventRow::JoinSucceeded {
                server_id,
                player,
                ip,
                event_time,
            } => {
                self.insert_single_player(
                    "server_join_succeeded_events",
                    *server_id,
                    player,
                    ip.as_deref(),
                    *event_time,
                )
                .await
            }
            EventRow::Disconnected {
                server_id,
                player,
                event_time,
            } => {
                self.insert_single_player(
                    "server_player_disconnected_events",
                    *server_id,
                    player,
                    None,
                    *event_time,
                )
                .await
            }
            EventRow::Possess {
                server_id,
                player,
                pawn,
                event_time,
            } => {
                self.insert_single_player(
                    "server_player_possess_events",
                    *server_id,
                    player,
                    Some(pawn),
                    *event_time,
                )
                .await
            }
            EventRow::ChatMessage {
                server_id,
                channel,
                player,
                message,
                event_time,
            } => {
                let detail = format!("[{channel}] {message}");
                self.insert_single_player(
                    "server_player_chat_messages",
                    *server_id,
                    player,
                    Some(&detail),
                    *event_time,
                )
                .await
            }
            EventRow::Damaged {
                server_id,
                victim,
                attacker,
                weapon,
                damage,
                teamkill,
                event_time,
            } => {
                self.insert_combat(
                    "server_player_damaged_events",
                    *server_id,
                    victim,
                    attacker,
                    weapon,
                    *damage,
                    *teamkill,
                    *event_time,
                )
                .await
            }
            EventRow::Died {
                server_id,
                victim,
                attacker,
                weapon,
                damage,
                teamkill,
                event_time,
            } => {
                self.insert_combat(
                    "server_player_died_events",
                    *server_id,
                    victim,
                    attacker,
                    weapon,
                    *damage,
                    *teamkill,
                    *event_time,
                )
                .await
            }
            EventRow::Wounded {
                server_id,
                victim,
                attacker,
                weapon,
                damage,
                teamkill,
                event_time,
            } => {
                self.insert_combat(
                    "server_player_wounded_events",
                    *server_id,
                    victim,
                    attacker,
                    weapon,
                    *damage,
                    *teamkill,
                    *event_time,
                )
                .await
            }
            EventRow::Revived {
                server_id,
                reviver,
                victim,
                event_time,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO server_player_revived_events
                        (server_id, reviver_steam, reviver_eos, reviver_name,
                         victim_steam, victim_eos, victim_name, event_time)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(server_id.0)
                .bind(reviver.steam_id.map(steam_to_db))
                .bind(reviver.eos_id.as_ref().map(|e| e.as_str().to_string()))
                .bind(&reviver.name)
                .bind(victim.steam_id.map(steam_to_db))
                .bind(victim.eos_id.as_ref().map(|e| e.as_str().to_string()))
                .bind(&victim.name)
                .bind(event_time)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            EventRow::RoundEnded {
                server_id,
                winner,
                layer,
                event_time,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO server_round_events (server_id, winner, layer, event_time)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(server_id.0)
                .bind(winner)
                .bind(layer)
                .bind(event_time)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            EventRow::TickRate {
                server_id,
                tick_rate,
                event_time,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO server_round_events (server_id, tick_rate, event_time)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(server_id.0)
                .bind(tick_rate)
                .bind(event_time)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            EventRow::AdminBroadcast {
                server_id,
                message,
                from,
                event_time,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO server_round_events
                        (server_id, broadcast_message, broadcast_from, event_time)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(server_id.0)
                .bind(message)
                .bind(from)
                .bind(event_time)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        }
    }

    async fn observations(&self) -> Result<Vec<Observation>, StoreError> {
        let mut observations = Vec::new();
        for (select, role) in OBSERVATION_SELECTS {
            let rows = sqlx::query(select).fetch_all(&self.pool).await?;
            for row in &rows {
                let observation = Self::observation_from_row(row, *role)?;
                if observation.steam_id.is_some()
                    || observation.eos_id.is_some()
                    || observation.name.is_some()
                {
                    observations.push(observation);
                }
            }
        }
        Ok(observations)
    }

    async fn combat_stats(
        &self,
        steam_ids: &[SteamId],
        eos_ids: &[EosId],
    ) -> Result<CombatStats, StoreError> {
        let steam: Vec<i64> = steam_ids.iter().copied().map(steam_to_db).collect();
        let eos: Vec<String> = eos_ids.iter().map(|e| e.as_str().to_string()).collect();

        let kills_row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE NOT teamkill) AS kills,
                COUNT(*) FILTER (WHERE teamkill) AS teamkills
            FROM server_player_died_events
            WHERE attacker_steam = ANY($1) OR attacker_eos = ANY($2)
            "#,
        )
        .bind(&steam)
        .bind(&eos)
        .fetch_one(&self.pool)
        .await?;

        let deaths_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS deaths
            FROM server_player_died_events
            WHERE victim_steam = ANY($1) OR victim_eos = ANY($2)
            "#,
        )
        .bind(&steam)
        .bind(&eos)
        .fetch_one(&self.pool)
        .await?;

        let damage_row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(damage), 0) AS damage_dealt
            FROM server_player_damaged_events
            WHERE attacker_steam = ANY($1) OR attacker_eos = ANY($2)
            "#,
        )
        .bind(&steam)
        .bind(&eos)
        .fetch_one(&self.pool)
        .await?;

        let revives_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS revives
            FROM server_player_revived_events
            WHERE reviver_steam = ANY($1) OR reviver_eos = ANY($2)
            "#,
        )
        .bind(&steam)
        .bind(&eos)
        .fetch_one(&self.pool)
        .await?;

        Ok(CombatStats {
            kills: kills_row.try_get::<i64, _>("kills")? as u64,
            teamkills: kills_row.try_get::<i64, _>("teamkills")? as u64,
            deaths: deaths_row.try_get::<i64, _>("deaths")? as u64,
            damage_dealt: damage_row.try_get("damage_dealt")?,
            revives: revives_row.try_get::<i64, _>("revives")? as u64,
        })
    }

    async fn insert_plugin_logs(&self, records: &[PluginLogRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO plugin_logs (server_id, instance_id, ts, level, message, fields)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(record.server_id.0)
            .bind(record.instance_id.0)
            .bind(record.ts)
            .bind(&record.level)
            .bind(&record.message)
            .bind(&record.fields)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn plugin_logs(&self, query: &LogQuery) -> Result<Vec<PluginLogRecord>, StoreError> {
        // Every filter is always bound; absent dimensions are disabled by
        // their companion boolean parameter.
        let order = match query.order {
            LogOrder::Asc => "ASC",
            LogOrder::Desc => "DESC",
        };
        let statement = format!(
            r#"
            SELECT server_id, instance_id, ts, level, message, fields
            FROM plugin_logs
            WHERE ($1::uuid IS NULL OR server_id = $1)
              AND ($2::uuid IS NULL OR instance_id = $2)
              AND ($3::text IS NULL OR LOWER(level) = LOWER($3))
              AND ($4::text IS NULL OR message ILIKE '%' || $4 || '%')
              AND ($5::timestamptz IS NULL OR ts < $5)
              AND ($6::timestamptz IS NULL OR ts > $6)
            ORDER BY ts {order}
            LIMIT $7
            "#
        );

        let limit = if query.limit == 0 {
            1000i64
        } else {
            query.limit as i64
        };
        let rows = sqlx::query(&statement)
            .bind(query.server_id.map(|s| s.0))
            .bind(query.instance_id.map(|i| i.0))
            .bind(&query.level)
            .bind(&query.search)
            .bind(query.before)
            .bind(query.after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(PluginLogRecord {
                    server_id: ServerId(row.try_get("server_id")?),
                    instance_id: InstanceId(row.try_get("instance_id")?),
                    ts: row.try_get("ts")?,
                    level: row.try_get("level")?,
                    message: row.try_get("message")?,
                    fields: row.try_get("fields")?,
                })
            })
            .collect()
    }

    async fn replace_identities(
        &self,
        identities: &[PlayerIdentityRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM player_identities")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM player_identity_lookup")
            .execute(&mut *tx)
            .await?;

        for identity in identities {
            sqlx::query(
                r#"
                INSERT INTO player_identities
                    (canonical_id, primary_steam, primary_eos, all_steam_ids,
                     all_eos_ids, all_names, first_seen, last_seen, total_sessions)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(&identity.canonical_id)
            .bind(identity.primary_steam.map(steam_to_db))
            .bind(identity.primary_eos.as_ref().map(|e| e.as_str().to_string()))
            .bind(
                identity
                    .all_steam_ids
                    .iter()
                    .copied()
                    .map(steam_to_db)
                    .collect::<Vec<_>>(),
            )
            .bind(
                identity
                    .all_eos_ids
                    .iter()
                    .map(|e| e.as_str().to_string())
                    .collect::<Vec<_>>(),
            )
            .bind(&identity.all_names)
            .bind(identity.first_seen)
            .bind(identity.last_seen)
            .bind(identity.total_sessions as i64)
            .execute(&mut *tx)
            .await?;

            for steam in &identity.all_steam_ids {
                sqlx::query(
                    r#"
                    INSERT INTO player_identity_lookup (key_kind, key_value, canonical_id)
                    VALUES ('steam', $1, $2)
                    "#,
                )
                .bind(steam.to_string())
                .bind(&identity.canonical_id)
                .execute(&mut *tx)
                .await?;
            }
            for eos in &identity.all_eos_ids {
                sqlx::query(
                    r#"
                    INSERT INTO player_identity_lookup (key_kind, key_value, canonical_id)
                    VALUES ('eos', $1, $2)
                    "#,
                )
                .bind(eos.as_str())
                .bind(&identity.canonical_id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn identities(&self) -> Result<Vec<PlayerIdentityRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM player_identities ORDER BY canonical_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::identity_from_row).collect()
    }

    async fn identity_by_key(
        &self,
        kind: IdentifierKind,
        value: &str,
    ) -> Result<Option<PlayerIdentityRecord>, StoreError> {
        // The statement is selected by the closed enum; the probe value is
        // always a bound parameter.
        let statement = match kind {
            IdentifierKind::Steam => {
                "SELECT canonical_id FROM player_identity_lookup WHERE key_kind = 'steam' AND key_value = $1"
            }
            IdentifierKind::Eos => {
                "SELECT canonical_id FROM player_identity_lookup WHERE key_kind = 'eos' AND key_value = $1"
            }
        };

        let Some(row) = sqlx::query(statement)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let canonical_id: String = row.try_get("canonical_id")?;

        sqlx::query("SELECT * FROM player_identities WHERE canonical_id = $1")
            .bind(&canonical_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::identity_from_row)
            .transpose()
    }
}
