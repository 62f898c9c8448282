//! Relational store interface.

use crate::error::StoreError;
use crate::model::{
    AuditLogRecord, BanListRecord, BanRecord, ConnectorRecord, ExtensionRecord,
    RemoteBanSourceRecord, ServerRecord,
};
use aegis_types::{BanListId, InstanceId, ServerId};
use async_trait::async_trait;
use uuid::Uuid;

/// Relational store covering servers, bans, ban lists, plugin instances,
/// connectors and the audit log.
///
/// The database is the source of truth for every write path; RCON side
/// effects are best-effort on top of it.
#[async_trait]
pub trait Db: Send + Sync {
    // --- servers ---

    async fn insert_server(&self, server: &ServerRecord) -> Result<(), StoreError>;
    async fn server(&self, id: ServerId) -> Result<ServerRecord, StoreError>;
    async fn servers(&self) -> Result<Vec<ServerRecord>, StoreError>;
    async fn update_server(&self, server: &ServerRecord) -> Result<(), StoreError>;
    async fn delete_server(&self, id: ServerId) -> Result<(), StoreError>;

    // --- bans ---

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError>;
    async fn ban(&self, id: Uuid) -> Result<BanRecord, StoreError>;
    async fn bans_for_server(&self, server_id: ServerId) -> Result<Vec<BanRecord>, StoreError>;
    async fn bans_in_list(&self, list_id: BanListId) -> Result<Vec<BanRecord>, StoreError>;
    /// Removes the ban row; ban evidence cascades with it.
    async fn delete_ban(&self, id: Uuid) -> Result<(), StoreError>;

    // --- ban lists ---

    async fn insert_ban_list(&self, list: &BanListRecord) -> Result<(), StoreError>;
    async fn ban_list(&self, id: BanListId) -> Result<BanListRecord, StoreError>;
    async fn ban_lists(&self) -> Result<Vec<BanListRecord>, StoreError>;
    /// Fails with [`StoreError::Conflict`] when the subscription exists.
    async fn subscribe_server_to_list(
        &self,
        list_id: BanListId,
        server_id: ServerId,
    ) -> Result<(), StoreError>;
    async fn unsubscribe_server_from_list(
        &self,
        list_id: BanListId,
        server_id: ServerId,
    ) -> Result<(), StoreError>;
    async fn list_subscribers(&self, list_id: BanListId) -> Result<Vec<ServerId>, StoreError>;
    /// Lists the given server is subscribed to.
    async fn server_subscriptions(&self, server_id: ServerId)
        -> Result<Vec<BanListId>, StoreError>;

    // --- plugin instances (server_extensions) ---

    async fn insert_extension(&self, extension: &ExtensionRecord) -> Result<(), StoreError>;
    async fn extension(&self, id: InstanceId) -> Result<ExtensionRecord, StoreError>;
    async fn extensions_for_server(
        &self,
        server_id: ServerId,
    ) -> Result<Vec<ExtensionRecord>, StoreError>;
    async fn extensions(&self) -> Result<Vec<ExtensionRecord>, StoreError>;
    async fn update_extension(&self, extension: &ExtensionRecord) -> Result<(), StoreError>;
    async fn set_extension_enabled(&self, id: InstanceId, enabled: bool)
        -> Result<(), StoreError>;
    async fn delete_extension(&self, id: InstanceId) -> Result<(), StoreError>;

    // --- connectors ---

    async fn insert_connector(&self, connector: &ConnectorRecord) -> Result<(), StoreError>;
    async fn connector(&self, id: Uuid) -> Result<ConnectorRecord, StoreError>;
    async fn connectors(&self) -> Result<Vec<ConnectorRecord>, StoreError>;
    async fn delete_connector(&self, id: Uuid) -> Result<(), StoreError>;

    // --- remote ban sources ---

    async fn remote_ban_sources(&self) -> Result<Vec<RemoteBanSourceRecord>, StoreError>;

    // --- audit ---

    async fn append_audit_log(&self, entry: &AuditLogRecord) -> Result<(), StoreError>;
}
