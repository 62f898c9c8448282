//! Chat relay plugin: forwards in-game chat to a shared chat bridge.
//!
//! Depends on the [`bridge::ChatBridgeConnector`] connector; several relay
//! instances (one per server) share one bridge session.

use aegis_types::{ConfigFieldType, ConfigValue};
use async_trait::async_trait;
use event_system::{ChatChannel, Event, EventFilter, EventPayload, EventType};
use plugin_system::{
    ConfigField, Plugin, PluginContext, PluginDefinition, PluginSystemError, PluginWorker,
};
use std::sync::Arc;

mod bridge;
pub use bridge::{ChatBridgeConnector, ChatBridgeFactory, CONNECTOR_TYPE_ID};

// Include tests
#[cfg(test)]
mod tests;

/// Plugin type id persisted in `server_extensions`.
pub const PLUGIN_TYPE_ID: &str = "chat_relay";

/// Chat relay plugin type.
#[derive(Debug, Default)]
pub struct ChatRelayPlugin;

#[async_trait]
impl Plugin for ChatRelayPlugin {
    fn definition(&self) -> PluginDefinition {
        PluginDefinition {
            id: PLUGIN_TYPE_ID,
            name: "Chat Relay",
            description: "Forwards in-game chat through the shared chat bridge",
            allow_multiple_instances: true,
            config_schema: vec![
                ConfigField::new("prefix", ConfigFieldType::String, false)
                    .with_default(ConfigValue::String(String::new())),
                ConfigField::new("channels", ConfigFieldType::Enum, false)
                    .with_default(ConfigValue::Enum("all".to_string()))
                    .with_options(&["all", "admin-only"]),
            ],
            required_connectors: &[CONNECTOR_TYPE_ID],
            event_filter: EventFilter::types([EventType::ChatMessage]),
        }
    }

    async fn start(
        &self,
        ctx: PluginContext,
    ) -> Result<Box<dyn PluginWorker>, PluginSystemError> {
        let connector = ctx.connector(CONNECTOR_TYPE_ID)?;
        if connector
            .as_any()
            .downcast_ref::<ChatBridgeConnector>()
            .is_none()
        {
            return Err(PluginSystemError::ConnectorFailed(
                "chat_bridge connector has an unexpected concrete type".to_string(),
            ));
        }

        let prefix = ctx
            .config
            .get("prefix")
            .and_then(ConfigValue::as_str)
            .unwrap_or("")
            .to_string();
        let admin_only = ctx
            .config
            .get("channels")
            .and_then(ConfigValue::as_str)
            .map(|c| c == "admin-only")
            .unwrap_or(false);

        ctx.log.info("chat relay started");
        Ok(Box::new(ChatRelayWorker {
            connector,
            prefix,
            admin_only,
            ctx: ctx.clone(),
        }))
    }
}

struct ChatRelayWorker {
    connector: Arc<dyn plugin_system::Connector>,
    prefix: String,
    admin_only: bool,
    ctx: PluginContext,
}

impl ChatRelayWorker {
    fn bridge(&self) -> Option<&ChatBridgeConnector> {
        self.connector.as_any().downcast_ref::<ChatBridgeConnector>()
    }
}

#[async_trait]
impl PluginWorker for ChatRelayWorker {
    async fn handle_event(&mut self, event: &Event) -> Result<(), PluginSystemError> {
        let EventPayload::ChatMessage {
            channel,
            player,
            message,
        } = &event.payload
        else {
            return Ok(());
        };
        if self.admin_only && *channel != ChatChannel::Admin {
            return Ok(());
        }

        let tag = match channel {
            ChatChannel::All => "ALL",
            ChatChannel::Team => "TEAM",
            ChatChannel::Squad => "SQUAD",
            ChatChannel::Admin => "ADMIN",
        };
        let line = if self.prefix.is_empty() {
            format!("[{tag}] {}: {message}", player.name)
        } else {
            format!("{} [{tag}] {}: {message}", self.prefix, player.name)
        };

        match self.bridge() {
            Some(bridge) => bridge.send_line(line),
            None => self
                .ctx
                .log
                .error("chat bridge connector lost its concrete type"),
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.ctx.log.info("chat relay stopped");
    }
}
