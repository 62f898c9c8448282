//! Auto-kick plugin: acts on players who reach a teamkill threshold.
//!
//! Counts teamkills per attacker from the died-event stream and, at the
//! configured threshold, warns or kicks the offender through RCON. Counts
//! reset at round end.

use aegis_types::{ConfigFieldType, ConfigValue, SteamId};
use async_trait::async_trait;
use event_system::{Event, EventFilter, EventPayload, EventType};
use plugin_system::{
    ConfigField, Plugin, PluginContext, PluginDefinition, PluginSystemError, PluginWorker,
};
use std::collections::HashMap;
use tracing::debug;

mod tracker;
pub use tracker::TeamkillTracker;

/// Plugin type id persisted in `server_extensions`.
pub const PLUGIN_TYPE_ID: &str = "autokick_teamkills";

/// What to do when the threshold is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Warn,
    Kick,
}

impl Action {
    fn from_config(value: Option<&ConfigValue>) -> Self {
        match value.and_then(ConfigValue::as_str) {
            Some("warn") => Action::Warn,
            _ => Action::Kick,
        }
    }
}

/// Auto-kick plugin type.
#[derive(Debug, Default)]
pub struct AutokickPlugin;

#[async_trait]
impl Plugin for AutokickPlugin {
    fn definition(&self) -> PluginDefinition {
        PluginDefinition {
            id: PLUGIN_TYPE_ID,
            name: "Teamkill Auto-Kick",
            description: "Warns or kicks players who reach a teamkill threshold",
            allow_multiple_instances: false,
            config_schema: vec![
                ConfigField::new("threshold", ConfigFieldType::Int, false)
                    .with_default(ConfigValue::Int(3)),
                ConfigField::new("action", ConfigFieldType::Enum, false)
                    .with_default(ConfigValue::Enum("kick".to_string()))
                    .with_options(&["warn", "kick"]),
                ConfigField::new("message", ConfigFieldType::String, false)
                    .with_default(ConfigValue::String(
                        "Excessive teamkilling".to_string(),
                    )),
            ],
            required_connectors: &[],
            event_filter: EventFilter::types([EventType::PlayerDied, EventType::RoundEnded]),
        }
    }

    async fn start(
        &self,
        ctx: PluginContext,
    ) -> Result<Box<dyn PluginWorker>, PluginSystemError> {
        let threshold = ctx
            .config
            .get("threshold")
            .and_then(ConfigValue::as_int)
            .unwrap_or(3);
        if threshold < 1 {
            return Err(PluginSystemError::StartFailed(
                "threshold must be at least 1".to_string(),
            ));
        }
        let action = Action::from_config(ctx.config.get("action"));
        let message = ctx
            .config
            .get("message")
            .and_then(ConfigValue::as_str)
            .unwrap_or("Excessive teamkilling")
            .to_string();

        ctx.log.info(format!(
            "autokick armed: threshold {threshold}, action {action:?}"
        ));
        Ok(Box::new(AutokickWorker {
            tracker: TeamkillTracker::new(threshold as u32),
            action,
            message,
            names: HashMap::new(),
            ctx,
        }))
    }
}

struct AutokickWorker {
    tracker: TeamkillTracker,
    action: Action,
    message: String,
    /// Last seen display name per offender, for log lines
    names: HashMap<SteamId, String>,
    ctx: PluginContext,
}

impl AutokickWorker {
    async fn punish(&self, steam_id: SteamId) {
        let name = self
            .names
            .get(&steam_id)
            .cloned()
            .unwrap_or_else(|| steam_id.to_string());
        let command = match self.action {
            Action::Warn => format!("AdminWarn {} {}", steam_id, self.message),
            Action::Kick => format!("AdminKick {} {}", steam_id, self.message),
        };
        self.ctx.log.warn(format!(
            "teamkill threshold reached by {name} ({steam_id}); issuing {:?}",
            self.action
        ));
        if let Err(e) = self.ctx.rcon.execute(self.ctx.server_id, &command).await {
            self.ctx
                .log
                .error(format!("failed to act on {steam_id}: {e}"));
        }
    }
}

#[async_trait]
impl PluginWorker for AutokickWorker {
    async fn handle_event(&mut self, event: &Event) -> Result<(), PluginSystemError> {
        match &event.payload {
            EventPayload::PlayerDied {
                attacker,
                teamkill: true,
                ..
            } => {
                let Some(steam_id) = attacker.steam_id else {
                    debug!("teamkill without attacker steam id; not counted");
                    return Ok(());
                };
                if !attacker.name.is_empty() {
                    self.names.insert(steam_id, attacker.name.clone());
                }
                if self.tracker.record(steam_id) {
                    self.punish(steam_id).await;
                }
            }
            EventPayload::RoundEnded { .. } => {
                self.tracker.reset();
                self.names.clear();
            }
            _ => {}
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.ctx.log.info("autokick stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_types::{InstanceId, ServerId};
    use event_system::{EventBus, LogLevel, PlayerRef};
    use persistence::MemoryDb;
    use plugin_system::InstanceLogger;
    use rcon_manager::{RconManager, RconManagerConfig};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn context(bus: EventBus, config: BTreeMap<String, ConfigValue>) -> PluginContext {
        let server_id = ServerId::new();
        let instance_id = InstanceId::new();
        let (log_tx, _log_rx) = tokio::sync::mpsc::unbounded_channel();
        PluginContext {
            server_id,
            instance_id,
            config,
            rcon: Arc::new(RconManager::new(RconManagerConfig::default())),
            bus: bus.clone(),
            db: Arc::new(MemoryDb::new()),
            connectors: HashMap::new(),
            log: InstanceLogger::new(server_id, instance_id, log_tx, bus),
        }
    }

    fn teamkill_by(steam: SteamId) -> Event {
        Event::new(
            None,
            EventPayload::PlayerDied {
                victim: PlayerRef::named("victim"),
                attacker: PlayerRef {
                    name: "offender".to_string(),
                    steam_id: Some(steam),
                    eos_id: None,
                },
                weapon: "BP_Rifle".to_string(),
                damage: 100.0,
                teamkill: true,
            },
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn threshold_reached_emits_warning_log_event() {
        let bus = EventBus::new();
        let mut log_events = bus.subscribe(
            EventFilter::types([EventType::PluginLog]),
            None,
            32,
        );

        let mut config = BTreeMap::new();
        config.insert("threshold".to_string(), ConfigValue::Int(2));
        let plugin = AutokickPlugin;
        let mut worker = plugin.start(context(bus, config)).await.unwrap();

        let offender = SteamId::new(76561198000000042);
        worker.handle_event(&teamkill_by(offender)).await.unwrap();
        worker.handle_event(&teamkill_by(offender)).await.unwrap();

        // First event is the armed notice; scan for the threshold warning.
        let mut saw_warning = false;
        while let Some(event) = log_events.try_recv() {
            if let EventPayload::PluginLog { level, message, .. } = &event.payload {
                if *level == LogLevel::Warn && message.contains("threshold reached") {
                    assert!(message.contains("offender"));
                    saw_warning = true;
                }
            }
        }
        assert!(saw_warning, "no threshold warning was logged");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_nonpositive_threshold() {
        let bus = EventBus::new();
        let mut config = BTreeMap::new();
        config.insert("threshold".to_string(), ConfigValue::Int(0));
        let result = AutokickPlugin.start(context(bus, config)).await;
        assert!(matches!(result, Err(PluginSystemError::StartFailed(_))));
    }
}
