//! Plugin definitions, config schemas and the worker capability traits.
//!
//! A plugin is a typed behavioral module bound to one server per instance.
//! The capability surface is deliberately small: a definition describing
//! schema and dependencies, a `start` producing a worker, and an optional
//! config validation hook. Workers expose `handle_event` and `shutdown`.

use crate::error::PluginSystemError;
use crate::logging::InstanceLogger;
use aegis_types::{ConfigFieldType, ConfigValue, InstanceId, ServerId};
use async_trait::async_trait;
use event_system::{Event, EventBus, EventFilter};
use persistence::relational::Db;
use rcon_manager::RconManager;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One field of a plugin or connector configuration schema.
///
/// Field order is preserved for UI rendering; so is the `options` list of
/// `Enum` fields.
#[derive(Debug, Clone)]
pub struct ConfigField {
    pub name: &'static str,
    pub field_type: ConfigFieldType,
    pub required: bool,
    pub default: Option<ConfigValue>,
    /// Permitted values for `Enum` fields, in display order
    pub options: &'static [&'static str],
}

impl ConfigField {
    pub fn new(name: &'static str, field_type: ConfigFieldType, required: bool) -> Self {
        Self {
            name,
            field_type,
            required,
            default: None,
            options: &[],
        }
    }

    pub fn with_default(mut self, default: ConfigValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: &'static [&'static str]) -> Self {
        self.options = options;
        self
    }
}

/// Static description of a plugin type.
#[derive(Debug, Clone)]
pub struct PluginDefinition {
    /// Stable type id persisted in `server_extensions.plugin_type_id`
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// When false, at most one instance of this type per server
    pub allow_multiple_instances: bool,
    pub config_schema: Vec<ConfigField>,
    /// Connector type ids this plugin cannot start without
    pub required_connectors: &'static [&'static str],
    /// Bus filter the worker subscribes with
    pub event_filter: EventFilter,
}

/// A long-lived external-service client shared across plugin instances.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connector type id, matching its registry entry.
    fn type_id(&self) -> &str;
    /// Releases the connector's external session.
    async fn shutdown(&self);
    /// Downcast support so plugins can reach their concrete connector type.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Everything a worker gets at start: its identity, validated config and
/// shared services. No global state.
#[derive(Clone)]
pub struct PluginContext {
    pub server_id: ServerId,
    pub instance_id: InstanceId,
    pub config: BTreeMap<String, ConfigValue>,
    pub rcon: Arc<RconManager>,
    pub bus: EventBus,
    pub db: Arc<dyn Db>,
    /// Acquired connectors keyed by connector type id
    pub connectors: HashMap<String, Arc<dyn Connector>>,
    pub log: InstanceLogger,
}

impl PluginContext {
    /// A required connector by type id.
    ///
    /// Enable resolves all required connectors before start, so a missing
    /// entry here means the plugin asked for one it never declared.
    pub fn connector(&self, type_id: &str) -> Result<Arc<dyn Connector>, PluginSystemError> {
        self.connectors
            .get(type_id)
            .cloned()
            .ok_or_else(|| PluginSystemError::MissingDependency(type_id.to_string()))
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("server_id", &self.server_id)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

/// A plugin type: definition plus worker factory.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Static description of this plugin type.
    fn definition(&self) -> PluginDefinition;

    /// Starts a fresh worker for one instance.
    async fn start(&self, ctx: PluginContext) -> Result<Box<dyn PluginWorker>, PluginSystemError>;

    /// Plugin-specific config validation beyond the schema check.
    fn validate(&self, _config: &BTreeMap<String, ConfigValue>) -> Result<(), PluginSystemError> {
        Ok(())
    }
}

/// A running worker for one plugin instance.
#[async_trait]
pub trait PluginWorker: Send {
    /// Handles one bus event matching the plugin's filter.
    async fn handle_event(&mut self, event: &Event) -> Result<(), PluginSystemError>;

    /// Releases worker resources; called once when the instance stops.
    async fn shutdown(&mut self);
}

/// Validates a config map against a schema, filling defaults.
///
/// Returns the normalized map: unknown keys rejected, missing optional
/// fields populated from their defaults, enum values checked against the
/// ordered options list.
pub fn validate_config(
    schema: &[ConfigField],
    config: &BTreeMap<String, ConfigValue>,
) -> Result<BTreeMap<String, ConfigValue>, PluginSystemError> {
    for key in config.keys() {
        if !schema.iter().any(|f| f.name == key) {
            return Err(PluginSystemError::ConfigValidation(format!(
                "unknown field '{key}'"
            )));
        }
    }

    let mut normalized = BTreeMap::new();
    for field in schema {
        match config.get(field.name) {
            Some(value) => {
                if !value.matches(field.field_type) {
                    return Err(PluginSystemError::ConfigValidation(format!(
                        "field '{}' expects {:?}",
                        field.name, field.field_type
                    )));
                }
                if field.field_type == ConfigFieldType::Enum {
                    let selected = value.as_str().unwrap_or_default();
                    if !field.options.contains(&selected) {
                        return Err(PluginSystemError::ConfigValidation(format!(
                            "field '{}' must be one of {:?}",
                            field.name, field.options
                        )));
                    }
                }
                normalized.insert(field.name.to_string(), value.clone());
            }
            None => {
                if let Some(default) = &field.default {
                    normalized.insert(field.name.to_string(), default.clone());
                } else if field.required {
                    return Err(PluginSystemError::ConfigValidation(format!(
                        "missing required field '{}'",
                        field.name
                    )));
                }
            }
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<ConfigField> {
        vec![
            ConfigField::new("threshold", ConfigFieldType::Int, true),
            ConfigField::new("message", ConfigFieldType::String, false)
                .with_default(ConfigValue::String("bye".to_string())),
            ConfigField::new("action", ConfigFieldType::Enum, false)
                .with_default(ConfigValue::Enum("kick".to_string()))
                .with_options(&["warn", "kick", "ban"]),
        ]
    }

    #[test]
    fn defaults_fill_missing_optional_fields() {
        let mut config = BTreeMap::new();
        config.insert("threshold".to_string(), ConfigValue::Int(3));
        let normalized = validate_config(&schema(), &config).unwrap();
        assert_eq!(
            normalized.get("message"),
            Some(&ConfigValue::String("bye".to_string()))
        );
        assert_eq!(
            normalized.get("action"),
            Some(&ConfigValue::Enum("kick".to_string()))
        );
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let result = validate_config(&schema(), &BTreeMap::new());
        assert!(matches!(
            result,
            Err(PluginSystemError::ConfigValidation(msg)) if msg.contains("threshold")
        ));
    }

    #[test]
    fn enum_value_outside_options_is_rejected() {
        let mut config = BTreeMap::new();
        config.insert("threshold".to_string(), ConfigValue::Int(3));
        config.insert(
            "action".to_string(),
            ConfigValue::Enum("explode".to_string()),
        );
        assert!(validate_config(&schema(), &config).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut config = BTreeMap::new();
        config.insert("threshold".to_string(), ConfigValue::Int(3));
        config.insert("bogus".to_string(), ConfigValue::Bool(true));
        assert!(validate_config(&schema(), &config).is_err());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut config = BTreeMap::new();
        config.insert(
            "threshold".to_string(),
            ConfigValue::String("three".to_string()),
        );
        assert!(validate_config(&schema(), &config).is_err());
    }
}
