//! Error types for the plugin runtime.

use aegis_types::InstanceId;
use persistence::StoreError;

/// Errors surfaced by plugin lifecycle and connector operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    /// The plugin type id is not present in the static registry
    #[error("Unknown plugin type: {0}")]
    UnknownPlugin(String),
    /// A declared dependency could not be resolved; names the missing piece
    #[error("Missing dependency: {0}")]
    MissingDependency(String),
    /// The plugin forbids multiple instances per server and one exists
    #[error("Plugin {plugin} already has an instance on server {server}")]
    DuplicateInstance { plugin: String, server: String },
    /// The configuration map violates the plugin's schema
    #[error("Config validation failed: {0}")]
    ConfigValidation(String),
    /// No instance row exists for the id
    #[error("Plugin instance not found: {0}")]
    InstanceNotFound(InstanceId),
    /// The worker factory refused to start
    #[error("Plugin start failed: {0}")]
    StartFailed(String),
    /// A connector could not be constructed or has failed
    #[error("Connector failure: {0}")]
    ConnectorFailed(String),
    /// Backing store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}
