//! # Plugin Runtime
//!
//! Lifecycle and isolation for per-(server, plugin) instances and the
//! shared connectors they depend on.
//!
//! - A **plugin** is a typed behavioral module (auto-kick, chat bridge)
//!   registered once at process start in an immutable [`PluginRegistry`].
//! - An **instance** binds one plugin type to one server with a validated
//!   configuration, persisted as a `server_extensions` row.
//! - A **connector** is a stateful external-service client shared across
//!   instances by refcount, constructed on first use.
//!
//! Workers consume bus events through their declared filter and log through
//! a per-instance pipeline batched into the columnar store. A panicking
//! worker is captured, reported as a `plugin-log` error event and left in
//! failed state; peers keep running.

mod connector;
mod definition;
mod error;
mod logging;
mod manager;
mod registry;

pub use connector::{ConnectorDefinition, ConnectorFactory, ConnectorManager};
pub use definition::{
    validate_config, ConfigField, Connector, Plugin, PluginContext, PluginDefinition,
    PluginWorker,
};
pub use error::PluginSystemError;
pub use logging::{spawn_log_flusher, InstanceLogger};
pub use manager::{
    InstanceState, LifecycleOutcome, PluginManager, DEFAULT_SHUTDOWN_GRACE,
};
pub use registry::{PluginRegistry, PluginRegistryBuilder};

// Include tests
#[cfg(test)]
mod tests;
