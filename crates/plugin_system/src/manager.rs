//! Plugin instance lifecycle management.
//!
//! Instances move through created → enabled → (failed | disabled) →
//! deleted. The instance table is one coarse mutex-guarded map; lifecycle
//! operations are rare. Worker panics are captured by a monitor task and
//! flip the instance to failed without touching peers.

use crate::connector::ConnectorManager;
use crate::definition::{Plugin, PluginContext, PluginWorker, validate_config};
use crate::error::PluginSystemError;
use crate::logging::{spawn_log_flusher, InstanceLogger};
use crate::registry::PluginRegistry;
use aegis_types::{ConfigValue, InstanceId, ServerId};
use chrono::Utc;
use event_system::{EventBus, EventPayload, LogLevel, Subscription};
use persistence::relational::Db;
use persistence::{ColumnarStore, ExtensionRecord, PluginLogRecord};
use rcon_manager::RconManager;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

/// How long a worker gets to wind down before it is aborted.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle state of one plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Row exists; worker never started
    Created,
    /// Worker running
    Enabled,
    /// Worker start failed or panicked; enabled flag flipped off
    Failed,
    /// Explicitly shut down; no resources held
    Disabled,
}

/// Result of a create or reload, carrying a warning when an enable attempt
/// failed without rolling back the row.
#[derive(Debug)]
pub struct LifecycleOutcome {
    pub instance_id: InstanceId,
    pub warning: Option<String>,
}

struct RunningInstance {
    stop_tx: watch::Sender<bool>,
    monitor: JoinHandle<()>,
    worker_abort: AbortHandle,
    acquired_connectors: Vec<String>,
}

struct InstanceEntry {
    record: ExtensionRecord,
    state: InstanceState,
    runtime: Option<RunningInstance>,
}

struct ManagerInner {
    registry: Arc<PluginRegistry>,
    connectors: Arc<ConnectorManager>,
    db: Arc<dyn Db>,
    rcon: Arc<RconManager>,
    bus: EventBus,
    instances: Mutex<HashMap<InstanceId, InstanceEntry>>,
    log_tx: mpsc::UnboundedSender<PluginLogRecord>,
    shutdown_grace: Duration,
}

/// Manages per-(server, plugin) instances and their shared connectors.
pub struct PluginManager {
    inner: Arc<ManagerInner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl PluginManager {
    /// Creates a manager wired to its collaborators and starts the log
    /// flusher.
    pub fn new(
        registry: Arc<PluginRegistry>,
        connectors: Arc<ConnectorManager>,
        db: Arc<dyn Db>,
        columnar: Arc<dyn ColumnarStore>,
        rcon: Arc<RconManager>,
        bus: EventBus,
    ) -> Self {
        Self::with_shutdown_grace(
            registry,
            connectors,
            db,
            columnar,
            rcon,
            bus,
            DEFAULT_SHUTDOWN_GRACE,
        )
    }

    /// As [`new`](Self::new), with an explicit worker shutdown grace.
    pub fn with_shutdown_grace(
        registry: Arc<PluginRegistry>,
        connectors: Arc<ConnectorManager>,
        db: Arc<dyn Db>,
        columnar: Arc<dyn ColumnarStore>,
        rcon: Arc<RconManager>,
        bus: EventBus,
        shutdown_grace: Duration,
    ) -> Self {
        let (log_tx, flusher) = spawn_log_flusher(columnar);
        Self {
            inner: Arc::new(ManagerInner {
                registry,
                connectors,
                db,
                rcon,
                bus,
                instances: Mutex::new(HashMap::new()),
                log_tx,
                shutdown_grace,
            }),
            flusher: Mutex::new(Some(flusher)),
        }
    }

    /// Loads every persisted instance row and enables the enabled ones.
    ///
    /// Enable failures are logged and flip the row to disabled; boot never
    /// aborts because one plugin is broken.
    pub async fn load_from_store(&self) -> Result<(), PluginSystemError> {
        let records = self.inner.db.extensions().await?;
        info!("Loading {} plugin instances from store", records.len());

        let mut to_enable = Vec::new();
        {
            let mut instances = self.inner.instances.lock().await;
            for record in records {
                if record.enabled {
                    to_enable.push(record.id);
                }
                instances.insert(
                    record.id,
                    InstanceEntry {
                        state: if record.enabled {
                            InstanceState::Created
                        } else {
                            InstanceState::Disabled
                        },
                        record,
                        runtime: None,
                    },
                );
            }
        }

        for instance_id in to_enable {
            if let Err(e) = self.enable(instance_id).await {
                warn!("Enable of persisted instance {instance_id} failed: {e}");
                let _ = self.inner.db.set_extension_enabled(instance_id, false).await;
                let mut instances = self.inner.instances.lock().await;
                if let Some(entry) = instances.get_mut(&instance_id) {
                    entry.record.enabled = false;
                    entry.state = InstanceState::Failed;
                }
            }
        }
        Ok(())
    }

    /// Creates an instance row, enabling it immediately when requested.
    ///
    /// Enable failure does not roll back the creation; the row is persisted
    /// with `enabled = false` and the outcome carries a warning.
    pub async fn create(
        &self,
        server_id: ServerId,
        plugin_type_id: &str,
        config: BTreeMap<String, ConfigValue>,
        enabled: bool,
    ) -> Result<LifecycleOutcome, PluginSystemError> {
        let plugin = self
            .inner
            .registry
            .get(plugin_type_id)
            .ok_or_else(|| PluginSystemError::UnknownPlugin(plugin_type_id.to_string()))?;
        let definition = plugin.definition();

        let normalized = validate_config(&definition.config_schema, &config)?;
        plugin.validate(&normalized)?;

        let record = ExtensionRecord {
            id: InstanceId::new(),
            server_id,
            plugin_type_id: plugin_type_id.to_string(),
            enabled,
            config: normalized,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        {
            let mut instances = self.inner.instances.lock().await;
            if !definition.allow_multiple_instances {
                let duplicate = instances.values().any(|entry| {
                    entry.record.server_id == server_id
                        && entry.record.plugin_type_id == plugin_type_id
                });
                if duplicate {
                    return Err(PluginSystemError::DuplicateInstance {
                        plugin: plugin_type_id.to_string(),
                        server: server_id.to_string(),
                    });
                }
            }

            self.inner.db.insert_extension(&record).await?;
            instances.insert(
                record.id,
                InstanceEntry {
                    record: record.clone(),
                    state: InstanceState::Created,
                    runtime: None,
                },
            );
        }

        let mut warning = None;
        if enabled {
            if let Err(e) = self.enable(record.id).await {
                warn!("Enable of new instance {} failed: {e}", record.id);
                self.inner
                    .db
                    .set_extension_enabled(record.id, false)
                    .await?;
                let mut instances = self.inner.instances.lock().await;
                if let Some(entry) = instances.get_mut(&record.id) {
                    entry.record.enabled = false;
                    entry.state = InstanceState::Failed;
                }
                warning = Some(e.to_string());
            }
        }

        Ok(LifecycleOutcome {
            instance_id: record.id,
            warning,
        })
    }

    /// Resolves dependencies, subscribes the worker and spawns its task.
    ///
    /// Idempotent: enabling an already-enabled instance is a no-op.
    pub async fn enable(&self, instance_id: InstanceId) -> Result<(), PluginSystemError> {
        let mut instances = self.inner.instances.lock().await;
        let entry = instances
            .get_mut(&instance_id)
            .ok_or(PluginSystemError::InstanceNotFound(instance_id))?;
        if entry.runtime.is_some() {
            return Ok(());
        }

        let plugin = self
            .inner
            .registry
            .get(&entry.record.plugin_type_id)
            .ok_or_else(|| {
                PluginSystemError::UnknownPlugin(entry.record.plugin_type_id.clone())
            })?;
        let definition = plugin.definition();
        let server_id = entry.record.server_id;

        // Resolve declared connector dependencies; roll back on failure.
        let mut acquired = Vec::new();
        let mut connectors = HashMap::new();
        for connector_type in definition.required_connectors {
            match self.inner.connectors.acquire(connector_type).await {
                Ok(connector) => {
                    acquired.push(connector_type.to_string());
                    connectors.insert(connector_type.to_string(), connector);
                }
                Err(e) => {
                    for released in &acquired {
                        self.inner.connectors.release(released).await;
                    }
                    return Err(e);
                }
            }
        }

        let subscription =
            self.inner
                .bus
                .subscribe(definition.event_filter.clone(), Some(server_id), 0);
        let logger = InstanceLogger::new(
            server_id,
            instance_id,
            self.inner.log_tx.clone(),
            self.inner.bus.clone(),
        );

        let ctx = PluginContext {
            server_id,
            instance_id,
            config: entry.record.config.clone(),
            rcon: self.inner.rcon.clone(),
            bus: self.inner.bus.clone(),
            db: self.inner.db.clone(),
            connectors,
            log: logger,
        };

        let worker = match plugin.start(ctx).await {
            Ok(worker) => worker,
            Err(e) => {
                for released in &acquired {
                    self.inner.connectors.release(released).await;
                }
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker_task = tokio::spawn(run_worker(worker, subscription, stop_rx));
        let worker_abort = worker_task.abort_handle();
        let monitor = tokio::spawn(monitor_worker(
            self.inner.clone(),
            instance_id,
            server_id,
            worker_task,
        ));

        entry.runtime = Some(RunningInstance {
            stop_tx,
            monitor,
            worker_abort,
            acquired_connectors: acquired,
        });
        entry.state = InstanceState::Enabled;
        entry.record.enabled = true;
        self.inner.db.set_extension_enabled(instance_id, true).await?;
        info!(
            "Enabled plugin {} instance {} on server {}",
            entry.record.plugin_type_id, instance_id, server_id
        );
        Ok(())
    }

    /// Applies a config change: quiesce, commit, re-enable.
    ///
    /// The new config is committed to storage **before** re-enable so the
    /// worker reads fresh values on start. An enable failure flips the row
    /// to disabled and returns a warning instead of an error.
    pub async fn reload(
        &self,
        instance_id: InstanceId,
        config: BTreeMap<String, ConfigValue>,
    ) -> Result<LifecycleOutcome, PluginSystemError> {
        let (plugin, was_enabled) = {
            let instances = self.inner.instances.lock().await;
            let entry = instances
                .get(&instance_id)
                .ok_or(PluginSystemError::InstanceNotFound(instance_id))?;
            let plugin = self
                .inner
                .registry
                .get(&entry.record.plugin_type_id)
                .ok_or_else(|| {
                    PluginSystemError::UnknownPlugin(entry.record.plugin_type_id.clone())
                })?;
            (plugin, entry.runtime.is_some())
        };

        let normalized = validate_config(&plugin.definition().config_schema, &config)?;
        plugin.validate(&normalized)?;

        self.quiesce(instance_id).await?;

        // Commit before re-enable: the restarted worker must see new config.
        {
            let mut instances = self.inner.instances.lock().await;
            let entry = instances
                .get_mut(&instance_id)
                .ok_or(PluginSystemError::InstanceNotFound(instance_id))?;
            entry.record.config = normalized;
            entry.record.updated_at = Utc::now();
            entry.record.enabled = was_enabled;
            self.inner.db.update_extension(&entry.record).await?;
        }

        let mut warning = None;
        if was_enabled {
            if let Err(e) = self.enable(instance_id).await {
                warn!("Re-enable of instance {instance_id} after reload failed: {e}");
                self.inner
                    .db
                    .set_extension_enabled(instance_id, false)
                    .await?;
                let mut instances = self.inner.instances.lock().await;
                if let Some(entry) = instances.get_mut(&instance_id) {
                    entry.record.enabled = false;
                    entry.state = InstanceState::Failed;
                }
                warning = Some(e.to_string());
            }
        }

        Ok(LifecycleOutcome {
            instance_id,
            warning,
        })
    }

    /// Stops the worker and persists the instance as disabled.
    ///
    /// Safe to call on an already-disabled instance.
    pub async fn disable(&self, instance_id: InstanceId) -> Result<(), PluginSystemError> {
        self.quiesce(instance_id).await?;
        self.inner
            .db
            .set_extension_enabled(instance_id, false)
            .await?;
        let mut instances = self.inner.instances.lock().await;
        if let Some(entry) = instances.get_mut(&instance_id) {
            entry.record.enabled = false;
            entry.state = InstanceState::Disabled;
        }
        Ok(())
    }

    /// Quiesces the instance and deletes its row.
    ///
    /// Shutdown errors are logged, never surfaced; the delete proceeds.
    pub async fn delete(&self, instance_id: InstanceId) -> Result<(), PluginSystemError> {
        if let Err(e) = self.quiesce(instance_id).await {
            warn!("Shutdown before delete of {instance_id} failed: {e}");
        }
        self.inner.db.delete_extension(instance_id).await?;
        self.inner.instances.lock().await.remove(&instance_id);
        info!("Deleted plugin instance {instance_id}");
        Ok(())
    }

    /// Cancels the worker, unsubscribes and releases connector refcounts.
    ///
    /// Waits up to the configured grace period before forcing. A no-op for
    /// instances without a running worker.
    async fn quiesce(&self, instance_id: InstanceId) -> Result<(), PluginSystemError> {
        let runtime = {
            let mut instances = self.inner.instances.lock().await;
            let entry = instances
                .get_mut(&instance_id)
                .ok_or(PluginSystemError::InstanceNotFound(instance_id))?;
            entry.runtime.take()
        };

        let Some(mut runtime) = runtime else {
            return Ok(());
        };
        let _ = runtime.stop_tx.send(true);
        if tokio::time::timeout(self.inner.shutdown_grace, &mut runtime.monitor)
            .await
            .is_err()
        {
            warn!("Instance {instance_id} exceeded shutdown grace; aborting worker");
            runtime.worker_abort.abort();
            let _ = runtime.monitor.await;
        }
        for connector_type in &runtime.acquired_connectors {
            self.inner.connectors.release(connector_type).await;
        }
        Ok(())
    }

    /// Current state of an instance.
    pub async fn instance_state(&self, instance_id: InstanceId) -> Option<InstanceState> {
        self.inner
            .instances
            .lock()
            .await
            .get(&instance_id)
            .map(|e| e.state)
    }

    /// Instance rows (with runtime state) for one server.
    pub async fn instances_for_server(
        &self,
        server_id: ServerId,
    ) -> Vec<(ExtensionRecord, InstanceState)> {
        self.inner
            .instances
            .lock()
            .await
            .values()
            .filter(|e| e.record.server_id == server_id)
            .map(|e| (e.record.clone(), e.state))
            .collect()
    }

    /// Number of currently running workers.
    pub async fn running_count(&self) -> usize {
        self.inner
            .instances
            .lock()
            .await
            .values()
            .filter(|e| e.runtime.is_some())
            .count()
    }

    /// Quiesces every instance and stops the log flusher.
    pub async fn shutdown(&self) {
        let ids: Vec<InstanceId> = self.inner.instances.lock().await.keys().copied().collect();
        info!("Shutting down {} plugin instances", ids.len());
        for instance_id in ids {
            if let Err(e) = self.quiesce(instance_id).await {
                error!("Shutdown of instance {instance_id} failed: {e}");
            }
        }
        self.inner.connectors.shutdown().await;
        if let Some(flusher) = self.flusher.lock().await.take() {
            flusher.abort();
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager").finish()
    }
}

/// Worker event loop: pump bus events until stopped or unsubscribed.
async fn run_worker(
    mut worker: Box<dyn PluginWorker>,
    mut subscription: Subscription,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = worker.handle_event(&event).await {
                            warn!("Plugin worker event handler error: {e}");
                        }
                    }
                    None => break,
                }
            }
        }
    }
    worker.shutdown().await;
}

/// Awaits the worker task and captures panics.
///
/// A panic is published as an error-severity `plugin-log` event and leaves
/// the instance in failed state with the enabled flag flipped off. No
/// silent absorption, and no effect on peer instances.
async fn monitor_worker(
    inner: Arc<ManagerInner>,
    instance_id: InstanceId,
    server_id: ServerId,
    task: JoinHandle<()>,
) {
    let join_error = match task.await {
        Ok(()) => return,
        Err(e) => e,
    };
    if !join_error.is_panic() {
        // Cancelled by a forced shutdown; nothing to record.
        return;
    }

    let panic_message = {
        let payload = join_error.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        }
    };
    error!("Plugin instance {instance_id} worker panicked: {panic_message}");

    inner.bus.publish(
        Some(server_id),
        EventPayload::PluginLog {
            instance_id,
            level: LogLevel::Error,
            message: format!("worker panicked: {panic_message}"),
        },
    );

    let released = {
        let mut instances = inner.instances.lock().await;
        match instances.get_mut(&instance_id) {
            Some(entry) => {
                entry.state = InstanceState::Failed;
                entry.record.enabled = false;
                entry
                    .runtime
                    .take()
                    .map(|r| r.acquired_connectors)
                    .unwrap_or_default()
            }
            None => Vec::new(),
        }
    };
    for connector_type in &released {
        inner.connectors.release(connector_type).await;
    }
    if let Err(e) = inner.db.set_extension_enabled(instance_id, false).await {
        warn!("Failed to persist failed state for {instance_id}: {e}");
    }
}
