//! Refcounted shared connectors.
//!
//! A connector is constructed on first acquire and torn down when its last
//! plugin binding releases it, unless the definition marks it `always_on`.
//! Construction and teardown are serialized per connector under an init
//! mutex; refcounts are plain atomics.

use crate::definition::Connector;
use crate::error::PluginSystemError;
use aegis_types::ConfigValue;
use async_trait::async_trait;
use dashmap::DashMap;
use event_system::{EventBus, EventPayload};
use persistence::relational::Db;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Static description of a connector type.
#[derive(Debug, Clone)]
pub struct ConnectorDefinition {
    /// Stable type id persisted in `connectors.connector_type_id`
    pub id: &'static str,
    pub name: &'static str,
    /// Survives refcount zero; torn down only at process shutdown
    pub always_on: bool,
    pub config_schema: Vec<crate::definition::ConfigField>,
}

/// A connector type: definition plus construction from stored config.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    fn definition(&self) -> ConnectorDefinition;

    /// Builds a live connector from its stored configuration.
    async fn construct(
        &self,
        connector_id: Uuid,
        config: &BTreeMap<String, ConfigValue>,
    ) -> Result<Arc<dyn Connector>, PluginSystemError>;
}

struct ConnectorSlot {
    refcount: AtomicU32,
    /// Guards construction/teardown; holds the live instance.
    instance: tokio::sync::Mutex<Option<Arc<dyn Connector>>>,
    always_on: bool,
}

/// Manages shared connector instances keyed by connector type id.
pub struct ConnectorManager {
    factories: HashMap<&'static str, Arc<dyn ConnectorFactory>>,
    slots: DashMap<String, Arc<ConnectorSlot>>,
    db: Arc<dyn Db>,
    bus: EventBus,
}

impl ConnectorManager {
    pub fn new(
        factories: Vec<Arc<dyn ConnectorFactory>>,
        db: Arc<dyn Db>,
        bus: EventBus,
    ) -> Self {
        let factories = factories
            .into_iter()
            .map(|f| (f.definition().id, f))
            .collect();
        Self {
            factories,
            slots: DashMap::new(),
            db,
            bus,
        }
    }

    /// Acquires the shared connector of the given type, constructing it on
    /// first use.
    ///
    /// Fails with [`PluginSystemError::MissingDependency`] naming the type
    /// id when no factory or no stored connector row exists for it.
    pub async fn acquire(
        &self,
        connector_type_id: &str,
    ) -> Result<Arc<dyn Connector>, PluginSystemError> {
        let factory = self
            .factories
            .get(connector_type_id)
            .cloned()
            .ok_or_else(|| PluginSystemError::MissingDependency(connector_type_id.to_string()))?;

        let slot = self
            .slots
            .entry(connector_type_id.to_string())
            .or_insert_with(|| {
                Arc::new(ConnectorSlot {
                    refcount: AtomicU32::new(0),
                    instance: tokio::sync::Mutex::new(None),
                    always_on: factory.definition().always_on,
                })
            })
            .clone();

        let mut instance = slot.instance.lock().await;
        let connector = match instance.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                let record = self
                    .db
                    .connectors()
                    .await?
                    .into_iter()
                    .find(|c| c.connector_type_id == connector_type_id)
                    .ok_or_else(|| {
                        PluginSystemError::MissingDependency(connector_type_id.to_string())
                    })?;
                info!("Constructing connector {} ({})", connector_type_id, record.id);
                let constructed = match factory.construct(record.id, &record.config).await {
                    Ok(constructed) => constructed,
                    Err(e) => {
                        self.report_down(record.id, connector_type_id, &e.to_string());
                        return Err(e);
                    }
                };
                *instance = Some(constructed.clone());
                constructed
            }
        };
        slot.refcount.fetch_add(1, Ordering::AcqRel);
        Ok(connector)
    }

    /// Releases one plugin binding; the last release tears the connector
    /// down unless it is `always_on`.
    pub async fn release(&self, connector_type_id: &str) {
        let Some(slot) = self.slots.get(connector_type_id).map(|s| s.clone()) else {
            return;
        };
        let previous = slot.refcount.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            // Unbalanced release; restore and complain.
            slot.refcount.fetch_add(1, Ordering::AcqRel);
            warn!("Unbalanced release of connector {connector_type_id}");
            return;
        }
        if previous == 1 && !slot.always_on {
            let mut instance = slot.instance.lock().await;
            // Re-check under the init mutex; a concurrent acquire wins.
            if slot.refcount.load(Ordering::Acquire) == 0 {
                if let Some(connector) = instance.take() {
                    info!("Disposing connector {connector_type_id} (refcount 0)");
                    connector.shutdown().await;
                }
            }
        }
    }

    /// Current refcount of a connector type; zero when never acquired.
    pub fn refcount(&self, connector_type_id: &str) -> u32 {
        self.slots
            .get(connector_type_id)
            .map(|s| s.refcount.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Announces a connector failure to every dependent via the bus.
    ///
    /// Dependents decide for themselves whether to degrade or shut down.
    pub fn report_down(&self, connector_id: Uuid, connector_type_id: &str, error: &str) {
        warn!("Connector {connector_type_id} down: {error}");
        self.bus.publish(
            None,
            EventPayload::ConnectorDown {
                connector_id,
                connector_type: connector_type_id.to_string(),
                error: error.to_string(),
            },
        );
    }

    /// Tears down every live connector, `always_on` included.
    pub async fn shutdown(&self) {
        for entry in self.slots.iter() {
            let slot = entry.value().clone();
            let mut instance = slot.instance.lock().await;
            if let Some(connector) = instance.take() {
                info!("Shutting down connector {}", entry.key());
                connector.shutdown().await;
            }
        }
    }
}

impl std::fmt::Debug for ConnectorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorManager")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("live", &self.slots.len())
            .finish()
    }
}
