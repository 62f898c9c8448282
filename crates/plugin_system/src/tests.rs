//! Lifecycle tests with an in-memory store and stub plugins.

use crate::connector::{ConnectorDefinition, ConnectorFactory, ConnectorManager};
use crate::definition::{
    ConfigField, Connector, Plugin, PluginContext, PluginDefinition, PluginWorker,
};
use crate::error::PluginSystemError;
use crate::manager::{InstanceState, PluginManager};
use crate::registry::PluginRegistry;
use aegis_types::{ConfigFieldType, ConfigValue, ServerId};
use async_trait::async_trait;
use chrono::Utc;
use event_system::{Event, EventBus, EventFilter, EventPayload, EventType, PlayerRef};
use persistence::relational::Db;
use persistence::{ConnectorRecord, MemoryColumnarStore, MemoryDb};
use rcon_manager::{RconManager, RconManagerConfig};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const PLUGIN_ID: &str = "test_plugin";
const CONNECTOR_ID: &str = "discord";

/// Shared probe recording what the plugin observed.
#[derive(Default)]
struct Probe {
    started_configs: Mutex<Vec<BTreeMap<String, ConfigValue>>>,
    events_seen: AtomicU32,
    shutdowns: AtomicU32,
    panic_on_event: AtomicBool,
}

struct TestPlugin {
    probe: Arc<Probe>,
    allow_multiple: bool,
    required_connectors: &'static [&'static str],
}

#[async_trait]
impl Plugin for TestPlugin {
    fn definition(&self) -> PluginDefinition {
        PluginDefinition {
            id: PLUGIN_ID,
            name: "Test Plugin",
            description: "records lifecycle observations",
            allow_multiple_instances: self.allow_multiple,
            config_schema: vec![
                ConfigField::new("threshold", ConfigFieldType::Int, true),
                ConfigField::new("message", ConfigFieldType::String, false)
                    .with_default(ConfigValue::String("default".to_string())),
            ],
            required_connectors: self.required_connectors,
            event_filter: EventFilter::types([EventType::ChatMessage]),
        }
    }

    async fn start(
        &self,
        ctx: PluginContext,
    ) -> Result<Box<dyn PluginWorker>, PluginSystemError> {
        self.probe
            .started_configs
            .lock()
            .await
            .push(ctx.config.clone());
        Ok(Box::new(TestWorker {
            probe: self.probe.clone(),
        }))
    }
}

struct TestWorker {
    probe: Arc<Probe>,
}

#[async_trait]
impl PluginWorker for TestWorker {
    async fn handle_event(&mut self, _event: &Event) -> Result<(), PluginSystemError> {
        if self.probe.panic_on_event.load(Ordering::Acquire) {
            panic!("worker exploded on purpose");
        }
        self.probe.events_seen.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.probe.shutdowns.fetch_add(1, Ordering::AcqRel);
    }
}

struct TestConnector {
    shut_down: Arc<AtomicBool>,
}

#[async_trait]
impl Connector for TestConnector {
    fn type_id(&self) -> &str {
        CONNECTOR_ID
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct TestConnectorFactory {
    constructed: Arc<AtomicU32>,
    shut_down: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectorFactory for TestConnectorFactory {
    fn definition(&self) -> ConnectorDefinition {
        ConnectorDefinition {
            id: CONNECTOR_ID,
            name: "Discord",
            always_on: false,
            config_schema: vec![],
        }
    }

    async fn construct(
        &self,
        _connector_id: Uuid,
        _config: &BTreeMap<String, ConfigValue>,
    ) -> Result<Arc<dyn Connector>, PluginSystemError> {
        self.constructed.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(TestConnector {
            shut_down: self.shut_down.clone(),
        }))
    }
}

struct Harness {
    manager: PluginManager,
    connectors: Arc<ConnectorManager>,
    bus: EventBus,
    db: Arc<MemoryDb>,
    probe: Arc<Probe>,
    server_id: ServerId,
}

async fn harness(
    allow_multiple: bool,
    required_connectors: &'static [&'static str],
    seed_connector_row: bool,
) -> Harness {
    let probe = Arc::new(Probe::default());
    let db = Arc::new(MemoryDb::new());
    let columnar = Arc::new(MemoryColumnarStore::new());
    let bus = EventBus::new();
    let rcon = Arc::new(RconManager::new(RconManagerConfig::default()));

    if seed_connector_row {
        db.insert_connector(&ConnectorRecord {
            id: Uuid::new_v4(),
            connector_type_id: CONNECTOR_ID.to_string(),
            config: BTreeMap::new(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    let registry = Arc::new(
        PluginRegistry::builder()
            .register(Arc::new(TestPlugin {
                probe: probe.clone(),
                allow_multiple,
                required_connectors,
            }))
            .build(),
    );
    let connectors = Arc::new(ConnectorManager::new(
        vec![Arc::new(TestConnectorFactory {
            constructed: Arc::new(AtomicU32::new(0)),
            shut_down: Arc::new(AtomicBool::new(false)),
        })],
        db.clone(),
        bus.clone(),
    ));

    let manager = PluginManager::with_shutdown_grace(
        registry,
        connectors.clone(),
        db.clone(),
        columnar,
        rcon,
        bus.clone(),
        Duration::from_secs(2),
    );

    Harness {
        manager,
        connectors,
        bus,
        db,
        probe,
        server_id: ServerId::new(),
    }
}

fn threshold_config(threshold: i64) -> BTreeMap<String, ConfigValue> {
    let mut config = BTreeMap::new();
    config.insert("threshold".to_string(), ConfigValue::Int(threshold));
    config
}

fn chat_event() -> EventPayload {
    EventPayload::ChatMessage {
        channel: event_system::ChatChannel::All,
        player: PlayerRef::named("tester"),
        message: "hello".to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn full_lifecycle_returns_connector_refcounts() {
    let h = harness(true, &[CONNECTOR_ID], true).await;

    assert_eq!(h.connectors.refcount(CONNECTOR_ID), 0);
    let outcome = h
        .manager
        .create(h.server_id, PLUGIN_ID, threshold_config(3), true)
        .await
        .unwrap();
    assert!(outcome.warning.is_none());
    assert_eq!(h.connectors.refcount(CONNECTOR_ID), 1);
    assert_eq!(
        h.manager.instance_state(outcome.instance_id).await,
        Some(InstanceState::Enabled)
    );

    h.manager.disable(outcome.instance_id).await.unwrap();
    assert_eq!(h.connectors.refcount(CONNECTOR_ID), 0);
    assert_eq!(h.probe.shutdowns.load(Ordering::Acquire), 1);

    h.manager.delete(outcome.instance_id).await.unwrap();
    assert_eq!(h.connectors.refcount(CONNECTOR_ID), 0);
    assert!(h.manager.instance_state(outcome.instance_id).await.is_none());
    assert!(h.db.extensions().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn enable_failure_persists_disabled_row_with_warning() {
    // No connector row exists, so dependency resolution must fail.
    let h = harness(true, &[CONNECTOR_ID], false).await;

    let outcome = h
        .manager
        .create(h.server_id, PLUGIN_ID, threshold_config(3), true)
        .await
        .unwrap();

    let warning = outcome.warning.expect("enable failure must surface a warning");
    assert!(warning.contains(CONNECTOR_ID), "warning was: {warning}");

    // The row persists, flipped to disabled; creation is never rolled back.
    let rows = h.db.extensions().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].enabled);
    assert_eq!(
        h.manager.instance_state(outcome.instance_id).await,
        Some(InstanceState::Failed)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn single_instance_plugins_reject_duplicates_until_delete() {
    let h = harness(false, &[], false).await;

    let first = h
        .manager
        .create(h.server_id, PLUGIN_ID, threshold_config(1), false)
        .await
        .unwrap();

    let duplicate = h
        .manager
        .create(h.server_id, PLUGIN_ID, threshold_config(2), false)
        .await;
    assert!(matches!(
        duplicate,
        Err(PluginSystemError::DuplicateInstance { .. })
    ));

    h.manager.delete(first.instance_id).await.unwrap();
    assert!(h
        .manager
        .create(h.server_id, PLUGIN_ID, threshold_config(2), false)
        .await
        .is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn reload_commits_config_before_restart() {
    let h = harness(true, &[], false).await;

    let outcome = h
        .manager
        .create(h.server_id, PLUGIN_ID, threshold_config(1), true)
        .await
        .unwrap();
    assert!(outcome.warning.is_none());

    h.manager
        .reload(outcome.instance_id, threshold_config(9))
        .await
        .unwrap();

    // The restarted worker's first observation reflects the new value.
    let configs = h.probe.started_configs.lock().await;
    assert_eq!(configs.len(), 2);
    assert_eq!(configs[1].get("threshold"), Some(&ConfigValue::Int(9)));
    // And the stored row matches what the worker saw.
    drop(configs);
    let row = h.db.extension(outcome.instance_id).await.unwrap();
    assert_eq!(row.config.get("threshold"), Some(&ConfigValue::Int(9)));
    assert!(row.enabled);
}

#[tokio::test(flavor = "multi_thread")]
async fn workers_receive_filtered_events() {
    let h = harness(true, &[], false).await;
    h.manager
        .create(h.server_id, PLUGIN_ID, threshold_config(1), true)
        .await
        .unwrap();

    h.bus.publish(Some(h.server_id), chat_event());
    h.bus
        .publish(Some(h.server_id), EventPayload::TickRate { tick_rate: 30.0 });

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.probe.events_seen.load(Ordering::Acquire) < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker never saw the chat event");
    // The tick-rate event is outside the declared filter.
    assert_eq!(h.probe.events_seen.load(Ordering::Acquire), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_panic_flips_instance_to_failed_without_touching_peers() {
    let h = harness(true, &[], false).await;

    let victim = h
        .manager
        .create(h.server_id, PLUGIN_ID, threshold_config(1), true)
        .await
        .unwrap();
    let peer_server = ServerId::new();
    let peer = h
        .manager
        .create(peer_server, PLUGIN_ID, threshold_config(1), true)
        .await
        .unwrap();

    let mut log_events = h.bus.subscribe(
        EventFilter::types([EventType::PluginLog]),
        None,
        16,
    );

    h.probe.panic_on_event.store(true, Ordering::Release);
    h.bus.publish(Some(h.server_id), chat_event());

    // The panic surfaces as an error-severity plugin-log event.
    let logged = tokio::time::timeout(Duration::from_secs(2), log_events.recv())
        .await
        .expect("no plugin-log event after panic")
        .unwrap();
    match &logged.payload {
        EventPayload::PluginLog { level, message, .. } => {
            assert_eq!(*level, event_system::LogLevel::Error);
            assert!(message.contains("panicked"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if h.manager.instance_state(victim.instance_id).await
                == Some(InstanceState::Failed)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("instance never entered failed state");

    // The enabled flag is flipped off in storage.
    let row = h.db.extension(victim.instance_id).await.unwrap();
    assert!(!row.enabled);

    // The peer keeps running.
    assert_eq!(
        h.manager.instance_state(peer.instance_id).await,
        Some(InstanceState::Enabled)
    );
    h.probe.panic_on_event.store(false, Ordering::Release);
    h.bus.publish(Some(peer_server), chat_event());
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.probe.events_seen.load(Ordering::Acquire) < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer worker stopped processing events");
}

#[tokio::test(flavor = "multi_thread")]
async fn enable_is_idempotent() {
    let h = harness(true, &[CONNECTOR_ID], true).await;
    let outcome = h
        .manager
        .create(h.server_id, PLUGIN_ID, threshold_config(1), true)
        .await
        .unwrap();

    h.manager.enable(outcome.instance_id).await.unwrap();
    h.manager.enable(outcome.instance_id).await.unwrap();

    // No double-acquire, no second worker start.
    assert_eq!(h.connectors.refcount(CONNECTOR_ID), 1);
    assert_eq!(h.probe.started_configs.lock().await.len(), 1);
    assert_eq!(h.manager.running_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn load_from_store_enables_persisted_instances() {
    let h = harness(true, &[], false).await;

    // Simulate a row left behind by a previous process run.
    let record = persistence::ExtensionRecord {
        id: aegis_types::InstanceId::new(),
        server_id: h.server_id,
        plugin_type_id: PLUGIN_ID.to_string(),
        enabled: true,
        config: threshold_config(5),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    h.db.insert_extension(&record).await.unwrap();

    h.manager.load_from_store().await.unwrap();
    assert_eq!(
        h.manager.instance_state(record.id).await,
        Some(InstanceState::Enabled)
    );
    let configs = h.probe.started_configs.lock().await;
    assert_eq!(configs[0].get("threshold"), Some(&ConfigValue::Int(5)));
}
