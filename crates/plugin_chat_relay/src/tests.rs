//! Relay tests against a local TCP gateway.

use crate::bridge::{ChatBridgeFactory, CONNECTOR_TYPE_ID};
use crate::{ChatRelayPlugin, PLUGIN_TYPE_ID};
use aegis_types::{ConfigValue, InstanceId, ServerId};
use event_system::{ChatChannel, Event, EventBus, EventPayload, PlayerRef};
use persistence::MemoryDb;
use plugin_system::{ConnectorFactory, InstanceLogger, Plugin, PluginContext};
use rcon_manager::{RconManager, RconManagerConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;
use uuid::Uuid;

async fn gateway() -> (std::net::SocketAddr, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(stream).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send(line);
                }
            });
        }
    });
    (addr, rx)
}

async fn bridge_for(addr: std::net::SocketAddr) -> Arc<dyn plugin_system::Connector> {
    let mut config = BTreeMap::new();
    config.insert(
        "host".to_string(),
        ConfigValue::String(addr.ip().to_string()),
    );
    config.insert("port".to_string(), ConfigValue::Int(addr.port() as i64));
    ChatBridgeFactory
        .construct(Uuid::new_v4(), &config)
        .await
        .unwrap()
}

fn context(
    connector: Arc<dyn plugin_system::Connector>,
    config: BTreeMap<String, ConfigValue>,
) -> PluginContext {
    let bus = EventBus::new();
    let server_id = ServerId::new();
    let instance_id = InstanceId::new();
    let (log_tx, _log_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut connectors = HashMap::new();
    connectors.insert(CONNECTOR_TYPE_ID.to_string(), connector);
    PluginContext {
        server_id,
        instance_id,
        config,
        rcon: Arc::new(RconManager::new(RconManagerConfig::default())),
        bus: bus.clone(),
        db: Arc::new(MemoryDb::new()),
        connectors,
        log: InstanceLogger::new(server_id, instance_id, log_tx, bus),
    }
}

fn chat(channel: ChatChannel, name: &str, message: &str) -> Event {
    Event::new(
        None,
        EventPayload::ChatMessage {
            channel,
            player: PlayerRef::named(name),
            message: message.to_string(),
        },
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn relays_chat_lines_to_the_gateway() {
    let (addr, mut lines) = gateway().await;
    let connector = bridge_for(addr).await;

    let mut worker = ChatRelayPlugin
        .start(context(connector, BTreeMap::new()))
        .await
        .unwrap();

    worker
        .handle_event(&chat(ChatChannel::All, "Froggy", "hello there"))
        .await
        .unwrap();

    let line = tokio::time::timeout(Duration::from_secs(5), lines.recv())
        .await
        .expect("no line reached the gateway")
        .unwrap();
    assert_eq!(line, "[ALL] Froggy: hello there");
}

#[tokio::test(flavor = "multi_thread")]
async fn admin_only_mode_drops_public_chat() {
    let (addr, mut lines) = gateway().await;
    let connector = bridge_for(addr).await;

    let mut config = BTreeMap::new();
    config.insert(
        "channels".to_string(),
        ConfigValue::Enum("admin-only".to_string()),
    );
    let mut worker = ChatRelayPlugin
        .start(context(connector, config))
        .await
        .unwrap();

    worker
        .handle_event(&chat(ChatChannel::All, "Froggy", "public noise"))
        .await
        .unwrap();
    worker
        .handle_event(&chat(ChatChannel::Admin, "OpsAdmin", "admin note"))
        .await
        .unwrap();

    let line = tokio::time::timeout(Duration::from_secs(5), lines.recv())
        .await
        .expect("no line reached the gateway")
        .unwrap();
    assert_eq!(line, "[ADMIN] OpsAdmin: admin note");
}

#[test]
fn plugin_declares_its_bridge_dependency() {
    let definition = ChatRelayPlugin.definition();
    assert_eq!(definition.id, PLUGIN_TYPE_ID);
    assert_eq!(definition.required_connectors, &[CONNECTOR_TYPE_ID]);
}
