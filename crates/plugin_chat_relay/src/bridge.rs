//! Chat bridge connector: a line-oriented TCP session to an external chat
//! gateway.
//!
//! The connector owns one background writer task holding the TCP session,
//! reconnecting with a flat delay on failure. Messages queue on an
//! unbounded channel, so the session surviving across plugin restarts (the
//! point of sharing connectors) never loses its login state to a reload.

use aegis_types::{ConfigFieldType, ConfigValue};
use async_trait::async_trait;
use plugin_system::{
    ConfigField, Connector, ConnectorDefinition, ConnectorFactory, PluginSystemError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connector type id persisted in `connectors.connector_type_id`.
pub const CONNECTOR_TYPE_ID: &str = "chat_bridge";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Live chat-bridge session handle.
pub struct ChatBridgeConnector {
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
}

impl ChatBridgeConnector {
    /// Queues one line for delivery to the gateway.
    pub fn send_line(&self, line: impl Into<String>) {
        if self.tx.send(line.into()).is_err() {
            warn!("Chat bridge writer task is gone; dropping line");
        }
    }
}

#[async_trait]
impl Connector for ChatBridgeConnector {
    fn type_id(&self) -> &str {
        CONNECTOR_TYPE_ID
    }

    async fn shutdown(&self) {
        self.writer.abort();
        info!("Chat bridge session closed");
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Writer task: dial, drain the queue, redial on failure.
async fn run_writer(address: String, mut rx: mpsc::UnboundedReceiver<String>) {
    let mut pending: Option<String> = None;
    loop {
        let mut stream = match TcpStream::connect(&address).await {
            Ok(stream) => {
                debug!("Chat bridge connected to {address}");
                stream
            }
            Err(e) => {
                warn!("Chat bridge dial to {address} failed: {e}");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        loop {
            let line = match pending.take() {
                Some(line) => line,
                None => match rx.recv().await {
                    Some(line) => line,
                    None => return,
                },
            };
            let framed = format!("{line}\n");
            if let Err(e) = stream.write_all(framed.as_bytes()).await {
                warn!("Chat bridge write failed: {e}; reconnecting");
                pending = Some(line);
                break;
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Factory constructing chat-bridge sessions from stored config.
#[derive(Debug, Default)]
pub struct ChatBridgeFactory;

#[async_trait]
impl ConnectorFactory for ChatBridgeFactory {
    fn definition(&self) -> ConnectorDefinition {
        ConnectorDefinition {
            id: CONNECTOR_TYPE_ID,
            name: "Chat Bridge",
            always_on: true,
            config_schema: vec![
                ConfigField::new("host", ConfigFieldType::String, true),
                ConfigField::new("port", ConfigFieldType::Int, true),
            ],
        }
    }

    async fn construct(
        &self,
        connector_id: Uuid,
        config: &BTreeMap<String, ConfigValue>,
    ) -> Result<Arc<dyn Connector>, PluginSystemError> {
        let host = config
            .get("host")
            .and_then(ConfigValue::as_str)
            .ok_or_else(|| {
                PluginSystemError::ConnectorFailed("chat_bridge config missing host".to_string())
            })?;
        let port = config
            .get("port")
            .and_then(ConfigValue::as_int)
            .filter(|p| (1..=65535).contains(p))
            .ok_or_else(|| {
                PluginSystemError::ConnectorFailed("chat_bridge config missing port".to_string())
            })?;

        let address = format!("{host}:{port}");
        info!("Starting chat bridge {connector_id} to {address}");
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(address, rx));
        Ok(Arc::new(ChatBridgeConnector { tx, writer }))
    }
}
