//! Per-instance log pipeline.
//!
//! A worker's `log.info/warn/error` calls land on a channel tailed by one
//! background flusher that batches writes to the columnar store. Each call
//! also publishes a `plugin-log` bus event so feeds and operators see log
//! lines live.

use aegis_types::{InstanceId, ServerId};
use chrono::Utc;
use event_system::{EventBus, EventPayload, LogLevel};
use persistence::{ColumnarStore, PluginLogRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Flush when this many records have accumulated.
const FLUSH_BATCH: usize = 64;
/// Or when this much time has passed since the last flush.
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Handle plugins use to emit structured log records.
#[derive(Clone)]
pub struct InstanceLogger {
    server_id: ServerId,
    instance_id: InstanceId,
    tx: mpsc::UnboundedSender<PluginLogRecord>,
    bus: EventBus,
}

impl InstanceLogger {
    pub fn new(
        server_id: ServerId,
        instance_id: InstanceId,
        tx: mpsc::UnboundedSender<PluginLogRecord>,
        bus: EventBus,
    ) -> Self {
        Self {
            server_id,
            instance_id,
            tx,
            bus,
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into(), serde_json::json!({}));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into(), serde_json::json!({}));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into(), serde_json::json!({}));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into(), serde_json::json!({}));
    }

    /// Emits a record with structured fields attached.
    pub fn log(&self, level: LogLevel, message: String, fields: serde_json::Value) {
        let record = PluginLogRecord {
            server_id: self.server_id,
            instance_id: self.instance_id,
            ts: Utc::now(),
            level: level.to_string(),
            message: message.clone(),
            fields,
        };
        if self.tx.send(record).is_err() {
            debug!("Plugin log flusher gone; dropping record from {}", self.instance_id);
        }
        self.bus.publish(
            Some(self.server_id),
            EventPayload::PluginLog {
                instance_id: self.instance_id,
                level,
                message,
            },
        );
    }
}

impl std::fmt::Debug for InstanceLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLogger")
            .field("server_id", &self.server_id)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

/// Spawns the background flusher; returns the record sender and its task.
///
/// The task drains the channel, writing batches of [`FLUSH_BATCH`] records
/// or whatever accumulated over [`FLUSH_INTERVAL`]. A store failure drops
/// the batch with a warning; log persistence is best-effort.
pub fn spawn_log_flusher(
    store: Arc<dyn ColumnarStore>,
) -> (mpsc::UnboundedSender<PluginLogRecord>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PluginLogRecord>();

    let task = tokio::spawn(async move {
        let mut buffer: Vec<PluginLogRecord> = Vec::with_capacity(FLUSH_BATCH);
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                record = rx.recv() => {
                    match record {
                        Some(record) => {
                            buffer.push(record);
                            if buffer.len() >= FLUSH_BATCH {
                                flush(&store, &mut buffer).await;
                            }
                        }
                        None => {
                            // All loggers dropped: final flush, then stop.
                            flush(&store, &mut buffer).await;
                            return;
                        }
                    }
                }
                _ = interval.tick() => {
                    flush(&store, &mut buffer).await;
                }
            }
        }
    });

    (tx, task)
}

async fn flush(store: &Arc<dyn ColumnarStore>, buffer: &mut Vec<PluginLogRecord>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    if let Err(e) = store.insert_plugin_logs(&batch).await {
        warn!("Failed to flush {} plugin log records: {}", batch.len(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::{LogQuery, MemoryColumnarStore};

    #[tokio::test(flavor = "multi_thread")]
    async fn records_reach_the_store_and_the_bus() {
        let store = Arc::new(MemoryColumnarStore::new());
        let (tx, task) = spawn_log_flusher(store.clone());

        let bus = EventBus::new();
        let mut sub = bus.subscribe(
            event_system::EventFilter::types([event_system::EventType::PluginLog]),
            None,
            16,
        );

        let server_id = ServerId::new();
        let instance_id = InstanceId::new();
        let logger = InstanceLogger::new(server_id, instance_id, tx, bus);
        logger.warn("threshold reached");

        // Live event first.
        let event = sub.recv().await.unwrap();
        assert!(matches!(
            &event.payload,
            EventPayload::PluginLog { level: LogLevel::Warn, .. }
        ));

        // Then the batched write lands.
        drop(logger);
        task.await.unwrap();
        let logs = store
            .plugin_logs(&LogQuery {
                instance_id: Some(instance_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "threshold reached");
        assert_eq!(logs[0].level, "warn");
    }
}
