//! Connection pool: at most one authenticated connection per server.
//!
//! Each server gets a supervisor task owning the connect/keepalive/reconnect
//! cycle. Command failures surface to the caller; connection failures are
//! retried with exponential backoff until a permanent disconnect.

use crate::connection::{BroadcastFn, RconConnection};
use crate::error::RconError;
use aegis_types::ServerId;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Cheap no-op command used as the keepalive probe.
const KEEPALIVE_COMMAND: &str = "ShowCurrentMap";

/// Consecutive connect failures before the pool reports a server degraded.
const DEGRADED_THRESHOLD: u32 = 3;

/// Tuning knobs for the pool.
#[derive(Debug, Clone)]
pub struct RconManagerConfig {
    /// Deadline for a single `execute` round trip
    pub execute_timeout: Duration,
    /// Deadline for the authentication handshake
    pub auth_timeout: Duration,
    /// Cadence of the keepalive probe
    pub keepalive_interval: Duration,
    /// Deadline for the keepalive response before the connection is declared dead
    pub keepalive_timeout: Duration,
    /// First reconnect delay
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling
    pub backoff_cap: Duration,
}

impl Default for RconManagerConfig {
    fn default() -> Self {
        Self {
            execute_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// Lifecycle state of one server's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authed,
    Degraded,
}

/// Point-in-time health snapshot for one server.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Instant of the last successful keepalive, if currently connected
    pub last_keepalive: Option<Instant>,
    pub consecutive_failures: u32,
}

/// Callbacks for connection lifecycle transitions.
///
/// The application wires these into the event bus; the pool itself has no
/// bus dependency.
pub trait ConnectionObserver: Send + Sync {
    /// A connection authenticated (first connect or reconnect).
    fn on_connected(&self, server_id: ServerId);
    /// Three consecutive connect attempts failed.
    fn on_degraded(&self, server_id: ServerId, consecutive_failures: u32);
    /// A non-retryable failure; the supervisor for this server has stopped.
    fn on_fatal(&self, server_id: ServerId, error: &RconError);
}

/// Raw broadcast-text handler.
pub type BroadcastHandler = Arc<dyn Fn(ServerId, &str) + Send + Sync>;

struct Credentials {
    host: String,
    port: u16,
    password: String,
}

struct ServerSlot {
    server_id: ServerId,
    credentials: Mutex<Credentials>,
    connection: Mutex<Option<Arc<RconConnection>>>,
    state: Mutex<ConnectionState>,
    permanent: AtomicBool,
    consecutive_failures: AtomicU32,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ServerSlot {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn live_connection(&self) -> Option<Arc<RconConnection>> {
        self.connection
            .lock()
            .as_ref()
            .filter(|c| !c.is_closed())
            .cloned()
    }
}

struct ManagerShared {
    handlers: RwLock<Vec<BroadcastHandler>>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
    config: RconManagerConfig,
}

impl ManagerShared {
    fn broadcast_fn(self: &Arc<Self>) -> BroadcastFn {
        let shared = self.clone();
        Arc::new(move |server, text: String| {
            for handler in shared.handlers.read().iter() {
                handler(server, &text);
            }
        })
    }

    fn notify_connected(&self, server_id: ServerId) {
        for observer in self.observers.read().iter() {
            observer.on_connected(server_id);
        }
    }

    fn notify_degraded(&self, server_id: ServerId, failures: u32) {
        for observer in self.observers.read().iter() {
            observer.on_degraded(server_id, failures);
        }
    }

    fn notify_fatal(&self, server_id: ServerId, error: &RconError) {
        for observer in self.observers.read().iter() {
            observer.on_fatal(server_id, error);
        }
    }
}

/// Multiplexed, self-healing RCON connection pool.
pub struct RconManager {
    slots: DashMap<ServerId, Arc<ServerSlot>>,
    shared: Arc<ManagerShared>,
}

impl RconManager {
    /// Creates a pool with the given tuning.
    pub fn new(config: RconManagerConfig) -> Self {
        Self {
            slots: DashMap::new(),
            shared: Arc::new(ManagerShared {
                handlers: RwLock::new(Vec::new()),
                observers: RwLock::new(Vec::new()),
                config,
            }),
        }
    }

    /// Registers a handler for every asynchronously pushed broadcast frame.
    pub fn on_broadcast<F>(&self, handler: F)
    where
        F: Fn(ServerId, &str) + Send + Sync + 'static,
    {
        self.shared.handlers.write().push(Arc::new(handler));
    }

    /// Registers a connection lifecycle observer.
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.shared.observers.write().push(observer);
    }

    /// Connects to a server's RCON endpoint.
    ///
    /// Idempotent: when a healthy connection already exists this is a no-op.
    /// Otherwise the credentials are stored and a supervisor (re)establishes
    /// the connection; the call returns with the outcome of the first
    /// attempt. After a transient first-attempt failure the supervisor keeps
    /// retrying in the background.
    pub async fn connect(
        &self,
        server_id: ServerId,
        host: &str,
        port: u16,
        password: &str,
    ) -> Result<(), RconError> {
        if let Some(slot) = self.slots.get(&server_id) {
            if *slot.state.lock() == ConnectionState::Authed && slot.live_connection().is_some() {
                return Ok(());
            }
        }

        let slot = self
            .slots
            .entry(server_id)
            .or_insert_with(|| {
                Arc::new(ServerSlot {
                    server_id,
                    credentials: Mutex::new(Credentials {
                        host: host.to_string(),
                        port,
                        password: password.to_string(),
                    }),
                    connection: Mutex::new(None),
                    state: Mutex::new(ConnectionState::Disconnected),
                    permanent: AtomicBool::new(false),
                    consecutive_failures: AtomicU32::new(0),
                    supervisor: Mutex::new(None),
                })
            })
            .clone();

        *slot.credentials.lock() = Credentials {
            host: host.to_string(),
            port,
            password: password.to_string(),
        };
        slot.permanent.store(false, Ordering::Release);

        // Replace any prior supervisor outright; its connection dies with it.
        if let Some(old) = slot.supervisor.lock().take() {
            old.abort();
        }
        if let Some(old_conn) = slot.connection.lock().take() {
            old_conn.close();
        }

        let (first_tx, first_rx) = oneshot::channel();
        let handle = tokio::spawn(supervise(slot.clone(), self.shared.clone(), first_tx));
        *slot.supervisor.lock() = Some(handle);

        first_rx.await.unwrap_or(Err(RconError::Disconnected))
    }

    /// Tears down the server's connection and cancels pending waiters.
    ///
    /// With `permanent` the supervisor stops and no reconnect is attempted
    /// until the next explicit [`connect`](Self::connect).
    pub fn disconnect(&self, server_id: ServerId, permanent: bool) -> Result<(), RconError> {
        let slot = self
            .slots
            .get(&server_id)
            .map(|s| s.clone())
            .ok_or(RconError::NotConnected(server_id))?;

        if permanent {
            slot.permanent.store(true, Ordering::Release);
            if let Some(handle) = slot.supervisor.lock().take() {
                handle.abort();
            }
            slot.set_state(ConnectionState::Disconnected);
        }
        if let Some(conn) = slot.connection.lock().take() {
            conn.close();
        }
        info!(
            "RCON disconnect for {} (permanent: {})",
            server_id, permanent
        );
        Ok(())
    }

    /// Executes a command against a connected server.
    pub async fn execute(&self, server_id: ServerId, command: &str) -> Result<String, RconError> {
        self.execute_with_timeout(server_id, command, self.shared.config.execute_timeout)
            .await
    }

    /// Executes a command with an explicit deadline.
    pub async fn execute_with_timeout(
        &self,
        server_id: ServerId,
        command: &str,
        timeout: Duration,
    ) -> Result<String, RconError> {
        let connection = self
            .slots
            .get(&server_id)
            .and_then(|slot| slot.live_connection())
            .ok_or(RconError::NotConnected(server_id))?;
        connection.execute(command, timeout).await
    }

    /// Health snapshot for one server, if it is known to the pool.
    pub fn status(&self, server_id: ServerId) -> Option<ConnectionStatus> {
        self.slots.get(&server_id).map(|slot| ConnectionStatus {
            state: *slot.state.lock(),
            last_keepalive: slot.live_connection().map(|c| c.last_keepalive()),
            consecutive_failures: slot.consecutive_failures.load(Ordering::Relaxed),
        })
    }

    /// Servers currently tracked by the pool.
    pub fn server_ids(&self) -> Vec<ServerId> {
        self.slots.iter().map(|entry| *entry.key()).collect()
    }

    /// Permanently disconnects every server; used during shutdown.
    pub fn shutdown(&self) {
        for server_id in self.server_ids() {
            let _ = self.disconnect(server_id, true);
        }
    }
}

impl std::fmt::Debug for RconManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconManager")
            .field("servers", &self.slots.len())
            .finish()
    }
}

/// Applies ±20 % jitter to a reconnect delay.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    delay.mul_f64(factor)
}

/// Per-server connect / keepalive / reconnect cycle.
async fn supervise(
    slot: Arc<ServerSlot>,
    shared: Arc<ManagerShared>,
    first_tx: oneshot::Sender<Result<(), RconError>>,
) {
    let config = shared.config.clone();
    let mut backoff = config.backoff_initial;
    let mut first_tx = Some(first_tx);

    loop {
        if slot.permanent.load(Ordering::Acquire) {
            slot.set_state(ConnectionState::Disconnected);
            return;
        }

        slot.set_state(ConnectionState::Connecting);
        let (host, port, password) = {
            let creds = slot.credentials.lock();
            (creds.host.clone(), creds.port, creds.password.clone())
        };

        let attempt = RconConnection::connect(
            slot.server_id,
            &host,
            port,
            &password,
            config.auth_timeout,
            shared.broadcast_fn(),
        )
        .await;

        match attempt {
            Ok(connection) => {
                let connection = Arc::new(connection);
                *slot.connection.lock() = Some(connection.clone());
                slot.set_state(ConnectionState::Authed);
                slot.consecutive_failures.store(0, Ordering::Relaxed);
                backoff = config.backoff_initial;
                info!("RCON authenticated to {} ({}:{})", slot.server_id, host, port);
                if let Some(tx) = first_tx.take() {
                    let _ = tx.send(Ok(()));
                }
                shared.notify_connected(slot.server_id);

                run_keepalive(&slot, &connection, &config).await;

                slot.connection.lock().take();
                if slot.permanent.load(Ordering::Acquire) {
                    slot.set_state(ConnectionState::Disconnected);
                    return;
                }
                slot.set_state(ConnectionState::Degraded);
                warn!("RCON connection to {} lost, scheduling reconnect", slot.server_id);
            }
            Err(e) if !e.is_transient() => {
                slot.set_state(ConnectionState::Disconnected);
                error!("RCON fatal failure for {}: {}", slot.server_id, e);
                shared.notify_fatal(slot.server_id, &e);
                if let Some(tx) = first_tx.take() {
                    let _ = tx.send(Err(e));
                }
                return;
            }
            Err(e) => {
                let failures = slot.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                slot.set_state(ConnectionState::Degraded);
                warn!(
                    "RCON connect attempt {} for {} failed: {}",
                    failures, slot.server_id, e
                );
                if failures == DEGRADED_THRESHOLD {
                    shared.notify_degraded(slot.server_id, failures);
                }
                if let Some(tx) = first_tx.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }

        tokio::time::sleep(jittered(backoff)).await;
        backoff = (backoff * 2).min(config.backoff_cap);
    }
}

/// Probes the connection on a fixed cadence until it dies.
async fn run_keepalive(
    slot: &Arc<ServerSlot>,
    connection: &Arc<RconConnection>,
    config: &RconManagerConfig,
) {
    let mut interval = tokio::time::interval(config.keepalive_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = connection.wait_closed() => return,
            _ = interval.tick() => {
                match connection
                    .execute(KEEPALIVE_COMMAND, config.keepalive_timeout)
                    .await
                {
                    Ok(_) => connection.touch_keepalive(),
                    Err(e) => {
                        warn!(
                            "RCON keepalive for {} failed: {}",
                            slot.server_id, e
                        );
                        connection.close();
                        return;
                    }
                }
            }
        }
    }
}
