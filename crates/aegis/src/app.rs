//! Process wiring and run loop.
//!
//! Builds the dependency record, connects the live-server plane and drives
//! it from startup through staged shutdown.

use crate::cli::CliArgs;
use crate::config::{AppConfig, ServerEntry};
use crate::ingest::{spawn_ingestor, wire_broadcasts, RconEventBridge};
use crate::logging::announce_startup;
use crate::signals::shutdown_requested;
use aegis_types::ServerId;
use ban_system::BanService;
use chrono::Utc;
use event_system::EventBus;
use feed_server::{FeedServer, FeedServerConfig};
use identity_resolver::IdentityResolver;
use persistence::relational::Db;
use persistence::{
    ColumnarStore, MemoryColumnarStore, MemoryDb, PgColumnarStore, PgDb, ServerRecord,
    StoreError,
};
use plugin_system::{ConnectorManager, PluginManager, PluginRegistry};
use rcon_manager::RconManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Everything the transport layer and internal tasks depend on.
///
/// Constructor-injected into each consumer; no global state.
#[derive(Clone)]
pub struct Dependencies {
    pub db: Arc<dyn Db>,
    pub columnar: Arc<dyn ColumnarStore>,
    pub rcon: Arc<RconManager>,
    pub bus: EventBus,
    pub plugins: Arc<PluginManager>,
    pub bans: Arc<BanService>,
    pub identity: Arc<IdentityResolver>,
}

/// The assembled control plane.
///
/// Owns the configuration and the dependency record from wiring until
/// shutdown; [`run`](Self::run) consumes it.
pub struct Application {
    config: AppConfig,
    deps: Dependencies,
}

impl Application {
    /// Wires the control plane from config and CLI overrides.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = AppConfig::load_from_file(&args.config).await?;
        info!("Config read from {}", args.config.display());

        if let Some(feeds_bind) = args.feeds_bind {
            config.feeds.bind_address = feeds_bind;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Bad configuration: {e}").into());
        }

        announce_startup();

        let (db, columnar) = build_stores(&config, args.in_memory).await?;

        let bus = EventBus::new();
        let rcon = Arc::new(RconManager::new(config.rcon_manager_config()));
        wire_broadcasts(&rcon, bus.clone());
        rcon.add_observer(Arc::new(RconEventBridge::new(bus.clone())));

        let registry = Arc::new(
            PluginRegistry::builder()
                .register(Arc::new(plugin_autokick::AutokickPlugin))
                .register(Arc::new(plugin_chat_relay::ChatRelayPlugin))
                .build(),
        );
        info!("🔌 Plugin registry bound with {} plugin types", registry.len());

        let connectors = Arc::new(ConnectorManager::new(
            vec![Arc::new(plugin_chat_relay::ChatBridgeFactory)],
            db.clone(),
            bus.clone(),
        ));
        let plugins = Arc::new(PluginManager::new(
            registry,
            connectors,
            db.clone(),
            columnar.clone(),
            rcon.clone(),
            bus.clone(),
        ));

        let bans = Arc::new(BanService::new(db.clone(), rcon.clone()));
        let identity = Arc::new(IdentityResolver::new(columnar.clone()));

        Ok(Self {
            config,
            deps: Dependencies {
                db,
                columnar,
                rcon,
                bus,
                plugins,
                bans,
                identity,
            },
        })
    }

    /// The wired dependency record, for transport-layer handler groups.
    pub fn dependencies(&self) -> &Dependencies {
        &self.deps
    }

    /// Runs the application until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Squad Aegis control plane");
        let deps = self.deps;
        let config = self.config;

        // Reconcile configured servers into the store, then dial them.
        let servers = sync_servers(&*deps.db, &config.servers).await?;
        for server in &servers {
            let (host, port) = server.rcon_address();
            match deps
                .rcon
                .connect(server.id, host, port, &server.rcon_password)
                .await
            {
                Ok(()) => info!("🔗 RCON up for '{}' ({})", server.name, server.id),
                Err(e) => warn!(
                    "RCON for '{}' not yet available: {e} (reconnect supervisor active)",
                    server.name
                ),
            }
        }

        // Plugin instances persisted from previous runs.
        deps.plugins.load_from_store().await?;

        // Columnar ingestor.
        let ingestor = spawn_ingestor(&deps.bus, deps.columnar.clone());

        // Live feeds.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let feed_server = FeedServer::new(
            deps.bus.clone(),
            FeedServerConfig {
                bind_address: config.feeds.bind_address.clone(),
                keepalive_interval: Duration::from_secs(30),
            },
        );
        let (feeds_addr, feeds_loop) = feed_server.bind(shutdown_rx.clone()).await?;
        let feeds_task = tokio::spawn(feeds_loop);
        info!("📡 Feeds available on ws://{feeds_addr}/feeds");

        // Periodic identity materialization.
        let identity_task = spawn_identity_rebuild(
            deps.identity.clone(),
            config.identity.rebuild_interval_secs,
        );

        // Health monitoring.
        let monitoring_task = spawn_monitoring(deps.bus.clone(), deps.plugins.clone());

        info!("✅ Squad Aegis is up; send SIGINT or SIGTERM to stop");

        let signal_name = shutdown_requested().await?;
        info!("🛑 {signal_name} received; beginning graceful shutdown");

        // A second signal skips the graceful path.
        tokio::spawn(async move {
            if shutdown_requested().await.is_ok() {
                warn!("Second termination signal; exiting without cleanup");
                std::process::exit(1);
            }
        });

        // Feeds and background pumps go first so nothing new enters the bus
        // while workers wind down.
        info!("Stopping feeds and monitors");
        let _ = shutdown_tx.send(true);
        monitoring_task.abort();
        if let Some(task) = identity_task {
            task.abort();
        }
        let _ = tokio::time::timeout(Duration::from_secs(3), feeds_task).await;

        // Plugin workers next; each gets its own grace period.
        info!("Stopping plugin workers");
        deps.plugins.shutdown().await;

        // Then the RCON pool, failing any pending waiters fast, and finally
        // the ingestor.
        info!("Closing RCON pool and ingestor");
        deps.rcon.shutdown();
        ingestor.abort();

        let stats = deps.bus.stats();
        info!(
            "Bus totals: {} events published, {} dropped on slow consumers",
            stats.events_published, stats.events_dropped
        );

        info!("✅ Squad Aegis shutdown complete");
        Ok(())
    }
}

/// Builds the store pair from configuration.
///
/// No database URL (or `--in-memory`) selects the in-memory backend, which
/// is also the read-path fallback the rest of the system degrades to.
async fn build_stores(
    config: &AppConfig,
    force_memory: bool,
) -> Result<(Arc<dyn Db>, Arc<dyn ColumnarStore>), Box<dyn std::error::Error>> {
    if force_memory || config.database.url.is_empty() {
        warn!("Running with in-memory stores; state is lost on exit");
        return Ok((
            Arc::new(MemoryDb::new()),
            Arc::new(MemoryColumnarStore::new()),
        ));
    }

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database.url)
        .await?;
    let db = PgDb::new(pool.clone());
    db.migrate().await?;

    let columnar_pool = if config.database.columnar_url.is_empty() {
        pool
    } else {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(16)
            .connect(&config.database.columnar_url)
            .await?
    };
    let columnar = PgColumnarStore::new(columnar_pool);
    columnar.migrate().await?;

    info!("🗄  Database stores connected and migrated");
    Ok((Arc::new(db), Arc::new(columnar)))
}

/// Upserts configured servers into the store and returns the full fleet.
async fn sync_servers(
    db: &dyn Db,
    entries: &[ServerEntry],
) -> Result<Vec<ServerRecord>, StoreError> {
    for entry in entries {
        let id = match &entry.id {
            Some(raw) => raw
                .parse::<ServerId>()
                .map_err(|e| StoreError::Validation(e.to_string()))?,
            None => ServerId::new(),
        };
        let record = ServerRecord {
            id,
            name: entry.name.clone(),
            host: entry.host.clone(),
            game_port: entry.game_port,
            rcon_host: entry.rcon_host.clone(),
            rcon_port: entry.rcon_port,
            rcon_password: entry.rcon_password.clone(),
            created_at: Utc::now(),
        };
        match db.insert_server(&record).await {
            Ok(()) => info!("Registered server '{}' as {}", record.name, record.id),
            Err(StoreError::Conflict(_)) => {
                db.update_server(&record).await?;
            }
            Err(e) => return Err(e),
        }
    }
    db.servers().await
}

/// Rebuilds the materialized identity tables on a fixed cadence.
fn spawn_identity_rebuild(
    identity: Arc<IdentityResolver>,
    interval_secs: u64,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            match identity.rebuild().await {
                Ok(count) => info!("🧮 Identity rebuild complete: {count} identities"),
                Err(e) => warn!("Identity rebuild failed: {e}"),
            }
        }
    }))
}

/// Periodic health report: bus throughput and plugin counts.
fn spawn_monitoring(bus: EventBus, plugins: Arc<PluginManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        let mut last_published = 0u64;
        loop {
            interval.tick().await;
            let stats = bus.stats();
            let events_this_period = stats.events_published - last_published;
            last_published = stats.events_published;
            info!(
                "health: {} events/min, {} subscribers, {} dropped, {} plugin workers",
                events_this_period,
                stats.subscribers,
                stats.events_dropped,
                plugins.running_count().await,
            );
        }
    })
}
