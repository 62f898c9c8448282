//! Ban service tests with a recording command runner.

use crate::service::{BanActor, BanService, CommandRunner};
use aegis_types::{BanListId, ServerId, SteamId};
use async_trait::async_trait;
use chrono::Utc;
use persistence::relational::Db;
use persistence::{BanListRecord, MemoryDb};
use rcon_manager::RconError;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Records every command; optionally fails for chosen servers.
#[derive(Default)]
struct RecordingRunner {
    commands: Mutex<Vec<(ServerId, String)>>,
    failing_servers: Mutex<Vec<ServerId>>,
}

impl RecordingRunner {
    async fn commands_for(&self, server_id: ServerId) -> Vec<String> {
        self.commands
            .lock()
            .await
            .iter()
            .filter(|(s, _)| *s == server_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    async fn fail_for(&self, server_id: ServerId) {
        self.failing_servers.lock().await.push(server_id);
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, server_id: ServerId, command: &str) -> Result<String, RconError> {
        if self.failing_servers.lock().await.contains(&server_id) {
            return Err(RconError::NotConnected(server_id));
        }
        self.commands
            .lock()
            .await
            .push((server_id, command.to_string()));
        Ok(String::new())
    }
}

fn actor() -> BanActor {
    BanActor {
        admin_id: Uuid::new_v4(),
        admin_name: "OpsAdmin".to_string(),
        admin_steam_id: Some(SteamId::new(76561198000000001)),
    }
}

fn target() -> SteamId {
    SteamId::new(76561198000000042)
}

struct Harness {
    service: BanService,
    db: Arc<MemoryDb>,
    runner: Arc<RecordingRunner>,
}

fn harness() -> Harness {
    let db = Arc::new(MemoryDb::new());
    let runner = Arc::new(RecordingRunner::default());
    Harness {
        service: BanService::new(db.clone(), runner.clone()),
        db,
        runner,
    }
}

async fn make_list(db: &MemoryDb) -> BanListId {
    let list = BanListRecord {
        id: BanListId::new(),
        name: "community".to_string(),
        created_at: Utc::now(),
    };
    db.insert_ban_list(&list).await.unwrap();
    list.id
}

#[tokio::test(flavor = "multi_thread")]
async fn local_ban_issues_ban_then_kick() {
    let h = harness();
    let server = ServerId::new();

    h.service
        .ban_player(server, target(), 7, "teamkilling", actor(), None)
        .await
        .unwrap();

    let commands = h.runner.commands_for(server).await;
    assert_eq!(
        commands,
        vec![
            format!("AdminBan {} 7d teamkilling", target()),
            format!("AdminKick {} teamkilling", target()),
        ]
    );

    // The row is persisted regardless of RCON outcome.
    let rows = h.db.bans_for_server(server).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].steam_id, target());
}

#[tokio::test(flavor = "multi_thread")]
async fn list_ban_fans_out_to_subscribers() {
    let h = harness();
    let origin = ServerId::new();
    let subscriber_a = ServerId::new();
    let subscriber_b = ServerId::new();
    let list = make_list(&h.db).await;
    h.db.subscribe_server_to_list(list, subscriber_a).await.unwrap();
    h.db.subscribe_server_to_list(list, subscriber_b).await.unwrap();

    h.service
        .ban_player(origin, target(), 0, "cheating", actor(), Some(list))
        .await
        .unwrap();

    for server in [origin, subscriber_a, subscriber_b] {
        let commands = h.runner.commands_for(server).await;
        assert!(
            commands.contains(&format!("AdminBan {} 0d cheating", target())),
            "server {server} missing AdminBan: {commands:?}"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn propagation_failure_does_not_abort_other_servers() {
    let h = harness();
    let origin = ServerId::new();
    let broken = ServerId::new();
    let healthy = ServerId::new();
    let list = make_list(&h.db).await;
    h.db.subscribe_server_to_list(list, broken).await.unwrap();
    h.db.subscribe_server_to_list(list, healthy).await.unwrap();
    h.runner.fail_for(broken).await;

    h.service
        .ban_player(origin, target(), 1, "afk", actor(), Some(list))
        .await
        .unwrap();

    assert!(h.runner.commands_for(broken).await.is_empty());
    assert!(!h.runner.commands_for(healthy).await.is_empty());
    // The database record exists either way.
    assert_eq!(h.db.bans_for_server(origin).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn late_subscription_replays_existing_bans() {
    let h = harness();
    let origin = ServerId::new();
    let list = make_list(&h.db).await;

    h.service
        .ban_player(origin, target(), 7, "spawn camping", actor(), Some(list))
        .await
        .unwrap();

    // Subscribe a new server after the ban exists.
    let late = ServerId::new();
    let replayed = h.service.subscribe_server(list, late).await.unwrap();
    assert_eq!(replayed, 1);
    let commands = h.runner.commands_for(late).await;
    assert!(commands.contains(&format!("AdminBan {} 7d spawn camping", target())));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_subscription_conflicts() {
    let h = harness();
    let list = make_list(&h.db).await;
    let server = ServerId::new();

    h.service.subscribe_server(list, server).await.unwrap();
    assert!(h.service.subscribe_server(list, server).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn unban_targets_a_single_server() {
    let h = harness();
    let server = ServerId::new();

    h.service.unban(server, target()).await.unwrap();
    assert_eq!(
        h.runner.commands_for(server).await,
        vec![format!("AdminUnban {}", target())]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn config_file_includes_subscribed_list_bans() {
    let h = harness();
    let origin = ServerId::new();
    let subscriber = ServerId::new();
    let list = make_list(&h.db).await;
    h.db.subscribe_server_to_list(list, subscriber).await.unwrap();

    h.service
        .ban_player(origin, target(), 0, "cheating", actor(), Some(list))
        .await
        .unwrap();

    let config = h.service.ban_config_for_server(subscriber).await.unwrap();
    assert!(config.contains(&format!("Banned:{}:0 //cheating", target())));
}
