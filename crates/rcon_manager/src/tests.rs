//! Pool tests against an in-process mock RCON server.

use crate::manager::{RconManager, RconManagerConfig};
use crate::protocol::{read_frame, write_frame, FrameType, RconFrame, BROADCAST_REQUEST_ID};
use crate::RconError;
use aegis_types::ServerId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const PASSWORD: &str = "hunter2";

/// Frames the mock sends in reply to one command.
type CommandScript = Arc<dyn Fn(&str) -> MockReply + Send + Sync>;

enum MockReply {
    /// Body fragments, terminated by the sentinel echo
    Fragments(Vec<String>),
    /// Drop the connection without answering
    Hangup,
}

struct MockRcon {
    pub addr: std::net::SocketAddr,
    pub accepted: Arc<AtomicU32>,
    /// Sends a broadcast line over every live connection
    pub broadcast_tx: mpsc::UnboundedSender<String>,
}

impl MockRcon {
    async fn start(script: CommandScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicU32::new(0));
        let (broadcast_tx, mut broadcast_rx) = mpsc::unbounded_channel::<String>();
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<mpsc::UnboundedSender<String>>();

        // Fan broadcasts out to every live connection task.
        tokio::spawn(async move {
            let mut sinks: Vec<mpsc::UnboundedSender<String>> = Vec::new();
            loop {
                tokio::select! {
                    Some(sink) = conn_rx.recv() => sinks.push(sink),
                    Some(line) = broadcast_rx.recv() => {
                        sinks.retain(|s| s.send(line.clone()).is_ok());
                    }
                    else => break,
                }
            }
        });

        let accepted_clone = accepted.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepted_clone.fetch_add(1, Ordering::SeqCst);
                let (per_conn_tx, per_conn_rx) = mpsc::unbounded_channel();
                let _ = conn_tx.send(per_conn_tx);
                tokio::spawn(serve_connection(stream, script.clone(), per_conn_rx));
            }
        });

        Self {
            addr,
            accepted,
            broadcast_tx,
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    script: CommandScript,
    mut broadcasts: mpsc::UnboundedReceiver<String>,
) {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                let Ok(frame) = frame else { return };
                if !handle_client_frame(&mut writer, frame, &script).await {
                    return;
                }
            }
            Some(line) = broadcasts.recv() => {
                let frame = RconFrame {
                    id: BROADCAST_REQUEST_ID,
                    frame_type: FrameType::ResponseValue as i32,
                    body: line,
                };
                if write_frame(&mut writer, &frame).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Returns false when the connection should be dropped.
async fn handle_client_frame(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    frame: RconFrame,
    script: &CommandScript,
) -> bool {
    if frame.frame_type == FrameType::Auth as i32 {
        let _ = write_frame(writer, &RconFrame::sentinel(frame.id)).await;
        let reply_id = if frame.body == PASSWORD { frame.id } else { -1 };
        let reply = RconFrame {
            id: reply_id,
            frame_type: FrameType::AuthResponse as i32,
            body: String::new(),
        };
        return write_frame(writer, &reply).await.is_ok();
    }

    // Client sentinel: ignore, the reply script already echoed it.
    if frame.frame_type == FrameType::ResponseValue as i32 {
        return true;
    }

    // ExecCommand
    match script(&frame.body) {
        MockReply::Hangup => false,
        MockReply::Fragments(bodies) => {
            for body in bodies {
                let reply = RconFrame {
                    id: frame.id,
                    frame_type: FrameType::ResponseValue as i32,
                    body,
                };
                if write_frame(writer, &reply).await.is_err() {
                    return false;
                }
            }
            write_frame(writer, &RconFrame::sentinel(frame.id)).await.is_ok()
        }
    }
}

fn default_script() -> CommandScript {
    Arc::new(|command: &str| match command {
        "ListPlayers" => MockReply::Fragments(vec![
            "----- A\n".to_string(),
            "----- B\n".to_string(),
        ]),
        "die" => MockReply::Hangup,
        _ => MockReply::Fragments(vec![format!("ok: {command}")]),
    })
}

fn fast_config() -> RconManagerConfig {
    RconManagerConfig {
        execute_timeout: Duration::from_secs(5),
        auth_timeout: Duration::from_secs(2),
        keepalive_interval: Duration::from_secs(30),
        keepalive_timeout: Duration::from_secs(2),
        backoff_initial: Duration::from_millis(50),
        backoff_cap: Duration::from_millis(200),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn fragmented_response_is_concatenated() {
    let mock = MockRcon::start(default_script()).await;
    let manager = RconManager::new(fast_config());
    let server = ServerId::new();

    manager
        .connect(server, &mock.addr.ip().to_string(), mock.addr.port(), PASSWORD)
        .await
        .unwrap();

    let response = manager.execute(server, "ListPlayers").await.unwrap();
    assert_eq!(response, "----- A\n----- B\n");

    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_is_idempotent_while_healthy() {
    let mock = MockRcon::start(default_script()).await;
    let manager = RconManager::new(fast_config());
    let server = ServerId::new();
    let host = mock.addr.ip().to_string();

    manager
        .connect(server, &host, mock.addr.port(), PASSWORD)
        .await
        .unwrap();
    manager
        .connect(server, &host, mock.addr.port(), PASSWORD)
        .await
        .unwrap();

    assert_eq!(mock.accepted.load(Ordering::SeqCst), 1);
    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_password_is_fatal() {
    let mock = MockRcon::start(default_script()).await;
    let manager = RconManager::new(fast_config());
    let server = ServerId::new();

    let result = manager
        .connect(server, &mock.addr.ip().to_string(), mock.addr.port(), "wrong")
        .await;
    assert!(matches!(result, Err(RconError::AuthFailed)));

    // Fatal: the supervisor must not keep retrying with bad credentials.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(mock.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcasts_reach_handlers_not_execute_callers() {
    let mock = MockRcon::start(default_script()).await;
    let manager = RconManager::new(fast_config());
    let server = ServerId::new();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    manager.on_broadcast(move |server_id, text| {
        let _ = seen_tx.send((server_id, text.to_string()));
    });

    manager
        .connect(server, &mock.addr.ip().to_string(), mock.addr.port(), PASSWORD)
        .await
        .unwrap();

    mock.broadcast_tx
        .send("[ChatAll] hello everyone".to_string())
        .unwrap();

    let (seen_server, seen_text) =
        tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
    assert_eq!(seen_server, server);
    assert_eq!(seen_text, "[ChatAll] hello everyone");

    // An execute interleaved with broadcasts sees only its own response.
    let response = manager.execute(server, "Whoami").await.unwrap();
    assert_eq!(response, "ok: Whoami");

    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn permanent_disconnect_suppresses_reconnect() {
    let mock = MockRcon::start(default_script()).await;
    let manager = RconManager::new(fast_config());
    let server = ServerId::new();

    manager
        .connect(server, &mock.addr.ip().to_string(), mock.addr.port(), PASSWORD)
        .await
        .unwrap();
    assert_eq!(mock.accepted.load(Ordering::SeqCst), 1);

    manager.disconnect(server, true).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(mock.accepted.load(Ordering::SeqCst), 1);
    assert!(matches!(
        manager.execute(server, "ListPlayers").await,
        Err(RconError::NotConnected(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn socket_close_fails_pending_executes_promptly() {
    let mock = MockRcon::start(default_script()).await;
    let manager = RconManager::new(fast_config());
    let server = ServerId::new();

    manager
        .connect(server, &mock.addr.ip().to_string(), mock.addr.port(), PASSWORD)
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let result = manager.execute(server, "die").await;
    assert!(
        matches!(result, Err(RconError::Disconnected) | Err(RconError::Io(_))),
        "expected a prompt disconnect error, got {result:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(1));

    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnects_after_transient_connection_loss() {
    let mock = MockRcon::start(default_script()).await;
    let manager = RconManager::new(fast_config());
    let server = ServerId::new();

    manager
        .connect(server, &mock.addr.ip().to_string(), mock.addr.port(), PASSWORD)
        .await
        .unwrap();

    // Kill the live connection; the supervisor should dial again.
    let _ = manager.execute(server, "die").await;

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if mock.accepted.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("supervisor never reconnected");

    manager.shutdown();
}
