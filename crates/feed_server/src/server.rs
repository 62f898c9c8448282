//! WebSocket accept loop and per-client pump.

use crate::error::FeedError;
use crate::frames::{connected_frame, feed_frame, filter_for, parse_feed_types};
use event_system::EventBus;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Per-client send queue capacity; slow clients drop oldest frames.
const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Feed server configuration.
#[derive(Debug, Clone)]
pub struct FeedServerConfig {
    /// Address the WebSocket listener binds to
    pub bind_address: String,
    /// Keepalive ping cadence
    pub keepalive_interval: Duration,
}

impl Default for FeedServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

/// Serves filtered live event feeds over WebSocket.
pub struct FeedServer {
    bus: EventBus,
    config: FeedServerConfig,
}

impl FeedServer {
    pub fn new(bus: EventBus, config: FeedServerConfig) -> Self {
        Self { bus, config }
    }

    /// Binds the listener and returns the bound address along with the
    /// accept-loop future. Binding separately lets callers learn an
    /// ephemeral port before spawning the loop.
    pub async fn bind(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, impl std::future::Future<Output = ()>), FeedError> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        let addr = listener.local_addr()?;
        info!("📡 Feed server listening on {addr}");

        let bus = self.bus;
        let keepalive = self.config.keepalive_interval;
        let accept_loop = async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Feed server shutting down");
                            return;
                        }
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("Feed client connecting from {peer}");
                                tokio::spawn(handle_client(stream, bus.clone(), keepalive));
                            }
                            Err(e) => warn!("Feed accept failed: {e}"),
                        }
                    }
                }
            }
        };
        Ok((addr, accept_loop))
    }
}

async fn handle_client(stream: TcpStream, bus: EventBus, keepalive: Duration) {
    // Capture the request query during the handshake to learn the client's
    // feed selection.
    let mut query: Option<String> = None;
    let callback = |request: &Request, response: Response| {
        query = request.uri().query().map(str::to_owned);
        Ok(response)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Feed handshake failed: {e}");
            return;
        }
    };

    let selected = parse_feed_types(query.as_deref());
    let mut subscription = bus.subscribe(filter_for(&selected), None, CLIENT_QUEUE_CAPACITY);
    let (mut sink, mut source) = ws.split();

    let hello = connected_frame(&selected);
    if sink
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let mut ping = tokio::time::interval(keepalive);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if let Some(frame) = feed_frame(&event, &selected) {
                    if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Feed client closed");
                        break;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Feed client read error: {e}");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
