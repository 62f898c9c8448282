//! A single authenticated RCON connection.
//!
//! Socket reads run on a dedicated task that demultiplexes response frames
//! to waiters by request id and routes broadcast frames to the manager's
//! handler. Socket writes are serialized under a write mutex. The waiter
//! table and the request-id counter share one lock.

use crate::error::RconError;
use crate::protocol::{
    read_frame, write_frame, FrameType, RconFrame, BROADCAST_REQUEST_ID,
};
use aegis_types::ServerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Handler invoked with the raw text of every broadcast frame.
pub type BroadcastFn = Arc<dyn Fn(ServerId, String) + Send + Sync>;

/// An in-flight request accumulating fragmented response bodies.
struct Pending {
    buffer: String,
    tx: oneshot::Sender<Result<String, RconError>>,
}

/// Waiter table and request-id counter, guarded together.
struct WaiterTable {
    next_id: i32,
    pending: HashMap<i32, Pending>,
    auth: Option<(i32, oneshot::Sender<Result<(), RconError>>)>,
}

impl WaiterTable {
    fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            auth: None,
        }
    }

    /// Allocates the next request id, skipping zero and the broadcast
    /// sentinel and wrapping at 31 bits.
    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if self.next_id >= BROADCAST_REQUEST_ID - 1 {
            1
        } else {
            self.next_id + 1
        };
        id
    }
}

struct Shared {
    server_id: ServerId,
    table: Mutex<WaiterTable>,
    closed: AtomicBool,
    closed_notify: Notify,
    last_keepalive: Mutex<Instant>,
}

impl Shared {
    /// Marks the connection dead and fails every outstanding waiter.
    fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut table = self.table.lock();
        for (_, waiter) in table.pending.drain() {
            let _ = waiter.tx.send(Err(RconError::Disconnected));
        }
        if let Some((_, tx)) = table.auth.take() {
            let _ = tx.send(Err(RconError::Disconnected));
        }
        drop(table);
        self.closed_notify.notify_waiters();
    }
}

/// One live TCP connection to a game server's RCON port.
pub(crate) struct RconConnection {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    read_task: JoinHandle<()>,
}

impl RconConnection {
    /// Opens a TCP connection, starts the read task and authenticates.
    ///
    /// Returns once authentication succeeded, or with [`RconError::AuthFailed`]
    /// when the server rejects the password (fatal, not retried).
    pub(crate) async fn connect(
        server_id: ServerId,
        host: &str,
        port: u16,
        password: &str,
        auth_timeout: Duration,
        on_broadcast: BroadcastFn,
    ) -> Result<Self, RconError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            server_id,
            table: Mutex::new(WaiterTable::new()),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            last_keepalive: Mutex::new(Instant::now()),
        });

        let read_task = tokio::spawn(read_loop(read_half, shared.clone(), on_broadcast));

        let connection = Self {
            shared,
            writer: tokio::sync::Mutex::new(write_half),
            read_task,
        };

        match connection.authenticate(password, auth_timeout).await {
            Ok(()) => Ok(connection),
            Err(e) => {
                connection.close();
                Err(e)
            }
        }
    }

    async fn authenticate(&self, password: &str, timeout: Duration) -> Result<(), RconError> {
        let (tx, rx) = oneshot::channel();
        let auth_id = {
            let mut table = self.shared.table.lock();
            let id = table.allocate_id();
            table.auth = Some((id, tx));
            id
        };

        {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &RconFrame::auth(auth_id, password)).await?;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RconError::Disconnected),
            Err(_) => {
                self.shared.table.lock().auth.take();
                Err(RconError::Timeout)
            }
        }
    }

    /// Executes a command and returns the full (possibly fragmented)
    /// response text.
    ///
    /// Sends the command frame followed by an empty `ResponseValue` sentinel;
    /// the response is complete when the server echoes the sentinel back for
    /// this request id.
    pub(crate) async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, RconError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(RconError::Disconnected);
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut table = self.shared.table.lock();
            let id = table.allocate_id();
            table.pending.insert(
                id,
                Pending {
                    buffer: String::new(),
                    tx,
                },
            );
            id
        };

        let write_result = async {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &RconFrame::exec(id, command)).await?;
            write_frame(&mut *writer, &RconFrame::sentinel(id)).await
        }
        .await;

        if let Err(e) = write_result {
            self.shared.table.lock().pending.remove(&id);
            self.close();
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RconError::Disconnected),
            Err(_) => {
                self.shared.table.lock().pending.remove(&id);
                Err(RconError::Timeout)
            }
        }
    }

    /// Tears the connection down; pending waiters fail with
    /// [`RconError::Disconnected`].
    pub(crate) fn close(&self) {
        self.shared.mark_closed();
        self.read_task.abort();
    }

    /// True once the socket has failed or [`close`](Self::close) was called.
    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Completes when the connection dies for any reason.
    pub(crate) async fn wait_closed(&self) {
        loop {
            // Arm the wakeup before the check so a close landing in between
            // is never missed.
            let notified = self.shared.closed_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Records a successful keepalive round trip.
    pub(crate) fn touch_keepalive(&self) {
        *self.shared.last_keepalive.lock() = Instant::now();
    }

    /// Instant of the last successful keepalive.
    pub(crate) fn last_keepalive(&self) -> Instant {
        *self.shared.last_keepalive.lock()
    }
}

impl Drop for RconConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>, on_broadcast: BroadcastFn) {
    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => dispatch_frame(&shared, frame, &on_broadcast),
            Err(e) => {
                if !shared.closed.load(Ordering::Acquire) {
                    debug!("RCON read loop for {} ended: {}", shared.server_id, e);
                }
                break;
            }
        }
    }
    shared.mark_closed();
}

fn dispatch_frame(shared: &Shared, frame: RconFrame, on_broadcast: &BroadcastFn) {
    if frame.is_broadcast() {
        trace!("RCON broadcast from {}: {}", shared.server_id, frame.body);
        on_broadcast(shared.server_id, frame.body);
        return;
    }

    if frame.frame_type == FrameType::AuthResponse as i32 {
        let waiter = shared.table.lock().auth.take();
        match waiter {
            Some((auth_id, tx)) => {
                let result = if frame.id == auth_id {
                    Ok(())
                } else {
                    // The server answers a bad password with id -1.
                    Err(RconError::AuthFailed)
                };
                let _ = tx.send(result);
            }
            None => warn!(
                "Unsolicited auth response from {} (id {})",
                shared.server_id, frame.id
            ),
        }
        return;
    }

    if frame.frame_type == FrameType::ResponseValue as i32 {
        let mut table = shared.table.lock();
        // The empty ResponseValue echoed during the auth handshake.
        if let Some((auth_id, _)) = &table.auth {
            if frame.id == *auth_id && frame.body.is_empty() {
                return;
            }
        }
        if frame.body.is_empty() {
            // Sentinel echo: the response for this id is complete.
            if let Some(waiter) = table.pending.remove(&frame.id) {
                let _ = waiter.tx.send(Ok(waiter.buffer));
            } else {
                trace!(
                    "Sentinel for unknown request id {} from {}",
                    frame.id,
                    shared.server_id
                );
            }
        } else if let Some(waiter) = table.pending.get_mut(&frame.id) {
            waiter.buffer.push_str(&frame.body);
        } else {
            trace!(
                "Response fragment for unknown request id {} from {}",
                frame.id,
                shared.server_id
            );
        }
        return;
    }

    warn!(
        "Unknown frame type {} from {} (id {})",
        frame.frame_type, shared.server_id, frame.id
    );
}
