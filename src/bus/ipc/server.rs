//! IPC server: owns the socket and routes between connections.
//!
//! ```text
//!  client A ──publish──▶ ┌────────┐ ──envelope──▶ client B (pattern match)
//!                        │ Router │ ──envelope──▶ client C (pattern match)
//!  local handlers ◀───── └────────┘
//! ```
//!
//! One accept task, one receive task per connection. Publishes arriving on a
//! connection are handled inline by that connection's task, so envelopes
//! from one publisher reach subscribers in the order they were sent.
//!
//! Fan-out writes run concurrently and each is bounded by the write timeout.
//! A peer that stops reading is dropped instead of stalling the publisher.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use socket2::{Domain, SockAddr, Socket, Type};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::IpcConfig;
use super::connection::Connection;
use super::frame::{encode, read_message, WireMessage, WireType};
use crate::bus::dispatch::SubscriptionTable;
use crate::bus::{BusError, Result};
use crate::envelope::Envelope;
use crate::routing::{resolve_routing_key, split_key, TopicPattern};

/// Pause after a failed accept (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Routes envelopes to local handlers and to subscribed connections.
pub(crate) struct Router {
    local: Arc<SubscriptionTable>,
    connections: DashMap<Uuid, Arc<Connection>>,
    max_frame_bytes: usize,
    write_timeout: Duration,
}

impl Router {
    fn new(local: Arc<SubscriptionTable>, config: &IpcConfig) -> Self {
        Self {
            local,
            connections: DashMap::new(),
            max_frame_bytes: config.max_frame_bytes,
            write_timeout: config.write_timeout(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Dispatch locally, then fan out to every matching connection.
    ///
    /// Send failures to individual connections are logged and skipped; a
    /// failed or timed-out connection closes itself. The local dispatch
    /// result is returned once fan-out completes.
    pub async fn route(&self, envelope: &Arc<Envelope>, cancel: &CancellationToken) -> Result<()> {
        let key = resolve_routing_key(envelope)?;
        let local = self.local.dispatch_key(&key, envelope, cancel).await;

        let segments: Vec<&str> = split_key(&key).collect();
        let targets: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .filter(|entry| {
                let conn = entry.value();
                !conn.is_closed() && conn.matches_any(&segments)
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        if !targets.is_empty() {
            let frame = match encode(&WireMessage::deliver(Arc::clone(envelope)), self.max_frame_bytes)
            {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(envelope_id = %envelope.id(), error = %e, "Envelope not forwarded");
                    return local.and(Err(e));
                }
            };

            let frame = &frame;
            let sends = targets
                .iter()
                .map(|conn| async move { (conn, conn.send_frame(frame).await) });
            for (conn, sent) in join_all(sends).await {
                if let Err(e) = sent {
                    warn!(
                        connection_id = %conn.id(),
                        routing_key = %key,
                        error = %e,
                        "Failed to forward envelope"
                    );
                }
            }
        }

        debug!(
            routing_key = %key,
            envelope_id = %envelope.id(),
            remote = targets.len(),
            "Envelope routed"
        );
        local.map(|_| ())
    }
}

/// A running server.
pub(crate) struct ServerState {
    router: Arc<Router>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    socket_path: PathBuf,
    delete_on_stop: bool,
}

impl ServerState {
    /// Bind the socket and spawn the accept loop.
    pub async fn start(
        config: &IpcConfig,
        local: Arc<SubscriptionTable>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Self>> {
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }

        prepare_socket_path(&config.socket_path).await?;
        let listener = bind_listener(&config.socket_path, config.backlog)?;

        if cancel.is_cancelled() {
            drop(listener);
            remove_socket_file(&config.socket_path).await;
            return Err(BusError::Cancelled);
        }

        let state = Arc::new(Self {
            router: Arc::new(Router::new(local, config)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            socket_path: config.socket_path.clone(),
            delete_on_stop: config.delete_socket_on_stop,
        });

        state.tracker.spawn(accept_loop(
            listener,
            Arc::clone(&state.router),
            state.shutdown.clone(),
            state.tracker.clone(),
        ));

        info!(
            socket = %config.socket_path.display(),
            backlog = config.backlog,
            "IPC server listening"
        );
        Ok(state)
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Cancel all loops, wait for them, then remove the socket file.
    ///
    /// If `cancel` fires first, the wait is abandoned but the remaining
    /// release steps still run.
    pub async fn stop(&self, cancel: &CancellationToken) {
        self.shutdown.cancel();
        self.tracker.close();

        tokio::select! {
            () = self.tracker.wait() => {}
            () = cancel.cancelled() => {
                warn!("Stop cancelled before server tasks finished");
            }
        }

        self.router.connections.clear();
        if self.delete_on_stop {
            remove_socket_file(&self.socket_path).await;
        }
        info!(socket = %self.socket_path.display(), "IPC server stopped");
    }
}

/// Ensure the parent directory exists and no stale socket blocks the bind.
///
/// A socket file that still accepts connections belongs to a live server;
/// that is reported as `AddrInUse` rather than removed.
async fn prepare_socket_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !metadata.file_type().is_socket() {
        return Err(BusError::Config(format!(
            "{} exists and is not a socket",
            path.display()
        )));
    }

    if UnixStream::connect(path).await.is_ok() {
        return Err(BusError::Io(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("IPC server already listening on {}", path.display()),
        )));
    }

    warn!(socket = %path.display(), "Removing stale socket");
    tokio::fs::remove_file(path).await?;
    Ok(())
}

fn bind_listener(path: &Path, backlog: i32) -> io::Result<UnixListener> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.bind(&SockAddr::unix(path)?)?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    UnixListener::from_std(socket.into())
}

async fn remove_socket_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(socket = %path.display(), "Socket file removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(socket = %path.display(), error = %e, "Failed to remove socket file"),
    }
}

async fn accept_loop(
    listener: UnixListener,
    router: Arc<Router>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                debug!("Accept loop cancelled");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let (reader, writer) = stream.into_split();
                        let conn = Arc::new(Connection::new(
                            writer,
                            router.max_frame_bytes,
                            router.write_timeout,
                            shutdown.child_token(),
                        ));
                        router.connections.insert(conn.id(), Arc::clone(&conn));
                        info!(
                            connection_id = %conn.id(),
                            connections = router.connections.len(),
                            "Client connected"
                        );
                        tracker.spawn(connection_loop(reader, conn, Arc::clone(&router)));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }
}

async fn connection_loop(mut reader: OwnedReadHalf, conn: Arc<Connection>, router: Arc<Router>) {
    let cancel = conn.closed().clone();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = read_message(&mut reader, router.max_frame_bytes) => next,
        };

        match next {
            Ok(Some(message)) => {
                if let Err(e) = handle_message(&router, &conn, message, &cancel).await {
                    warn!(connection_id = %conn.id(), error = %e, "Closing connection");
                    break;
                }
            }
            Ok(None) => {
                debug!(connection_id = %conn.id(), "Client disconnected");
                break;
            }
            Err(e) => {
                warn!(connection_id = %conn.id(), error = %e, "Dropping connection");
                break;
            }
        }
    }

    conn.closed().cancel();
    router.connections.remove(&conn.id());
    conn.shutdown().await;
    info!(
        connection_id = %conn.id(),
        subscriptions = conn.subscription_count(),
        connections = router.connections.len(),
        "Connection closed"
    );
}

/// Handle one frame from a client. An error closes the connection.
async fn handle_message(
    router: &Router,
    conn: &Connection,
    message: WireMessage,
    cancel: &CancellationToken,
) -> Result<()> {
    match message.kind {
        WireType::Subscribe => {
            let pattern = message.require_pattern()?;
            let parsed = TopicPattern::new(pattern);
            if parsed.is_empty() {
                return Err(BusError::InvalidPattern(pattern.to_string()));
            }
            conn.add_subscription(parsed);
            conn.send(&WireMessage::subscribed(pattern)).await?;
            debug!(connection_id = %conn.id(), pattern = %pattern, "Client subscribed");
        }
        WireType::Publish => {
            let envelope = Arc::clone(message.require_envelope()?);
            if let Err(e) = envelope.validate() {
                warn!(
                    connection_id = %conn.id(),
                    envelope_id = %envelope.id(),
                    error = %e,
                    "Rejected invalid envelope"
                );
                return Ok(());
            }
            if let Err(e) = router.route(&envelope, cancel).await {
                warn!(
                    connection_id = %conn.id(),
                    envelope_id = %envelope.id(),
                    error = %e,
                    "Routing failed"
                );
            }
        }
        WireType::Subscribed | WireType::Envelope => {
            return Err(BusError::Protocol(format!(
                "Unexpected {:?} frame from client",
                message.kind
            )));
        }
    }
    Ok(())
}
