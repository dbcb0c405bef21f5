//! IPC client: one connection to a running server.
//!
//! Outbound publishes are forwarded as-is; the server does all matching.
//! Inbound `envelope` frames are queued to a dispatcher task that runs local
//! handlers sequentially, so a handler may itself subscribe or publish on
//! the same transport without stalling the receive loop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::config::IpcConfig;
use super::frame::{encode, read_message, write_frame, WireMessage, WireType};
use crate::bus::dispatch::SubscriptionTable;
use crate::bus::{BusError, Result};
use crate::envelope::Envelope;
use crate::routing::resolve_routing_key;

type AckQueue = HashMap<String, VecDeque<oneshot::Sender<()>>>;

/// A connected client.
pub(crate) struct ClientState {
    writer: Mutex<OwnedWriteHalf>,
    acks: StdMutex<AckQueue>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    max_frame_bytes: usize,
    subscribe_timeout: Duration,
    write_timeout: Duration,
}

impl ClientState {
    /// Connect to the server and spawn the receive and dispatch tasks.
    pub async fn connect(
        config: &IpcConfig,
        local: Arc<SubscriptionTable>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BusError::Cancelled),
            stream = UnixStream::connect(&config.socket_path) => stream?,
        };
        let (reader, writer) = stream.into_split();

        let state = Arc::new(Self {
            writer: Mutex::new(writer),
            acks: StdMutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            max_frame_bytes: config.max_frame_bytes,
            subscribe_timeout: config.subscribe_timeout(),
            write_timeout: config.write_timeout(),
        });

        let (deliveries, queue) = mpsc::unbounded_channel();
        state
            .tracker
            .spawn(dispatch_loop(queue, local, state.shutdown.clone()));
        state
            .tracker
            .spawn(receive_loop(reader, Arc::clone(&state), deliveries));

        info!(socket = %config.socket_path.display(), "IPC client connected");
        Ok(state)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write one frame. A write that outlasts the write timeout closes the
    /// connection; `stop` aborts a write in flight.
    async fn send(&self, message: &WireMessage) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::ConnectionClosed);
        }
        let frame = encode(message, self.max_frame_bytes)?;
        let write = async {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &frame).await
        };

        tokio::select! {
            biased;

            () = self.shutdown.cancelled() => Err(BusError::ConnectionClosed),

            written = tokio::time::timeout(self.write_timeout, write) => match written {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "Server stopped reading, closing connection"
                    );
                    self.shutdown.cancel();
                    self.mark_closed();
                    Err(BusError::Timeout(self.write_timeout))
                }
            },
        }
    }

    /// Forward `envelope` to the server for routing.
    pub async fn publish(&self, envelope: Arc<Envelope>, cancel: &CancellationToken) -> Result<()> {
        // Resolve up front so unroutable envelopes fail here, not on the server
        let key = resolve_routing_key(&envelope)?;
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        self.send(&WireMessage::publish(envelope)).await?;
        debug!(routing_key = %key, "Envelope forwarded to server");
        Ok(())
    }

    /// Register `pattern` on the server and wait for its ack.
    pub async fn subscribe_remote(&self, pattern: &str, cancel: &CancellationToken) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.lock_acks()
            .entry(pattern.to_string())
            .or_default()
            .push_back(tx);

        let outcome = match self.send(&WireMessage::subscribe(pattern)).await {
            Ok(()) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(BusError::Cancelled),
                    () = self.shutdown.cancelled() => Err(BusError::ConnectionClosed),
                    acked = tokio::time::timeout(self.subscribe_timeout, rx) => match acked {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(_)) => Err(BusError::ConnectionClosed),
                        Err(_) => Err(BusError::Timeout(self.subscribe_timeout)),
                    },
                }
            }
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(()) => debug!(pattern = %pattern, "Subscription acknowledged"),
            Err(_) => self.prune_acks(pattern),
        }
        outcome
    }

    fn lock_acks(&self) -> std::sync::MutexGuard<'_, AckQueue> {
        self.acks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the oldest live waiter for `pattern`.
    fn complete_ack(&self, pattern: &str) {
        let mut acks = self.lock_acks();
        let drained = match acks.get_mut(pattern) {
            Some(waiters) => {
                while let Some(tx) = waiters.pop_front() {
                    if tx.send(()).is_ok() {
                        break;
                    }
                }
                waiters.is_empty()
            }
            None => {
                debug!(pattern = %pattern, "Ack without waiter");
                false
            }
        };
        if drained {
            acks.remove(pattern);
        }
    }

    /// Drop waiters whose receiver has gone away.
    fn prune_acks(&self, pattern: &str) {
        let mut acks = self.lock_acks();
        let drained = match acks.get_mut(pattern) {
            Some(waiters) => {
                waiters.retain(|tx| !tx.is_closed());
                waiters.is_empty()
            }
            None => false,
        };
        if drained {
            acks.remove(pattern);
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders fails every pending subscribe
        self.lock_acks().clear();
    }

    /// Close the connection and wait for background tasks.
    pub async fn stop(&self, cancel: &CancellationToken) {
        self.shutdown.cancel();
        self.tracker.close();

        // Writes in flight see `shutdown` and release the writer
        let half_close = async {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!("Stop cancelled before connection closed");
            }
            closed = tokio::time::timeout(self.write_timeout, half_close) => match closed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Client write shutdown failed"),
                Err(_) => debug!("Client write shutdown timed out"),
            },
        }

        tokio::select! {
            () = self.tracker.wait() => {}
            () = cancel.cancelled() => {
                warn!("Stop cancelled before client tasks finished");
            }
        }

        self.mark_closed();
        info!("IPC client stopped");
    }
}

async fn receive_loop(
    mut reader: OwnedReadHalf,
    state: Arc<ClientState>,
    deliveries: mpsc::UnboundedSender<Arc<Envelope>>,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = state.shutdown.cancelled() => break,
            next = read_message(&mut reader, state.max_frame_bytes) => next,
        };

        match next {
            Ok(Some(message)) => match message.kind {
                WireType::Envelope => match message.require_envelope() {
                    Ok(envelope) => {
                        if let Err(e) = envelope.validate() {
                            warn!(envelope_id = %envelope.id(), error = %e, "Dropped invalid envelope");
                            continue;
                        }
                        if deliveries.send(Arc::clone(envelope)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropped malformed delivery"),
                },
                WireType::Subscribed => match message.pattern.as_deref() {
                    Some(pattern) => state.complete_ack(pattern),
                    None => warn!("Ack frame without pattern"),
                },
                other => warn!(frame = ?other, "Unexpected frame from server"),
            },
            Ok(None) => {
                info!("Server closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Connection to server lost");
                break;
            }
        }
    }

    state.mark_closed();
}

async fn dispatch_loop(
    mut queue: mpsc::UnboundedReceiver<Arc<Envelope>>,
    local: Arc<SubscriptionTable>,
    shutdown: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        if let Err(e) = local.dispatch(&envelope, &shutdown).await {
            warn!(envelope_id = %envelope.id(), error = %e, "Local delivery failed");
        }
    }
}
