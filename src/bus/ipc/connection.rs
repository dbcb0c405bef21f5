//! One accepted client connection, seen from the server.

use std::sync::RwLock;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::frame::{encode, write_frame, WireMessage};
use crate::bus::{BusError, Result};
use crate::routing::TopicPattern;

/// Server-side view of a client.
///
/// Subscriptions only grow; the connection is dropped as a whole when its
/// receive loop exits. A write that fails or exceeds the write timeout
/// closes the connection, which ends that loop.
pub struct Connection {
    id: Uuid,
    writer: Mutex<OwnedWriteHalf>,
    subscriptions: RwLock<Vec<TopicPattern>>,
    max_frame_bytes: usize,
    write_timeout: Duration,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(
        writer: OwnedWriteHalf,
        max_frame_bytes: usize,
        write_timeout: Duration,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            writer: Mutex::new(writer),
            subscriptions: RwLock::new(Vec::new()),
            max_frame_bytes,
            write_timeout,
            closed,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Fires when the connection is closed, locally or by the server stopping.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn add_subscription(&self, pattern: TopicPattern) {
        if let Ok(mut subs) = self.subscriptions.write() {
            subs.push(pattern);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// True when any subscribed pattern matches the pre-split key.
    pub fn matches_any(&self, key: &[&str]) -> bool {
        self.subscriptions
            .read()
            .map(|subs| subs.iter().any(|p| p.matches_segments(key)))
            .unwrap_or(false)
    }

    pub async fn send(&self, message: &WireMessage) -> Result<()> {
        let frame = encode(message, self.max_frame_bytes)?;
        self.send_frame(&frame).await
    }

    /// Write a pre-encoded frame. Frames never interleave on one connection.
    ///
    /// Waiting for the writer counts against the write timeout.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let write = async {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, frame).await
        };

        tokio::select! {
            biased;

            () = self.closed.cancelled() => Err(BusError::ConnectionClosed),

            written = tokio::time::timeout(self.write_timeout, write) => match written {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    self.closed.cancel();
                    Err(e)
                }
                Err(_) => {
                    warn!(
                        connection_id = %self.id,
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "Peer stopped reading, closing connection"
                    );
                    self.closed.cancel();
                    Err(BusError::Timeout(self.write_timeout))
                }
            },
        }
    }

    /// Half-close the write side if no send is in flight.
    pub async fn shutdown(&self) {
        if let Ok(mut writer) = self.writer.try_lock() {
            if let Err(e) = writer.shutdown().await {
                debug!(connection_id = %self.id, error = %e, "Shutdown failed");
            }
        }
    }
}
