//! IPC transport configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::DEFAULT_SOCKET_PATH;
use crate::bus::{BusError, Result};

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 64;

/// Default maximum frame body size (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Default wait for a subscription ack.
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 5_000;

/// Default limit on a single frame write before the peer is dropped.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2_000;

/// Which end of the socket this process owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpcRole {
    /// Binds the socket and routes between connections.
    #[default]
    Server,
    /// Connects to a running server.
    Client,
}

/// IPC-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Path of the Unix domain socket.
    pub socket_path: PathBuf,
    pub role: IpcRole,
    /// Listen backlog (server only).
    pub backlog: i32,
    /// Largest frame body accepted or sent, in bytes.
    pub max_frame_bytes: usize,
    /// Remove the socket file when the server stops.
    pub delete_socket_on_stop: bool,
    /// How long a client waits for a subscription ack.
    pub subscribe_timeout_ms: u64,
    /// How long one frame write may block before the connection is dropped.
    pub write_timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            role: IpcRole::Server,
            backlog: DEFAULT_BACKLOG,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            delete_socket_on_stop: true,
            subscribe_timeout_ms: DEFAULT_SUBSCRIBE_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl IpcConfig {
    /// Server bound at `socket_path`.
    pub fn server(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            role: IpcRole::Server,
            ..Self::default()
        }
    }

    /// Client of the server at `socket_path`.
    pub fn client(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            role: IpcRole::Client,
            ..Self::default()
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(BusError::Config("ipc.socket_path is empty".to_string()));
        }
        if self.backlog <= 0 {
            return Err(BusError::Config(format!(
                "ipc.backlog must be positive, got {}",
                self.backlog
            )));
        }
        // Length prefix is a signed 32-bit integer
        if self.max_frame_bytes == 0 || self.max_frame_bytes > i32::MAX as usize {
            return Err(BusError::Config(format!(
                "ipc.max_frame_bytes out of range: {}",
                self.max_frame_bytes
            )));
        }
        if self.subscribe_timeout_ms == 0 {
            return Err(BusError::Config(
                "ipc.subscribe_timeout_ms must be positive".to_string(),
            ));
        }
        if self.write_timeout_ms == 0 {
            return Err(BusError::Config(
                "ipc.write_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
