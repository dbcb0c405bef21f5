//! Local IPC transport over a Unix domain socket.
//!
//! Architecture:
//! ```text
//!                 ┌──────────────────┐
//!  ┌──────────┐   │  server process  │   ┌──────────┐
//!  │ client A │◀─▶│  Router + local  │◀─▶│ client B │
//!  └──────────┘UDS│    handlers      │UDS└──────────┘
//!                 └──────────────────┘
//! ```
//!
//! Clients send `subscribe` and `publish` frames. The server acks each
//! subscription with `subscribed`, dispatches publishes to its own handlers
//! and forwards them as `envelope` frames to every client holding a matching
//! pattern. See [`frame`] for the wire format.
//!
//! Usage:
//! 1. One process starts an `IpcTransport` in the server role
//! 2. Other processes start `IpcTransport`s in the client role on the same path
//! 3. Everyone subscribes and publishes through the `Transport` trait

mod client;
mod config;
mod connection;
pub mod frame;
mod server;
mod transport;

pub use config::{
    IpcConfig, IpcRole, DEFAULT_BACKLOG, DEFAULT_MAX_FRAME_BYTES, DEFAULT_SUBSCRIBE_TIMEOUT_MS,
    DEFAULT_WRITE_TIMEOUT_MS,
};
pub use transport::IpcTransport;

/// Default socket location.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/aetheric/bus.sock";
