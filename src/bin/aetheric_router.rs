//! aetheric-router: IPC router daemon
//!
//! Owns the bus socket so that any number of client processes can publish
//! and subscribe through it.
//!
//! ## Architecture
//! ```text
//! [service A] --(UDS)--> [aetheric-router] <--(UDS)-- [service B]
//!                               |
//!                               v
//!                   pattern match + fan-out
//! ```
//!
//! ## Configuration
//! - First argument: optional path to a YAML config file
//! - AETHERIC_CONFIG: config file path
//! - AETHERIC__TRANSPORT__IPC__SOCKET_PATH etc.: per-field overrides
//! - AETHERIC_LOG: tracing filter (default: info)
//!
//! The transport type and role from configuration are ignored: the router
//! is always an IPC server.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use aetheric_bus::bus::{IpcRole, IpcTransport, Transport};
use aetheric_bus::config::Config;
use aetheric_bus::utils::bootstrap::{cancel_on_ctrl_c, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    let mut ipc = config.transport.ipc;
    ipc.role = IpcRole::Server;
    let socket_path = ipc.socket_path.clone();
    let transport = IpcTransport::new(ipc)?;

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    transport.start(&shutdown).await?;
    info!(socket = %socket_path.display(), "aetheric-router started");

    shutdown.cancelled().await;

    transport.stop(&CancellationToken::new()).await?;
    info!("aetheric-router stopped");
    Ok(())
}
