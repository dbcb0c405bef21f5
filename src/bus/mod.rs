//! Message transports.
//!
//! This module contains:
//! - `Transport` trait: lifecycle, publish and pattern subscription
//! - `EnvelopeHandler` trait: for processing delivered envelopes
//! - Transport configuration types and the `init_transport` factory
//! - Implementations: in-memory, local IPC (Unix socket)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::envelope::{Envelope, ValidationError};
use crate::routing::RoutingError;

pub mod dispatch;
pub mod ipc;
pub mod memory;

pub use dispatch::SubscriptionTable;
pub use ipc::{IpcConfig, IpcRole, IpcTransport};
pub use memory::InMemoryTransport;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Invalid envelope: {0}")]
    Structural(#[from] ValidationError),

    #[error("Routing failed: {0}")]
    Routing(#[from] RoutingError),

    #[error("Transport not started")]
    NotStarted,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid pattern: '{0}'")]
    InvalidPattern(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Handler for envelopes delivered by a transport.
///
/// The returned future is `'static`; clone what the handler needs out of
/// `self` before moving into it.
pub trait EnvelopeHandler: Send + Sync {
    fn handle(
        &self,
        envelope: Arc<Envelope>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<()>>;
}

struct FnHandler<F>(F);

impl<F> EnvelopeHandler for FnHandler<F>
where
    F: Fn(Arc<Envelope>, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync,
{
    fn handle(
        &self,
        envelope: Arc<Envelope>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<()>> {
        (self.0)(envelope, cancel)
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```ignore
/// let handler = handler_fn(|env, _cancel| async move {
///     info!(id = %env.id(), "received");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EnvelopeHandler>
where
    F: Fn(Arc<Envelope>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(move |envelope: Arc<Envelope>, cancel: CancellationToken| {
        Box::pin(f(envelope, cancel)) as BoxFuture<'static, Result<()>>
    }))
}

/// Interchangeable message transport.
///
/// Contract shared by every implementation:
/// - `publish` before `start` fails with [`BusError::NotStarted`]
/// - `subscribe` before `start` is accepted and takes effect on `start`
/// - `stop` is idempotent
/// - handlers run sequentially in pattern-registration order; the first
///   handler error is returned and the remaining handlers for that delivery
///   are skipped
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin operating. Calling `start` on a running transport is a no-op.
    async fn start(&self, cancel: &CancellationToken) -> Result<()>;

    /// Release sockets and background tasks.
    async fn stop(&self, cancel: &CancellationToken) -> Result<()>;

    /// Deliver `envelope` to every handler whose pattern matches its key.
    async fn publish(&self, envelope: Arc<Envelope>, cancel: &CancellationToken) -> Result<()>;

    /// Register `handler` for keys matching `pattern`.
    ///
    /// Returns once the subscription is confirmed.
    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EnvelopeHandler>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Transport type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Single-process delivery.
    #[default]
    Memory,
    /// Unix domain socket between local processes.
    Ipc,
}

/// Transport configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport type discriminator.
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    /// IPC-specific configuration.
    pub ipc: IpcConfig,
}

// ============================================================================
// Factory
// ============================================================================

/// Build the transport selected by `config`.
///
/// The transport is returned unstarted.
pub fn init_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>> {
    match config.transport_type {
        TransportType::Memory => {
            info!(transport = "memory", "Transport initialized");
            Ok(Arc::new(InMemoryTransport::new()))
        }
        TransportType::Ipc => {
            let transport = IpcTransport::new(config.ipc.clone())?;
            info!(
                transport = "ipc",
                role = ?config.ipc.role,
                socket = %config.ipc.socket_path.display(),
                "Transport initialized"
            );
            Ok(Arc::new(transport))
        }
    }
}
