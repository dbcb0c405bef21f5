//! [`Transport`] implementation over a Unix domain socket.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::client::ClientState;
use super::config::{IpcConfig, IpcRole};
use super::server::ServerState;
use crate::bus::dispatch::SubscriptionTable;
use crate::bus::{BusError, EnvelopeHandler, Result, Transport};
use crate::envelope::Envelope;
use crate::routing::TopicPattern;

#[derive(Clone)]
enum Running {
    Server(Arc<ServerState>),
    Client(Arc<ClientState>),
}

/// Local IPC transport.
///
/// In the server role this process binds the socket, delivers to its own
/// handlers and forwards to every connected client with a matching pattern.
/// In the client role it connects to the server, forwards publishes and
/// receives deliveries for the patterns it subscribed.
///
/// A client may subscribe before `start`; queued patterns are sent in order
/// once connected, and sent again after every restart.
pub struct IpcTransport {
    config: IpcConfig,
    local: Arc<SubscriptionTable>,
    /// Serializes start and stop. Held through teardown so a restart cannot
    /// race the previous instance's socket cleanup.
    transition: Mutex<()>,
    /// Serializes start and subscribe. Holds the patterns a client has
    /// registered with the server. Never held while waiting on background
    /// tasks, since handlers running in them may subscribe.
    lifecycle: Mutex<Vec<String>>,
    running: RwLock<Option<Running>>,
}

impl IpcTransport {
    pub fn new(config: IpcConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            local: Arc::new(SubscriptionTable::new()),
            transition: Mutex::new(()),
            lifecycle: Mutex::new(Vec::new()),
            running: RwLock::new(None),
        })
    }

    pub fn server(socket_path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::new(IpcConfig::server(socket_path))
    }

    pub fn client(socket_path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::new(IpcConfig::client(socket_path))
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    pub fn role(&self) -> IpcRole {
        self.config.role
    }

    pub fn is_started(&self) -> bool {
        self.running().is_some()
    }

    /// Connected clients, for a running server.
    pub fn connection_count(&self) -> Option<usize> {
        match self.running()? {
            Running::Server(server) => Some(server.router().connection_count()),
            Running::Client(_) => None,
        }
    }

    fn running(&self) -> Option<Running> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_running(&self, running: Option<Running>) -> Option<Running> {
        let mut slot = self.running.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, running)
    }
}

#[async_trait]
impl Transport for IpcTransport {
    async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let _transition = self.transition.lock().await;
        let patterns = self.lifecycle.lock().await;
        if self.is_started() {
            return Ok(());
        }

        let running = match self.config.role {
            IpcRole::Server => {
                Running::Server(ServerState::start(&self.config, Arc::clone(&self.local), cancel).await?)
            }
            IpcRole::Client => {
                let client =
                    ClientState::connect(&self.config, Arc::clone(&self.local), cancel).await?;
                for pattern in patterns.iter() {
                    if let Err(e) = client.subscribe_remote(pattern, cancel).await {
                        client.stop(&CancellationToken::new()).await;
                        return Err(e);
                    }
                }
                debug!(patterns = patterns.len(), "Queued subscriptions flushed");
                Running::Client(client)
            }
        };

        self.set_running(Some(running));
        info!(role = ?self.config.role, "IPC transport started");
        Ok(())
    }

    async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        let _transition = self.transition.lock().await;
        let running = {
            let _patterns = self.lifecycle.lock().await;
            self.set_running(None)
        };
        let Some(running) = running else {
            return Ok(());
        };

        match running {
            Running::Server(server) => server.stop(cancel).await,
            Running::Client(client) => client.stop(cancel).await,
        }
        info!(role = ?self.config.role, "IPC transport stopped");
        Ok(())
    }

    async fn publish(&self, envelope: Arc<Envelope>, cancel: &CancellationToken) -> Result<()> {
        let running = self.running().ok_or(BusError::NotStarted)?;
        envelope.validate()?;

        match running {
            Running::Server(server) => server.router().route(&envelope, cancel).await,
            Running::Client(client) => client.publish(envelope, cancel).await,
        }
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EnvelopeHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if TopicPattern::new(pattern).is_empty() {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }

        let mut patterns = self.lifecycle.lock().await;
        if self.config.role == IpcRole::Client && !patterns.iter().any(|p| p == pattern) {
            // Remote first: a failed or cancelled ack leaves nothing registered
            if let Some(Running::Client(client)) = self.running() {
                client.subscribe_remote(pattern, cancel).await?;
            }
            patterns.push(pattern.to_string());
        }
        self.local.add(pattern, handler).await?;

        debug!(pattern = %pattern, role = ?self.config.role, "Subscribed");
        Ok(())
    }
}
