//! In-memory transport.
//!
//! Delivers envelopes to handlers in the same process. Publishing awaits
//! every matching handler before returning, so a handler error surfaces
//! directly to the publisher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::dispatch::SubscriptionTable;
use super::{BusError, EnvelopeHandler, Result, Transport};
use crate::envelope::Envelope;

/// Single-process transport.
///
/// Ideal for:
/// - Tests
/// - Embedding every component in one binary
#[derive(Default)]
pub struct InMemoryTransport {
    started: AtomicBool,
    routes: SubscriptionTable,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        if !self.started.swap(true, Ordering::SeqCst) {
            info!(transport = "memory", "Transport started");
        }
        Ok(())
    }

    async fn stop(&self, _cancel: &CancellationToken) -> Result<()> {
        if self.started.swap(false, Ordering::SeqCst) {
            info!(transport = "memory", "Transport stopped");
        }
        Ok(())
    }

    async fn publish(&self, envelope: Arc<Envelope>, cancel: &CancellationToken) -> Result<()> {
        if !self.is_started() {
            return Err(BusError::NotStarted);
        }
        envelope.validate()?;

        let invoked = self.routes.dispatch(&envelope, cancel).await?;
        debug!(
            envelope_id = %envelope.id(),
            kind = %envelope.kind(),
            handlers = invoked,
            "Envelope delivered"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EnvelopeHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        self.routes.add(pattern, handler).await?;
        debug!(pattern = %pattern, "Subscribed");
        Ok(())
    }
}
