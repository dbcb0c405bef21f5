//! Handler dispatch utilities.
//!
//! A [`SubscriptionTable`] maps topic patterns to ordered handler lists. Every
//! transport delivers to its local handlers through one, so matching and
//! ordering behave identically in-process and across the IPC boundary.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{BusError, EnvelopeHandler, Result};
use crate::envelope::Envelope;
use crate::routing::{resolve_routing_key, split_key, TopicPattern};

struct Route {
    pattern: TopicPattern,
    handlers: Vec<Arc<dyn EnvelopeHandler>>,
}

/// Pattern → handlers table, in pattern-registration order.
#[derive(Default)]
pub struct SubscriptionTable {
    routes: RwLock<Vec<Route>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `pattern`.
    ///
    /// A pattern registered again keeps its original position; the handler
    /// is appended to that pattern's list.
    pub async fn add(&self, pattern: &str, handler: Arc<dyn EnvelopeHandler>) -> Result<()> {
        let parsed = TopicPattern::new(pattern);
        if parsed.is_empty() {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }

        let mut routes = self.routes.write().await;
        match routes.iter_mut().find(|r| r.pattern.as_str() == pattern) {
            Some(route) => route.handlers.push(handler),
            None => routes.push(Route {
                pattern: parsed,
                handlers: vec![handler],
            }),
        }
        Ok(())
    }

    /// Number of distinct patterns.
    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }

    /// Handlers for `key`, cloned out so no lock is held while they run.
    pub async fn handlers_for(&self, key: &str) -> Vec<Arc<dyn EnvelopeHandler>> {
        let segments: Vec<&str> = split_key(key).collect();
        let routes = self.routes.read().await;
        routes
            .iter()
            .filter(|r| r.pattern.matches_segments(&segments))
            .flat_map(|r| r.handlers.iter().cloned())
            .collect()
    }

    /// Resolve the routing key for `envelope` and dispatch it.
    pub async fn dispatch(
        &self,
        envelope: &Arc<Envelope>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let key = resolve_routing_key(envelope)?;
        self.dispatch_key(&key, envelope, cancel).await
    }

    /// Invoke every handler matching `key`, one after another.
    ///
    /// Stops at the first handler error and returns it; later handlers for
    /// this delivery are skipped. Returns the number of handlers invoked.
    pub async fn dispatch_key(
        &self,
        key: &str,
        envelope: &Arc<Envelope>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let handlers = self.handlers_for(key).await;
        if handlers.is_empty() {
            debug!(routing_key = %key, "No handlers matched");
            return Ok(0);
        }

        for (invoked, handler) in handlers.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(BusError::Cancelled);
            }
            if let Err(e) = handler.handle(Arc::clone(envelope), cancel.clone()).await {
                error!(
                    routing_key = %key,
                    envelope_id = %envelope.id(),
                    error = %e,
                    "Handler failed"
                );
                return Err(e);
            }
            debug!(routing_key = %key, handler = invoked, "Handler completed");
        }

        Ok(handlers.len())
    }
}
