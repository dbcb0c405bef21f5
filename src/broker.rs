//! Broker façade over a [`Transport`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::{EnvelopeHandler, Result, Transport};
use crate::envelope::Envelope;

/// Application-facing entry point: `publish` envelopes, `route` patterns to
/// handlers. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct MessageBroker {
    transport: Arc<dyn Transport>,
}

impl MessageBroker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        self.transport.start(cancel).await
    }

    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        self.transport.stop(cancel).await
    }

    pub async fn publish(&self, envelope: impl Into<Arc<Envelope>>) -> Result<()> {
        self.publish_with_cancel(envelope, &CancellationToken::new())
            .await
    }

    pub async fn publish_with_cancel(
        &self,
        envelope: impl Into<Arc<Envelope>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.transport.publish(envelope.into(), cancel).await
    }

    /// Route `pattern` to `handler`; returns once the transport confirms.
    pub async fn route(&self, pattern: &str, handler: Arc<dyn EnvelopeHandler>) -> Result<()> {
        self.route_with_cancel(pattern, handler, &CancellationToken::new())
            .await
    }

    pub async fn route_with_cancel(
        &self,
        pattern: &str,
        handler: Arc<dyn EnvelopeHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.transport.subscribe(pattern, handler, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, InMemoryTransport};
    use crate::test_utils::CountingHandler;
    use serde_json::json;

    fn broker() -> MessageBroker {
        MessageBroker::new(Arc::new(InMemoryTransport::new()))
    }

    #[tokio::test]
    async fn test_publish_before_start() {
        let broker = broker();
        let result = broker.publish(Envelope::event("a.b", json!({}))).await;
        assert!(matches!(result, Err(BusError::NotStarted)));
    }

    #[tokio::test]
    async fn test_route_after_start_receives_later_publishes() {
        let broker = broker();
        broker.start(&CancellationToken::new()).await.unwrap();

        broker.publish(Envelope::event("x.y", json!({}))).await.unwrap();

        let handler = CountingHandler::new();
        broker.route("x.*", handler.handler()).await.unwrap();
        broker.publish(Envelope::event("x.y", json!({}))).await.unwrap();

        assert_eq!(handler.get(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_transport() {
        let broker = broker();
        let clone = broker.clone();
        assert!(Arc::ptr_eq(broker.transport(), clone.transport()));

        broker.start(&CancellationToken::new()).await.unwrap();
        clone.publish(Envelope::event("a", json!(null))).await.unwrap();
    }

    #[tokio::test]
    async fn test_route_rejects_blank_pattern() {
        let broker = broker();
        let result = broker.route("  ", CountingHandler::new().handler()).await;
        assert!(matches!(result, Err(BusError::InvalidPattern(_))));
    }
}
