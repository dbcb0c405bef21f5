//! Per-delivery context handed to typed handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::HostError;
use crate::broker::MessageBroker;
use crate::envelope::{Envelope, EnvelopeKind, Message};

/// What a typed handler knows about the delivery it is processing.
#[derive(Clone)]
pub struct MessageContext {
    envelope: Arc<Envelope>,
    service: Arc<str>,
    broker: MessageBroker,
    cancel: CancellationToken,
}

impl MessageContext {
    pub(crate) fn new(
        envelope: Arc<Envelope>,
        service: Arc<str>,
        broker: MessageBroker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            envelope,
            service,
            broker,
            cancel,
        }
    }

    /// The envelope being handled.
    pub fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    /// Name of the hosting service.
    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publish a request to this service, verb `T::NAME`.
    pub async fn publish_request<T: Message>(&self, payload: &T) -> Result<(), HostError> {
        let envelope = Envelope::request_of(self.service.as_ref(), T::NAME, payload)?
            .with_causation_id(self.envelope.id());
        self.publish(envelope).await
    }

    /// Publish an event on `{service}.{T::NAME}`.
    pub async fn publish_event<T: Message>(&self, payload: &T) -> Result<(), HostError> {
        let topic = format!("{}.{}", self.service, T::NAME);
        let envelope = Envelope::event_of(topic, payload)?.with_causation_id(self.envelope.id());
        self.publish(envelope).await
    }

    /// Publish a response correlated to the envelope being handled.
    ///
    /// Routed to the requester's `client_id`; a request without one cannot
    /// be answered.
    pub async fn reply<T: Message>(&self, payload: &T) -> Result<(), HostError> {
        let envelope = self
            .envelope
            .reply(EnvelopeKind::Response, serde_json::Value::Null)
            .with_typed_payload(payload)?;
        self.publish(envelope).await
    }

    /// Publish an error reply correlated to the envelope being handled.
    pub async fn reply_error(&self, payload: serde_json::Value) -> Result<(), HostError> {
        let envelope = self.envelope.reply(EnvelopeKind::Error, payload);
        self.publish(envelope).await
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), HostError> {
        self.broker
            .publish_with_cancel(envelope, &self.cancel)
            .await
            .map_err(HostError::from)
    }
}
