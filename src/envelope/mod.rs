//! Canonical message envelope.
//!
//! Every message on the bus travels inside an [`Envelope`]: identity,
//! correlation, routing fields and an opaque JSON payload. Envelopes are
//! built once, then shared as `Arc<Envelope>` for the rest of their life.
//!
//! Which routing fields are mandatory depends on the [`EnvelopeKind`]:
//! - `Request`: `service` and `verb`
//! - `Event`: `topic`
//! - `Response` / `Error`: `correlation_id` (and `meta["client_id"]` to route)

mod validation;

pub use validation::{validate, ValidationError};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Only supported envelope schema version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Meta key holding the reply address for responses and errors.
pub const META_CLIENT_ID: &str = "client_id";

/// Meta key holding the payload type tag.
pub const META_PAYLOAD_TYPE: &str = "payload_type";

/// A payload type that can be bound to an envelope.
///
/// `NAME` is the stable type tag written to `meta["payload_type"]`. It is
/// also used as the verb for requests published through a
/// [`MessageContext`](crate::host::MessageContext).
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type tag.
    const NAME: &'static str;
}

/// Envelope kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Command addressed to `service.verb`.
    Request,
    /// Reply correlated to a request.
    Response,
    /// Fact published on a topic.
    Event,
    /// Failed reply correlated to a request.
    Error,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Event => "event",
            Self::Error => "error",
        }
    }

    /// True for kinds routed back to a client (`reply.<client_id>`).
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical wrapped message unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    version: u32,
    id: Uuid,
    kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    causation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<BTreeMap<String, String>>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    /// Create a bare envelope of `kind` with a fresh id and timestamp.
    ///
    /// Routing fields are left empty; prefer the kind-specific constructors.
    pub fn new(kind: EnvelopeKind, payload: serde_json::Value) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            id: Uuid::new_v4(),
            kind,
            service: None,
            verb: None,
            topic: None,
            correlation_id: None,
            causation_id: None,
            meta: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Request addressed to `service.verb`.
    pub fn request(
        service: impl Into<String>,
        verb: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(EnvelopeKind::Request, payload)
            .with_service(service)
            .with_verb(verb)
    }

    /// Event published on `topic`.
    pub fn event(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(EnvelopeKind::Event, payload).with_topic(topic)
    }

    /// Request carrying a typed payload.
    pub fn request_of<T: Message>(
        service: impl Into<String>,
        verb: impl Into<String>,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Self::new(EnvelopeKind::Request, serde_json::Value::Null)
            .with_service(service)
            .with_verb(verb)
            .with_typed_payload(payload)
    }

    /// Event carrying a typed payload.
    pub fn event_of<T: Message>(topic: impl Into<String>, payload: &T) -> serde_json::Result<Self> {
        Self::new(EnvelopeKind::Event, serde_json::Value::Null)
            .with_topic(topic)
            .with_typed_payload(payload)
    }

    /// Response to request `correlation_id`, routed to `client_id`.
    pub fn response(
        correlation_id: Uuid,
        client_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(EnvelopeKind::Response, payload)
            .with_correlation_id(correlation_id)
            .with_meta(META_CLIENT_ID, client_id)
    }

    /// Error reply to request `correlation_id`, routed to `client_id`.
    pub fn error(
        correlation_id: Uuid,
        client_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(EnvelopeKind::Error, payload)
            .with_correlation_id(correlation_id)
            .with_meta(META_CLIENT_ID, client_id)
    }

    /// Build a reply of `kind` correlated to this envelope.
    ///
    /// The reply inherits this envelope's `client_id` and records this
    /// envelope as its cause.
    pub fn reply(&self, kind: EnvelopeKind, payload: serde_json::Value) -> Self {
        let mut reply = Self::new(kind, payload)
            .with_correlation_id(self.id)
            .with_causation_id(self.id);
        if let Some(client_id) = self.meta_value(META_CLIENT_ID) {
            reply = reply.with_meta(META_CLIENT_ID, client_id);
        }
        reply
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_verb(mut self, verb: impl Into<String>) -> Self {
        self.verb = Some(verb.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Insert a meta entry, replacing any previous value for `key`.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Bind a typed payload and tag it with `T::NAME`.
    pub fn with_typed_payload<T: Message>(mut self, payload: &T) -> serde_json::Result<Self> {
        self.payload = serde_json::to_value(payload)?;
        Ok(self.with_meta(META_PAYLOAD_TYPE, T::NAME))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<Uuid> {
        self.causation_id
    }

    pub fn meta(&self) -> Option<&BTreeMap<String, String>> {
        self.meta.as_ref()
    }

    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.as_ref()?.get(key).map(String::as_str)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Untyped view of the payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Type tag recorded by [`with_typed_payload`](Self::with_typed_payload).
    pub fn payload_type(&self) -> Option<&str> {
        self.meta_value(META_PAYLOAD_TYPE)
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }

    /// Check the structural invariants for this envelope's kind.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate(self)
    }
}
