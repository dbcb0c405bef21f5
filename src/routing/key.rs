//! Routing key resolution.
//!
//! Every transport derives keys here, on both the publish and the dispatch
//! side:
//! - request: `{service}.{verb}`
//! - event: `{topic}`
//! - response / error: `reply.{client_id}`

use std::collections::BTreeMap;

use crate::envelope::{Envelope, EnvelopeKind, META_CLIENT_ID};

/// First segment of every reply key.
pub const REPLY_PREFIX: &str = "reply";

/// Reasons a routing key cannot be derived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("Request requires service and verb to route")]
    MissingServiceOrVerb,

    #[error("Event requires topic to route")]
    MissingTopic,

    #[error("{0} requires meta.client_id to route")]
    MissingClientId(EnvelopeKind),
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Derive the routing key from raw envelope fields.
pub fn routing_key(
    kind: EnvelopeKind,
    service: Option<&str>,
    verb: Option<&str>,
    topic: Option<&str>,
    meta: Option<&BTreeMap<String, String>>,
) -> Result<String, RoutingError> {
    match kind {
        EnvelopeKind::Request => match (non_blank(service), non_blank(verb)) {
            (Some(service), Some(verb)) => Ok(format!("{service}.{verb}")),
            _ => Err(RoutingError::MissingServiceOrVerb),
        },
        EnvelopeKind::Event => non_blank(topic)
            .map(str::to_string)
            .ok_or(RoutingError::MissingTopic),
        EnvelopeKind::Response | EnvelopeKind::Error => {
            let client_id = meta
                .and_then(|m| m.get(META_CLIENT_ID))
                .map(String::as_str);
            non_blank(client_id)
                .map(reply_key)
                .ok_or(RoutingError::MissingClientId(kind))
        }
    }
}

/// Routing key for `envelope`.
pub fn resolve_routing_key(envelope: &Envelope) -> Result<String, RoutingError> {
    routing_key(
        envelope.kind(),
        envelope.service(),
        envelope.verb(),
        envelope.topic(),
        envelope.meta(),
    )
}

/// Key a client subscribes to for its own replies.
pub fn reply_key(client_id: &str) -> String {
    format!("{REPLY_PREFIX}.{client_id}")
}
