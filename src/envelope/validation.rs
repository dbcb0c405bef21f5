//! Structural invariants per envelope kind.

use super::{Envelope, EnvelopeKind, ENVELOPE_VERSION};

/// Reasons an envelope is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("Envelope id is nil")]
    MissingId,

    #[error("Request requires service and verb")]
    MissingServiceOrVerb,

    #[error("{0} requires correlation_id")]
    MissingCorrelationId(EnvelopeKind),

    #[error("Event requires topic")]
    MissingTopic,
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Check `envelope` against the rules for its kind.
///
/// Pure; safe to call on every publish and after every inbound decode.
pub fn validate(envelope: &Envelope) -> Result<(), ValidationError> {
    if envelope.version() != ENVELOPE_VERSION {
        return Err(ValidationError::UnsupportedVersion(envelope.version()));
    }
    if envelope.id().is_nil() {
        return Err(ValidationError::MissingId);
    }

    match envelope.kind() {
        EnvelopeKind::Request => {
            if is_blank(envelope.service()) || is_blank(envelope.verb()) {
                return Err(ValidationError::MissingServiceOrVerb);
            }
        }
        EnvelopeKind::Response | EnvelopeKind::Error => {
            if envelope.correlation_id().is_none() {
                return Err(ValidationError::MissingCorrelationId(envelope.kind()));
            }
        }
        EnvelopeKind::Event => {
            if is_blank(envelope.topic()) {
                return Err(ValidationError::MissingTopic);
            }
        }
    }

    Ok(())
}
