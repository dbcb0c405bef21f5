//! Aetheric Bus - topic-routed message bus
//!
//! Components publish [`Envelope`]s and subscribe to dot-segmented topic
//! patterns (`*` matches one segment, `#` zero or more) without knowing
//! whether their peers live in the same process or behind a local IPC
//! socket.

pub mod broker;
pub mod bus;
pub mod config;
pub mod envelope;
pub mod host;
pub mod routing;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use broker::MessageBroker;
pub use bus::{BusError, EnvelopeHandler, Transport};
pub use envelope::{Envelope, EnvelopeKind, Message};
