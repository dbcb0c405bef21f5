//! Topic matching and routing key derivation shared by every transport.

mod key;
mod pattern;

pub use key::{reply_key, resolve_routing_key, routing_key, RoutingError, REPLY_PREFIX};
pub use pattern::{is_match, split_key, TopicPattern};
