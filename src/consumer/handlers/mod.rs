//! Handlers for the events this service consumes.

pub mod assignment;
pub mod user;

use std::sync::Arc;

use tracing::{info, warn};

pub use assignment::AssignmentHandler;
pub use user::{UserHandler, UserProfile};

use super::{Consumer, EnvelopeHandler, HandlerError};
use crate::envelope::Envelope;
use crate::topology::{routing_keys, QueueBinding};

/// Non-blank string field, or a non-retryable error naming it.
pub(crate) fn required(envelope: &Envelope, field: &'static str) -> Result<String, HandlerError> {
    envelope
        .get_str(field)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| HandlerError::missing(envelope, field))
}

/// Subscribe each handler on every bound queue carrying one of its event
/// types. Returns the number of subscriptions made.
pub fn subscribe_all(
    consumer: &mut Consumer,
    bindings: &[QueueBinding],
    handlers: &[Arc<dyn EnvelopeHandler>],
) -> usize {
    let mut subscribed = 0;
    for binding in bindings {
        let carried: Vec<&str> = routing_keys::event_types_for(&binding.routing_key).collect();
        let mut matched = false;
        for handler in handlers {
            if handler.event_types().iter().any(|t| carried.contains(t)) {
                consumer.subscribe(binding.queue.clone(), Arc::clone(handler));
                subscribed += 1;
                matched = true;
            }
        }
        if matched {
            info!(queue = %binding.queue, routing_key = %binding.routing_key, "Queue wired");
        } else {
            warn!(queue = %binding.queue, routing_key = %binding.routing_key, "No handler for bound queue");
        }
    }
    subscribed
}
