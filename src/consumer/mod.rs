//! Envelope consumer.
//!
//! Decodes raw deliveries, dispatches them by `eventType` to the handler
//! subscribed on the delivering queue, and turns the outcome into a
//! [`Settlement`] for the broker:
//!
//! - malformed body → logged, acked, never retried
//! - unknown event type → warned, acked, never retried
//! - handler failure → redelivered up to the queue budget, then dead-lettered

pub mod handlers;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::envelope::Envelope;
use crate::publisher::PublishError;
use crate::storage::StorageError;
use crate::topology::QueueBinding;

pub use retry::{Settlement, RETRY_COUNT_HEADER};

/// Errors raised by envelope handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{event_type} is missing required field '{field}'")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    #[error("Invalid {event_type}: {message}")]
    Invalid { event_type: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Follow-up publish failed: {0}")]
    Publish(#[from] PublishError),
}

impl HandlerError {
    pub fn missing(envelope: &Envelope, field: &'static str) -> Self {
        HandlerError::MissingField {
            event_type: envelope.event_type().to_string(),
            field,
        }
    }

    /// Whether another delivery of the same message could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::MissingField { .. } | HandlerError::Invalid { .. } => false,
            HandlerError::Storage(_) | HandlerError::Publish(_) => true,
        }
    }
}

/// Handler for one or more event types.
///
/// Handlers must be idempotent: the broker delivers at least once.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Event types this handler accepts.
    fn event_types(&self) -> &[&'static str];

    /// Apply the side effects of one envelope.
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Outcome of a delivery that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handler ran to completion.
    Processed,
    /// Empty or unparseable body.
    Malformed,
    /// No handler for this event type on this queue.
    UnknownEventType,
}

type DispatchTable = HashMap<String, Arc<dyn EnvelopeHandler>>;

/// Per-queue dispatch of envelopes to handlers.
///
/// Subscriptions are made at startup; the consumer is then shared
/// immutably with every worker.
#[derive(Default)]
pub struct Consumer {
    queues: HashMap<String, DispatchTable>,
}

impl Consumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every event type `handler` declares on `queue` to it.
    pub fn subscribe(&mut self, queue: impl Into<String>, handler: Arc<dyn EnvelopeHandler>) {
        let queue = queue.into();
        let table = self.queues.entry(queue.clone()).or_default();
        for event_type in handler.event_types() {
            if let Some(previous) = table.insert(event_type.to_string(), Arc::clone(&handler)) {
                warn!(
                    queue = %queue,
                    event_type = %event_type,
                    replaced = %previous.name(),
                    handler = %handler.name(),
                    "Handler replaced"
                );
            }
        }
        debug!(queue = %queue, handler = %handler.name(), "Subscribed handler");
    }

    /// Queues with at least one subscription.
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    pub fn is_subscribed(&self, queue: &str) -> bool {
        self.queues.contains_key(queue)
    }

    /// Decode and dispatch one delivery.
    pub async fn on_message(&self, queue: &str, body: &[u8]) -> Result<Disposition, HandlerError> {
        let envelope = match Envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(queue = %queue, error = %e, "Dropping malformed message");
                return Ok(Disposition::Malformed);
            }
        };

        let Some(handler) = self
            .queues
            .get(queue)
            .and_then(|table| table.get(envelope.event_type()))
        else {
            warn!(
                queue = %queue,
                event_type = %envelope.event_type(),
                origin = %envelope.service_name(),
                "Dropping message with unknown event type"
            );
            return Ok(Disposition::UnknownEventType);
        };

        debug!(
            queue = %queue,
            event_type = %envelope.event_type(),
            handler = %handler.name(),
            "Dispatching envelope"
        );
        handler.handle(&envelope).await?;
        Ok(Disposition::Processed)
    }

    /// Process one delivery and decide its settlement.
    ///
    /// `retry_count` is the number of redeliveries already made for this
    /// message.
    pub async fn process(&self, binding: &QueueBinding, body: &[u8], retry_count: u32) -> Settlement {
        match self.on_message(&binding.queue, body).await {
            Ok(_) => Settlement::Ack,
            Err(e) => {
                let settlement = retry::on_failure(e.is_retryable(), retry_count, binding.max_retries);
                match settlement {
                    Settlement::Retry { next_count } => warn!(
                        queue = %binding.queue,
                        attempt = next_count,
                        max_retries = binding.max_retries,
                        error = %e,
                        "Handler failed, scheduling redelivery"
                    ),
                    _ => error!(
                        queue = %binding.queue,
                        retry_count,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Handler failed, dead-lettering message"
                    ),
                }
                settlement
            }
        }
    }
}
