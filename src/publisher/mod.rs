//! Envelope publisher.
//!
//! Hands envelopes to the broker on the main exchange with mandatory
//! delivery and publisher confirms. Transient broker failures are retried
//! with a fixed pause; anything else is surfaced on the first failure.
//! Nothing is persisted between attempts, so a restart forgets pending
//! retries.

pub mod events;

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use tracing::{error, info, warn};

use crate::bus::{BusError, MessageBroker, OutboundMessage};
use crate::config::PublishRetryConfig;
use crate::envelope::{Envelope, EnvelopeError};
use crate::topology::{TopologyError, TopologyRegistry};
use crate::utils::retry::publish_backoff;

/// Result type for publish operations.
pub type Result<T> = std::result::Result<T, PublishError>;

/// Errors surfaced to the code that asked for a publish.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("{event_type} not published after {attempts} attempt(s): {source}")]
    Exhausted {
        event_type: String,
        attempts: usize,
        #[source]
        source: BusError,
    },

    #[error("{event_type} rejected by broker: {source}")]
    Rejected {
        event_type: String,
        #[source]
        source: BusError,
    },

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl PublishError {
    /// Whether the broker could accept the same envelope later.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Exhausted { .. })
    }
}

/// Publishes envelopes stamped with this service's name.
pub struct Publisher {
    broker: Arc<dyn MessageBroker>,
    topology: Arc<TopologyRegistry>,
    service_name: String,
    retry: PublishRetryConfig,
}

impl Publisher {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        topology: Arc<TopologyRegistry>,
        service_name: impl Into<String>,
        retry: PublishRetryConfig,
    ) -> Self {
        Self {
            broker,
            topology,
            service_name: service_name.into(),
            retry,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Start an envelope for `event_type` originating from this service.
    pub fn envelope(&self, event_type: &str) -> Envelope {
        Envelope::new(event_type, self.service_name.as_str())
    }

    /// Publish `envelope` to the main exchange under `routing_key`.
    pub async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<()> {
        self.send(routing_key, envelope, "envelope", "-").await
    }

    /// Publish under the routing key registered for the envelope's event type.
    ///
    /// `entity_type` and `entity_id` name the affected record in the logs.
    pub async fn publish_event(
        &self,
        envelope: &Envelope,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<()> {
        let route = self.topology.resolve(envelope.event_type())?;
        self.send(&route.routing_key, envelope, entity_type, entity_id)
            .await
    }

    #[tracing::instrument(
        name = "bus.publish",
        skip_all,
        fields(event_type = %envelope.event_type(), routing_key = %routing_key)
    )]
    async fn send(
        &self,
        routing_key: &str,
        envelope: &Envelope,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<()> {
        let event_type = envelope.event_type();
        let message = OutboundMessage {
            exchange: self.topology.main_exchange().name.clone(),
            routing_key: routing_key.to_string(),
            body: envelope.encode()?,
            mandatory: true,
        };

        let max_attempts = self.retry.max_attempts;
        let backoff = publish_backoff(&self.retry).build();
        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            match self.broker.publish(&message).await {
                Ok(()) => {
                    info!(
                        event_type = %event_type,
                        entity_type = %entity_type,
                        entity_id = %entity_id,
                        attempts = attempt + 1,
                        "Event published"
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        event_type = %event_type,
                        entity_id = %entity_id,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Publish attempt failed"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    error!(
                        event_type = %event_type,
                        entity_type = %entity_type,
                        entity_id = %entity_id,
                        error = %e,
                        "Event rejected by broker"
                    );
                    return Err(PublishError::Rejected {
                        event_type: event_type.to_string(),
                        source: e,
                    });
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| BusError::Publish("No publish attempt made".to_string()));
        error!(
            event_type = %event_type,
            entity_type = %entity_type,
            entity_id = %entity_id,
            attempts = max_attempts,
            error = %source,
            "Event not published, retries exhausted"
        );
        Err(PublishError::Exhausted {
            event_type: event_type.to_string(),
            attempts: max_attempts,
            source,
        })
    }
}
