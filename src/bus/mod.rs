//! Broker transport.
//!
//! This module contains:
//! - `MessageBroker` trait: topology declaration, confirmed publish, consumption
//! - `OutboundMessage`: an encoded envelope addressed to an exchange
//! - Implementations: AMQP (RabbitMQ), Mock

use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::Consumer;
use crate::topology::{QueueBinding, TopologyRegistry};

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use mock::MockBroker;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("No queue bound for '{routing_key}' on exchange '{exchange}'")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    #[error("Topology declaration failed: {0}")]
    Declare(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}

impl BusError {
    /// Connectivity failures worth another attempt.
    ///
    /// An unroutable mandatory message stays unroutable until the topology
    /// changes, so it is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Connection(_) | BusError::Publish(_))
    }
}

/// An encoded envelope ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Ask the broker to report the message back when no queue is bound.
    pub mandatory: bool,
}

/// Interface to the external message broker.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via AMQP with publisher confirms
/// - `MockBroker`: In-memory routing for tests
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare exchanges, queues, bindings and the dead-letter wiring.
    ///
    /// Idempotent; called once at startup.
    async fn declare(&self, topology: &TopologyRegistry) -> Result<()>;

    /// Publish one message and wait for the broker confirmation.
    async fn publish(&self, message: &OutboundMessage) -> Result<()>;

    /// Start delivering messages from `binding.queue` to `consumer`.
    ///
    /// Returns once the workers are running; delivery continues in the
    /// background until the process stops.
    async fn start_consuming(&self, binding: QueueBinding, consumer: Arc<Consumer>)
        -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BusError::Connection("reset".into()).is_transient());
        assert!(BusError::Publish("nack".into()).is_transient());
        assert!(!BusError::Unroutable {
            exchange: "unimol.exchange".into(),
            routing_key: "nowhere".into(),
        }
        .is_transient());
        assert!(!BusError::Declare("precondition failed".into()).is_transient());
    }
}
