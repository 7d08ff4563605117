//! Topology registry.
//!
//! Single source of truth for the exchange/queue/routing-key layout shared by
//! every service in the fleet:
//!
//! ```text
//!                       ┌───────────────────── unimol.exchange (topic) ─────────────────────┐
//!  publish(rk) ───────▶ │  assessment.created ─▶ assessment.created                         │
//!                       │  user.created       ─▶ user.created.queue        ...              │
//!                       └───────────────────────────────────────────────────────────────────┘
//!                                     │ x-dead-letter-exchange / x-message-ttl
//!                                     ▼
//!                       unimol.dlx (direct) ── "dlq" ──▶ assessments.dlq
//! ```
//!
//! The registry is built once at startup from [`TopologyConfig`] and never
//! mutated afterwards. Misconfiguration is reported by [`TopologyRegistry::new`].

pub mod routing_keys;

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::config::TopologyConfig;

/// Queue argument naming the dead-letter exchange.
pub const X_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument naming the dead-letter routing key.
pub const X_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Queue argument holding the message TTL in milliseconds.
pub const X_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument holding the redelivery budget.
pub const X_MAX_RETRIES: &str = "x-max-retries";
/// Queue argument holding the pause before redelivery in milliseconds.
pub const X_RETRY_DELAY: &str = "x-retry-delay";

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Errors raised while building or querying the topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Missing exchange name: {0}")]
    MissingExchange(&'static str),

    #[error("Missing dead-letter queue name")]
    MissingDeadLetterQueue,

    #[error("Queue at position {0} has no name")]
    MissingQueueName(usize),

    #[error("Queue '{0}' has no routing key")]
    MissingRoutingKey(String),

    #[error("Queue '{0}' declared more than once")]
    DuplicateQueue(String),

    #[error("No queue bound for routing key '{routing_key}' (event type {event_type})")]
    UnboundRoute {
        event_type: &'static str,
        routing_key: &'static str,
    },

    #[error("No route for event type '{0}'")]
    UnknownEventType(String),
}

/// Exchange routing kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
    Direct,
}

/// A durable exchange declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
}

/// Where an event type is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub exchange: String,
    pub routing_key: String,
}

/// Broker-level queue argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueArgument {
    Str(String),
    Int(i64),
}

/// A durable main queue with its binding and dead-letter wiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: String,
    pub dead_letter_exchange: String,
    pub dead_letter_routing_key: String,
    pub message_ttl_ms: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    consumers: Vec<String>,
}

impl QueueBinding {
    /// Arguments passed to the broker when the queue is declared.
    pub fn arguments(&self) -> Vec<(&'static str, QueueArgument)> {
        vec![
            (
                X_DEAD_LETTER_EXCHANGE,
                QueueArgument::Str(self.dead_letter_exchange.clone()),
            ),
            (
                X_DEAD_LETTER_ROUTING_KEY,
                QueueArgument::Str(self.dead_letter_routing_key.clone()),
            ),
            (X_MESSAGE_TTL, QueueArgument::Int(self.message_ttl_ms as i64)),
            (X_MAX_RETRIES, QueueArgument::Int(self.max_retries as i64)),
            (X_RETRY_DELAY, QueueArgument::Int(self.retry_delay_ms as i64)),
        ]
    }

    /// Whether `service` consumes this queue.
    pub fn is_consumed_by(&self, service: &str) -> bool {
        self.consumers.iter().any(|c| c == service)
    }
}

/// The dead-letter queue and the key it is bound with on the DLX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterSpec {
    pub queue: String,
    pub routing_key: String,
}

/// Immutable, process-wide topology.
#[derive(Debug, Clone)]
pub struct TopologyRegistry {
    main_exchange: ExchangeSpec,
    dead_letter_exchange: ExchangeSpec,
    dead_letter: DeadLetterSpec,
    queues: Vec<QueueBinding>,
    routes: HashMap<&'static str, &'static str>,
}

impl TopologyRegistry {
    /// Build and validate the registry.
    pub fn new(config: &TopologyConfig) -> Result<Self> {
        if config.exchange.main.trim().is_empty() {
            return Err(TopologyError::MissingExchange("main"));
        }
        if config.exchange.dlx.trim().is_empty() {
            return Err(TopologyError::MissingExchange("dlx"));
        }
        if config.dead_letter.queue.trim().is_empty() {
            return Err(TopologyError::MissingDeadLetterQueue);
        }

        let mut seen = HashSet::new();
        let mut queues = Vec::with_capacity(config.queues.len());
        for (position, queue) in config.queues.iter().enumerate() {
            if queue.name.trim().is_empty() {
                return Err(TopologyError::MissingQueueName(position));
            }
            if queue.routing_key.trim().is_empty() {
                return Err(TopologyError::MissingRoutingKey(queue.name.clone()));
            }
            if !seen.insert(queue.name.as_str()) {
                return Err(TopologyError::DuplicateQueue(queue.name.clone()));
            }

            // Every main queue dead-letters into the service DLX.
            queues.push(QueueBinding {
                queue: queue.name.clone(),
                routing_key: queue.routing_key.clone(),
                dead_letter_exchange: config.exchange.dlx.clone(),
                dead_letter_routing_key: config.dead_letter.routing_key.clone(),
                message_ttl_ms: config.message.ttl_ms,
                max_retries: config.message.max_retries,
                retry_delay_ms: config.message.retry_delay_ms,
                consumers: queue.consumers.clone(),
            });
        }

        // Mandatory publishes must always find a queue.
        for &(event_type, routing_key) in routing_keys::EVENT_ROUTES {
            if !queues.iter().any(|q| q.routing_key == routing_key) {
                return Err(TopologyError::UnboundRoute {
                    event_type,
                    routing_key,
                });
            }
        }

        let registry = Self {
            main_exchange: ExchangeSpec {
                name: config.exchange.main.clone(),
                kind: ExchangeKind::Topic,
            },
            dead_letter_exchange: ExchangeSpec {
                name: config.exchange.dlx.clone(),
                kind: ExchangeKind::Direct,
            },
            dead_letter: DeadLetterSpec {
                queue: config.dead_letter.queue.clone(),
                routing_key: config.dead_letter.routing_key.clone(),
            },
            queues,
            routes: routing_keys::EVENT_ROUTES.iter().copied().collect(),
        };

        info!(
            exchange = %registry.main_exchange.name,
            dlx = %registry.dead_letter_exchange.name,
            queues = registry.queues.len(),
            "Topology registry built"
        );

        Ok(registry)
    }

    /// Exchange and routing key for publishing `event_type`.
    pub fn resolve(&self, event_type: &str) -> Result<Route> {
        let routing_key = self
            .routes
            .get(event_type)
            .ok_or_else(|| TopologyError::UnknownEventType(event_type.to_string()))?;

        Ok(Route {
            exchange: self.main_exchange.name.clone(),
            routing_key: (*routing_key).to_string(),
        })
    }

    /// Queues `service` consumes, with their dead-letter wiring.
    pub fn bound_queues(&self, service: &str) -> Vec<QueueBinding> {
        self.queues
            .iter()
            .filter(|q| q.is_consumed_by(service))
            .cloned()
            .collect()
    }

    /// Every main queue, consumed here or not.
    pub fn queues(&self) -> &[QueueBinding] {
        &self.queues
    }

    /// Look up a queue by name.
    pub fn queue(&self, name: &str) -> Option<&QueueBinding> {
        self.queues.iter().find(|q| q.queue == name)
    }

    pub fn main_exchange(&self) -> &ExchangeSpec {
        &self.main_exchange
    }

    pub fn dead_letter_exchange(&self) -> &ExchangeSpec {
        &self.dead_letter_exchange
    }

    pub fn dead_letter(&self) -> &DeadLetterSpec {
        &self.dead_letter
    }
}
