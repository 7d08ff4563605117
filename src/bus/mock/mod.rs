//! In-memory broker for testing.
//!
//! Routes by exact routing key from the declared topology, honours the
//! mandatory flag, and settles deliveries with the same redelivery policy
//! as the AMQP broker. Deliveries are processed when [`MockBroker::pump`]
//! is called, so tests control when consumers run.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{BusError, MessageBroker, OutboundMessage, Result};
use crate::consumer::{Consumer, Settlement};
use crate::topology::{QueueBinding, TopologyRegistry};

#[derive(Debug, Clone)]
struct Pending {
    body: Vec<u8>,
    retry_count: u32,
}

/// A message that reached the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub body: Vec<u8>,
    pub retry_count: u32,
}

#[derive(Default)]
struct Routing {
    /// (exchange, routing key) → queues
    bindings: HashMap<(String, String), Vec<String>>,
}

/// Mock broker for testing.
#[derive(Default)]
pub struct MockBroker {
    routing: RwLock<Routing>,
    queues: RwLock<HashMap<String, VecDeque<Pending>>>,
    consumers: RwLock<Vec<(QueueBinding, Arc<Consumer>)>>,
    published: RwLock<Vec<OutboundMessage>>,
    attempts: RwLock<Vec<Instant>>,
    dead_letters: RwLock<Vec<DeadLetter>>,
    fail_next: RwLock<usize>,
    fail_on_publish: RwLock<bool>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish until cleared.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Fail the next `count` publishes, then recover.
    pub async fn fail_next_publishes(&self, count: usize) {
        *self.fail_next.write().await = count;
    }

    /// Publish attempts seen so far, successful or not.
    pub async fn publish_attempts(&self) -> Vec<Instant> {
        self.attempts.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Messages waiting on `queue`.
    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.queues
            .read()
            .await
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().await.clone()
    }

    /// Put a raw body straight onto a queue, bypassing the exchange.
    pub async fn inject(&self, queue: &str, body: impl Into<Vec<u8>>) {
        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(Pending {
                body: body.into(),
                retry_count: 0,
            });
    }

    /// Deliver queued messages to their consumers until every consumed
    /// queue is empty. Returns the number of deliveries made.
    pub async fn pump(&self) -> usize {
        let consumers = self.consumers.read().await.clone();
        let mut delivered = 0;

        loop {
            let mut progressed = false;
            for (binding, consumer) in &consumers {
                let next = self
                    .queues
                    .write()
                    .await
                    .get_mut(&binding.queue)
                    .and_then(VecDeque::pop_front);
                let Some(pending) = next else {
                    continue;
                };
                progressed = true;
                delivered += 1;

                match consumer.process(binding, &pending.body, pending.retry_count).await {
                    Settlement::Ack => {}
                    Settlement::Retry { next_count } => {
                        self.queues
                            .write()
                            .await
                            .entry(binding.queue.clone())
                            .or_default()
                            .push_back(Pending {
                                body: pending.body,
                                retry_count: next_count,
                            });
                    }
                    Settlement::DeadLetter => {
                        self.dead_letters.write().await.push(DeadLetter {
                            queue: binding.queue.clone(),
                            body: pending.body,
                            retry_count: pending.retry_count,
                        });
                    }
                }
            }
            if !progressed {
                return delivered;
            }
        }
    }

    async fn should_fail(&self) -> bool {
        if *self.fail_on_publish.read().await {
            return true;
        }
        let mut remaining = self.fail_next.write().await;
        if *remaining > 0 {
            *remaining -= 1;
            return true;
        }
        false
    }
}

#[async_trait]
impl MessageBroker for MockBroker {
    async fn declare(&self, topology: &TopologyRegistry) -> Result<()> {
        let mut routing = self.routing.write().await;
        let mut queues = self.queues.write().await;
        let exchange = topology.main_exchange().name.clone();

        for binding in topology.queues() {
            let bound = routing
                .bindings
                .entry((exchange.clone(), binding.routing_key.clone()))
                .or_default();
            if !bound.contains(&binding.queue) {
                bound.push(binding.queue.clone());
            }
            queues.entry(binding.queue.clone()).or_default();
        }
        queues.entry(topology.dead_letter().queue.clone()).or_default();
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        self.attempts.write().await.push(Instant::now());

        if self.should_fail().await {
            return Err(BusError::Connection("Mock broker unreachable".to_string()));
        }

        let targets = self
            .routing
            .read()
            .await
            .bindings
            .get(&(message.exchange.clone(), message.routing_key.clone()))
            .cloned()
            .unwrap_or_default();

        if targets.is_empty() && message.mandatory {
            return Err(BusError::Unroutable {
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
            });
        }

        let mut queues = self.queues.write().await;
        for queue in targets {
            queues.entry(queue).or_default().push_back(Pending {
                body: message.body.clone(),
                retry_count: 0,
            });
        }
        self.published.write().await.push(message.clone());
        Ok(())
    }

    async fn start_consuming(&self, binding: QueueBinding, consumer: Arc<Consumer>) -> Result<()> {
        if !self.queues.read().await.contains_key(&binding.queue) {
            return Err(BusError::Subscribe(format!(
                "Queue '{}' not declared",
                binding.queue
            )));
        }
        self.consumers.write().await.push((binding, consumer));
        Ok(())
    }
}
