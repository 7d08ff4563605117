//! AMQP (RabbitMQ) broker implementation.
//!
//! Declares the fleet topology (topic main exchange, direct dead-letter
//! exchange, dead-letter queue, main queues with their DLX arguments),
//! publishes with the mandatory flag on a confirm-mode channel, and runs
//! competing consumer workers per bound queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, ConnectionProperties, ExchangeKind as LapinExchangeKind,
};
use tracing::{debug, error, info, warn, Instrument};

use super::{BusError, MessageBroker, OutboundMessage, Result};
use crate::config::AmqpConfig;
use crate::consumer::{Consumer, Settlement, RETRY_COUNT_HEADER};
use crate::topology::{ExchangeKind, ExchangeSpec, QueueArgument, QueueBinding, TopologyRegistry};
use crate::utils::retry::reconnect_backoff;

const CONTENT_TYPE_JSON: &str = "application/json";
const PERSISTENT: u8 = 2;

/// AMQP broker using RabbitMQ.
pub struct AmqpBroker {
    pool: Pool,
    config: AmqpConfig,
    service_name: String,
}

impl AmqpBroker {
    /// Connect to the broker and verify the connection.
    pub async fn connect(config: AmqpConfig, service_name: impl Into<String>) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), ConnectionProperties::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        let broker = Self {
            pool,
            config,
            service_name: service_name.into(),
        };

        // Verify connection
        broker.get_channel().await?;
        info!(url = %broker.config.url, "Connected to AMQP");

        Ok(broker)
    }

    async fn get_channel(&self) -> Result<Channel> {
        get_channel(&self.pool).await
    }
}

async fn get_channel(pool: &Pool) -> Result<Channel> {
    let conn = pool.get().await.map_err(|e: PoolError| {
        BusError::Connection(format!("Failed to get connection from pool: {}", e))
    })?;

    conn.create_channel()
        .await
        .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
}

fn exchange_kind(spec: &ExchangeSpec) -> LapinExchangeKind {
    match spec.kind {
        ExchangeKind::Topic => LapinExchangeKind::Topic,
        ExchangeKind::Direct => LapinExchangeKind::Direct,
    }
}

/// Broker arguments for a main queue.
fn queue_arguments(binding: &QueueBinding) -> FieldTable {
    let mut args = FieldTable::default();
    for (key, value) in binding.arguments() {
        let value = match value {
            QueueArgument::Str(s) => AMQPValue::LongString(s.into()),
            QueueArgument::Int(n) => AMQPValue::LongLongInt(n),
        };
        args.insert(key.into(), value);
    }
    args
}

/// Map a publisher confirm to a result.
fn confirmed(confirm: Confirmation, exchange: &str, routing_key: &str) -> Result<()> {
    match confirm {
        // A returned message is acked after the basic.return.
        Confirmation::Ack(Some(_)) => Err(BusError::Unroutable {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        }),
        Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
        Confirmation::Nack(_) => Err(BusError::Publish("Broker nacked publish".to_string())),
    }
}

/// Redeliveries already made, read from the message headers.
fn retry_count(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers() else {
        return 0;
    };
    match headers.inner().get(RETRY_COUNT_HEADER) {
        Some(AMQPValue::LongLongInt(n)) => u32::try_from(*n).unwrap_or(0),
        Some(AMQPValue::LongInt(n)) => u32::try_from(*n).unwrap_or(0),
        Some(AMQPValue::LongUInt(n)) => *n,
        Some(AMQPValue::ShortInt(n)) => u32::try_from(*n).unwrap_or(0),
        _ => 0,
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn declare(&self, topology: &TopologyRegistry) -> Result<()> {
        let channel = self.get_channel().await?;
        let declare_err = |what: &str, e: lapin::Error| {
            BusError::Declare(format!("Failed to declare {}: {}", what, e))
        };

        for exchange in [topology.main_exchange(), topology.dead_letter_exchange()] {
            channel
                .exchange_declare(
                    &exchange.name,
                    exchange_kind(exchange),
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| declare_err(&exchange.name, e))?;
        }

        let dlq = topology.dead_letter();
        channel
            .queue_declare(
                &dlq.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_err(&dlq.queue, e))?;
        channel
            .queue_bind(
                &dlq.queue,
                &topology.dead_letter_exchange().name,
                &dlq.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_err(&dlq.queue, e))?;

        for binding in topology.queues() {
            channel
                .queue_declare(
                    &binding.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    queue_arguments(binding),
                )
                .await
                .map_err(|e| declare_err(&binding.queue, e))?;
            channel
                .queue_bind(
                    &binding.queue,
                    &topology.main_exchange().name,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| declare_err(&binding.queue, e))?;
        }

        info!(
            exchange = %topology.main_exchange().name,
            dlx = %topology.dead_letter_exchange().name,
            dlq = %dlq.queue,
            queues = topology.queues().len(),
            "Declared AMQP topology"
        );
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        // Fresh channel per publish so a broken channel never sticks.
        let channel = self.get_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to enable confirms: {}", e)))?;

        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_delivery_mode(PERSISTENT);

        let confirm = channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions {
                    mandatory: message.mandatory,
                    ..Default::default()
                },
                &message.body,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        confirmed(confirm, &message.exchange, &message.routing_key)?;
        debug!(
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            "Publish confirmed"
        );
        Ok(())
    }

    async fn start_consuming(&self, binding: QueueBinding, consumer: Arc<Consumer>) -> Result<()> {
        if !consumer.is_subscribed(&binding.queue) {
            return Err(BusError::Subscribe(format!(
                "No handler subscribed on '{}'",
                binding.queue
            )));
        }

        for worker in 0..self.config.consumers_per_queue {
            let pool = self.pool.clone();
            let binding = binding.clone();
            let consumer = Arc::clone(&consumer);
            let tag = format!("{}-{}-{}", self.service_name, binding.queue, worker);
            let prefetch = self.config.prefetch;

            tokio::spawn(async move {
                consume_with_reconnect(pool, binding, consumer, tag, prefetch).await;
            });
        }

        info!(
            queue = %binding.queue,
            workers = self.config.consumers_per_queue,
            "Started consumer workers"
        );
        Ok(())
    }
}

/// Worker loop with automatic reconnection and exponential backoff with jitter.
async fn consume_with_reconnect(
    pool: Pool,
    binding: QueueBinding,
    consumer: Arc<Consumer>,
    tag: String,
    prefetch: u16,
) {
    let backoff_builder = reconnect_backoff();
    let mut backoff_iter = backoff_builder.build();

    loop {
        match setup_consumer(&pool, &binding.queue, &tag, prefetch).await {
            Ok((channel, mut deliveries)) => {
                info!(queue = %binding.queue, consumer = %tag, "Consumer connected");
                backoff_iter = backoff_builder.build();

                while let Some(delivery) = deliveries.next().await {
                    match delivery {
                        Ok(delivery) => {
                            let span = tracing::info_span!(
                                "bus.consume",
                                queue = %binding.queue,
                                routing_key = %delivery.routing_key
                            );
                            process_delivery(&channel, &binding, &consumer, delivery)
                                .instrument(span)
                                .await;
                        }
                        Err(e) => {
                            error!(error = %e, queue = %binding.queue, "Consumer delivery error, will reconnect");
                            break;
                        }
                    }
                }

                info!(queue = %binding.queue, "Consumer stream ended, reconnecting...");
            }
            Err(e) => {
                let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
                error!(
                    error = %e,
                    backoff_ms = %delay.as_millis(),
                    queue = %binding.queue,
                    "Failed to set up consumer, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
        }

        let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
        tokio::time::sleep(delay).await;
    }
}

async fn setup_consumer(
    pool: &Pool,
    queue: &str,
    tag: &str,
    prefetch: u16,
) -> Result<(Channel, lapin::Consumer)> {
    let channel = get_channel(pool).await?;

    // Retry copies are published on this channel and must be confirmed
    // before the original is acked.
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to enable confirms: {}", e)))?;

    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

    let consumer = channel
        .basic_consume(
            queue,
            tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

    Ok((channel, consumer))
}

/// Settle one delivery according to the consumer's verdict.
async fn process_delivery(
    channel: &Channel,
    binding: &QueueBinding,
    consumer: &Consumer,
    delivery: Delivery,
) {
    let retry_count = retry_count(&delivery.properties);

    match consumer.process(binding, &delivery.data, retry_count).await {
        Settlement::Ack => {
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                error!(error = %e, "Failed to ack message");
            }
        }
        Settlement::Retry { next_count } => {
            tokio::time::sleep(Duration::from_millis(binding.retry_delay_ms)).await;

            match requeue(channel, binding, &delivery, next_count).await {
                Ok(()) => {
                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        error!(error = %e, "Failed to ack redelivered message");
                    }
                }
                Err(e) => {
                    warn!(error = %e, queue = %binding.queue, "Redelivery publish failed, dead-lettering");
                    reject(delivery).await;
                }
            }
        }
        Settlement::DeadLetter => reject(delivery).await,
    }
}

/// Publish a copy of `delivery` back onto its queue through the default
/// exchange with the retry count bumped, and wait for the broker to confirm.
async fn requeue(
    channel: &Channel,
    binding: &QueueBinding,
    delivery: &Delivery,
    next_count: u32,
) -> Result<()> {
    let mut headers = delivery.properties.headers().clone().unwrap_or_default();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongLongInt(i64::from(next_count)),
    );
    let properties = delivery.properties.clone().with_headers(headers);

    let confirm = channel
        .basic_publish(
            "",
            &binding.queue,
            BasicPublishOptions {
                mandatory: true,
                ..Default::default()
            },
            &delivery.data,
            properties,
        )
        .await
        .map_err(|e| BusError::Publish(format!("Failed to republish: {}", e)))?
        .await
        .map_err(|e| BusError::Publish(format!("Republish confirmation failed: {}", e)))?;

    confirmed(confirm, "", &binding.queue)
}

// Without requeue the broker routes through x-dead-letter-exchange.
async fn reject(delivery: Delivery) {
    if let Err(e) = delivery
        .reject(BasicRejectOptions { requeue: false })
        .await
    {
        error!(error = %e, "Failed to reject message");
    }
}
