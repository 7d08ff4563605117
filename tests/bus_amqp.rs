//! AMQP/RabbitMQ broker integration tests using testcontainers.
//!
//! Run with: cargo test --test bus_amqp --features amqp -- --nocapture
//!
//! These tests spin up RabbitMQ in a container using testcontainers-rs.
//! No manual RabbitMQ setup required.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::BasicGetOptions;
use lapin::types::AMQPValue;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};
use tokio::sync::mpsc;

use assessment_events::bus::{AmqpBroker, BusError, MessageBroker, OutboundMessage};
use assessment_events::config::{
    AmqpConfig, PublishRetryConfig, TopologyConfig, DEFAULT_SERVICE_NAME,
};
use assessment_events::consumer::{Consumer, EnvelopeHandler, HandlerError, RETRY_COUNT_HEADER};
use assessment_events::envelope::{event_types, Envelope};
use assessment_events::publisher::events::UserEvent;
use assessment_events::publisher::Publisher;
use assessment_events::storage::StorageError;
use assessment_events::topology::TopologyRegistry;

/// Start RabbitMQ container.
///
/// Returns (container, amqp_url) where amqp_url is suitable for AMQP connection.
async fn start_rabbitmq() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("rabbitmq", "3-management")
        .with_exposed_port(5672.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"));

    let container = image
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start rabbitmq container");

    // Brief delay to ensure RabbitMQ is fully ready
    tokio::time::sleep(Duration::from_secs(2)).await;

    let host_port = container
        .get_host_port_ipv4(5672)
        .await
        .expect("Failed to get mapped port");

    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let amqp_url = format!("amqp://guest:guest@{}:{}", host, host_port);

    println!("RabbitMQ available at: {}", amqp_url);

    (container, amqp_url)
}

/// Topology with short redelivery so dead-lettering is observable quickly.
fn topology() -> Arc<TopologyRegistry> {
    let mut config = TopologyConfig::default();
    config.message.max_retries = 2;
    config.message.retry_delay_ms = 100;
    Arc::new(TopologyRegistry::new(&config).expect("Invalid topology"))
}

async fn connect(url: &str) -> Arc<AmqpBroker> {
    let config = AmqpConfig {
        url: url.to_string(),
        consumers_per_queue: 1,
        ..Default::default()
    };
    Arc::new(
        AmqpBroker::connect(config, DEFAULT_SERVICE_NAME)
            .await
            .expect("Failed to connect to RabbitMQ"),
    )
}

fn user_event(user_id: &str) -> UserEvent {
    UserEvent {
        user_id: user_id.to_string(),
        username: format!("user-{user_id}"),
        email: None,
        first_name: None,
        last_name: None,
        role: None,
    }
}

/// Forwards the user id of each envelope it sees.
struct Recording {
    seen: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl EnvelopeHandler for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    fn event_types(&self) -> &[&'static str] {
        &[event_types::USER_CREATED]
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let user_id = envelope
            .get_str("userId")
            .ok_or_else(|| HandlerError::missing(envelope, "userId"))?;
        let _ = self.seen.send(user_id);
        Ok(())
    }
}

/// Fails every delivery with a retryable error.
struct AlwaysFails(AtomicUsize);

#[async_trait]
impl EnvelopeHandler for AlwaysFails {
    fn name(&self) -> &str {
        "always-fails"
    }

    fn event_types(&self) -> &[&'static str] {
        &[event_types::USER_CREATED]
    }

    async fn handle(&self, _envelope: &Envelope) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Database("unavailable".into()).into())
    }
}

async fn start(
    broker: &AmqpBroker,
    topology: &TopologyRegistry,
    queue: &str,
    handler: Arc<dyn EnvelopeHandler>,
) {
    let binding = topology.queue(queue).expect("Queue not in topology").clone();
    let mut consumer = Consumer::new();
    consumer.subscribe(queue, handler);
    broker
        .start_consuming(binding, Arc::new(consumer))
        .await
        .expect("Failed to start consumer");
}

#[tokio::test]
async fn test_amqp_declare_is_idempotent_and_publish_confirms() {
    let (_container, url) = start_rabbitmq().await;
    let topology = topology();
    let broker = connect(&url).await;

    broker.declare(&topology).await.expect("First declare failed");
    broker.declare(&topology).await.expect("Redeclare failed");

    let publisher = Publisher::new(
        broker.clone(),
        topology.clone(),
        DEFAULT_SERVICE_NAME,
        PublishRetryConfig::default(),
    );
    publisher
        .assessment_deleted("a-1")
        .await
        .expect("Confirmed publish failed");
}

#[tokio::test]
async fn test_amqp_unroutable_publish_is_reported() {
    let (_container, url) = start_rabbitmq().await;
    let topology = topology();
    let broker = connect(&url).await;
    broker.declare(&topology).await.unwrap();

    let message = OutboundMessage {
        exchange: topology.main_exchange().name.clone(),
        routing_key: "nobody.listens.here".to_string(),
        body: b"{}".to_vec(),
        mandatory: true,
    };

    let err = broker.publish(&message).await.unwrap_err();
    assert!(matches!(err, BusError::Unroutable { .. }));
}

#[tokio::test]
async fn test_amqp_published_event_reaches_consumer() {
    let (_container, url) = start_rabbitmq().await;
    let topology = topology();
    let broker = connect(&url).await;
    broker.declare(&topology).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    start(
        &broker,
        &topology,
        "user.created.queue",
        Arc::new(Recording { seen: tx }),
    )
    .await;

    let publisher = Publisher::new(
        broker.clone(),
        topology.clone(),
        "microservice-user-role",
        PublishRetryConfig::default(),
    );
    publisher.user_created(&user_event("u-42")).await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("Timed out waiting for delivery")
        .expect("Channel closed");
    assert_eq!(seen, "u-42");
}

#[tokio::test]
async fn test_amqp_failing_handler_dead_letters_after_retries() {
    let (_container, url) = start_rabbitmq().await;
    let topology = topology();
    let broker = connect(&url).await;
    broker.declare(&topology).await.unwrap();

    let handler = Arc::new(AlwaysFails(AtomicUsize::new(0)));
    start(&broker, &topology, "user.created.queue", handler.clone()).await;

    let publisher = Publisher::new(
        broker.clone(),
        topology.clone(),
        "microservice-user-role",
        PublishRetryConfig::default(),
    );
    publisher.user_created(&user_event("u-7")).await.unwrap();

    // One delivery plus two redeliveries, then the DLX takes it.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while handler.0.load(Ordering::SeqCst) < 3 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Handler saw only {} deliveries",
            handler.0.load(Ordering::SeqCst)
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(handler.0.load(Ordering::SeqCst), 3);

    let connection = lapin::Connection::connect(&url, lapin::ConnectionProperties::default())
        .await
        .unwrap();
    let channel = connection.create_channel().await.unwrap();
    let dead = channel
        .basic_get(
            &topology.dead_letter().queue,
            BasicGetOptions { no_ack: true },
        )
        .await
        .unwrap()
        .expect("Nothing on the dead-letter queue");

    // The dead-lettered message is the last confirmed retry copy.
    let headers = dead.delivery.properties.headers().clone().unwrap_or_default();
    assert_eq!(
        headers.inner().get(RETRY_COUNT_HEADER),
        Some(&AMQPValue::LongLongInt(2))
    );

    let envelope = Envelope::decode(&dead.delivery.data).unwrap();
    assert_eq!(envelope.event_type(), event_types::USER_CREATED);
    assert_eq!(envelope.get_str("userId").as_deref(), Some("u-7"));
}
