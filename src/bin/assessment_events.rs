//! Assessment events service binary.
//!
//! Declares the fleet topology, then consumes every queue bound to this
//! service until interrupted. Built only with the `amqp` feature.

use std::sync::Arc;

use tracing::{error, info};

use assessment_events::bus::{AmqpBroker, MessageBroker};
use assessment_events::config::Config;
use assessment_events::consumer::handlers::{subscribe_all, AssignmentHandler, UserHandler};
use assessment_events::consumer::{Consumer, EnvelopeHandler};
use assessment_events::publisher::Publisher;
use assessment_events::storage::init_storage;
use assessment_events::topology::TopologyRegistry;
use assessment_events::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let service_name = config.service.name.clone();

    info!(service = %service_name, "Starting assessment events service");
    info!(
        "Storage: {} at {}",
        config.storage.storage_type, config.storage.path
    );

    let topology = Arc::new(TopologyRegistry::new(&config.messaging.topology)?);
    let storage = init_storage(&config.storage).await?;
    info!("Storage initialized");

    let broker = connect(&config).await?;
    broker.declare(&topology).await?;
    info!(
        exchange = %topology.main_exchange().name,
        queues = topology.queues().len(),
        "Topology declared"
    );

    let publisher = Arc::new(Publisher::new(
        broker.clone(),
        topology.clone(),
        service_name.clone(),
        config.messaging.publish.clone(),
    ));

    let handlers: Vec<Arc<dyn EnvelopeHandler>> = vec![
        Arc::new(AssignmentHandler::new(
            storage.assessments.clone(),
            publisher.clone(),
        )),
        Arc::new(UserHandler::new(storage.profiles.clone())),
    ];

    let bindings = topology.bound_queues(&service_name);
    let mut consumer = Consumer::new();
    let subscribed = subscribe_all(&mut consumer, &bindings, &handlers);
    let consumer = Arc::new(consumer);

    for binding in bindings {
        if !consumer.is_subscribed(&binding.queue) {
            continue;
        }
        let queue = binding.queue.clone();
        broker
            .start_consuming(binding, consumer.clone())
            .await
            .map_err(|e| {
                error!(queue = %queue, error = %e, "Failed to start consumer");
                e
            })?;
    }
    info!(subscriptions = subscribed, "Consumers running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

async fn connect(config: &Config) -> Result<Arc<dyn MessageBroker>, Box<dyn std::error::Error>> {
    let broker =
        AmqpBroker::connect(config.messaging.amqp.clone(), config.service.name.clone()).await?;
    info!(url = %config.messaging.amqp.url, "Connected to broker");
    Ok(Arc::new(broker))
}
