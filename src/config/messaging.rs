//! Messaging, topology and publish retry configuration types.

use serde::Deserialize;

use crate::topology::routing_keys;

/// Default dead-letter routing key shared by every main queue.
pub const DEFAULT_DEAD_LETTER_ROUTING_KEY: &str = "dlq";
/// Default message TTL: 24 hours.
pub const DEFAULT_MESSAGE_TTL_MS: u32 = 86_400_000;
/// Default broker-level redelivery budget per message.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default pause before a failed message is redelivered.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

const ASSESSMENT_FEEDBACK: &str = "microservice-assessment-feedback";

/// Messaging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Broker connection settings.
    pub amqp: AmqpConfig,
    /// Exchange/queue topology shared fleet-wide.
    pub topology: TopologyConfig,
    /// Publisher retry policy.
    pub publish: PublishRetryConfig,
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Unacknowledged deliveries allowed per consumer channel.
    pub prefetch: u16,
    /// Competing consumer workers started per bound queue.
    pub consumers_per_queue: usize,
    /// Maximum pooled connections.
    pub pool_size: usize,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            prefetch: 10,
            consumers_per_queue: 2,
            pool_size: 10,
        }
    }
}

/// Publisher retry policy: fixed attempts with a fixed pause between them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishRetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Pause between attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

/// Exchange names.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Durable topic exchange every domain event is published to.
    pub main: String,
    /// Durable direct dead-letter exchange.
    pub dlx: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            main: "unimol.exchange".to_string(),
            dlx: "unimol.dlx".to_string(),
        }
    }
}

/// Dead-letter queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// The single dead-letter queue of this service.
    pub queue: String,
    /// Routing key binding the dead-letter queue to the DLX.
    pub routing_key: String,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            queue: "assessments.dlq".to_string(),
            routing_key: DEFAULT_DEAD_LETTER_ROUTING_KEY.to_string(),
        }
    }
}

/// Per-message broker arguments applied to every main queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// `x-message-ttl` in milliseconds.
    pub ttl_ms: u32,
    /// `x-max-retries`: redeliveries before dead-lettering.
    pub max_retries: u32,
    /// `x-retry-delay` in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_MESSAGE_TTL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// One durable queue bound to the main exchange.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Queue name.
    pub name: String,
    /// Exact routing key the queue is bound with.
    pub routing_key: String,
    /// Services that consume this queue.
    #[serde(default)]
    pub consumers: Vec<String>,
}

impl QueueConfig {
    fn new(name: &str, routing_key: &str, consumers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            routing_key: routing_key.to_string(),
            consumers: consumers.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Full topology description.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub exchange: ExchangeConfig,
    pub dead_letter: DeadLetterConfig,
    pub message: MessageConfig,
    pub queues: Vec<QueueConfig>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        use routing_keys::*;

        let published = [
            (ASSESSMENT_CREATED, ASSESSMENT_CREATED),
            (ASSESSMENT_UPDATED, ASSESSMENT_UPDATED),
            (ASSESSMENT_DELETED, ASSESSMENT_DELETED),
            (FEEDBACK_CREATED, FEEDBACK_CREATED),
            (FEEDBACK_UPDATED, FEEDBACK_UPDATED),
            (FEEDBACK_DELETED, FEEDBACK_DELETED),
            (SURVEY_COMPLETED, SURVEY_COMPLETED),
            (SURVEY_RESPONSE_SUBMITTED, SURVEY_RESPONSE_SUBMITTED),
            (SURVEY_RESPONSES_BULK_SUBMITTED, SURVEY_RESPONSES_BULK_SUBMITTED),
            (SURVEY_RESULTS_REQUESTED, SURVEY_RESULTS_REQUESTED),
            (SURVEY_COMMENTS_REQUESTED, SURVEY_COMMENTS_REQUESTED),
        ];

        let consumed = [
            ("assignment.submitted", ASSIGNMENT_SUBMITTED),
            ("assignment.created.queue", ASSIGNMENT_CREATED),
            ("assignment.updated.queue", ASSIGNMENT_UPDATED),
            ("teacher.created", TEACHER_CREATED),
            ("student.created", STUDENT_CREATED),
            ("user.created.queue", USER_CREATED),
            ("user.updated.queue", USER_UPDATED),
            ("user.deleted.queue", USER_DELETED),
            ("role.assigned.queue", ROLE_ASSIGNED),
        ];

        // Declared for the fleet; no handler in this service yet.
        let parked = [
            ("exam.completed", EXAM_COMPLETED),
            ("exam.grade.registered", EXAM_GRADE_REGISTERED),
            ("course.created", COURSE_CREATED),
            ("course.deleted", COURSE_DELETED),
        ];

        let queues = published
            .iter()
            .map(|(name, key)| QueueConfig::new(name, key, &[]))
            .chain(
                consumed
                    .iter()
                    .map(|(name, key)| QueueConfig::new(name, key, &[ASSESSMENT_FEEDBACK])),
            )
            .chain(parked.iter().map(|(name, key)| QueueConfig::new(name, key, &[])))
            .collect();

        Self {
            exchange: ExchangeConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            message: MessageConfig::default(),
            queues,
        }
    }
}
