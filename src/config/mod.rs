//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables. The loaded
//! value is immutable and handed to the topology registry, publisher and
//! consumer at startup.

mod messaging;

pub use messaging::{
    AmqpConfig, DeadLetterConfig, ExchangeConfig, MessageConfig, MessagingConfig,
    PublishRetryConfig, QueueConfig, TopologyConfig,
};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ASSESSMENT_EVENTS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ASSESSMENT_EVENTS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ASSESSMENT_EVENTS_LOG";

/// Service name used when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "microservice-assessment-feedback";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Identity of the running service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Origin service identifier stamped on every envelope and used to pick
    /// the queues this process consumes.
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend: `sqlite` or `memory`.
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Database file path (sqlite only).
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "sqlite".to_string(),
            path: "./data/assessment-events.db".to_string(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service identity.
    pub service: ServiceConfig,
    /// Broker connection, topology and publish retry policy.
    pub messaging: MessagingConfig,
    /// Persistence backend.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the process misbehave later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service.name must not be empty".into()));
        }
        if self.messaging.publish.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "messaging.publish.max_attempts must be at least 1".into(),
            ));
        }
        if self.messaging.amqp.consumers_per_queue == 0 {
            return Err(ConfigError::Invalid(
                "messaging.amqp.consumers_per_queue must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                storage_type: "memory".to_string(),
                path: String::new(),
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.service.name, DEFAULT_SERVICE_NAME);
        assert_eq!(config.messaging.amqp.url, "amqp://localhost:5672");
        assert_eq!(config.messaging.publish.max_attempts, 3);
        assert_eq!(config.messaging.publish.backoff_ms, 1000);
        assert_eq!(config.storage.storage_type, "sqlite");
    }

    #[test]
    fn test_config_for_test_uses_memory_storage() {
        let config = Config::for_test();
        assert_eq!(config.storage.storage_type, "memory");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.messaging.publish.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_deserialize_partial_yaml() {
        let yaml = r#"
service:
  name: microservice-user-role
messaging:
  publish:
    backoff_ms: 250
"#;
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from_str(yaml, ::config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.service.name, "microservice-user-role");
        assert_eq!(config.messaging.publish.backoff_ms, 250);
        assert_eq!(config.messaging.publish.max_attempts, 3);
        assert_eq!(config.messaging.topology.exchange.main, "unimol.exchange");
    }
}
