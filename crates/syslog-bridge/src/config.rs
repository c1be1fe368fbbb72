// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::broker::ProducerConfig;
use crate::decoder::DEFAULT_MAX_MESSAGE_SIZE;
use crate::dispatch::{OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
use crate::errors::ConfigError;
use crate::util::default_client_id;

pub const DEFAULT_ADDR: &str = "0.0.0.0:514";
pub const DEFAULT_TOPIC: &str = "syslog";
pub const DEFAULT_WORKERS: usize = 6;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Immutable bridge configuration, built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address both the UDP and the TCP listener bind to
    pub addr: String,
    /// Kafka bootstrap endpoints
    pub brokers: Vec<String>,
    /// Producer durability settings and target topic
    pub producer: ProducerConfig,
    /// Fixed number of publishing workers
    pub workers: usize,
    /// Dispatch queue depth
    pub queue_capacity: usize,
    /// What the listener does when the queue is full
    pub overflow: OverflowPolicy,
    /// Largest accepted frame in bytes
    pub max_message_size: usize,
    /// Print each decoded record to stdout
    pub echo: bool,
    /// Print each encoded JSON payload to stdout
    pub json: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Upper bound for the drain phase on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            brokers: Vec::new(),
            producer: ProducerConfig::new(DEFAULT_TOPIC, default_client_id()),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            echo: false,
            json: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.producer.topic
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.iter().all(|broker| broker.trim().is_empty()) {
            return Err(ConfigError::MissingBrokers);
        }

        if self.producer.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }

        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMaxMessageSize);
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BridgeConfig {
        BridgeConfig {
            brokers: vec!["localhost:9092".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.addr, "0.0.0.0:514");
        assert_eq!(config.topic(), "syslog");
        assert_eq!(config.workers, 6);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.overflow, OverflowPolicy::Block);
        assert_eq!(config.producer.max_retries, 10);
    }

    #[test]
    fn test_valid_config() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_validate_missing_brokers() {
        assert_eq!(
            BridgeConfig::default().validate(),
            Err(ConfigError::MissingBrokers)
        );

        let config = BridgeConfig {
            brokers: vec!["  ".to_string()],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingBrokers));
    }

    #[test]
    fn test_validate_empty_topic() {
        let mut config = valid_config();
        config.producer.topic = " ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyTopic));
    }

    #[test]
    fn test_validate_zero_workers() {
        let config = BridgeConfig {
            workers: 0,
            ..valid_config()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoWorkers));
    }

    #[test]
    fn test_validate_zero_capacity() {
        let config = BridgeConfig {
            queue_capacity: 0,
            ..valid_config()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueCapacity));
    }

    #[test]
    fn test_validate_zero_message_size() {
        let config = BridgeConfig {
            max_message_size: 0,
            ..valid_config()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxMessageSize));
    }

    #[test]
    fn test_validate_log_levels() {
        for level in VALID_LOG_LEVELS {
            let config = BridgeConfig {
                log_level: level.to_string(),
                ..valid_config()
            };
            assert!(config.validate().is_ok());
        }

        let config = BridgeConfig {
            log_level: "verbose".to_string(),
            ..valid_config()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }
}
