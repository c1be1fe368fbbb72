// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Broker client used by the worker pool.
//!
//! Workers only see the [`Broker`] trait: an awaited, acknowledged publish of an opaque payload
//! to a topic. [`KafkaBroker`] implements it on top of `rdkafka`'s `FutureProducer`, which is
//! internally synchronized and can be shared by every worker without a lock.
//!
//! Durability settings live here and nowhere else. Workers never retry: a publish error means
//! the client already spent its own retry budget.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, info, warn};

use crate::errors::{BrokerConnectError, PublishError};

/// Internal send retries performed by the client before a publish fails.
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Upper bound for one publish, retries included.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);
/// How long startup waits for cluster metadata before giving up on the broker list.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Durable position of a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl std::fmt::Display for PublishResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.topic, self.partition, self.offset)
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes `payload` to `topic` without a key and waits for the acknowledgment.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<PublishResult, PublishError>;

    /// Waits for outstanding deliveries, used once on shutdown.
    async fn flush(&self, _timeout: Duration) {}
}

/// Acknowledgments the leader waits for before answering a produce request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequiredAcks {
    None,
    Leader,
    /// Every in-sync replica.
    #[default]
    All,
}

impl RequiredAcks {
    #[must_use]
    pub fn as_config_value(&self) -> &'static str {
        match self {
            Self::None => "0",
            Self::Leader => "1",
            Self::All => "all",
        }
    }
}

/// Producer settings, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub required_acks: RequiredAcks,
    pub max_retries: u32,
    pub client_id: String,
    pub topic: String,
    pub message_timeout: Duration,
    pub connect_timeout: Duration,
    /// Turns on librdkafka debug contexts.
    pub verbose: bool,
}

impl ProducerConfig {
    #[must_use]
    pub fn new(topic: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            required_acks: RequiredAcks::All,
            max_retries: DEFAULT_MAX_RETRIES,
            client_id: client_id.into(),
            topic: topic.into(),
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            verbose: false,
        }
    }

    /// librdkafka configuration for `brokers`.
    ///
    /// On the broker side, `unclean.leader.election.enable=false` and a raised
    /// `min.insync.replicas` on the topic are needed for `acks=all` to mean anything.
    #[must_use]
    pub fn client_config(&self, brokers: &[String]) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers.join(","))
            .set("client.id", &self.client_id)
            .set("acks", self.required_acks.as_config_value())
            .set("message.send.max.retries", self.max_retries.to_string())
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            );

        if self.verbose {
            config
                .set("debug", "broker,topic,msg")
                .set_log_level(RDKafkaLogLevel::Debug);
        } else {
            config.set_log_level(RDKafkaLogLevel::Warning);
        }
        config
    }
}

/// Kafka implementation of [`Broker`].
#[derive(Clone)]
pub struct KafkaBroker {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaBroker {
    /// Creates the producer and checks that at least one broker answers a metadata request
    /// within `config.connect_timeout`.
    pub async fn connect(
        brokers: &[String],
        config: &ProducerConfig,
    ) -> Result<Self, BrokerConnectError> {
        let producer: FutureProducer = config
            .client_config(brokers)
            .create()
            .map_err(BrokerConnectError::Create)?;

        let probe = producer.clone();
        let timeout = config.connect_timeout;
        let metadata = tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| BrokerConnectError::Aborted(e.to_string()))?;

        match metadata {
            Ok(broker_count) => {
                info!(
                    "Connected to Kafka cluster with {} broker(s) as client {}",
                    broker_count, config.client_id
                );
                Ok(Self {
                    producer,
                    queue_timeout: config.message_timeout,
                })
            }
            Err(source) => Err(BrokerConnectError::Unreachable {
                brokers: brokers.join(", "),
                source,
            }),
        }
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<PublishResult, PublishError> {
        // No key: the default partitioner spreads messages over the partitions.
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload);
        match self.producer.send(record, self.queue_timeout).await {
            Ok((partition, offset)) => Ok(PublishResult {
                topic: topic.to_string(),
                partition,
                offset,
            }),
            Err((source, _message)) => Err(PublishError::Kafka {
                topic: topic.to_string(),
                source,
            }),
        }
    }

    async fn flush(&self, timeout: Duration) {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout)).await;
        match flushed {
            Ok(Ok(())) => debug!("Kafka producer flushed"),
            Ok(Err(e)) => warn!("Kafka producer flush incomplete: {}", e),
            Err(e) => warn!("Kafka producer flush aborted: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_durability_settings() {
        let config = ProducerConfig::new("syslog", "syslog-bridge-test");
        let client_config =
            config.client_config(&["kafka-1:9092".to_string(), "kafka-2:9092".to_string()]);

        assert_eq!(
            client_config.get("bootstrap.servers"),
            Some("kafka-1:9092,kafka-2:9092")
        );
        assert_eq!(client_config.get("acks"), Some("all"));
        assert_eq!(client_config.get("message.send.max.retries"), Some("10"));
        assert_eq!(client_config.get("client.id"), Some("syslog-bridge-test"));
        assert_eq!(client_config.get("message.timeout.ms"), Some("30000"));
        assert_eq!(client_config.get("debug"), None);
    }

    #[test]
    fn test_client_config_verbose() {
        let config = ProducerConfig {
            verbose: true,
            max_retries: 3,
            ..ProducerConfig::new("syslog", "id")
        };
        let client_config = config.client_config(&["localhost:9092".to_string()]);

        assert_eq!(client_config.get("debug"), Some("broker,topic,msg"));
        assert_eq!(client_config.get("message.send.max.retries"), Some("3"));
    }

    #[test]
    fn test_required_acks_values() {
        assert_eq!(RequiredAcks::default(), RequiredAcks::All);
        assert_eq!(RequiredAcks::None.as_config_value(), "0");
        assert_eq!(RequiredAcks::Leader.as_config_value(), "1");
        assert_eq!(RequiredAcks::All.as_config_value(), "all");
    }

    #[test]
    fn test_publish_result_display() {
        let result = PublishResult {
            topic: "syslog".to_string(),
            partition: 3,
            offset: 42,
        };
        assert_eq!(result.to_string(), "syslog/3/42");
    }
}
