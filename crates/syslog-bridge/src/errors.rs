// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for every stage of the bridge.
//!
//! Startup errors ([`ConfigError`], [`BindError`], [`BrokerConnectError`]) are fatal to the
//! process. Per-record errors ([`DecodeError`], [`SerializationError`], [`PublishError`]) are
//! logged by the stage that hits them and the record is dropped.

use std::net::SocketAddr;

use derive_more::Display;

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no Kafka brokers configured")]
    MissingBrokers,
    #[error("topic cannot be empty")]
    EmptyTopic,
    #[error("worker pool size must be greater than 0")]
    NoWorkers,
    #[error("queue capacity must be greater than 0")]
    ZeroQueueCapacity,
    #[error("max message size must be greater than 0")]
    ZeroMaxMessageSize,
    #[error("invalid log level '{0}'. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
    #[error("unknown overflow policy '{0}'. Must be one of: block, drop_newest")]
    UnknownOverflowPolicy(String),
}

/// Network transport a socket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Transport {
    #[display("udp")]
    Udp,
    #[display("tcp")]
    Tcp,
}

/// The listener could not bind one of its sockets.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind {transport} socket on {addr}: {source}")]
pub struct BindError {
    pub transport: Transport,
    pub addr: String,
    #[source]
    pub source: std::io::Error,
}

/// The listener stopped because its receive or accept loop failed.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("{transport} listener on {addr} failed: {source}")]
    Io {
        transport: Transport,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("listener task aborted: {0}")]
    Aborted(String),
}

/// The bridge could not be started.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Every consumer of the dispatch channel is gone.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
#[error("dispatch channel is closed")]
pub struct ChannelClosed;

/// A raw frame could not be turned into a record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty syslog frame")]
    Empty,
    #[error("syslog frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    Oversized { size: usize, max: usize },
}

/// A record could not be encoded into its envelope.
#[derive(Debug, thiserror::Error)]
#[error("failed to serialize log record: {0}")]
pub struct SerializationError(#[from] pub serde_json::Error);

/// The broker client could not reach any configured broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerConnectError {
    #[error("failed to create Kafka producer: {0}")]
    Create(#[source] rdkafka::error::KafkaError),
    #[error("no broker in [{brokers}] reachable: {source}")]
    Unreachable {
        brokers: String,
        #[source]
        source: rdkafka::error::KafkaError,
    },
    #[error("broker connectivity check was aborted: {0}")]
    Aborted(String),
}

/// The broker rejected a message or the client gave up after its retry budget.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Kafka rejected message for topic {topic}: {source}")]
    Kafka {
        topic: String,
        #[source]
        source: rdkafka::error::KafkaError,
    },
    #[error("publish to topic {topic} failed: {reason}")]
    Rejected { topic: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::MissingBrokers.to_string(),
            "no Kafka brokers configured"
        );
        assert_eq!(
            ConfigError::InvalidLogLevel("loud".to_string()).to_string(),
            "invalid log level 'loud'. Must be one of: trace, debug, info, warn, error"
        );
    }

    #[test]
    fn test_bind_error_names_transport() {
        let error = BindError {
            transport: Transport::Tcp,
            addr: "0.0.0.0:514".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        let message = error.to_string();
        assert!(message.starts_with("failed to bind tcp socket on 0.0.0.0:514"));
    }

    #[test]
    fn test_decode_error_oversized() {
        let error = DecodeError::Oversized {
            size: 9000,
            max: 8192,
        };
        assert_eq!(
            error.to_string(),
            "frame of 9000 bytes exceeds the 8192 byte limit"
        );
    }
}
