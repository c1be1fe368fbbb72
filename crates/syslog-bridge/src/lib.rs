// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog to Kafka bridge.
//!
//! Receives RFC 3164 syslog over UDP and TCP, turns each frame into a structured
//! [`record::LogRecord`] and publishes it as JSON to a Kafka topic through a fixed pool of
//! workers. Publishes wait for acknowledgment from every in-sync replica.
//!
//! - [`listener`]: socket intake and TCP framing
//! - [`decoder`]: RFC 3164 parsing
//! - [`dispatch`]: bounded handoff with an explicit overflow policy
//! - [`worker`]: the publishing pool
//! - [`broker`]: the Kafka producer behind the [`broker::Broker`] trait
//! - [`bridge`]: startup and graceful shutdown

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod bridge;
pub mod broker;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod errors;
pub mod listener;
pub mod record;
pub mod stats;
pub mod util;
pub mod worker;

pub use bridge::{BridgeStatus, RunningBridge, SyslogBridge};
pub use broker::{Broker, KafkaBroker, ProducerConfig, PublishResult};
pub use config::BridgeConfig;
pub use record::{Envelope, LogRecord};
