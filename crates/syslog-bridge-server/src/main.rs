// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use syslog_bridge::broker::DEFAULT_MAX_RETRIES;
use syslog_bridge::config::{DEFAULT_ADDR, DEFAULT_LOG_LEVEL, DEFAULT_TOPIC, DEFAULT_WORKERS};
use syslog_bridge::decoder::DEFAULT_MAX_MESSAGE_SIZE;
use syslog_bridge::dispatch::{OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
use syslog_bridge::util::{default_client_id, parse_broker_list};
use syslog_bridge::{BridgeConfig, KafkaBroker, ProducerConfig, SyslogBridge};

/// Forwards syslog messages received over UDP and TCP to a Kafka topic
#[derive(Parser, Debug)]
#[command(name = "syslog-bridge-server", version, about, long_about = None)]
struct Cli {
    /// Address to listen on for syslog over UDP and TCP
    #[arg(long, env = "SYSLOG_BRIDGE_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Comma separated list of Kafka brokers
    #[arg(long, env = "KAFKA_PEERS")]
    brokers: Option<String>,

    /// Kafka topic records are published to
    #[arg(long, env = "SYSLOG_BRIDGE_TOPIC", default_value = DEFAULT_TOPIC)]
    topic: String,

    /// Turn on Kafka client debug logging
    #[arg(long)]
    verbose: bool,

    /// Print every decoded record to stdout
    #[arg(long)]
    echo: bool,

    /// Print every JSON payload to stdout before publishing it
    #[arg(long)]
    json: bool,

    /// Number of publishing workers
    #[arg(long, env = "SYSLOG_BRIDGE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Depth of the queue between the listener and the workers
    #[arg(long, env = "SYSLOG_BRIDGE_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// What to do when the queue is full (block, drop_newest)
    #[arg(long, env = "SYSLOG_BRIDGE_OVERFLOW", default_value_t = OverflowPolicy::Block)]
    overflow: OverflowPolicy,

    /// Send retries performed by the Kafka client before a record is dropped
    #[arg(long, env = "SYSLOG_BRIDGE_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Client id reported to the brokers [default: syslog-bridge-<hostname>]
    #[arg(long, env = "SYSLOG_BRIDGE_CLIENT_ID")]
    client_id: Option<String>,

    /// Largest accepted syslog frame, in bytes
    #[arg(long, env = "SYSLOG_BRIDGE_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SYSLOG_BRIDGE_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
}

impl Cli {
    fn into_config(self, brokers: Vec<String>) -> BridgeConfig {
        let client_id = self.client_id.unwrap_or_else(default_client_id);
        BridgeConfig {
            addr: self.addr,
            brokers,
            producer: ProducerConfig {
                max_retries: self.max_retries,
                verbose: self.verbose,
                ..ProducerConfig::new(self.topic, client_id)
            },
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            overflow: self.overflow,
            max_message_size: self.max_message_size,
            echo: self.echo,
            json: self.json,
            log_level: self.log_level.to_lowercase(),
            ..Default::default()
        }
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    let brokers = parse_broker_list(cli.brokers.as_deref().unwrap_or_default());
    if brokers.is_empty() {
        eprintln!("No Kafka brokers given, set --brokers or KAFKA_PEERS\n");
        if let Err(e) = Cli::command().print_help() {
            eprintln!("{e}");
        }
        return ExitCode::FAILURE;
    }

    let config = cli.into_config(brokers);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = init_logging(&config.log_level, config.producer.verbose) {
        eprintln!("Failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    info!("Kafka brokers: {}", config.brokers.join(", "));
    let broker = match KafkaBroker::connect(&config.brokers, &config.producer).await {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            error!("Failed to start Kafka producer: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel_token = CancellationToken::new();
    let bridge = match SyslogBridge::new(config, broker)
        .start(cancel_token.clone())
        .await
    {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("Failed to start syslog listener: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining");
        cancel_token.cancel();
    });

    match bridge.wait().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Syslog listener failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let rdkafka_level = if verbose { "debug" } else { log_level };
    let env_filter = format!("rdkafka={rdkafka_level},{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter)?)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
