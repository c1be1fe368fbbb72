// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the listener, the dispatch channel and the worker pool together.
//!
//! Startup order: validate the configuration, create the channel, bind the listener and start
//! the workers. Shutdown runs the other way round: the listener stops taking frames and drops
//! its senders, the workers drain the channel, then the broker client is flushed. All three
//! steps together are bounded by [`BridgeConfig::shutdown_timeout`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::config::BridgeConfig;
use crate::decoder::Rfc3164Decoder;
use crate::dispatch;
use crate::errors::{ListenerError, StartError};
use crate::listener::{Listener, ListenerConfig, ListenerHandle};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::worker::{WorkerConfig, WorkerPool};

/// Status of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    /// Accepting frames and publishing records.
    Running,
    /// Intake stopped, workers draining.
    Draining,
    /// Everything stopped.
    Stopped,
}

pub struct SyslogBridge {
    config: BridgeConfig,
    broker: Arc<dyn Broker>,
}

impl SyslogBridge {
    #[must_use]
    pub fn new(config: BridgeConfig, broker: Arc<dyn Broker>) -> Self {
        Self { config, broker }
    }

    /// Binds the sockets and starts the worker pool.
    ///
    /// Fails without starting anything if the configuration is invalid or a socket cannot be
    /// bound. The bridge stops when `cancel_token` is cancelled or [`RunningBridge::stop`] is
    /// called.
    pub async fn start(self, cancel_token: CancellationToken) -> Result<RunningBridge, StartError> {
        self.config.validate()?;

        let stats = Arc::new(PipelineStats::new());
        let (sender, receiver) = dispatch::channel(
            self.config.queue_capacity,
            self.config.overflow,
            Arc::clone(&stats),
        )?;

        let listener = Listener::bind(
            &ListenerConfig {
                addr: self.config.addr.clone(),
                max_message_size: self.config.max_message_size,
            },
            Arc::new(Rfc3164Decoder::new(self.config.max_message_size)),
            sender,
            Arc::clone(&stats),
            cancel_token.clone(),
        )
        .await?;

        let pool = WorkerPool::spawn(
            self.config.workers,
            receiver,
            Arc::clone(&self.broker),
            Arc::new(WorkerConfig {
                topic: self.config.topic().to_string(),
                echo: self.config.echo,
                json: self.config.json,
            }),
            Arc::clone(&stats),
        );

        let listener = listener.spawn().await;
        info!(
            "Forwarding syslog to topic {} with {} workers (queue capacity {}, overflow {})",
            self.config.topic(),
            pool.size(),
            self.config.queue_capacity,
            self.config.overflow
        );

        Ok(RunningBridge {
            listener,
            pool,
            broker: self.broker,
            stats,
            status: Arc::new(RwLock::new(BridgeStatus::Running)),
            config: self.config,
            cancel_token,
        })
    }
}

/// Handle to a started bridge.
pub struct RunningBridge {
    listener: ListenerHandle,
    pool: WorkerPool,
    broker: Arc<dyn Broker>,
    stats: Arc<PipelineStats>,
    status: Arc<RwLock<BridgeStatus>>,
    config: BridgeConfig,
    cancel_token: CancellationToken,
}

impl RunningBridge {
    #[must_use]
    pub fn udp_addr(&self) -> SocketAddr {
        self.listener.udp_addr()
    }

    #[must_use]
    pub fn tcp_addr(&self) -> SocketAddr {
        self.listener.tcp_addr()
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn status(&self) -> BridgeStatus {
        *self.status.read().await
    }

    /// Stops intake. Use [`RunningBridge::wait`] to drain.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Runs until the bridge is stopped, then drains the workers and flushes the broker.
    ///
    /// Everything after the stop (listener exit, worker drain, flush) shares one
    /// `shutdown_timeout` budget. Whatever is still pending when it runs out is abandoned.
    ///
    /// Returns the final counters, or the error that stopped the listener. The drain happens
    /// in both cases.
    pub async fn wait(self) -> Result<StatsSnapshot, ListenerError> {
        let shutdown_timeout = self.config.shutdown_timeout;

        let listener = self.listener.wait();
        tokio::pin!(listener);
        // A failing listener cancels the token itself, so both paths start the clock.
        let stopped_early = tokio::select! {
            result = &mut listener => Some(result),
            () = self.cancel_token.cancelled() => None,
        };
        let deadline = Instant::now() + shutdown_timeout;

        let listener_result = match stopped_early {
            Some(result) => result,
            None => match timeout_at(deadline, listener).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Listener did not stop within {:?}", shutdown_timeout);
                    Ok(())
                }
            },
        };
        *self.status.write().await = BridgeStatus::Draining;
        debug!("Syslog intake stopped, draining workers");

        if timeout_at(deadline, self.pool.join()).await.is_err() {
            warn!(
                "Workers did not drain within {:?}, records still queued are lost",
                shutdown_timeout
            );
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if timeout_at(deadline, self.broker.flush(remaining))
            .await
            .is_err()
        {
            warn!("Broker flush did not finish within {:?}", shutdown_timeout);
        }

        *self.status.write().await = BridgeStatus::Stopped;
        let snapshot = self.stats.snapshot();
        info!(
            "Bridge stopped: {} frames received, {} enqueued, {} published, {} publish failures, {} dropped on overflow, {} abandoned on shutdown, {} decode failures",
            snapshot.frames_received,
            snapshot.enqueued,
            snapshot.published,
            snapshot.publish_failures,
            snapshot.overflow_dropped,
            snapshot.shutdown_dropped,
            snapshot.decode_failures + snapshot.oversized_frames
        );

        listener_result.map(|()| snapshot)
    }
}
