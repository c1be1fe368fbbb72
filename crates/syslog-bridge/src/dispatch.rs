// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Handoff between the listener and the worker pool.
//!
//! A bounded channel with one producer family (the UDP loop and the TCP connection tasks all
//! hold clones of the same [`DispatchSender`]) and N competing consumers. Each record is
//! delivered to exactly one worker.
//!
//! What happens when every worker is busy and the queue is full is an explicit
//! [`OverflowPolicy`]:
//!
//! - `Block` waits for space. For UDP the receive loop stalls, so further datagrams are dropped
//!   by the kernel once the socket buffer fills. Those losses are not visible to the bridge.
//! - `DropNewest` keeps the receive loop running and drops the record that did not fit.
//!
//! The channel closes when every sender is dropped; workers then drain what is left and stop.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::warn;

use crate::errors::{ChannelClosed, ConfigError};
use crate::record::LogRecord;
use crate::stats::PipelineStats;

/// Queue depth used when none is configured. One slot keeps the handoff close to unbuffered.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Parsed from `block` (alias `backpressure`) or `drop_newest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait until a worker frees a slot (back-pressure).
    #[default]
    Block,
    /// Drop the incoming record and keep reading.
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" | "backpressure" => Ok(Self::Block),
            "drop_newest" | "drop-newest" | "drop" => Ok(Self::DropNewest),
            other => Err(ConfigError::UnknownOverflowPolicy(other.to_string())),
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::DropNewest => write!(f, "drop_newest"),
        }
    }
}

/// What happened to a dispatched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Enqueued,
    Dropped,
}

/// Producer side, cheap to clone.
#[derive(Clone)]
pub struct DispatchSender {
    tx: mpsc::Sender<LogRecord>,
    policy: OverflowPolicy,
    stats: Arc<PipelineStats>,
}

/// Consumer side, shared by every worker.
#[derive(Clone)]
pub struct DispatchReceiver {
    rx: Arc<TokioMutex<mpsc::Receiver<LogRecord>>>,
}

/// Creates the dispatch channel. `capacity` must be at least 1.
pub fn channel(
    capacity: usize,
    policy: OverflowPolicy,
    stats: Arc<PipelineStats>,
) -> Result<(DispatchSender, DispatchReceiver), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::ZeroQueueCapacity);
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((
        DispatchSender { tx, policy, stats },
        DispatchReceiver {
            rx: Arc::new(TokioMutex::new(rx)),
        },
    ))
}

impl DispatchSender {
    /// Hands one record to the worker pool according to the overflow policy.
    ///
    /// The enqueue is counted before the record becomes visible to workers, so the
    /// `enqueued` counter never trails the outcome counters.
    pub async fn dispatch(&self, record: LogRecord) -> Result<Dispatched, ChannelClosed> {
        match self.policy {
            OverflowPolicy::Block => {
                let permit = self.tx.reserve().await.map_err(|_| ChannelClosed)?;
                self.stats.record_enqueued();
                permit.send(record);
                Ok(Dispatched::Enqueued)
            }
            OverflowPolicy::DropNewest => match self.tx.try_reserve() {
                Ok(permit) => {
                    self.stats.record_enqueued();
                    permit.send(record);
                    Ok(Dispatched::Enqueued)
                }
                Err(mpsc::error::TrySendError::Full(())) => {
                    self.stats.record_overflowed();
                    warn!(
                        "Dispatch queue full, dropping record from {} ({})",
                        record.client, record.tag
                    );
                    Ok(Dispatched::Dropped)
                }
                Err(mpsc::error::TrySendError::Closed(())) => Err(ChannelClosed),
            },
        }
    }

    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl DispatchReceiver {
    /// Claims the next record, waiting if none is queued.
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    pub async fn recv(&self) -> Option<LogRecord> {
        self.rx.lock().await.recv().await
    }
}
