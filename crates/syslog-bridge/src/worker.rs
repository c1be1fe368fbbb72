// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size pool of publishing workers.
//!
//! Each worker loops: claim a record from the dispatch channel, encode it, publish it and wait
//! for the acknowledgment. One publish is in flight per worker, so a worker's own publishes
//! stay in order while different workers may overtake each other.
//!
//! A failed encode or publish is logged and the record dropped. It never ends the loop. The
//! loop ends only when the channel is closed and drained.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::broker::{Broker, PublishResult};
use crate::dispatch::DispatchReceiver;
use crate::record::{Envelope, LogRecord};
use crate::stats::PipelineStats;

/// Per-record settings shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub topic: String,
    /// Print each decoded record to stdout
    pub echo: bool,
    /// Print each encoded JSON payload to stdout
    pub json: bool,
}

/// Result of processing one record.
#[derive(Debug)]
pub enum Outcome {
    Published(PublishResult),
    SerializeFailed,
    PublishFailed,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `size` workers consuming from `receiver`. The pool is never resized.
    #[must_use]
    pub fn spawn(
        size: usize,
        receiver: DispatchReceiver,
        broker: Arc<dyn Broker>,
        config: Arc<WorkerConfig>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let handles = (0..size)
            .map(|id| {
                let worker = Worker {
                    id,
                    receiver: receiver.clone(),
                    broker: Arc::clone(&broker),
                    config: Arc::clone(&config),
                    stats: Arc::clone(&stats),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        debug!("Started {} publish workers", size);
        WorkerPool { handles }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Waits until every worker has drained the channel and stopped.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Publish worker terminated abnormally: {}", e);
            }
        }
    }
}

struct Worker {
    id: usize,
    receiver: DispatchReceiver,
    broker: Arc<dyn Broker>,
    config: Arc<WorkerConfig>,
    stats: Arc<PipelineStats>,
}

impl Worker {
    async fn run(self) {
        trace!("Worker {} waiting for records", self.id);
        while let Some(record) = self.receiver.recv().await {
            self.process(record).await;
        }
        debug!("Worker {} stopped, dispatch channel closed", self.id);
    }

    async fn process(&self, record: LogRecord) -> Outcome {
        if self.config.echo {
            println!("{record}");
        }

        let envelope = match Envelope::encode(&record) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.serialize_failed();
                error!("Worker {}: {}. Record from {} dropped", self.id, e, record.client);
                return Outcome::SerializeFailed;
            }
        };

        if self.config.json {
            println!("{}", envelope.as_str());
        }

        match self
            .broker
            .publish(&self.config.topic, envelope.as_bytes())
            .await
        {
            Ok(result) => {
                self.stats.record_published();
                debug!("Worker {}: record stored at {}", self.id, result);
                Outcome::Published(result)
            }
            Err(e) => {
                self.stats.publish_failed();
                error!(
                    "Worker {}: failed to publish record from {}: {}",
                    self.id, record.client, e
                );
                Outcome::PublishFailed
            }
        }
    }
}
