// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock brokers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use syslog_bridge::broker::{Broker, PublishResult};
use syslog_bridge::errors::PublishError;
use syslog_bridge::LogRecord;

/// Accepts every publish and keeps the payloads.
///
/// `fail_on` lists the call indexes (0-based) that fail, as if the client had used up its
/// retries. `delay` slows every publish down and `hang` makes every publish and
/// flush wait forever.
#[derive(Default)]
pub struct MockBroker {
    calls: AtomicUsize,
    fail_on: HashSet<usize>,
    delay: Option<Duration>,
    hang: bool,
    payloads: Mutex<Vec<Vec<u8>>>,
    pub flushes: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// A broker that never acknowledges anything.
    pub fn hung() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Published payloads decoded back into records.
    pub fn records(&self) -> Vec<LogRecord> {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap())
            .collect()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<PublishResult, PublishError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.contains(&call) {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "leader not available after 10 retries".to_string(),
            });
        }

        let mut payloads = self.payloads.lock().unwrap();
        payloads.push(payload.to_vec());
        Ok(PublishResult {
            topic: topic.to_string(),
            partition: 0,
            offset: i64::try_from(payloads.len() - 1).unwrap(),
        })
    }

    async fn flush(&self, _timeout: Duration) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
    }
}

/// Polls `condition` every 10ms until it holds, panicking after 5 seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5 seconds"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
