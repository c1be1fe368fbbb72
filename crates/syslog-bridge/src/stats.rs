// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lock-free counters shared by the listener and the worker pool.
//!
//! Every record that enters the dispatch channel ends in exactly one of `published`,
//! `serialize_failures` or `publish_failures`, so once the pool has drained
//! [`StatsSnapshot::processed`] equals [`StatsSnapshot::enqueued`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_received: AtomicU64,
    decode_failures: AtomicU64,
    oversized_frames: AtomicU64,
    enqueued: AtomicU64,
    overflow_dropped: AtomicU64,
    shutdown_dropped: AtomicU64,
    published: AtomicU64,
    serialize_failures: AtomicU64,
    publish_failures: AtomicU64,
    connections_active: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub decode_failures: u64,
    pub oversized_frames: u64,
    pub enqueued: u64,
    pub overflow_dropped: u64,
    /// Decoded records abandoned because shutdown began while they waited for a queue slot.
    pub shutdown_dropped: u64,
    pub published: u64,
    pub serialize_failures: u64,
    pub publish_failures: u64,
    pub connections_active: u64,
}

impl StatsSnapshot {
    /// Records that left the pipeline, successfully or not.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.published + self.serialize_failures + self.publish_failures
    }
}

impl PipelineStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            oversized_frames: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            overflow_dropped: AtomicU64::new(0),
            shutdown_dropped: AtomicU64::new(0),
            published: AtomicU64::new(0),
            serialize_failures: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn oversized_frame(&self) {
        self.oversized_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_overflowed(&self) {
        self.overflow_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_abandoned(&self) {
        self.shutdown_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn serialize_failed(&self) {
        self.serialize_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            shutdown_dropped: self.shutdown_dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            serialize_failures: self.serialize_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
        }
    }
}
