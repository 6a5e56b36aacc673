// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Telemetry buffers (C8, §4.8): in-memory FIFO records of cache,
//! prefetch, and inflight hits, drained into the tail of each aggregator
//! dispatch (or a best-effort beacon on shutdown).

use crate::wire::structures::{ClientTail, TelemetryHit};

/// The three telemetry buffers the engine accumulates hits into between
/// aggregator dispatches.
#[derive(Debug, Default)]
pub struct TelemetryBuffer {
    cache_hits: Vec<TelemetryHit>,
    prefetch_hits: Vec<TelemetryHit>,
    inflight_hits: Vec<TelemetryHit>,
}

impl TelemetryBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response-cache hit.
    pub fn record_cache_hit(&mut self, hit: TelemetryHit) {
        self.cache_hits.push(hit);
    }

    /// Record a hit served by a predicted (prefetched) entry.
    pub fn record_prefetch_hit(&mut self, hit: TelemetryHit) {
        self.prefetch_hits.push(hit);
    }

    /// Record a hit served by joining an in-flight request.
    pub fn record_inflight_hit(&mut self, hit: TelemetryHit) {
        self.inflight_hits.push(hit);
    }

    /// Drain all three buffers into a [`ClientTail`] ready to encode.
    pub fn drain(&mut self) -> ClientTail {
        ClientTail {
            cache_hits: std::mem::take(&mut self.cache_hits),
            prefetch_hits: std::mem::take(&mut self.prefetch_hits),
            inflight_hits: std::mem::take(&mut self.inflight_hits),
        }
    }

    /// Restore a previously-drained tail back into the buffers, in front
    /// of anything recorded since (so nothing observed while a dispatch
    /// was in flight gets lost), used when an aggregator dispatch fails
    /// and the telemetry must be retried on the next attempt (§4.6.4, §4.8).
    pub fn restore(&mut self, tail: ClientTail) {
        prepend(&mut self.cache_hits, tail.cache_hits);
        prepend(&mut self.prefetch_hits, tail.prefetch_hits);
        prepend(&mut self.inflight_hits, tail.inflight_hits);
    }

    /// `true` if every buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.cache_hits.is_empty() && self.prefetch_hits.is_empty() && self.inflight_hits.is_empty()
    }
}

fn prepend(buffer: &mut Vec<TelemetryHit>, mut older: Vec<TelemetryHit>) {
    older.append(buffer);
    *buffer = older;
}
