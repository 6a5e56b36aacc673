// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Per-endpoint exponential back-off (§4.6.6): shared by the aggregator
//! and every provider node.

use std::time::{Duration, Instant};

/// `BASE_BACKOFF_MS` from §6: the unit back-off duration before exponential
/// scaling.
const BASE_BACKOFF_MS: u64 = 5000;

/// The failure-count exponent is capped at this value (§6, §4.6.6).
const MAX_FAILURE_EXPONENT: u32 = 8;

/// The back-off state for one endpoint (§3 `BackoffState`).
#[derive(Debug, Clone, Copy)]
pub struct BackoffState {
    failure_count: u32,
    ends_at: Option<Instant>,
}

impl Default for BackoffState {
    fn default() -> Self {
        BackoffState { failure_count: 0, ends_at: None }
    }
}

impl BackoffState {
    /// A freshly-constructed, never-failed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if this endpoint may currently be selected: either it has
    /// never failed, or its back-off window has elapsed. Per the
    /// resolved convention (§9), eligibility is `ends_at <= now`.
    pub fn is_eligible(&self, now: Instant) -> bool {
        match self.ends_at {
            Some(ends_at) => ends_at <= now,
            None => true,
        }
    }

    /// Record a failure: increment the failure count and set a new,
    /// non-decreasing `ends_at` (I8).
    pub fn record_failure(&mut self, now: Instant) {
        let exponent = self.failure_count.min(MAX_FAILURE_EXPONENT);
        self.failure_count = self.failure_count.saturating_add(1);
        let backoff_ms = BASE_BACKOFF_MS.saturating_mul(1u64 << exponent);
        self.ends_at = Some(now + Duration::from_millis(backoff_ms));
    }

    /// Clear the back-off state after a successful call.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.ends_at = None;
    }

    /// The number of consecutive failures recorded so far.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}
