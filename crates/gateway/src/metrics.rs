//! Process-scope monotonic counters.
//!
//! Written from request paths, read by the status surface. Counters only
//! ever go up and never block; relaxed ordering is enough because readers
//! only need eventually-consistent totals.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters for the lifetime of the process.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    streaming_requests: AtomicU64,
    upstream_errors: AtomicU64,
    fallback_attempts: AtomicU64,
    continuation_rounds: AtomicU64,
    tool_executions: AtomicU64,
    tool_failures: AtomicU64,
    tool_timeouts: AtomicU64,
    tool_rate_limited: AtomicU64,
    tool_truncations: AtomicU64,
}

impl Metrics {
    pub fn record_request(&self, streaming: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if streaming {
            self.streaming_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_attempt(&self) {
        self.fallback_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_continuation_round(&self) {
        self.continuation_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_execution(&self, success: bool) {
        self.tool_executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_tool_timeout(&self) {
        self.tool_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_rate_limited(&self) {
        self.tool_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_truncation(&self) {
        self.tool_truncations.fetch_add(1, Ordering::Relaxed);
    }

    /// A consistent-enough snapshot for the status surface.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            streaming_requests: self.streaming_requests.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            fallback_attempts: self.fallback_attempts.load(Ordering::Relaxed),
            continuation_rounds: self.continuation_rounds.load(Ordering::Relaxed),
            tool_executions: self.tool_executions.load(Ordering::Relaxed),
            tool_failures: self.tool_failures.load(Ordering::Relaxed),
            tool_timeouts: self.tool_timeouts.load(Ordering::Relaxed),
            tool_rate_limited: self.tool_rate_limited.load(Ordering::Relaxed),
            tool_truncations: self.tool_truncations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub streaming_requests: u64,
    pub upstream_errors: u64,
    pub fallback_attempts: u64,
    pub continuation_rounds: u64,
    pub tool_executions: u64,
    pub tool_failures: u64,
    pub tool_timeouts: u64,
    pub tool_rate_limited: u64,
    pub tool_truncations: u64,
}
