//! Outbox counters and the pending gauge.
//!
//! Values are kept locally (for `snapshot()` and tests) and mirrored to the
//! `metrics` facade, so whatever exporter the host installs sees them too.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

pub const CREATED_TOTAL: &str = "ferry_outbox_created_total";
pub const CAPTURE_ERRORS_TOTAL: &str = "ferry_outbox_capture_errors_total";
pub const RELAYED_TOTAL: &str = "ferry_outbox_relayed_total";
pub const FAILED_TOTAL: &str = "ferry_outbox_failed_attempts_total";
pub const DEAD_LETTERED_TOTAL: &str = "ferry_outbox_dead_lettered_total";
pub const PENDING: &str = "ferry_outbox_pending";

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub capture_errors: u64,
    pub relayed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub pending: u64,
}

#[derive(Debug, Default)]
pub struct OutboxMetrics {
    created: AtomicU64,
    capture_errors: AtomicU64,
    relayed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    pending: AtomicU64,
}

impl OutboxMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        counter!(CREATED_TOTAL).increment(1);
    }

    pub fn capture_failed(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
        counter!(CAPTURE_ERRORS_TOTAL).increment(1);
    }

    pub fn relayed(&self, n: u64) {
        self.relayed.fetch_add(n, Ordering::Relaxed);
        counter!(RELAYED_TOTAL).increment(n);
    }

    pub fn failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
        counter!(FAILED_TOTAL).increment(n);
    }

    pub fn dead_lettered(&self, n: u64) {
        self.dead_lettered.fetch_add(n, Ordering::Relaxed);
        counter!(DEAD_LETTERED_TOTAL).increment(n);
    }

    pub fn set_pending(&self, n: u64) {
        self.pending.store(n, Ordering::Relaxed);
        gauge!(PENDING).set(n as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}
