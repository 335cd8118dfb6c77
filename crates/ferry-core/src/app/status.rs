//! Status - what an operator looks at.

use serde::{Deserialize, Serialize};

use crate::domain::OutboxEntry;
use crate::observability::MetricsSnapshot;

/// Pending backlog, oldest dead letters, and the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxStatus {
    pub pending: usize,
    pub dead_letters: Vec<OutboxEntry>,
    pub metrics: MetricsSnapshot,
}
