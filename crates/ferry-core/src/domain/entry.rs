use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::CaptureError;
use super::ids::EntryId;

/// Semantic category of the originating domain object (e.g. `User`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateType(String);

impl AggregateType {
    pub fn try_new(s: impl Into<String>) -> Result<Self, CaptureError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(CaptureError::InvalidInput("aggregate_type must not be empty".into()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Symbolic event name (e.g. `PASSWORD_RESET_REQUESTED`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn try_new(s: impl Into<String>) -> Result<Self, CaptureError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(CaptureError::InvalidInput("event_type must not be empty".into()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the aggregate instance an event concerns.
///
/// Kept as text: it doubles as the bus partition key and the envelope subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AggregateId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AggregateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Relay-facing state of an entry.
///
/// Transitions:
/// - Pending -> RetryPending -> ... -> DeadLettered
/// - Pending/RetryPending -> (row deleted) on successful publish
///
/// There is no transition out of `DeadLettered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    /// Never attempted.
    Pending,

    /// Failed at least once, still within the retry budget.
    RetryPending,

    /// Retry budget used up but not flagged (e.g. `max_retries` was lowered).
    /// Not selectable.
    Exhausted,

    /// Terminal; waits for an operator.
    DeadLettered,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryState::DeadLettered)
    }

    /// Eligible for relay selection?
    pub fn is_selectable(self) -> bool {
        matches!(self, EntryState::Pending | EntryState::RetryPending)
    }
}

/// One durable outbox row.
///
/// Everything except `retry_count` and `dead_letter` is fixed at capture.
/// Both mutable fields only move forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    id: EntryId,
    aggregate_type: AggregateType,
    aggregate_id: AggregateId,
    event_type: EventType,
    payload: String,
    created_at: DateTime<Utc>,
    retry_count: u32,
    dead_letter: bool,
}

impl OutboxEntry {
    /// A fresh entry as produced by capture.
    pub fn new(
        id: EntryId,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        event_type: EventType,
        payload: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            aggregate_type,
            aggregate_id,
            event_type,
            payload,
            created_at,
            retry_count: 0,
            dead_letter: false,
        }
    }

    /// Rebuild an entry from a stored row (for store implementations).
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: EntryId,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        event_type: EventType,
        payload: String,
        created_at: DateTime<Utc>,
        retry_count: u32,
        dead_letter: bool,
    ) -> Self {
        Self {
            retry_count,
            dead_letter,
            ..Self::new(id, aggregate_type, aggregate_id, event_type, payload, created_at)
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Serialized JSON payload.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_dead_letter(&self) -> bool {
        self.dead_letter
    }

    /// Count one failed publish attempt.
    pub fn record_failed_attempt(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Flag as dead-lettered. There is no way back within this crate.
    pub fn mark_dead_letter(&mut self) {
        self.dead_letter = true;
    }

    pub fn state(&self, max_retries: u32) -> EntryState {
        if self.dead_letter {
            EntryState::DeadLettered
        } else if self.retry_count >= max_retries {
            EntryState::Exhausted
        } else if self.retry_count == 0 {
            EntryState::Pending
        } else {
            EntryState::RetryPending
        }
    }

    /// `dead_letter = false AND retry_count < max_retries`.
    pub fn is_selectable(&self, max_retries: u32) -> bool {
        self.state(max_retries).is_selectable()
    }
}
