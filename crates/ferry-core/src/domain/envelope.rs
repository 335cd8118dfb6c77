//! EventEnvelope - the bus-neutral wrapper handed to the message bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EventId;

/// Self-describing envelope around a domain payload.
///
/// Consumers route on `type`/`source` without a schema registry.
/// `id` is fresh per delivery attempt and differs from the outbox entry id,
/// so a bus with producer-side dedup can key on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub subject: String,
    /// Envelope construction time, not the entry's `created_at`.
    pub time: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
