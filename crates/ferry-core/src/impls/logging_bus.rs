//! LoggingBus - "deliver" by writing the envelope to the log.
//!
//! Useful for local runs without a broker. It is a bus implementation on
//! purpose: the relay keeps owning selection and bookkeeping.

use async_trait::async_trait;
use tracing::info;

use crate::domain::{EventEnvelope, PublishError};
use crate::ports::{MessageBus, PublishAck};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingBus;

impl LoggingBus {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageBus for LoggingBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<PublishAck, PublishError> {
        let body = serde_json::to_string(envelope)
            .map_err(|e| PublishError::Serialization(e.to_string()))?;
        info!(topic, partition_key, event_id = %envelope.id, %body, "event published");
        Ok(PublishAck::default())
    }
}
