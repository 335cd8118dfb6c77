//! EventCapture - the narrow write API business code uses to enqueue events.
//!
//! # Transaction contract
//! Each append is its own atomic store operation. It is *not* enlisted in the
//! caller's unit of work:
//! - if the caller's work later rolls back, the event may still be relayed
//!   (it records that the attempt happened)
//! - if the append fails, the caller's work carries on
//!
//! Capture never fails loudly. Invalid input, serialization errors and store
//! errors are logged, counted in `capture_errors`, and reported as `None`.
//! Downstream consumers must therefore tolerate duplicate and orphan events.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::domain::{
    AggregateId, AggregateType, CaptureError, EntryId, EventType, OutboxEntry,
};
use crate::observability::OutboxMetrics;
use crate::ports::{Clock, IdGenerator, OutboxStore};

pub const OLD_VALUE_KEY: &str = "oldValue";
pub const NEW_VALUE_KEY: &str = "newValue";
pub const TENANT_KEY: &str = "tenantId";

/// An event about to be appended.
///
/// Values are serialized as they are attached; the first failure is kept and
/// reported when the event is recorded.
///
/// ```rust,ignore
/// let event = NewEvent::new("User", user.id.to_string(), "PASSWORD_RESET_REQUESTED")
///     .tenant(tenant_id)
///     .new_value(&user_view)
///     .field("resetLink", &link);
/// capture.record(event).await;
/// ```
#[derive(Debug)]
pub struct NewEvent {
    aggregate_type: String,
    aggregate_id: AggregateId,
    event_type: String,
    payload: Map<String, Value>,
    error: Option<serde_json::Error>,
}

impl NewEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<AggregateId>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload: Map::new(),
            error: None,
        }
    }

    /// Snapshot before the change, under `oldValue`.
    pub fn old_value<T: Serialize + ?Sized>(self, value: &T) -> Self {
        self.field(OLD_VALUE_KEY, value)
    }

    /// Snapshot after the change, under `newValue`.
    pub fn new_value<T: Serialize + ?Sized>(self, value: &T) -> Self {
        self.field(NEW_VALUE_KEY, value)
    }

    /// Owning tenant, passed explicitly by the caller.
    pub fn tenant(self, tenant_id: impl Into<String>) -> Self {
        let tenant_id: String = tenant_id.into();
        self.field(TENANT_KEY, &tenant_id)
    }

    /// Any extra payload field (e.g. template variables).
    pub fn field<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serde_json::to_value(value) {
            Ok(v) => {
                self.payload.insert(key.to_string(), v);
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    fn validate(self) -> Result<ValidEvent, CaptureError> {
        if let Some(e) = self.error {
            return Err(CaptureError::Serialization(e));
        }
        let aggregate_type = AggregateType::try_new(self.aggregate_type)?;
        let event_type = EventType::try_new(self.event_type)?;
        if self.aggregate_id.as_str().trim().is_empty() {
            return Err(CaptureError::InvalidInput("aggregate_id must not be empty".into()));
        }
        let payload = serde_json::to_string(&Value::Object(self.payload))?;
        Ok(ValidEvent {
            aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type,
            payload,
        })
    }
}

struct ValidEvent {
    aggregate_type: AggregateType,
    aggregate_id: AggregateId,
    event_type: EventType,
    payload: String,
}

#[derive(Clone)]
pub struct EventCapture {
    store: Arc<dyn OutboxStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<OutboxMetrics>,
}

impl EventCapture {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<OutboxMetrics>,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            metrics,
        }
    }

    /// Append one event with optional before/after snapshots.
    ///
    /// Returns the new entry id, or `None` if the append was dropped.
    /// The two snapshots may be of different types; pass `()` for an
    /// absent side, e.g. `save_event::<(), _>(.., None, Some(&user))`.
    pub async fn save_event<O: Serialize, N: Serialize>(
        &self,
        aggregate_type: &str,
        aggregate_id: impl Into<AggregateId>,
        event_type: &str,
        old_value: Option<O>,
        new_value: Option<N>,
    ) -> Option<EntryId> {
        let mut event = NewEvent::new(aggregate_type, aggregate_id, event_type);
        if let Some(old) = &old_value {
            event = event.old_value(old);
        }
        if let Some(new) = &new_value {
            event = event.new_value(new);
        }
        self.record(event).await
    }

    /// Append a fully built event. See the module docs for failure handling.
    pub async fn record(&self, event: NewEvent) -> Option<EntryId> {
        let aggregate_type = event.aggregate_type.clone();
        let event_type = event.event_type.clone();
        match self.try_record(event).await {
            Ok(id) => {
                self.metrics.entry_created();
                debug!(entry_id = %id, %aggregate_type, %event_type, "outbox entry captured");
                Some(id)
            }
            Err(err) => {
                self.metrics.capture_failed();
                error!(%aggregate_type, %event_type, error = %err, "outbox capture dropped");
                None
            }
        }
    }

    async fn try_record(&self, event: NewEvent) -> Result<EntryId, CaptureError> {
        let valid = event.validate()?;
        let id = self.ids.generate_entry_id();
        let entry = OutboxEntry::new(
            id,
            valid.aggregate_type,
            valid.aggregate_id,
            valid.event_type,
            valid.payload,
            self.clock.now(),
        );
        self.store.insert(entry).await?;
        Ok(id)
    }
}
