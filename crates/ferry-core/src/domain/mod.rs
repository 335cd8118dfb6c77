//! Domain model (ids, outbox entry, envelope, errors, topic naming).

pub mod entry;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod topic;

pub use entry::{AggregateId, AggregateType, EntryState, EventType, OutboxEntry};
pub use envelope::EventEnvelope;
pub use errors::{CaptureError, EnvelopeError, ErrorKind, PublishError, RelayError, StoreError};
pub use ids::{EntryId, EventId, RelayId};
pub use topic::topic_for;
