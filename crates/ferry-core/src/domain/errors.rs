//! Errors and their operational classification.

use std::time::Duration;

use thiserror::Error;

use super::ids::EntryId;

/// How an error should be treated by the relay.
///
/// - Transient: worth retrying (network blip, timeout)
/// - Permanent: retrying will not help (malformed payload, broker rejection)
/// - Infrastructure: the outbox store itself is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Failure of the outbox store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("outbox store unavailable: {0}")]
    Unavailable(String),

    #[error("entry {0} already exists")]
    DuplicateId(EntryId),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Infrastructure
    }
}

/// Typed failure returned by a bus client.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("rejected by broker: {0}")]
    Rejected(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Network(_) | PublishError::Timeout(_) => ErrorKind::Transient,
            PublishError::Serialization(_) | PublishError::Rejected(_) => ErrorKind::Permanent,
        }
    }
}

/// An outbox row that cannot be turned into an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("stored payload of {id} is not valid JSON: {source}")]
    MalformedPayload {
        id: EntryId,
        #[source]
        source: serde_json::Error,
    },
}

impl EnvelopeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Permanent
    }
}

/// Reasons an append was dropped. Never surfaced to the business caller.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid event: {0}")]
    InvalidInput(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A relay tick that could not complete.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("tick aborted: {0}")]
    Store(#[from] StoreError),
}
