//! ferry-core
//!
//! Transactional outbox: business code appends events to a durable store,
//! a relay moves them to a message bus with at-least-once delivery.
//!
//! # Modules
//! - **domain**: ids, `OutboxEntry`, `EventEnvelope`, errors, topic naming
//! - **ports**: `OutboxStore`, `MessageBus`, `Clock`, `IdGenerator`
//! - **impls**: in-memory store, recording bus, log-only bus
//! - **app**: `EventCapture`, `EnvelopeBuilder`, `PublisherLoop`, `OutboxBuilder`
//! - **config**: `RelayConfig`
//! - **observability**: counters and the pending gauge

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{EventCapture, NewEvent, Outbox, OutboxBuilder, PublisherLoop, RelayHandle, TickReport};
pub use config::{ConfigError, RelayConfig};
pub use observability::{MetricsSnapshot, OutboxMetrics};
