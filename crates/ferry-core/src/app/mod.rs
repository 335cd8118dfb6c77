//! App - capture and relay built on the ports.
//!
//! # Components
//! - **EventCapture**: append API for business code
//! - **EnvelopeBuilder**: entry -> bus-neutral envelope
//! - **PublisherLoop**: the relay (claim -> publish -> bookkeeping)
//! - **OutboxBuilder**: wiring with fail-fast checks
//! - **OutboxStatus**: operator view

pub mod builder;
pub mod capture;
pub mod envelope_builder;
pub mod publisher_loop;
pub mod status;

pub use self::builder::{BuildError, Outbox, OutboxBuilder};
pub use self::capture::{EventCapture, NewEvent};
pub use self::envelope_builder::EnvelopeBuilder;
pub use self::publisher_loop::{PublisherLoop, RelayHandle, TickReport};
pub use self::status::OutboxStatus;
