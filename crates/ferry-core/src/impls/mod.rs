//! Impls - in-process implementations of the ports.
//!
//! - **InMemoryOutboxStore**: development/test store with claim support
//! - **InMemoryBus**: recording bus with scripted failures
//! - **LoggingBus**: log-only delivery
//!
//! Database stores and broker clients belong to the host service and plug in
//! through the same traits.

pub mod inmem_bus;
pub mod inmem_store;
pub mod logging_bus;

pub use self::inmem_bus::{InMemoryBus, PublishedMessage, Scripted};
pub use self::inmem_store::InMemoryOutboxStore;
pub use self::logging_bus::LoggingBus;
