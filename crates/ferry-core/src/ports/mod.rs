//! Ports - the seams to external systems.
//!
//! The outbox store and the message bus are owned by the host service; the
//! relay only sees these traits. Clock and id generation are ports too so
//! tests can pin time.

pub mod clock;
pub mod id_generator;
pub mod message_bus;
pub mod outbox_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::message_bus::{MessageBus, PublishAck};
pub use self::outbox_store::{Claim, OutboxStore};
