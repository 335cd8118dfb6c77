//! IdGenerator port - ID 生成
//!
//! relay インスタンス間で調整なしに一意である必要があるため、本番は ULID。

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::{EntryId, EventId, RelayId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    /// Id for a new outbox row.
    fn generate_entry_id(&self) -> EntryId;

    /// Id for an envelope (one per delivery attempt).
    fn generate_event_id(&self) -> EventId;

    /// Id for a relay instance.
    fn generate_relay_id(&self) -> RelayId;
}

impl<G: IdGenerator + ?Sized> IdGenerator for Arc<G> {
    fn generate_entry_id(&self) -> EntryId {
        (**self).generate_entry_id()
    }

    fn generate_event_id(&self) -> EventId {
        (**self).generate_event_id()
    }

    fn generate_relay_id(&self) -> RelayId {
        (**self).generate_relay_id()
    }
}

/// timestamp 部分を `Clock` から取る ULID ジェネレータ
///
/// FixedClock を使えば timestamp は決定的になり、
/// 乱数部分で一意性は保たれる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_entry_id(&self) -> EntryId {
        EntryId::from(self.next_ulid())
    }

    fn generate_event_id(&self) -> EventId {
        EventId::from(self.next_ulid())
    }

    fn generate_relay_id(&self) -> RelayId {
        RelayId::from(self.next_ulid())
    }
}
