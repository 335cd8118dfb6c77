//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID + Phantom type
//! すべての ID は ULID を `Id<T>` で包んだもの。
//! - **時刻でソート可能**: 上位 48 bit が timestamp
//! - **分散生成可能**: 複数の relay インスタンスで調整なしに生成できる
//! - **型安全**: `EntryId` と `EventId` はコンパイル時に混同できない
//!
//! Display は型ごとのプレフィックス（`entry-`, `evt-`, `relay-`）付き。
//! serde では素の ULID 文字列になる（envelope にそのまま載せるため）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display prefix, e.g. `"entry-"`.
    fn prefix() -> &'static str;
}

/// ULID ベースのジェネリック ID
///
/// `T` はコンパイル時にしか存在しない（PhantomData）。サイズは `Ulid` と同じ。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for outbox rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entry {}

impl IdMarker for Entry {
    fn prefix() -> &'static str {
        "entry-"
    }
}

/// Marker for published envelopes (one per delivery attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "evt-"
    }
}

/// Marker for relay instances (claim owners).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relay {}

impl IdMarker for Relay {
    fn prefix() -> &'static str {
        "relay-"
    }
}

/// Identifier of an outbox row. Assigned at capture, never changes.
pub type EntryId = Id<Entry>;

/// Identifier of one envelope handed to the bus.
pub type EventId = Id<Event>;

/// Identifier of a relay instance.
pub type RelayId = Id<Relay>;
