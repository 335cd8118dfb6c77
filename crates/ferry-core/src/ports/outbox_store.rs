//! OutboxStore port - 未配送イベントの永続ログ
//!
//! # 契約
//! - 各メソッドは触る行に対して 1 つのアトミックな操作
//! - 選択順は `created_at` 昇順（同時刻は挿入順）
//! - 選択対象は `dead_letter = false AND retry_count < max_retries` の行のみ
//! - バッチ更新は未知の id を無視し、触った行数を返す
//!
//! # Claim
//! 複数の relay が 1 つの store を共有してよい。relay は `claim_batch` で
//! claim した行だけを publish する。`claim_batch` は有効な claim を持つ行を
//! 飛ばす（`SELECT ... FOR UPDATE SKIP LOCKED` 相当）。
//! `increment_retry_by_ids` / `mark_dead_letter_by_ids` / `release_by_ids` は
//! claim を外す。tick の途中で死んだ relay の claim は期限切れを待つ。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EntryId, OutboxEntry, RelayId, StoreError};

/// relay による行の一時的な確保
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub owner: RelayId,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(owner: RelayId, expires_at: DateTime<Utc>) -> Self {
        Self { owner, expires_at }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append one entry.
    async fn insert(&self, entry: OutboxEntry) -> Result<(), StoreError>;

    async fn get(&self, id: EntryId) -> Result<Option<OutboxEntry>, StoreError>;

    /// Read-only selection of up to `limit` selectable rows, oldest first.
    async fn select_batch(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Like `select_batch`, but skips rows with a live claim and stamps
    /// `claim` on every returned row.
    async fn claim_batch(
        &self,
        limit: usize,
        max_retries: u32,
        claim: Claim,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Remove delivered rows.
    async fn delete_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError>;

    /// `retry_count += 1` and release the claim.
    async fn increment_retry_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError>;

    /// `dead_letter = true` and release the claim.
    async fn mark_dead_letter_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError>;

    /// Dead-letter every row with `retry_count >= max_retries` that is not
    /// dead-lettered yet; returns their ids, oldest first.
    async fn dead_letter_exhausted(&self, max_retries: u32) -> Result<Vec<EntryId>, StoreError>;

    /// Release claims without touching counters.
    async fn release_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError>;

    /// Number of selectable rows, claimed or not.
    async fn count_pending(&self, max_retries: u32) -> Result<usize, StoreError>;

    /// Dead-lettered rows, oldest first, for operator inspection.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;
}
