//! InMemoryOutboxStore - development/test store.
//!
//! All rows live behind one `tokio::sync::Mutex`, so every trait method is
//! trivially atomic. `set_available(false)` makes every call fail with
//! `StoreError::Unavailable` to exercise outage handling.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{EntryId, OutboxEntry, StoreError};
use crate::ports::{Claim, OutboxStore};

#[derive(Debug, Clone)]
struct StoredRow {
    entry: OutboxEntry,
    /// Insertion sequence; tie-breaker for equal `created_at`.
    seq: u64,
    claim: Option<Claim>,
}

impl StoredRow {
    fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.entry.created_at(), self.seq)
    }
}

#[derive(Default)]
struct InMemoryStoreState {
    rows: HashMap<EntryId, StoredRow>,
    next_seq: u64,
}

impl InMemoryStoreState {
    /// Selectable rows, oldest first.
    fn selectable(&self, max_retries: u32) -> Vec<&StoredRow> {
        let mut rows: Vec<&StoredRow> = self
            .rows
            .values()
            .filter(|row| row.entry.is_selectable(max_retries))
            .collect();
        rows.sort_by_key(|row| row.order_key());
        rows
    }

    fn update_each<F>(&mut self, ids: &[EntryId], mut f: F) -> usize
    where
        F: FnMut(&mut StoredRow),
    {
        let mut touched = 0;
        for id in ids {
            if let Some(row) = self.rows.get_mut(id) {
                f(row);
                touched += 1;
            }
        }
        touched
    }
}

#[derive(Clone)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    available: Arc<AtomicBool>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total rows, including dead-lettered and exhausted ones.
    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current claim on a row, if any (expired claims included).
    pub async fn claim_of(&self, id: EntryId) -> Option<Claim> {
        let state = self.state.lock().await;
        state.rows.get(&id).and_then(|row| row.claim)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        }
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, entry: OutboxEntry) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.rows.contains_key(&entry.id()) {
            return Err(StoreError::DuplicateId(entry.id()));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.rows.insert(
            entry.id(),
            StoredRow {
                entry,
                seq,
                claim: None,
            },
        );
        Ok(())
    }

    async fn get(&self, id: EntryId) -> Result<Option<OutboxEntry>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.rows.get(&id).map(|row| row.entry.clone()))
    }

    async fn select_batch(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .selectable(max_retries)
            .into_iter()
            .take(limit)
            .map(|row| row.entry.clone())
            .collect())
    }

    async fn claim_batch(
        &self,
        limit: usize,
        max_retries: u32,
        claim: Claim,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let ids: Vec<EntryId> = state
            .selectable(max_retries)
            .into_iter()
            .filter(|row| !row.claim.is_some_and(|c| c.is_live(now)))
            .take(limit)
            .map(|row| row.entry.id())
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = state.rows.get_mut(&id) {
                row.claim = Some(claim);
                claimed.push(row.entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn delete_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(ids.iter().filter(|id| state.rows.remove(*id).is_some()).count())
    }

    async fn increment_retry_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.update_each(ids, |row| {
            row.entry.record_failed_attempt();
            row.claim = None;
        }))
    }

    async fn mark_dead_letter_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.update_each(ids, |row| {
            row.entry.mark_dead_letter();
            row.claim = None;
        }))
    }

    async fn dead_letter_exhausted(&self, max_retries: u32) -> Result<Vec<EntryId>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let mut rows: Vec<&StoredRow> = state
            .rows
            .values()
            .filter(|row| !row.entry.is_dead_letter() && row.entry.retry_count() >= max_retries)
            .collect();
        rows.sort_by_key(|row| row.order_key());
        let ids: Vec<EntryId> = rows.into_iter().map(|row| row.entry.id()).collect();

        state.update_each(&ids, |row| {
            row.entry.mark_dead_letter();
            row.claim = None;
        });
        Ok(ids)
    }

    async fn release_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.update_each(ids, |row| row.claim = None))
    }

    async fn count_pending(&self, max_retries: u32) -> Result<usize, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|row| row.entry.is_selectable(max_retries))
            .count())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut rows: Vec<&StoredRow> = state
            .rows
            .values()
            .filter(|row| row.entry.is_dead_letter())
            .collect();
        rows.sort_by_key(|row| row.order_key());
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| row.entry.clone())
            .collect())
    }
}
