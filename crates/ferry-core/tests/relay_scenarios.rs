//! End-to-end relay behaviour over the in-memory store and bus.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use serde::ser::Error as _;

use ferry_core::domain::{EntryId, OutboxEntry, PublishError, StoreError};
use ferry_core::impls::{InMemoryBus, InMemoryOutboxStore};
use ferry_core::ports::{Claim, FixedClock, OutboxStore, UlidGenerator};
use ferry_core::{EventCapture, OutboxMetrics, PublisherLoop, RelayConfig};

struct World {
    capture: EventCapture,
    relay: PublisherLoop,
    store: InMemoryOutboxStore,
    bus: InMemoryBus,
    clock: Arc<FixedClock>,
    metrics: Arc<OutboxMetrics>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn world_with(config: RelayConfig, store: Arc<dyn OutboxStore>, inner: InMemoryOutboxStore) -> World {
    let clock = Arc::new(FixedClock::new(t0()));
    let ids = Arc::new(UlidGenerator::new(clock.clone()));
    let bus = InMemoryBus::new(4);
    let metrics = Arc::new(OutboxMetrics::new());
    let capture = EventCapture::new(store.clone(), ids.clone(), clock.clone(), metrics.clone());
    let relay = PublisherLoop::new(
        config,
        store,
        Arc::new(bus.clone()),
        ids,
        clock.clone(),
        metrics.clone(),
    );
    World {
        capture,
        relay,
        store: inner,
        bus,
        clock,
        metrics,
    }
}

fn world(config: RelayConfig) -> World {
    let store = InMemoryOutboxStore::new();
    world_with(config, Arc::new(store.clone()), store)
}

#[tokio::test]
async fn scenario_a_single_event_is_delivered_and_removed() {
    let w = world(RelayConfig::default());

    w.capture
        .save_event::<(), _>("User", "U1", "CREATED", None, Some(serde_json::json!({"name": "A"})))
        .await
        .unwrap();

    let report = w.relay.tick().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert!(w.store.is_empty().await);
    let m = w.metrics.snapshot();
    assert_eq!(m.relayed, 1);
    assert_eq!(m.failed, 0);
    assert_eq!(m.capture_errors, 0);

    let published = w.bus.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "user.created");
    assert_eq!(published[0].envelope.data["newValue"]["name"], "A");
}

#[tokio::test]
async fn scenario_b_three_failures_dead_letter_on_the_third() {
    let w = world(RelayConfig::builder().max_retries(3).build().unwrap());
    let id = w
        .capture
        .save_event::<(), ()>("User", "U1", "CREATED", None, None)
        .await
        .unwrap();
    w.bus.fail_always(Some(PublishError::Network("broker down".into()))).await;

    let expected = [(1, false), (2, false), (3, true)];
    for (tick, (retries, dead)) in expected.into_iter().enumerate() {
        let report = w.relay.tick().await.unwrap();
        assert_eq!(report.selected, 1, "tick {}", tick + 1);

        let entry = w.store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.retry_count(), retries, "tick {}", tick + 1);
        assert_eq!(entry.is_dead_letter(), dead, "tick {}", tick + 1);
    }

    let report = w.relay.tick().await.unwrap();
    assert_eq!(report.selected, 0);
    assert_eq!(w.bus.attempts().await, 3);
    assert_eq!(w.metrics.snapshot().dead_lettered, 1);

    // Still there, still dead, for an operator.
    let entry = w.store.get(id).await.unwrap().unwrap();
    assert!(entry.is_dead_letter());
    assert_eq!(entry.retry_count(), 3);
}

#[tokio::test]
async fn scenario_c_creation_order_with_batch_of_one() {
    let w = world(RelayConfig::builder().batch_size(1).build().unwrap());
    let first = w
        .capture
        .save_event::<(), ()>("User", "U1", "CREATED", None, None)
        .await
        .unwrap();
    w.clock.advance(Duration::seconds(1));
    let second = w
        .capture
        .save_event::<(), ()>("User", "U2", "CREATED", None, None)
        .await
        .unwrap();

    w.relay.tick().await.unwrap();
    assert!(w.store.get(first).await.unwrap().is_none());
    assert!(w.store.get(second).await.unwrap().is_some());

    w.relay.tick().await.unwrap();
    assert!(w.store.get(second).await.unwrap().is_none());

    let keys: Vec<_> = w.bus.published().await.into_iter().map(|m| m.partition_key).collect();
    assert_eq!(keys, vec!["U1".to_string(), "U2".to_string()]);
}

struct NotSerializable;

impl Serialize for NotSerializable {
    fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom("refuses"))
    }
}

/// Stand-in for a business operation that records an event on the side.
async fn reset_password(capture: &EventCapture, user_id: &str) -> Result<&'static str, String> {
    capture
        .save_event::<(), _>("User", user_id, "PASSWORD_RESET_REQUESTED", None, Some(NotSerializable))
        .await;
    Ok("reset email queued")
}

#[tokio::test]
async fn scenario_d_capture_failure_does_not_block_the_caller() {
    let w = world(RelayConfig::default());

    let outcome = reset_password(&w.capture, "U1").await;

    assert_eq!(outcome, Ok("reset email queued"));
    assert!(w.store.is_empty().await);
    assert_eq!(w.metrics.snapshot().capture_errors, 1);
    assert_eq!(w.metrics.snapshot().created, 0);
}

#[tokio::test]
async fn retry_count_never_decreases_and_dead_letters_stay_dead() {
    let w = world(RelayConfig::builder().max_retries(4).build().unwrap());
    let ids: Vec<EntryId> = {
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                w.capture
                    .save_event::<(), ()>("Order", format!("o-{i}"), "PLACED", None, None)
                    .await
                    .unwrap(),
            );
        }
        ids
    };
    w.bus.fail_key("o-1", PublishError::Network("x".into())).await;
    w.bus.fail_key("o-3", PublishError::Rejected("y".into())).await;

    let mut last: Vec<Option<OutboxEntry>> = vec![None; ids.len()];
    for _ in 0..6 {
        w.relay.tick().await.unwrap();
        for (i, id) in ids.iter().enumerate() {
            let now = w.store.get(*id).await.unwrap();
            if let (Some(prev), Some(cur)) = (&last[i], &now) {
                assert!(cur.retry_count() >= prev.retry_count());
                if prev.is_dead_letter() {
                    assert!(cur.is_dead_letter());
                }
            }
            last[i] = now;
        }
    }

    // Delivered ones never come back.
    for i in [0, 2, 4] {
        assert!(w.store.get(ids[i]).await.unwrap().is_none());
    }
    for i in [1, 3] {
        let e = w.store.get(ids[i]).await.unwrap().unwrap();
        assert_eq!(e.retry_count(), 4);
        assert!(e.is_dead_letter());
    }
    assert_eq!(w.bus.published().await.len(), 3);
}

#[tokio::test]
async fn batches_are_bounded_and_oldest_first() {
    let w = world(RelayConfig::builder().batch_size(3).build().unwrap());
    // Capture out of timestamp order.
    for secs in [50, 10, 40, 20, 30, 0, 60] {
        w.clock.set(t0() + Duration::seconds(secs));
        w.capture
            .save_event::<(), ()>("User", format!("u-{secs}"), "CREATED", None, None)
            .await
            .unwrap();
    }

    let batch = w.store.select_batch(3, 3).await.unwrap();
    assert_eq!(batch.len(), 3);
    assert!(batch.windows(2).all(|p| p[0].created_at() <= p[1].created_at()));

    let mut sizes = Vec::new();
    loop {
        let report = w.relay.tick().await.unwrap();
        if report.selected == 0 {
            break;
        }
        assert!(report.selected <= 3);
        sizes.push(report.selected);
    }
    assert_eq!(sizes, vec![3, 3, 1]);

    let keys: Vec<_> = w.bus.published().await.into_iter().map(|m| m.partition_key).collect();
    assert_eq!(keys, vec!["u-0", "u-10", "u-20", "u-30", "u-40", "u-50", "u-60"]);
}

#[tokio::test]
async fn same_aggregate_stays_on_one_partition_in_order() {
    let w = world(RelayConfig::default());
    for event in ["CREATED", "RENAMED", "DELETED"] {
        w.capture
            .save_event::<(), ()>("User", "U7", event, None, None)
            .await
            .unwrap();
        w.clock.advance(Duration::milliseconds(10));
    }
    w.capture
        .save_event::<(), ()>("User", "U8", "CREATED", None, None)
        .await
        .unwrap();

    w.relay.tick().await.unwrap();

    let u7: Vec<_> = w
        .bus
        .published()
        .await
        .into_iter()
        .filter(|m| m.partition_key == "U7")
        .collect();
    assert_eq!(u7.len(), 3);
    assert!(u7.iter().all(|m| m.partition == u7[0].partition));
    assert!(u7.windows(2).all(|p| p[0].offset < p[1].offset));
    let types: Vec<_> = u7.iter().map(|m| m.envelope.event_type.as_str()).collect();
    assert_eq!(types, vec!["CREATED", "RENAMED", "DELETED"]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Delete,
    IncrementRetry,
    MarkDeadLetter,
}

/// A store where the `nth` call of one bookkeeping write fails, as if the
/// connection dropped in the middle of a tick.
struct FlakyStore {
    inner: InMemoryOutboxStore,
    failing: Write,
    nth: usize,
    calls: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: InMemoryOutboxStore, failing: Write, nth: usize) -> Self {
        Self {
            inner,
            failing,
            nth,
            calls: AtomicUsize::new(0),
        }
    }

    fn check(&self, write: Write) -> Result<(), StoreError> {
        if write == self.failing && self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for FlakyStore {
    async fn insert(&self, entry: OutboxEntry) -> Result<(), StoreError> {
        self.inner.insert(entry).await
    }

    async fn get(&self, id: EntryId) -> Result<Option<OutboxEntry>, StoreError> {
        self.inner.get(id).await
    }

    async fn select_batch(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEntry>, StoreError> {
        self.inner.select_batch(limit, max_retries).await
    }

    async fn claim_batch(
        &self,
        limit: usize,
        max_retries: u32,
        claim: Claim,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        self.inner.claim_batch(limit, max_retries, claim, now).await
    }

    async fn delete_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError> {
        self.check(Write::Delete)?;
        self.inner.delete_by_ids(ids).await
    }

    async fn increment_retry_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError> {
        self.check(Write::IncrementRetry)?;
        self.inner.increment_retry_by_ids(ids).await
    }

    async fn mark_dead_letter_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError> {
        self.check(Write::MarkDeadLetter)?;
        self.inner.mark_dead_letter_by_ids(ids).await
    }

    async fn dead_letter_exhausted(&self, max_retries: u32) -> Result<Vec<EntryId>, StoreError> {
        self.inner.dead_letter_exhausted(max_retries).await
    }

    async fn release_by_ids(&self, ids: &[EntryId]) -> Result<usize, StoreError> {
        self.inner.release_by_ids(ids).await
    }

    async fn count_pending(&self, max_retries: u32) -> Result<usize, StoreError> {
        self.inner.count_pending(max_retries).await
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.inner.dead_letters(limit).await
    }
}

fn flaky_world(config: RelayConfig, failing: Write, nth: usize) -> World {
    let inner = InMemoryOutboxStore::new();
    let flaky = Arc::new(FlakyStore::new(inner.clone(), failing, nth));
    world_with(config, flaky, inner)
}

#[tokio::test]
async fn lost_bookkeeping_leads_to_a_duplicate_that_consumers_absorb() {
    let w = flaky_world(RelayConfig::default(), Write::Delete, 1);

    w.capture
        .save_event::<(), _>("User", "U1", "CREATED", None, Some(serde_json::json!({"name": "A"})))
        .await
        .unwrap();

    assert!(w.relay.tick().await.is_err());
    assert_eq!(w.bus.published().await.len(), 1);

    // Our own claim still blocks the row until it expires.
    assert_eq!(w.relay.tick().await.unwrap().selected, 0);
    w.clock.advance(Duration::seconds(61));
    assert_eq!(w.relay.tick().await.unwrap().delivered, 1);
    assert!(w.store.is_empty().await);

    let published = w.bus.published().await;
    assert_eq!(published.len(), 2);
    assert_ne!(published[0].envelope.id, published[1].envelope.id);

    // An idempotent consumer keyed on the business content sees one event.
    let seen: HashSet<String> = published
        .iter()
        .map(|m| format!("{}|{}|{}", m.envelope.subject, m.envelope.event_type, m.envelope.data))
        .collect();
    assert_eq!(seen.len(), 1);
}

/// Pending rows or dead letters; anything else is invisible to an operator.
async fn assert_visible(w: &World, id: EntryId, max_retries: u32) {
    let entry = w.store.get(id).await.unwrap().unwrap();
    let pending = w.store.select_batch(100, max_retries).await.unwrap();
    let dead = w.store.dead_letters(100).await.unwrap();
    let listed = pending.iter().any(|e| e.id() == id) || dead.iter().any(|e| e.id() == id);
    assert!(listed, "entry {id} is neither pending nor dead-lettered: {entry:?}");
}

#[tokio::test]
async fn failed_dead_letter_write_leaves_the_entry_pending() {
    let w = flaky_world(
        RelayConfig::builder().max_retries(3).build().unwrap(),
        Write::MarkDeadLetter,
        1,
    );
    let id = w
        .capture
        .save_event::<(), ()>("User", "U1", "CREATED", None, None)
        .await
        .unwrap();
    w.bus.fail_always(Some(PublishError::Network("broker down".into()))).await;

    w.relay.tick().await.unwrap();
    w.relay.tick().await.unwrap();
    assert!(w.relay.tick().await.is_err());

    let entry = w.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.retry_count(), 2);
    assert!(!entry.is_dead_letter());
    assert_eq!(w.store.count_pending(3).await.unwrap(), 1);
    assert_visible(&w, id, 3).await;

    // Retried once the claim from the aborted tick expires.
    w.clock.advance(Duration::seconds(61));
    let report = w.relay.tick().await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.dead_lettered, 1);

    let entry = w.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.retry_count(), 3);
    assert!(entry.is_dead_letter());
    assert_visible(&w, id, 3).await;
}

#[tokio::test]
async fn failed_retry_increment_after_dead_letter_stays_visible() {
    let w = flaky_world(
        RelayConfig::builder().max_retries(3).build().unwrap(),
        Write::IncrementRetry,
        3,
    );
    let id = w
        .capture
        .save_event::<(), ()>("User", "U1", "CREATED", None, None)
        .await
        .unwrap();
    w.bus.fail_always(Some(PublishError::Network("broker down".into()))).await;

    w.relay.tick().await.unwrap();
    w.relay.tick().await.unwrap();
    assert!(w.relay.tick().await.is_err());

    let entry = w.store.get(id).await.unwrap().unwrap();
    assert!(entry.is_dead_letter());
    assert_eq!(entry.retry_count(), 2);
    assert_eq!(w.store.count_pending(3).await.unwrap(), 0);
    assert_visible(&w, id, 3).await;

    w.clock.advance(Duration::seconds(61));
    assert_eq!(w.relay.tick().await.unwrap().selected, 0);
    assert_eq!(w.bus.attempts().await, 3);
}

#[tokio::test]
async fn failed_retry_increment_below_the_ceiling_is_retried() {
    let w = flaky_world(
        RelayConfig::builder().max_retries(3).build().unwrap(),
        Write::IncrementRetry,
        1,
    );
    let id = w
        .capture
        .save_event::<(), ()>("User", "U1", "CREATED", None, None)
        .await
        .unwrap();
    w.bus.fail_next(PublishError::Network("blip".into())).await;

    assert!(w.relay.tick().await.is_err());
    let entry = w.store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.retry_count(), 0);
    assert_visible(&w, id, 3).await;

    w.clock.advance(Duration::seconds(61));
    assert_eq!(w.relay.tick().await.unwrap().delivered, 1);
    assert!(w.store.is_empty().await);
}
